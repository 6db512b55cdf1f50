//! Backend collaborators of the orchestrator.
//!
//! Transport and persistence live outside this crate; the orchestrator only
//! sees these traits. The device directory port is
//! [`rendezvous_crypto::directory::DeviceDirectory`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use rendezvous_shared::api::attachment::AttachmentMetadata;
use rendezvous_shared::api::conversation::ConversationMembers;
use rendezvous_shared::api::message::{MessageRow, SendEnvelopeRequest, SendLegacyRequest};
use rendezvous_shared::error::BackendError;
use rendezvous_shared::ids::{ConversationId, MessageId};

#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    async fn members(&self, conversation_id: ConversationId) -> Result<ConversationMembers, BackendError>;
}

/// Encrypted message persistence.
///
/// Sends are idempotent on `client_message_id`: retrying a request that
/// already landed returns the original message id. A message and the
/// attachment rows in its request are stored together or not at all.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn send_envelope(&self, request: SendEnvelopeRequest) -> Result<MessageId, BackendError>;

    async fn send_legacy(&self, request: SendLegacyRequest) -> Result<MessageId, BackendError>;

    /// Stored messages of a conversation, oldest first.
    async fn fetch_messages(&self, conversation_id: ConversationId) -> Result<Vec<MessageRow>, BackendError>;

    /// Messages stored after the call, as they arrive.
    async fn subscribe(
        &self,
        conversation_id: ConversationId,
    ) -> Result<BoxStream<'static, MessageRow>, BackendError>;
}

/// Attachment metadata lookup. Rows are written together with their
/// message by [`MessageStore`] and never carry key material.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn fetch_attachments(&self, message_id: MessageId) -> Result<Vec<AttachmentMetadata>, BackendError>;
}
