//! Send and receive paths for one signed-in user.
//!
//! The [`Messenger`] is the only component that knows both protocol
//! versions and the backend collaborators. Sends resolve the conversation,
//! pick the protocol for the session, check every peer key against the trust
//! store and persist the sealed message. Receives choose the protocol from
//! the stored version tag, and failures that only concern one message are
//! turned into placeholder bodies.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{BoxStream, StreamExt};
use rendezvous_crypto::directory::DeviceDirectory;
use rendezvous_crypto::envelope::{
    decrypt_envelope_for_device, encrypt_envelope_with_preview, EncryptedMessageEnvelope,
};
use rendezvous_crypto::error::{CryptoError, ErrorKind};
use rendezvous_crypto::fingerprint::{self, Fingerprint};
use rendezvous_crypto::identity::{DeviceIdentity, IdentityManager, LegacyIdentity};
use rendezvous_crypto::keys::PublicKey;
use rendezvous_crypto::legacy::{decrypt_legacy, encrypt_legacy, LegacyEncryptedMessage};
use rendezvous_crypto::media::{self, EncryptedMediaFile, MediaKeyMaterial};
use rendezvous_crypto::pinning::{PeerId, TrustStore};
use rendezvous_crypto::storage::SecureStore;
use rendezvous_crypto::version::ProtocolVersion;
use rendezvous_shared::api::attachment::{AttachmentMetadata, MediaKind};
use rendezvous_shared::api::conversation::ConversationMembers;
use rendezvous_shared::api::message::{
    EncryptedBody, EnvelopePayload, LegacyPayload, MessageKind, MessageRow, SendEnvelopeRequest,
    SendLegacyRequest,
};
use rendezvous_shared::constants::{KEY_CHANGED_PLACEHOLDER, UNAVAILABLE_PLACEHOLDER};
use rendezvous_shared::error::BackendError;
use rendezvous_shared::ids::{
    AttachmentId, ClientMessageId, ConversationId, DeviceId, MessageId, UserId,
};
use tokio::sync::OnceCell;

use crate::config::MessagingConfig;
use crate::payload::{AttachmentDescriptor, DecryptedAttachment, MediaPayload, ThumbnailDescriptor};
use crate::ports::{AttachmentStore, ConversationDirectory, MessageStore};
use crate::protocol::ProtocolState;
use crate::session::SessionCache;

/// Backend collaborators used by a [`Messenger`].
#[derive(Clone)]
pub struct Backend {
    pub conversations: Arc<dyn ConversationDirectory>,
    pub devices: Arc<dyn DeviceDirectory>,
    pub messages: Arc<dyn MessageStore>,
    pub attachments: Arc<dyn AttachmentStore>,
}

/// Lifecycle of an outgoing message.
///
/// `Composing -> Encrypting -> Persisting -> Delivered`, with `Failed`
/// reachable from every non-terminal state. A v2 write that finds the
/// schema missing goes back from `Persisting` to `Encrypting` once for the
/// legacy retry.
#[derive(Debug)]
pub enum SendState {
    Composing,
    Encrypting,
    Persisting,
    Delivered(MessageId),
    Failed(CryptoError),
}

impl SendState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SendState::Delivered(_) | SendState::Failed(_))
    }

    fn name(&self) -> &'static str {
        match self {
            SendState::Composing => "composing",
            SendState::Encrypting => "encrypting",
            SendState::Persisting => "persisting",
            SendState::Delivered(_) => "delivered",
            SendState::Failed(_) => "failed",
        }
    }

    fn can_advance_to(&self, next: &SendState) -> bool {
        matches!(
            (self, next),
            (SendState::Composing, SendState::Encrypting)
                | (SendState::Encrypting, SendState::Persisting)
                | (SendState::Persisting, SendState::Encrypting)
                | (SendState::Persisting, SendState::Delivered(_))
        ) || (!self.is_terminal() && matches!(next, SendState::Failed(_)))
    }
}

/// An outgoing message as returned to the caller, always in a terminal
/// state.
#[derive(Debug)]
pub struct OutboundMessage {
    pub client_message_id: ClientMessageId,
    pub conversation_id: ConversationId,
    pub kind: MessageKind,
    version: Option<ProtocolVersion>,
    state: SendState,
}

impl OutboundMessage {
    fn new(conversation_id: ConversationId, kind: MessageKind) -> Self {
        Self {
            client_message_id: ClientMessageId::new(),
            conversation_id,
            kind,
            version: None,
            state: SendState::Composing,
        }
    }

    fn advance(&mut self, next: SendState) {
        debug_assert!(
            self.state.can_advance_to(&next),
            "invalid send transition {} -> {}",
            self.state.name(),
            next.name()
        );
        tracing::debug!(
            client_message_id = %self.client_message_id,
            from = self.state.name(),
            to = next.name(),
            "send state"
        );
        self.state = next;
    }

    pub fn state(&self) -> &SendState {
        &self.state
    }

    /// Protocol the message was (or was about to be) written with.
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    pub fn message_id(&self) -> Option<MessageId> {
        match self.state {
            SendState::Delivered(id) => Some(id),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<MessageId, CryptoError> {
        match self.state {
            SendState::Delivered(id) => Ok(id),
            SendState::Failed(err) => Err(err),
            other => Err(CryptoError::StorageError(format!(
                "send stopped in {} state",
                other.name()
            ))),
        }
    }
}

/// A media file encrypted into the scratch directory, waiting for upload.
#[derive(Debug)]
pub struct PreparedAttachment {
    pub id: AttachmentId,
    pub media_kind: MediaKind,
    pub duration_ms: Option<u64>,
    pub encrypted: EncryptedMediaFile,
    pub storage_path: Option<String>,
    pub thumbnail: Option<PreparedThumbnail>,
}

/// Encrypted thumbnail bytes, uploaded by the caller next to the attachment.
#[derive(Debug)]
pub struct PreparedThumbnail {
    pub ciphertext: Vec<u8>,
    pub key_material: MediaKeyMaterial,
    pub storage_path: Option<String>,
}

impl PreparedAttachment {
    /// Record where the encrypted file was uploaded.
    pub fn uploaded_to(mut self, storage_path: impl Into<String>) -> Self {
        self.storage_path = Some(storage_path.into());
        self
    }

    /// Encrypt `image` as this attachment's thumbnail under a fresh key.
    pub fn with_thumbnail(mut self, image: &[u8]) -> Result<Self, CryptoError> {
        let (ciphertext, key_material) = media::encrypt_bytes(image)?;
        self.thumbnail = Some(PreparedThumbnail {
            ciphertext,
            key_material,
            storage_path: None,
        });
        Ok(self)
    }

    /// Record where the encrypted thumbnail was uploaded.
    pub fn thumbnail_uploaded_to(mut self, storage_path: impl Into<String>) -> Self {
        if let Some(thumbnail) = self.thumbnail.as_mut() {
            thumbnail.storage_path = Some(storage_path.into());
        }
        self
    }
}

#[derive(Debug, Clone)]
pub enum MessageBody {
    Text(String),
    Media {
        caption: Option<String>,
        attachments: Vec<DecryptedAttachment>,
    },
    /// This device held no key box for the message.
    Unavailable,
    /// The sender's key no longer matches the pinned fingerprint.
    KeyChanged { peer: PeerId },
    /// The message could not be opened.
    Failed(ErrorKind),
}

impl MessageBody {
    /// Text to show in a conversation view.
    pub fn display_text(&self) -> Option<&str> {
        match self {
            MessageBody::Text(text) => Some(text),
            MessageBody::Media { caption, .. } => caption.as_deref(),
            MessageBody::Unavailable => Some(UNAVAILABLE_PLACEHOLDER),
            MessageBody::KeyChanged { .. } => Some(KEY_CHANGED_PLACEHOLDER),
            MessageBody::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecryptedMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_device_id: Option<DeviceId>,
    pub kind: MessageKind,
    pub version: ProtocolVersion,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub body: MessageBody,
}

pub struct Messenger {
    user_id: UserId,
    identities: IdentityManager,
    trust: TrustStore,
    backend: Backend,
    session: Arc<SessionCache>,
    config: MessagingConfig,
    legacy: OnceCell<Arc<LegacyIdentity>>,
}

impl Messenger {
    pub fn new(
        user_id: UserId,
        store: Arc<dyn SecureStore>,
        backend: Backend,
        session: Arc<SessionCache>,
        config: MessagingConfig,
    ) -> Self {
        let identities = IdentityManager::new(
            Arc::clone(&store),
            Arc::clone(&backend.devices),
            Arc::clone(&session.identities),
        );
        let trust = TrustStore::new(store, Arc::clone(&session.pins));
        Self {
            user_id,
            identities,
            trust,
            backend,
            session,
            config,
            legacy: OnceCell::new(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn identities(&self) -> &IdentityManager {
        &self.identities
    }

    pub fn trust(&self) -> &TrustStore {
        &self.trust
    }

    /// Load or create this device's identity and settle the session
    /// protocol.
    pub async fn start(&self) -> Result<ProtocolVersion, CryptoError> {
        let identity = self.identities.get_or_create_identity(self.user_id).await?;
        self.session.protocol.resolve(&self.identities, &identity).await
    }

    pub async fn protocol_state(&self) -> ProtocolState {
        self.session.protocol.state().await
    }

    pub async fn send_text(&self, conversation_id: ConversationId, text: &str) -> OutboundMessage {
        self.send_plaintext(conversation_id, MessageKind::Text, text, &[])
            .await
    }

    /// Encrypt a media file into the scratch directory for upload.
    pub async fn prepare_attachment(
        &self,
        path: &Path,
        media_kind: MediaKind,
        duration_ms: Option<u64>,
    ) -> Result<PreparedAttachment, CryptoError> {
        let encrypted = media::encrypt_file(path, &self.config.media_scratch_dir).await?;
        Ok(PreparedAttachment {
            id: AttachmentId::new(),
            media_kind,
            duration_ms,
            encrypted,
            storage_path: None,
            thumbnail: None,
        })
    }

    /// Send uploaded attachments. Key material goes into the encrypted body
    /// only; the attachment store receives location metadata.
    pub async fn send_media(
        &self,
        conversation_id: ConversationId,
        caption: Option<String>,
        attachments: &[PreparedAttachment],
    ) -> OutboundMessage {
        let kind = if attachments.iter().any(|a| a.media_kind == MediaKind::Video) {
            MessageKind::Video
        } else {
            MessageKind::Image
        };

        match compose_media(caption, attachments) {
            Ok((plaintext, metadata)) => {
                self.send_plaintext(conversation_id, kind, &plaintext, &metadata)
                    .await
            }
            Err(err) => {
                let mut outbound = OutboundMessage::new(conversation_id, kind);
                outbound.advance(SendState::Failed(err));
                outbound
            }
        }
    }

    async fn send_plaintext(
        &self,
        conversation_id: ConversationId,
        kind: MessageKind,
        plaintext: &str,
        attachments: &[AttachmentMetadata],
    ) -> OutboundMessage {
        let mut outbound = OutboundMessage::new(conversation_id, kind);
        match self.deliver(&mut outbound, plaintext, attachments).await {
            Ok(message_id) => {
                outbound.advance(SendState::Delivered(message_id));
                tracing::info!(
                    %conversation_id,
                    %message_id,
                    version = ?outbound.version,
                    "message delivered"
                );
            }
            Err(err) => {
                tracing::warn!(
                    %conversation_id,
                    client_message_id = %outbound.client_message_id,
                    kind = %err.kind(),
                    "message send failed"
                );
                outbound.advance(SendState::Failed(err));
            }
        }
        outbound
    }

    async fn deliver(
        &self,
        outbound: &mut OutboundMessage,
        plaintext: &str,
        attachments: &[AttachmentMetadata],
    ) -> Result<MessageId, CryptoError> {
        outbound.advance(SendState::Encrypting);
        let identity = self.identities.get_or_create_identity(self.user_id).await?;
        let version = self.session.protocol.resolve(&self.identities, &identity).await?;
        let members = self
            .backend
            .conversations
            .members(outbound.conversation_id)
            .await
            .map_err(CryptoError::from_backend_read)?;

        let message_id = match version {
            ProtocolVersion::V2 => {
                let envelope = self
                    .seal_envelope(&identity, &members, plaintext, outbound.kind)
                    .await?;
                outbound.version = Some(ProtocolVersion::V2);
                outbound.advance(SendState::Persisting);
                let request = SendEnvelopeRequest {
                    conversation_id: outbound.conversation_id,
                    sender_device_id: identity.device_id,
                    client_message_id: outbound.client_message_id,
                    kind: outbound.kind,
                    version: ProtocolVersion::V2.as_tag().to_string(),
                    envelope: envelope.to_payload(),
                    attachments: attachments.to_vec(),
                };
                match self.backend.messages.send_envelope(request).await {
                    Ok(id) => id,
                    Err(BackendError::SchemaUnavailable(detail)) => {
                        self.session.protocol.invalidate().await;
                        if members.legacy_counterpart(self.user_id).is_none() {
                            return Err(CryptoError::SchemaUnavailable(detail));
                        }
                        outbound.advance(SendState::Encrypting);
                        self.send_legacy_copy(outbound, &members, plaintext, attachments)
                            .await?
                    }
                    Err(err) => return Err(CryptoError::from_backend_write(err)),
                }
            }
            ProtocolVersion::V1 => {
                self.send_legacy_copy(outbound, &members, plaintext, attachments)
                    .await?
            }
        };

        Ok(message_id)
    }

    async fn seal_envelope(
        &self,
        identity: &DeviceIdentity,
        members: &ConversationMembers,
        plaintext: &str,
        kind: MessageKind,
    ) -> Result<EncryptedMessageEnvelope, CryptoError> {
        let mut user_ids = members.member_ids.clone();
        if !user_ids.contains(&self.user_id) {
            user_ids.push(self.user_id);
        }
        let devices: Vec<_> = self
            .identities
            .fetch_recipient_directory(&user_ids)
            .await?
            .into_iter()
            .filter(|d| !(d.user_id == identity.user_id && d.device_id == identity.device_id))
            .collect();

        if let Some(member) = members
            .member_ids
            .iter()
            .find(|m| **m != self.user_id && !devices.iter().any(|d| d.user_id == **m))
        {
            return Err(CryptoError::InvalidRecipient(format!(
                "user {member} has no registered devices"
            )));
        }

        let observed: Vec<_> = devices
            .iter()
            .map(|d| (PeerId::Device(d.user_id, d.device_id), d.public_key))
            .collect();
        self.check_pins(&observed).await?;

        let preview = (kind == MessageKind::Text && self.config.include_preview)
            .then_some(self.config.preview_max_chars);
        encrypt_envelope_with_preview(plaintext, identity, &devices, preview)
    }

    async fn send_legacy_copy(
        &self,
        outbound: &mut OutboundMessage,
        members: &ConversationMembers,
        plaintext: &str,
        attachments: &[AttachmentMetadata],
    ) -> Result<MessageId, CryptoError> {
        let counterpart = members.legacy_counterpart(self.user_id).ok_or_else(|| {
            CryptoError::InvalidRecipient(format!(
                "conversation {} has no legacy counterpart",
                members.conversation_id
            ))
        })?;
        let sender = self.publishing_legacy_identity().await?;
        let counterpart_key = self.identities.fetch_legacy_key(counterpart).await?;
        self.check_pins(&[(PeerId::User(counterpart), counterpart_key)])
            .await?;

        let message = encrypt_legacy(plaintext, &sender, &counterpart_key)?;
        outbound.version = Some(ProtocolVersion::V1);
        outbound.advance(SendState::Persisting);

        let request = SendLegacyRequest {
            conversation_id: outbound.conversation_id,
            client_message_id: outbound.client_message_id,
            kind: outbound.kind,
            version: ProtocolVersion::V1.as_tag().to_string(),
            legacy: message.to_payload(),
            attachments: attachments.to_vec(),
        };
        self.backend
            .messages
            .send_legacy(request)
            .await
            .map_err(CryptoError::from_backend_write)
    }

    /// Legacy identity for writing, published once per session.
    async fn publishing_legacy_identity(&self) -> Result<Arc<LegacyIdentity>, CryptoError> {
        self.legacy
            .get_or_try_init(|| async {
                let identity = self
                    .identities
                    .get_or_create_legacy_identity(self.user_id)
                    .await?;
                self.identities.publish_legacy_key(&identity).await?;
                Ok::<_, CryptoError>(identity)
            })
            .await
            .cloned()
    }

    async fn check_pins(&self, observed: &[(PeerId, PublicKey)]) -> Result<(), CryptoError> {
        let report = self.trust.pin_and_check(self.user_id, observed).await?;
        if report.has_changes() {
            return Err(CryptoError::KeyChanged {
                peers: report.changed,
            });
        }
        Ok(())
    }

    /// Decrypt one stored message.
    ///
    /// Per-message outcomes (no key box, changed sender key, authentication
    /// failure, malformed payload) become the body; only local storage
    /// failures are returned as errors.
    pub async fn decrypt_row(&self, row: &MessageRow) -> Result<DecryptedMessage, CryptoError> {
        self.decrypt_row_with(row, &HashMap::new()).await
    }

    async fn decrypt_row_with(
        &self,
        row: &MessageRow,
        legacy_keys: &HashMap<UserId, PublicKey>,
    ) -> Result<DecryptedMessage, CryptoError> {
        let (version, opened) = match &row.body {
            EncryptedBody::Envelope(payload) => {
                (ProtocolVersion::V2, self.open_envelope(row, payload).await)
            }
            EncryptedBody::Legacy(payload) => (
                ProtocolVersion::V1,
                self.open_legacy(row, payload, legacy_keys).await,
            ),
        };

        let body = match opened {
            Ok(body) => body,
            Err(CryptoError::MissingKeyBox { .. }) => MessageBody::Unavailable,
            Err(CryptoError::KeyChanged { peers }) => match peers.first() {
                Some(peer) => MessageBody::KeyChanged { peer: *peer },
                None => MessageBody::Failed(ErrorKind::KeyChanged),
            },
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::DecryptFailed | ErrorKind::InvalidPayload | ErrorKind::InvalidRecipient
                ) =>
            {
                tracing::warn!(message_id = %row.id, kind = %err.kind(), "message could not be opened");
                MessageBody::Failed(err.kind())
            }
            Err(err) => return Err(err),
        };

        Ok(DecryptedMessage {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            sender_device_id: row.sender_device_id,
            kind: row.kind,
            version,
            created_at: row.created_at,
            body,
        })
    }

    async fn open_envelope(
        &self,
        row: &MessageRow,
        payload: &EnvelopePayload,
    ) -> Result<MessageBody, CryptoError> {
        let identity = self.identities.get_or_create_identity(self.user_id).await?;
        let envelope = EncryptedMessageEnvelope::from_payload(payload)?;
        let key_box = envelope.find_key_box(self.user_id, identity.device_id)?;

        // The sender key in the key box is only trusted once it has opened it.
        let plaintext = decrypt_envelope_for_device(&envelope, key_box, identity.secret_key())?;

        let own_device =
            row.sender_id == self.user_id && row.sender_device_id == Some(identity.device_id);
        if !own_device {
            let sender_device = row.sender_device_id.ok_or_else(|| {
                CryptoError::InvalidPayload("envelope message without sender device".into())
            })?;
            self.check_pins(&[(
                PeerId::Device(row.sender_id, sender_device),
                key_box.sender_public_key,
            )])
            .await?;
        }

        self.render(row, plaintext).await
    }

    async fn open_legacy(
        &self,
        row: &MessageRow,
        payload: &LegacyPayload,
        legacy_keys: &HashMap<UserId, PublicKey>,
    ) -> Result<MessageBody, CryptoError> {
        let message = LegacyEncryptedMessage::from_payload(payload)?;
        let Some(reader) = self.identities.load_legacy_identity(self.user_id).await? else {
            return Ok(MessageBody::Unavailable);
        };

        if row.sender_id == self.user_id {
            let plaintext = decrypt_legacy(&message, &reader, true, reader.public_key())?;
            return self.render(row, plaintext).await;
        }

        let sender = PeerId::User(row.sender_id);
        let sender_key = match legacy_keys.get(&row.sender_id) {
            Some(key) => *key,
            None => self.identities.fetch_legacy_key(row.sender_id).await?,
        };
        let plaintext = match decrypt_legacy(&message, &reader, false, &sender_key) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                // A directory key that no longer matches the pin explains the failure.
                let pinned = self.trust.pinned_fingerprint(self.user_id, sender).await?;
                if pinned.is_some_and(|pin| !pin.matches(&Fingerprint::of(&sender_key))) {
                    return Err(CryptoError::KeyChanged {
                        peers: vec![sender],
                    });
                }
                return Err(err);
            }
        };
        self.check_pins(&[(sender, sender_key)]).await?;
        self.render(row, plaintext).await
    }

    async fn render(&self, row: &MessageRow, plaintext: String) -> Result<MessageBody, CryptoError> {
        if !row.kind.is_media() {
            return Ok(MessageBody::Text(plaintext));
        }

        let payload = MediaPayload::from_plaintext(&plaintext)?;
        let stored = match self.backend.attachments.fetch_attachments(row.id).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(message_id = %row.id, error = %err, "attachment metadata unavailable");
                Vec::new()
            }
        };

        let attachments = payload
            .attachments
            .iter()
            .map(|descriptor| {
                let stored_row = stored.iter().find(|s| s.id == descriptor.attachment_id);
                DecryptedAttachment::merge(descriptor, stored_row)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MessageBody::Media {
            caption: payload.caption,
            attachments,
        })
    }

    /// Fetch and decrypt a conversation. Rows decrypt concurrently.
    pub async fn fetch_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<DecryptedMessage>, CryptoError> {
        let rows = self
            .backend
            .messages
            .fetch_messages(conversation_id)
            .await
            .map_err(CryptoError::from_backend_read)?;

        let legacy_keys = self.prefetch_legacy_keys(&rows).await;
        join_all(rows.iter().map(|row| self.decrypt_row_with(row, &legacy_keys)))
            .await
            .into_iter()
            .collect()
    }

    /// One key lookup per distinct legacy sender. Misses are retried per row
    /// so the row gets the real error.
    async fn prefetch_legacy_keys(&self, rows: &[MessageRow]) -> HashMap<UserId, PublicKey> {
        let senders: BTreeSet<UserId> = rows
            .iter()
            .filter(|r| matches!(r.body, EncryptedBody::Legacy(_)) && r.sender_id != self.user_id)
            .map(|r| r.sender_id)
            .collect();

        join_all(senders.into_iter().map(|sender| async move {
            (sender, self.identities.fetch_legacy_key(sender).await)
        }))
        .await
        .into_iter()
        .filter_map(|(sender, key)| key.ok().map(|key| (sender, key)))
        .collect()
    }

    /// Decrypted messages of `conversation_id` as they are stored.
    pub async fn subscribe(
        self: &Arc<Self>,
        conversation_id: ConversationId,
    ) -> Result<BoxStream<'static, DecryptedMessage>, CryptoError> {
        let rows = self
            .backend
            .messages
            .subscribe(conversation_id)
            .await
            .map_err(CryptoError::from_backend_read)?;

        let messenger = Arc::clone(self);
        Ok(rows
            .then(move |row| {
                let messenger = Arc::clone(&messenger);
                async move { messenger.decrypt_row(&row).await.map_err(|e| (row.id, e)) }
            })
            .filter_map(|result| async move {
                match result {
                    Ok(message) => Some(message),
                    Err((message_id, err)) => {
                        tracing::warn!(%message_id, kind = %err.kind(), "dropping undecryptable message");
                        None
                    }
                }
            })
            .boxed())
    }

    /// Decrypt a downloaded attachment into `output_dir`.
    pub async fn decrypt_attachment(
        &self,
        attachment: &DecryptedAttachment,
        downloaded: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, CryptoError> {
        media::decrypt_file(downloaded, &attachment.key_material, output_dir).await
    }

    /// Decrypt a downloaded thumbnail of `attachment`.
    pub fn decrypt_thumbnail(
        &self,
        attachment: &DecryptedAttachment,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key_material = attachment.thumbnail_key.as_ref().ok_or_else(|| {
            CryptoError::InvalidPayload(format!("attachment {} has no thumbnail", attachment.id))
        })?;
        media::decrypt_bytes(ciphertext, key_material)
    }

    /// Trust the key `peer` currently publishes, replacing a changed pin.
    pub async fn accept_peer_key(&self, peer: PeerId) -> Result<(), CryptoError> {
        let key = self.current_peer_key(peer).await?;
        self.trust.accept_changed_key(self.user_id, peer, &key).await
    }

    /// Safety number between this user's key and `peer`'s current key.
    pub async fn safety_number(&self, peer: PeerId) -> Result<String, CryptoError> {
        let remote = self.current_peer_key(peer).await?;
        let local = match peer {
            PeerId::Device(..) => *self
                .identities
                .get_or_create_identity(self.user_id)
                .await?
                .public_key(),
            PeerId::User(_) => *self
                .identities
                .load_legacy_identity(self.user_id)
                .await?
                .ok_or_else(|| {
                    CryptoError::InvalidRecipient("this account has no legacy key".into())
                })?
                .public_key(),
        };
        Ok(fingerprint::safety_number(&local, &remote))
    }

    async fn current_peer_key(&self, peer: PeerId) -> Result<PublicKey, CryptoError> {
        match peer {
            PeerId::User(user_id) => self.identities.fetch_legacy_key(user_id).await,
            PeerId::Device(user_id, device_id) => self
                .identities
                .fetch_recipient_directory(&[user_id])
                .await?
                .into_iter()
                .find(|d| d.device_id == device_id)
                .map(|d| d.public_key)
                .ok_or_else(|| {
                    CryptoError::InvalidRecipient(format!(
                        "device {device_id} of user {user_id} is not in the directory"
                    ))
                }),
        }
    }
}

fn compose_media(
    caption: Option<String>,
    attachments: &[PreparedAttachment],
) -> Result<(String, Vec<AttachmentMetadata>), CryptoError> {
    if attachments.is_empty() {
        return Err(CryptoError::InvalidPayload("media message without attachments".into()));
    }

    let mut descriptors = Vec::with_capacity(attachments.len());
    let mut metadata = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        let storage_path = attachment.storage_path.clone().ok_or_else(|| {
            CryptoError::InvalidPayload(format!("attachment {} was not uploaded", attachment.id))
        })?;
        let thumbnail = attachment
            .thumbnail
            .as_ref()
            .map(|thumbnail| {
                let storage_path = thumbnail.storage_path.clone().ok_or_else(|| {
                    CryptoError::InvalidPayload(format!(
                        "thumbnail of attachment {} was not uploaded",
                        attachment.id
                    ))
                })?;
                Ok::<_, CryptoError>(ThumbnailDescriptor {
                    storage_path,
                    key: thumbnail.key_material.encode(),
                })
            })
            .transpose()?;
        let thumbnail_path = thumbnail.as_ref().map(|t| t.storage_path.clone());
        descriptors.push(AttachmentDescriptor {
            attachment_id: attachment.id,
            media_kind: attachment.media_kind,
            storage_path: storage_path.clone(),
            size_bytes: attachment.encrypted.ciphertext_size,
            duration_ms: attachment.duration_ms,
            content_hash: attachment.encrypted.content_hash.clone(),
            key: attachment.encrypted.key_material.encode(),
            thumbnail,
        });
        metadata.push(AttachmentMetadata {
            id: attachment.id,
            message_id: None,
            storage_path,
            size_bytes: attachment.encrypted.ciphertext_size,
            media_kind: attachment.media_kind,
            duration_ms: attachment.duration_ms,
            content_hash: attachment.encrypted.content_hash.clone(),
            thumbnail_path,
        });
    }

    let plaintext = MediaPayload {
        caption,
        attachments: descriptors,
    }
    .to_plaintext()?;
    Ok((plaintext, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_state_transitions() {
        let composing = SendState::Composing;
        assert!(composing.can_advance_to(&SendState::Encrypting));
        assert!(!composing.can_advance_to(&SendState::Persisting));
        assert!(SendState::Encrypting.can_advance_to(&SendState::Failed(CryptoError::DecryptFailed)));
        assert!(SendState::Persisting.can_advance_to(&SendState::Delivered(MessageId::new())));
        assert!(!SendState::Delivered(MessageId::new()).can_advance_to(&SendState::Failed(
            CryptoError::DecryptFailed
        )));
    }

    #[test]
    fn placeholders_are_shown_for_unreadable_bodies() {
        assert_eq!(
            MessageBody::Unavailable.display_text(),
            Some(UNAVAILABLE_PLACEHOLDER)
        );
        let peer = PeerId::User(UserId::new());
        assert_eq!(
            MessageBody::KeyChanged { peer }.display_text(),
            Some(KEY_CHANGED_PLACEHOLDER)
        );
        assert_eq!(MessageBody::Failed(ErrorKind::DecryptFailed).display_text(), None);
    }

    #[test]
    fn media_without_upload_fails_to_compose() {
        let err = compose_media(None, &[]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPayload(_)));
    }

    #[test]
    fn unfinished_outbound_is_not_delivered() {
        let outbound = OutboundMessage::new(ConversationId::new(), MessageKind::Text);
        assert!(!outbound.state().is_terminal());
        assert!(outbound.message_id().is_none());
        assert!(outbound.into_result().is_err());
    }
}
