//! In-memory backend implementing every collaborator port, shared by all
//! users of a test. Each user talks to it through a [`UserBackend`] handle
//! that plays the part of the authenticated session.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{BoxStream, StreamExt};
use rendezvous_crypto::directory::DeviceDirectory;
use rendezvous_crypto::storage::MemoryStore;
use rendezvous_messaging::config::MessagingConfig;
use rendezvous_messaging::orchestrator::{Backend, Messenger};
use rendezvous_messaging::ports::{AttachmentStore, ConversationDirectory, MessageStore};
use rendezvous_messaging::session::SessionCache;
use rendezvous_shared::api::attachment::AttachmentMetadata;
use rendezvous_shared::api::conversation::{ConversationKind, ConversationMembers};
use rendezvous_shared::api::device::{DeviceDirectoryRow, LegacyKeyRow};
use rendezvous_shared::api::message::{
    EncryptedBody, MessageRow, SendEnvelopeRequest, SendLegacyRequest,
};
use rendezvous_shared::error::BackendError;
use rendezvous_shared::ids::{ClientMessageId, ConversationId, MessageId, UserId};

#[derive(Default)]
pub struct InMemoryBackend {
    pub conversations: Mutex<HashMap<ConversationId, ConversationMembers>>,
    pub devices: Mutex<Vec<DeviceDirectoryRow>>,
    pub legacy_keys: Mutex<HashMap<UserId, LegacyKeyRow>>,
    pub messages: Mutex<Vec<MessageRow>>,
    pub attachments: Mutex<HashMap<MessageId, Vec<AttachmentMetadata>>>,
    sent: Mutex<HashMap<ClientMessageId, MessageId>>,
    subscribers: Mutex<Vec<(ConversationId, UnboundedSender<MessageRow>)>>,
    /// Device directory tables absent.
    pub device_schema_missing: AtomicBool,
    /// Envelope message columns absent (directory may still exist).
    pub envelope_schema_missing: AtomicBool,
    /// Directory writes fail with a transient error.
    pub directory_unavailable: AtomicBool,
    /// Message writes fail with a transient error and store nothing.
    pub message_writes_unavailable: AtomicBool,
    /// History reads and subscriptions time out.
    pub message_reads_unavailable: AtomicBool,
    pub device_fetches: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn direct_conversation(&self, a: UserId, b: UserId) -> ConversationId {
        let conversation_id = ConversationId::new();
        self.conversations.lock().unwrap().insert(
            conversation_id,
            ConversationMembers {
                conversation_id,
                kind: ConversationKind::Direct,
                member_ids: vec![a, b],
                legacy_participants: Some((a, b)),
            },
        );
        conversation_id
    }

    pub fn group_conversation(&self, members: &[UserId]) -> ConversationId {
        let conversation_id = ConversationId::new();
        self.conversations.lock().unwrap().insert(
            conversation_id,
            ConversationMembers {
                conversation_id,
                kind: ConversationKind::Group,
                member_ids: members.to_vec(),
                legacy_participants: None,
            },
        );
        conversation_id
    }

    pub fn stored_message(&self, id: MessageId) -> MessageRow {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .expect("message stored")
    }

    /// One write for the message and its attachment rows; a repeated client
    /// id returns the first message and stores nothing.
    fn store(
        &self,
        row: MessageRow,
        client_message_id: ClientMessageId,
        attachments: Vec<AttachmentMetadata>,
    ) -> Result<MessageId, BackendError> {
        if self.message_writes_unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("message store offline".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        if let Some(existing) = sent.get(&client_message_id) {
            return Ok(*existing);
        }
        sent.insert(client_message_id, row.id);
        drop(sent);

        let id = row.id;
        if !attachments.is_empty() {
            let rows = attachments
                .into_iter()
                .map(|mut attachment| {
                    attachment.message_id = Some(id);
                    attachment
                })
                .collect();
            self.attachments.lock().unwrap().insert(id, rows);
        }
        self.subscribers
            .lock()
            .unwrap()
            .retain(|(conversation_id, tx)| {
                *conversation_id != row.conversation_id || tx.unbounded_send(row.clone()).is_ok()
            });
        self.messages.lock().unwrap().push(row);
        Ok(id)
    }

    fn schema_check(flag: &AtomicBool, table: &str) -> Result<(), BackendError> {
        if flag.load(Ordering::SeqCst) {
            return Err(BackendError::SchemaUnavailable(table.to_string()));
        }
        Ok(())
    }
}

/// The backend as seen by one signed-in user.
#[derive(Clone)]
pub struct UserBackend {
    pub user_id: UserId,
    pub state: Arc<InMemoryBackend>,
}

#[async_trait]
impl ConversationDirectory for UserBackend {
    async fn members(&self, conversation_id: ConversationId) -> Result<ConversationMembers, BackendError> {
        self.state
            .conversations
            .lock()
            .unwrap()
            .get(&conversation_id)
            .cloned()
            .ok_or_else(|| BackendError::Rejected("unknown conversation".into()))
    }
}

#[async_trait]
impl DeviceDirectory for UserBackend {
    async fn upsert_device(&self, row: &DeviceDirectoryRow) -> Result<(), BackendError> {
        InMemoryBackend::schema_check(&self.state.device_schema_missing, "user_devices")?;
        if self.state.directory_unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("directory offline".into()));
        }
        let mut devices = self.state.devices.lock().unwrap();
        devices.retain(|r| !(r.user_id == row.user_id && r.device_id == row.device_id));
        devices.push(row.clone());
        Ok(())
    }

    async fn fetch_devices(&self, user_ids: &[UserId]) -> Result<Vec<DeviceDirectoryRow>, BackendError> {
        InMemoryBackend::schema_check(&self.state.device_schema_missing, "user_devices")?;
        self.state.device_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|r| user_ids.contains(&r.user_id))
            .cloned()
            .collect())
    }

    async fn publish_legacy_key(&self, row: &LegacyKeyRow) -> Result<(), BackendError> {
        self.state
            .legacy_keys
            .lock()
            .unwrap()
            .insert(row.user_id, row.clone());
        Ok(())
    }

    async fn fetch_legacy_keys(&self, user_ids: &[UserId]) -> Result<Vec<LegacyKeyRow>, BackendError> {
        let keys = self.state.legacy_keys.lock().unwrap();
        Ok(user_ids.iter().filter_map(|id| keys.get(id).cloned()).collect())
    }
}

#[async_trait]
impl MessageStore for UserBackend {
    async fn send_envelope(&self, request: SendEnvelopeRequest) -> Result<MessageId, BackendError> {
        InMemoryBackend::schema_check(&self.state.envelope_schema_missing, "messages.key_boxes")?;
        let row = MessageRow {
            id: MessageId::new(),
            conversation_id: request.conversation_id,
            sender_id: self.user_id,
            sender_device_id: Some(request.sender_device_id),
            kind: request.kind,
            body: EncryptedBody::Envelope(request.envelope),
            created_at: chrono::Utc::now(),
        };
        self.state
            .store(row, request.client_message_id, request.attachments)
    }

    async fn send_legacy(&self, request: SendLegacyRequest) -> Result<MessageId, BackendError> {
        let row = MessageRow {
            id: MessageId::new(),
            conversation_id: request.conversation_id,
            sender_id: self.user_id,
            sender_device_id: None,
            kind: request.kind,
            body: EncryptedBody::Legacy(request.legacy),
            created_at: chrono::Utc::now(),
        };
        self.state
            .store(row, request.client_message_id, request.attachments)
    }

    async fn fetch_messages(&self, conversation_id: ConversationId) -> Result<Vec<MessageRow>, BackendError> {
        if self.state.message_reads_unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Timeout);
        }
        Ok(self
            .state
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn subscribe(
        &self,
        conversation_id: ConversationId,
    ) -> Result<BoxStream<'static, MessageRow>, BackendError> {
        if self.state.message_reads_unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Timeout);
        }
        let (tx, rx) = unbounded();
        self.state
            .subscribers
            .lock()
            .unwrap()
            .push((conversation_id, tx));
        Ok(rx.boxed())
    }
}

#[async_trait]
impl AttachmentStore for UserBackend {
    async fn fetch_attachments(&self, message_id: MessageId) -> Result<Vec<AttachmentMetadata>, BackendError> {
        Ok(self
            .state
            .attachments
            .lock()
            .unwrap()
            .get(&message_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// One app installation signed in as `user_id`: its own secure store and
/// session caches on the shared backend.
pub struct Installation {
    pub store: Arc<MemoryStore>,
    pub messenger: Arc<Messenger>,
}

pub fn install(state: &Arc<InMemoryBackend>, user_id: UserId) -> Installation {
    install_with(state, user_id, MessagingConfig::default())
}

pub fn install_with(
    state: &Arc<InMemoryBackend>,
    user_id: UserId,
    config: MessagingConfig,
) -> Installation {
    install_on(state, user_id, Arc::new(MemoryStore::new()), config)
}

/// A new session on an existing secure store, as after an app restart.
pub fn install_on(
    state: &Arc<InMemoryBackend>,
    user_id: UserId,
    store: Arc<MemoryStore>,
    config: MessagingConfig,
) -> Installation {
    let handle = Arc::new(UserBackend {
        user_id,
        state: Arc::clone(state),
    });
    let backend = Backend {
        conversations: handle.clone(),
        devices: handle.clone(),
        messages: handle.clone(),
        attachments: handle,
    };
    let session = Arc::new(SessionCache::from_config(&config));
    let messenger = Arc::new(Messenger::new(
        user_id,
        store.clone(),
        backend,
        session,
        config,
    ));
    Installation { store, messenger }
}

/// Publish the pre-migration single-key identity of this installation's
/// user, as an older client would have.
pub async fn publish_legacy_identity(installation: &Installation) {
    let messenger = &installation.messenger;
    let identity = messenger
        .identities()
        .get_or_create_legacy_identity(messenger.user_id())
        .await
        .unwrap();
    messenger
        .identities()
        .publish_legacy_key(&identity)
        .await
        .unwrap();
}
