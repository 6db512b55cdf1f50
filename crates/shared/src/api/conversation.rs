use crate::ids::{ConversationId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
    Event,
}

/// Current membership of a conversation.
///
/// `legacy_participants` is set only for conversations created before the
/// multi-device protocol, which have exactly two fixed participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMembers {
    pub conversation_id: ConversationId,
    pub kind: ConversationKind,
    pub member_ids: Vec<UserId>,
    #[serde(default)]
    pub legacy_participants: Option<(UserId, UserId)>,
}

impl ConversationMembers {
    /// The other fixed participant of a legacy conversation, if `me` is one
    /// of the two.
    pub fn legacy_counterpart(&self, me: UserId) -> Option<UserId> {
        match self.legacy_participants {
            Some((a, b)) if a == me => Some(b),
            Some((a, b)) if b == me => Some(a),
            _ => None,
        }
    }
}
