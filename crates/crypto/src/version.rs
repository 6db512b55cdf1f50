use rendezvous_shared::constants::{PROTOCOL_V1, PROTOCOL_V2};
use serde::{Deserialize, Serialize};

/// Message protocol generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Single key per account, plaintext sealed once per participant.
    #[serde(rename = "v1")]
    V1,
    /// Per-device keys, content key wrapped per recipient device.
    #[serde(rename = "v2")]
    V2,
}

impl ProtocolVersion {
    pub fn as_tag(&self) -> &'static str {
        match self {
            ProtocolVersion::V1 => PROTOCOL_V1,
            ProtocolVersion::V2 => PROTOCOL_V2,
        }
    }

    /// Case-sensitive parse of a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            PROTOCOL_V1 => Some(ProtocolVersion::V1),
            PROTOCOL_V2 => Some(ProtocolVersion::V2),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}
