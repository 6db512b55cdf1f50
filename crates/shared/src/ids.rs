macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $generate:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        #[allow(clippy::new_without_default)]
        impl $name {
            /// Generate a fresh identifier.
            pub fn new() -> Self {
                Self($generate)
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(uuid::Uuid::parse_str(s)?))
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(value: uuid::Uuid) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Account identifier assigned by the backend.
    UserId,
    uuid::Uuid::now_v7()
);
define_id!(
    /// Per-installation device identifier. Random (v4) so it carries no
    /// creation timestamp.
    DeviceId,
    uuid::Uuid::new_v4()
);
define_id!(ConversationId, uuid::Uuid::now_v7());
define_id!(MessageId, uuid::Uuid::now_v7());
define_id!(AttachmentId, uuid::Uuid::now_v7());
define_id!(
    /// Client-generated idempotency key attached to every send request.
    ClientMessageId,
    uuid::Uuid::new_v4()
);
