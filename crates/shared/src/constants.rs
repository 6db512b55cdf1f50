/// Wire tag of the single-key-per-account protocol.
pub const PROTOCOL_V1: &str = "v1";
/// Wire tag of the multi-device envelope protocol.
pub const PROTOCOL_V2: &str = "v2";
/// Version of the device key format published to the directory.
pub const CURRENT_KEY_VERSION: u32 = 1;
/// Maximum number of characters kept in an encrypted list-view preview.
pub const PREVIEW_MAX_CHARS: usize = 80;
/// Maximum size for a single message plaintext in bytes.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 64 * 1024;
/// Maximum media file size accepted for encryption: 100 MB.
pub const MAX_MEDIA_SIZE_BYTES: usize = 100 * 1024 * 1024;
/// Shown instead of content when this device holds no key box for a message.
pub const UNAVAILABLE_PLACEHOLDER: &str = "Message unavailable on this device";
/// Shown instead of content when the sender's pinned key no longer matches.
pub const KEY_CHANGED_PLACEHOLDER: &str =
    "Encryption key changed. Verify this contact to read new messages.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_tags_differ() {
        assert_ne!(PROTOCOL_V1, PROTOCOL_V2);
    }

    #[test]
    fn size_limits_are_ordered() {
        assert!(PREVIEW_MAX_CHARS < MAX_MESSAGE_SIZE_BYTES);
        assert!(MAX_MESSAGE_SIZE_BYTES < MAX_MEDIA_SIZE_BYTES);
    }
}
