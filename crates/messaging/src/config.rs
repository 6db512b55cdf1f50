use std::path::PathBuf;

use rendezvous_crypto::storage::keychain::DEFAULT_KEYCHAIN_SERVICE;
use rendezvous_shared::constants::PREVIEW_MAX_CHARS;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {name} value: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Messaging client configuration loaded from `rendezvous.toml` with env
/// var overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    /// OS keychain service name for identity keys and the store master key.
    /// Default: "app.rendezvous.e2ee"
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,
    /// SQLCipher secure store file. Unset means keys live in the OS keychain.
    #[serde(default)]
    pub secure_store_path: Option<PathBuf>,
    /// Where encrypted media is staged before upload. Default: system temp dir
    #[serde(default = "default_media_scratch_dir")]
    pub media_scratch_dir: PathBuf,
    /// Characters kept in encrypted previews, at most 80. Default: 80
    #[serde(default = "default_preview_max_chars")]
    pub preview_max_chars: usize,
    /// Whether outgoing text carries an encrypted preview. Default: true
    #[serde(default = "default_include_preview")]
    pub include_preview: bool,
    /// Skip multi-device detection and always write v1. Default: false
    #[serde(default)]
    pub force_legacy: bool,
    /// Tracing log level. Default: "info"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_keyring_service() -> String {
    DEFAULT_KEYCHAIN_SERVICE.to_string()
}
fn default_media_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("rendezvous-media")
}
fn default_preview_max_chars() -> usize {
    PREVIEW_MAX_CHARS
}
fn default_include_preview() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            keyring_service: default_keyring_service(),
            secure_store_path: None,
            media_scratch_dir: default_media_scratch_dir(),
            preview_max_chars: default_preview_max_chars(),
            include_preview: default_include_preview(),
            force_legacy: false,
            log_level: default_log_level(),
        }
    }
}

impl MessagingConfig {
    /// Load `.env`, then the TOML file at `CONFIG_PATH` (default
    /// `rendezvous.toml`), then env var overrides. A missing file yields the
    /// defaults.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "rendezvous.toml".to_string());
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Self::default();
                config.apply_env_overrides()?;
                config.validate()?;
                Ok(config)
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    /// Load configuration from a TOML string, then apply env var overrides.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: MessagingConfig = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values outside what the protocol allows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preview_max_chars > PREVIEW_MAX_CHARS {
            return Err(ConfigError::Invalid {
                field: "preview_max_chars",
                reason: format!("{} exceeds the limit of {PREVIEW_MAX_CHARS}", self.preview_max_chars),
            });
        }
        Ok(())
    }

    /// Apply `RENDEZVOUS_*` environment overrides.
    ///
    /// Returns an error if a variable is set but malformed
    /// (e.g. `RENDEZVOUS_PREVIEW_MAX_CHARS=abc`).
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("RENDEZVOUS_KEYRING_SERVICE") {
            self.keyring_service = val;
        }
        if let Ok(val) = std::env::var("RENDEZVOUS_SECURE_STORE_PATH") {
            self.secure_store_path = (!val.is_empty()).then(|| PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("RENDEZVOUS_MEDIA_SCRATCH_DIR") {
            self.media_scratch_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("RENDEZVOUS_PREVIEW_MAX_CHARS") {
            self.preview_max_chars = val.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "RENDEZVOUS_PREVIEW_MAX_CHARS",
                value: val.clone(),
            })?;
        }
        if let Ok(val) = std::env::var("RENDEZVOUS_FORCE_LEGACY") {
            self.force_legacy = parse_bool(&val).ok_or_else(|| ConfigError::InvalidEnv {
                name: "RENDEZVOUS_FORCE_LEGACY",
                value: val.clone(),
            })?;
        }
        if let Ok(val) = std::env::var("RENDEZVOUS_LOG_LEVEL") {
            self.log_level = val;
        }
        Ok(())
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
