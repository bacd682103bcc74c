//! Forwarder configuration.
//!
//! Configuration is read once at process start:
//! 1. A TOML file: `--config`, else `$MAILFWD_CONFIG`, else
//!    `~/.config/mailfwd/config.toml` (Linux/macOS) or
//!    `%APPDATA%\mailfwd\config.toml` (Windows), if present
//! 2. Environment variables, which override the file
//! 3. [`Config::validate`], which rejects missing required values
//!
//! The resulting [`Config`] is immutable and passed by reference.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::address::EmailAddress;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub general: GeneralConfig,
    /// Forwarding identities.
    pub forward: ForwardConfig,
    /// Blob store location and key layout.
    pub storage: StorageConfig,
    /// Outbound relay connection.
    pub relay: RelayConfig,
    /// Per-deployment behaviour choices.
    pub policy: PolicyConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Directory for a `mailfwd.log` file in addition to stderr.
    pub log_dir: Option<PathBuf>,
}

/// Forwarding identities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Final recipient of every forwarded message.
    pub recipient: String,
    /// Address the relay is authorized to send from.
    pub sender: String,
}

/// Blob store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Buckets are directories under [`StorageConfig::root`].
    Fs,
    /// Amazon S3 (requires the `s3` feature).
    S3,
}

/// Blob store location and key layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Bucket holding incoming, archived and failed messages.
    pub bucket: String,
    /// Prefix where incoming messages arrive (`<prefix>/<message id>`).
    pub inbox_prefix: String,
    /// Prefix for successfully forwarded messages.
    pub archive_prefix: String,
    /// Prefix for messages that could not be forwarded.
    pub error_prefix: String,
    /// Prefix for relocated attachments (`<prefix>/<message id>/<filename>`).
    pub attachments_prefix: String,
    /// Filesystem backend root directory.
    pub root: Option<PathBuf>,
    /// Filesystem backend: base URL that serves `root`.
    pub link_base_url: String,
    /// Filesystem backend: secret used to sign retrieval links.
    pub link_secret: String,
}

/// Relay backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayBackend {
    /// SMTP submission with STARTTLS.
    Smtp,
    /// Write each message into [`RelayConfig::pickup_dir`].
    Pickup,
}

/// Outbound relay connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub backend: RelayBackend,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub pickup_dir: Option<PathBuf>,
}

/// Where bounces of a forwarded message go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnPathPolicy {
    /// The relay sender (the operator of this forwarder).
    Sender,
    /// The final recipient.
    Recipient,
}

/// What to do when two attachments of one message share a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateFilenames {
    /// Later attachments overwrite earlier ones at the same key.
    Overwrite,
    /// Later attachments get `_1`, `_2`, ... before the extension.
    Index,
}

/// Per-deployment behaviour choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub return_path: ReturnPathPolicy,
    /// Attach the original message to the failure notification.
    pub attach_original_on_failure: bool,
    /// Strip attachments into the blob store and link them from the HTML body.
    pub relocate_attachments: bool,
    pub duplicate_filenames: DuplicateFilenames,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            bucket: String::new(),
            inbox_prefix: String::new(),
            archive_prefix: String::new(),
            error_prefix: String::new(),
            attachments_prefix: "attachments".to_string(),
            root: None,
            link_base_url: String::new(),
            link_secret: String::new(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: RelayBackend::Smtp,
            host: String::new(),
            port: 587,
            username: None,
            password: None,
            pickup_dir: None,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            return_path: ReturnPathPolicy::Sender,
            attach_original_on_failure: true,
            relocate_attachments: true,
            duplicate_filenames: DuplicateFilenames::Overwrite,
        }
    }
}

// ── Key layout ──────────────────────────────────────────────────

impl StorageConfig {
    /// Key of an incoming message.
    pub fn inbox_key(&self, message_id: &str) -> String {
        join_key(&self.inbox_prefix, message_id)
    }

    /// Key a message is moved to under `prefix` (archive or error).
    pub fn moved_key(&self, prefix: &str, message_id: &str) -> String {
        join_key(prefix, &format!("{message_id}.eml"))
    }

    /// Directory-like prefix for one message's attachments.
    pub fn attachment_dir(&self, message_id: &str) -> String {
        join_key(&self.attachments_prefix, message_id)
    }
}

fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

// ── Load / validate ─────────────────────────────────────────────

impl Config {
    /// Load from the file (if any), apply the process environment, validate.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = load_file(explicit_path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment-style variables supplied by `lookup`.
    ///
    /// The deployed handler's names (`MailRecipient`, `MailSender`,
    /// `MailS3Bucket`, `MailS3Prefix`, `MailS3Archive`, `MailS3Error`) are
    /// honoured alongside `MAILFWD_*` names for the remaining settings.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MailRecipient") {
            self.forward.recipient = v;
        }
        if let Some(v) = get("MailSender") {
            self.forward.sender = v;
        }
        if let Some(v) = get("MailS3Bucket") {
            self.storage.bucket = v;
        }
        if let Some(v) = get("MailS3Prefix") {
            self.storage.inbox_prefix = v;
        }
        if let Some(v) = get("MailS3Archive") {
            self.storage.archive_prefix = v;
        }
        if let Some(v) = get("MailS3Error") {
            self.storage.error_prefix = v;
        }
        if let Some(v) = get("MAILFWD_ATTACHMENTS_PREFIX") {
            self.storage.attachments_prefix = v;
        }
        if let Some(v) = get("MAILFWD_STORAGE_BACKEND") {
            self.storage.backend = parse_enum("storage.backend", &v)?;
        }
        if let Some(v) = get("MAILFWD_STORAGE_ROOT") {
            self.storage.root = Some(PathBuf::from(v));
        }
        if let Some(v) = get("MAILFWD_LINK_BASE_URL") {
            self.storage.link_base_url = v;
        }
        if let Some(v) = get("MAILFWD_LINK_SECRET") {
            self.storage.link_secret = v;
        }
        if let Some(v) = get("MAILFWD_RELAY_BACKEND") {
            self.relay.backend = parse_enum("relay.backend", &v)?;
        }
        if let Some(v) = get("MAILFWD_SMTP_HOST") {
            self.relay.host = v;
        }
        if let Some(v) = get("MAILFWD_SMTP_PORT") {
            self.relay.port = v.trim().parse().map_err(|e| ConfigError::Invalid {
                field: "relay.port",
                reason: format!("{v}: {e}"),
            })?;
        }
        if let Some(v) = get("MAILFWD_SMTP_USERNAME") {
            self.relay.username = Some(v);
        }
        if let Some(v) = get("MAILFWD_SMTP_PASSWORD") {
            self.relay.password = Some(v);
        }
        if let Some(v) = get("MAILFWD_PICKUP_DIR") {
            self.relay.pickup_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("MAILFWD_RETURN_PATH") {
            self.policy.return_path = parse_enum("policy.return_path", &v)?;
        }
        if let Some(v) = get("MAILFWD_ATTACH_ORIGINAL") {
            self.policy.attach_original_on_failure =
                parse_bool("policy.attach_original_on_failure", &v)?;
        }
        if let Some(v) = get("MAILFWD_RELOCATE_ATTACHMENTS") {
            self.policy.relocate_attachments = parse_bool("policy.relocate_attachments", &v)?;
        }
        if let Some(v) = get("MAILFWD_DUPLICATE_FILENAMES") {
            self.policy.duplicate_filenames = parse_enum("policy.duplicate_filenames", &v)?;
        }
        if let Some(v) = get("MAILFWD_LOG_LEVEL") {
            self.general.log_level = v;
        }
        Ok(())
    }

    /// Reject configurations that would fail every invocation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("forward.recipient", &self.forward.recipient)?;
        require("forward.sender", &self.forward.sender)?;
        require("storage.bucket", &self.storage.bucket)?;
        require("storage.inbox_prefix", &self.storage.inbox_prefix)?;
        require("storage.archive_prefix", &self.storage.archive_prefix)?;
        require("storage.error_prefix", &self.storage.error_prefix)?;

        for (field, value) in [
            ("forward.recipient", &self.forward.recipient),
            ("forward.sender", &self.forward.sender),
        ] {
            if !EmailAddress::parse(value).is_valid() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("'{value}' is not an email address"),
                });
            }
        }

        match self.storage.backend {
            StorageBackend::Fs => {
                if self.storage.root.is_none() {
                    return Err(ConfigError::Missing("storage.root"));
                }
                if self.policy.relocate_attachments {
                    require("storage.link_base_url", &self.storage.link_base_url)?;
                    require("storage.link_secret", &self.storage.link_secret)?;
                }
            }
            StorageBackend::S3 => {
                if !cfg!(feature = "s3") {
                    return Err(ConfigError::Invalid {
                        field: "storage.backend",
                        reason: "built without the `s3` feature".into(),
                    });
                }
            }
        }

        match self.relay.backend {
            RelayBackend::Smtp => require("relay.host", &self.relay.host)?,
            RelayBackend::Pickup => {
                if self.relay.pickup_dir.is_none() {
                    return Err(ConfigError::Missing("relay.pickup_dir"));
                }
            }
        }
        Ok(())
    }

    /// The relay sender as a parsed address.
    pub fn sender_address(&self) -> EmailAddress {
        EmailAddress::parse(&self.forward.sender)
    }

    /// The final recipient as a parsed address.
    pub fn recipient_address(&self) -> EmailAddress {
        EmailAddress::parse(&self.forward.recipient)
    }

    /// TOML rendering with secrets masked, for `check-config`.
    pub fn to_redacted_toml(&self) -> anyhow::Result<String> {
        let mut shown = self.clone();
        if !shown.storage.link_secret.is_empty() {
            shown.storage.link_secret = "***".to_string();
        }
        if shown.relay.password.is_some() {
            shown.relay.password = Some("***".to_string());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(field))
    } else {
        Ok(())
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(field: &'static str, raw: &str) -> Result<T, ConfigError> {
    let normalized = raw.trim().to_ascii_lowercase();
    T::deserialize(serde::de::value::StrDeserializer::<serde::de::value::Error>::new(&normalized))
        .map_err(|e| ConfigError::Invalid {
            field,
            reason: format!("{raw}: {e}"),
        })
}

fn parse_bool(field: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            field,
            reason: format!("'{raw}' is not a boolean"),
        }),
    }
}

/// Read the TOML file. An explicitly requested file must exist; the
/// default locations are optional.
fn load_file(explicit_path: Option<&Path>) -> Result<Config, ConfigError> {
    let (path, required) = match explicit_path {
        Some(p) => (p.to_path_buf(), true),
        None => match config_file_path() {
            Some(p) => (p, false),
            None => return Ok(Config::default()),
        },
    };

    if !path.exists() {
        if required {
            return Err(ConfigError::File {
                path,
                reason: "file not found".into(),
            });
        }
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::File {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    let config = toml::from_str::<Config>(&contents).map_err(|e| ConfigError::File {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILFWD_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailfwd").join("config.toml"))
}
