//! Configuration system for the `FleetChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/fleetchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use fleetchat_proto::api::PUSH_PATH;
use fleetchat_proto::message::{Identity, SenderRole};

use crate::chat::SessionConfig;
use crate::transport::ws::ReconnectConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A configured URL is unusable.
    #[error("invalid url {value:?}: {reason}")]
    InvalidUrl {
        /// The configured value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The configured role is neither `employee` nor `customer`.
    #[error("invalid role: {0}")]
    InvalidRole(String),

    /// The timestamp format contains an unknown strftime specifier.
    #[error("invalid timestamp format: {0:?}")]
    InvalidTimestampFormat(String),

    /// No user id was configured.
    #[error("no identity configured (set --id or [identity] id)")]
    MissingIdentity,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    identity: IdentityFileConfig,
    chat: ChatFileConfig,
    reconnect: ReconnectFileConfig,
    ui: UiFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    push_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[identity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    role: Option<String>,
    id: Option<String>,
    name: Option<String>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    poll_interval_secs: Option<u64>,
    /// `0` disables the client-side send timeout.
    send_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_secs: Option<u64>,
    multiplier: Option<u32>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Default REST base URL of the relay.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:9000/";

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// REST base URL.
    pub api_url: String,
    /// Push channel URL (`ws://` or `wss://`); derived from `api_url` when unset.
    pub push_url: Option<String>,
    /// Per-request REST timeout.
    pub request_timeout: Duration,

    // -- Identity --
    /// Which side the user is on.
    pub role: SenderRole,
    /// Employee or customer id.
    pub user_id: Option<String>,
    /// Name attached to sent messages.
    pub display_name: String,

    // -- Chat --
    /// Summary reconciliation poll interval.
    pub poll_interval: Duration,
    /// Client-side send timeout; `None` disables it.
    pub send_timeout: Option<Duration>,
    /// Capacity for command/event mpsc channels.
    pub channel_capacity: usize,

    // -- Reconnect --
    /// Push channel backoff policy.
    pub reconnect: ReconnectConfig,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            push_url: None,
            request_timeout: Duration::from_secs(15),
            role: SenderRole::Employee,
            user_id: None,
            display_name: String::new(),
            poll_interval: Duration::from_secs(30),
            send_timeout: Some(Duration::from_secs(30)),
            channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if a URL or role value is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Separated from `load()` to enable
    /// unit testing without CLI parsing.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_url = cli
            .api_url
            .clone()
            .or_else(|| file.server.api_url.clone())
            .unwrap_or(defaults.api_url);
        let push_url = cli
            .push_url
            .clone()
            .or_else(|| file.server.push_url.clone());
        let role = match cli.role.as_ref().or(file.identity.role.as_ref()) {
            Some(raw) => raw.parse().map_err(ConfigError::InvalidRole)?,
            None => defaults.role,
        };

        let reconnect = ReconnectConfig {
            initial_delay: file
                .reconnect
                .initial_delay_ms
                .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
            max_delay: file
                .reconnect
                .max_delay_secs
                .map_or(defaults.reconnect.max_delay, Duration::from_secs),
            multiplier: file
                .reconnect
                .multiplier
                .unwrap_or(defaults.reconnect.multiplier),
        };

        let config = Self {
            api_url,
            push_url,
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            role,
            user_id: cli.id.clone().or_else(|| file.identity.id.clone()),
            display_name: cli
                .name
                .clone()
                .or_else(|| file.identity.name.clone())
                .unwrap_or(defaults.display_name),
            poll_interval: file
                .chat
                .poll_interval_secs
                .map_or(defaults.poll_interval, Duration::from_secs),
            send_timeout: match file.chat.send_timeout_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.send_timeout,
            },
            channel_capacity: file
                .chat
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            reconnect,
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        };
        config.api_url()?;
        config.push_url()?;
        validate_timestamp_format(&config.timestamp_format)?;
        Ok(config)
    }

    /// Parsed REST base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if the value does not parse.
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        parse_url(&self.api_url)
    }

    /// Parsed push channel URL, derived from the REST URL when not set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if the value does not parse or
    /// cannot be derived.
    pub fn push_url(&self) -> Result<Url, ConfigError> {
        match &self.push_url {
            Some(raw) => parse_url(raw),
            None => derive_push_url(&self.api_url()?),
        }
    }

    /// The logged-in identity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingIdentity`] if no non-blank id is set.
    pub fn identity(&self) -> Result<Identity, ConfigError> {
        let id = self
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::MissingIdentity)?;
        Ok(Identity::new(self.role, id))
    }

    /// Session tuning derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let display_name = if self.display_name.is_empty() {
            self.user_id.clone().unwrap_or_default()
        } else {
            self.display_name.clone()
        };
        SessionConfig {
            display_name,
            poll_interval: self.poll_interval,
            send_timeout: self.send_timeout,
            channel_capacity: self.channel_capacity,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Employee-to-customer live chat")]
pub struct CliArgs {
    /// REST base URL of the relay.
    #[arg(long, env = "FLEETCHAT_API_URL")]
    pub api_url: Option<String>,

    /// Push channel URL (default: derived from the API URL).
    #[arg(long, env = "FLEETCHAT_PUSH_URL")]
    pub push_url: Option<String>,

    /// `employee` or `customer`.
    #[arg(long, env = "FLEETCHAT_ROLE")]
    pub role: Option<String>,

    /// Your employee or customer id.
    #[arg(long, env = "FLEETCHAT_ID")]
    pub id: Option<String>,

    /// Display name attached to your messages.
    #[arg(long, env = "FLEETCHAT_NAME")]
    pub name: Option<String>,

    /// Path to config file (default: `~/.config/fleetchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "FLEETCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/fleetchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn validate_timestamp_format(format: &str) -> Result<(), ConfigError> {
    use chrono::format::{Item, StrftimeItems};
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::InvalidTimestampFormat(format.to_string()));
    }
    Ok(())
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// `http(s)://host/prefix` → `ws(s)://host/prefix/ws`.
fn derive_push_url(api_url: &Url) -> Result<Url, ConfigError> {
    let scheme = match api_url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(ConfigError::InvalidUrl {
                value: api_url.to_string(),
                reason: format!("cannot derive a push url from scheme {other:?}"),
            });
        }
    };
    let mut push = api_url.clone();
    push.set_scheme(scheme).map_err(|()| ConfigError::InvalidUrl {
        value: api_url.to_string(),
        reason: "scheme change rejected".to_string(),
    })?;
    push.set_path(&format!("{}{PUSH_PATH}", api_url.path().trim_end_matches('/')));
    push.set_query(None);
    Ok(push)
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("fleetchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
