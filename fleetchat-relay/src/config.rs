//! Configuration for the `FleetChat` relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/fleetchat-relay/config.toml`)
//! 4. Compiled defaults
//!
//! The file may seed the customer directory:
//!
//! ```toml
//! [[customers]]
//! id = "42"
//! name = "Acme Co"
//! contact = "ops@acme.test"
//! ```

use std::path::PathBuf;

use fleetchat_proto::api::Contact;
use fleetchat_proto::message::CounterpartyId;

/// Errors that can occur when loading relay configuration.
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
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
    customers: Vec<CustomerFileConfig>,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    log_level: Option<String>,
}

/// One `[[customers]]` entry.
#[derive(Debug, serde::Deserialize)]
struct CustomerFileConfig {
    id: String,
    name: String,
    #[serde(default)]
    contact: String,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "FleetChat relay server")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "FLEETCHAT_RELAY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/fleetchat-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, env = "FLEETCHAT_RELAY_LOG")]
    pub log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9000`).
    pub bind_addr: String,
    /// Log level filter string.
    pub log_level: String,
    /// Customers known before anyone writes.
    pub customers: Vec<Contact>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            log_level: "info".to_string(),
            customers: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.server.log_level.clone())
                .unwrap_or(defaults.log_level),
            customers: file
                .customers
                .iter()
                .map(|c| Contact {
                    id: CounterpartyId::new(c.id.trim()),
                    name: c.name.clone(),
                    contact: c.contact.clone(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("fleetchat-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.log_level, "info");
        assert!(config.customers.is_empty());
    }

    #[test]
    fn toml_parsing_full() {
        let toml_str = r#"
[server]
bind_addr = "127.0.0.1:8080"
log_level = "debug"

[[customers]]
id = "42"
name = "Acme Co"
contact = "ops@acme.test"

[[customers]]
id = " 43 "
name = "Globex"
"#;
        let file: RelayConfigFile = toml::from_str(toml_str).unwrap();
        let config = RelayConfig::resolve(&RelayCliArgs::default(), &file);

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.customers.len(), 2);
        assert_eq!(config.customers[0].contact, "ops@acme.test");
        assert_eq!(config.customers[1].id, CounterpartyId::new("43"));
        assert!(config.customers[1].contact.is_empty());
    }

    #[test]
    fn toml_parsing_empty() {
        let file: RelayConfigFile = toml::from_str("").unwrap();
        let config = RelayConfig::resolve(&RelayCliArgs::default(), &file);
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert!(config.customers.is_empty());
    }

    #[test]
    fn cli_overrides_file() {
        let toml_str = r#"
[server]
bind_addr = "127.0.0.1:8080"
log_level = "warn"
"#;
        let file: RelayConfigFile = toml::from_str(toml_str).unwrap();
        let cli = RelayCliArgs {
            bind: Some("0.0.0.0:3000".to_string()),
            ..Default::default()
        };
        let config = RelayConfig::resolve(&cli, &file);

        assert_eq!(config.bind_addr, "0.0.0.0:3000"); // from CLI
        assert_eq!(config.log_level, "warn"); // from file
    }

    #[test]
    fn customer_without_name_is_a_parse_error() {
        let result: Result<RelayConfigFile, _> = toml::from_str("[[customers]]\nid = \"1\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        assert!(load_config_file(None).is_ok());
    }

    #[test]
    fn explicit_missing_config_file_returns_error() {
        let result = load_config_file(Some(std::path::Path::new("/nonexistent/relay.toml")));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
