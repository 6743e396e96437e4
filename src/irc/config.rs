/// Server configuration, loaded once at startup and then frozen inside the
/// registry.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Everything needed to bring up a local IRC server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Server name, used as the prefix of every server-originated line.
    pub name: String,
    /// Network name shown in the welcome burst.
    pub network: String,
    /// Plaintext listener port.
    pub port: u16,
    /// TLS listener port (0 disables TLS).
    pub ssl_port: u16,
    /// Seconds between server PINGs.
    pub ping_frequency: u64,
    /// Seconds a client may take to answer a PING.
    pub pong_max_latency: u64,
    pub ssl_certificate: SslCertificate,
    pub logs: Logs,
    /// Lines of the message of the day.
    pub motd: Vec<String>,
}

/// Paths to the PEM key and certificate chain for TLS connections.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SslCertificate {
    pub key_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
}

/// Channel message logging.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Logs {
    pub log_channel_messages: bool,
    /// Directory holding one log file per channel.
    pub path: PathBuf,
}

impl Default for Logs {
    fn default() -> Self {
        Self {
            log_channel_messages: false,
            path: PathBuf::from("logs"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "irc.cove.local".into(),
            network: "Cove".into(),
            port: 6667,
            ssl_port: 6697,
            ping_frequency: 60,
            pong_max_latency: 30,
            ssl_certificate: SslCertificate::default(),
            logs: Logs::default(),
            motd: vec!["Welcome to Cove.".into()],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON in config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Parse a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: Config = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `COVE_CONFIG` if set, else defaults. `SERVER_NAME`
    /// overrides the configured name either way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("COVE_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default_for_host(),
        };
        if let Ok(name) = std::env::var("SERVER_NAME") {
            config.name = name;
        }
        config.validate()?;
        Ok(config)
    }

    /// Defaults, named after the system hostname when it looks like an FQDN.
    fn default_for_host() -> Self {
        let mut config = Self::default();
        if let Some(host) = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| h.contains('.'))
        {
            config.name = host;
        }
        config
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains(' ') {
            return Err(ConfigError::Invalid(format!(
                "server name {:?} must be a single non-empty token",
                self.name
            )));
        }
        if self.ping_frequency == 0 {
            return Err(ConfigError::Invalid("ping_frequency must be positive".into()));
        }
        Ok(())
    }

    /// Certificate and key paths, when the TLS listener should run.
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        if self.ssl_port == 0 {
            return None;
        }
        match (&self.ssl_certificate.cert_file, &self.ssl_certificate.key_file) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_frequency)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_max_latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"name": "irc.test", "logs": {"log_channel_messages": true}}"#,
        )
        .unwrap();
        assert_eq!(config.name, "irc.test");
        assert_eq!(config.port, 6667);
        assert!(config.logs.log_channel_messages);
        assert_eq!(config.logs.path, PathBuf::from("logs"));
    }

    #[test]
    fn tls_needs_port_and_both_paths() {
        let mut config = Config::default();
        assert_eq!(config.tls_paths(), None);

        config.ssl_certificate.cert_file = Some("cert.pem".into());
        config.ssl_certificate.key_file = Some("key.pem".into());
        assert!(config.tls_paths().is_some());

        config.ssl_port = 0;
        assert_eq!(config.tls_paths(), None);
    }

    #[test]
    fn rejects_name_with_space() {
        let config = Config {
            name: "irc example".into(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/cove.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
