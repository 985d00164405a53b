//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::triage::normalizer::Language;

/// Mailbox (IMAP) configuration.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    /// Wrap the connection in TLS (implicit TLS, usually port 993).
    pub tls: bool,
    pub username: String,
    pub password: SecretString,
    /// Folder to watch.
    pub folder: String,
    /// Upper bound for a single IDLE wait before the backlog is re-checked.
    pub idle_timeout: Duration,
    /// Sleep between backlog checks when the server lacks IDLE.
    pub poll_interval: Duration,
    /// Messages fetched per window while draining the backlog.
    pub fetch_batch_size: usize,
    /// Socket read/write timeout for ordinary commands.
    pub io_timeout: Duration,
}

impl MailboxConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("EMAIL_IMAP_HOST")
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".into()))?;

        let port = parse_or(&lookup, "EMAIL_IMAP_PORT", 993u16)?;
        let tls = parse_bool_or(&lookup, "EMAIL_IMAP_TLS", true)?;
        let username = lookup("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(lookup("EMAIL_PASSWORD").unwrap_or_default());
        let folder = lookup("EMAIL_FOLDER").unwrap_or_else(|| "INBOX".to_string());
        let idle_timeout_secs = parse_or(&lookup, "EMAIL_IDLE_TIMEOUT_SECS", 1500u64)?;
        let poll_interval_secs = parse_or(&lookup, "EMAIL_POLL_INTERVAL_SECS", 60u64)?;
        let fetch_batch_size = parse_or(&lookup, "EMAIL_FETCH_BATCH_SIZE", 10usize)?;
        let io_timeout_secs = parse_or(&lookup, "EMAIL_IO_TIMEOUT_SECS", 30u64)?;

        if fetch_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_FETCH_BATCH_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            host,
            port,
            tls,
            username,
            password,
            folder,
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            poll_interval: Duration::from_secs(poll_interval_secs),
            fetch_batch_size,
            io_timeout: Duration::from_secs(io_timeout_secs),
        })
    }
}

/// Text-analysis configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Language whose stopwords are stripped before analysis.
    pub language: Language,
    /// Inputs longer than this are rejected by the normalizer.
    pub max_input_chars: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            language: Language::Portuguese,
            max_input_chars: 200_000,
        }
    }
}

impl TriageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let language = match lookup("TRIAGE_LANGUAGE") {
            Some(code) => code.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TRIAGE_LANGUAGE".into(),
                message: format!("unsupported language {code:?} (expected pt or en)"),
            })?,
            None => defaults.language,
        };
        let max_input_chars = parse_or(&lookup, "TRIAGE_MAX_INPUT_CHARS", defaults.max_input_chars)?;

        Ok(Self {
            language,
            max_input_chars,
        })
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("TRIAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/inbox-triage.db"));
        Self { db_path }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn mailbox_config_requires_host() {
        let err = MailboxConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "EMAIL_IMAP_HOST"));
    }

    #[test]
    fn mailbox_config_defaults() {
        let cfg = MailboxConfig::from_lookup(lookup_from(&[
            ("EMAIL_IMAP_HOST", "imap.example.com"),
            ("EMAIL_USERNAME", "me@example.com"),
            ("EMAIL_PASSWORD", "hunter2"),
        ]))
        .unwrap();

        assert_eq!(cfg.port, 993);
        assert!(cfg.tls);
        assert_eq!(cfg.folder, "INBOX");
        assert_eq!(cfg.idle_timeout, Duration::from_secs(1500));
        assert_eq!(cfg.fetch_batch_size, 10);
        assert_eq!(cfg.password.expose_secret(), "hunter2");
    }

    #[test]
    fn mailbox_config_overrides() {
        let cfg = MailboxConfig::from_lookup(lookup_from(&[
            ("EMAIL_IMAP_HOST", "localhost"),
            ("EMAIL_IMAP_PORT", "143"),
            ("EMAIL_IMAP_TLS", "false"),
            ("EMAIL_FOLDER", "Triage"),
            ("EMAIL_FETCH_BATCH_SIZE", "25"),
        ]))
        .unwrap();

        assert_eq!(cfg.port, 143);
        assert!(!cfg.tls);
        assert_eq!(cfg.folder, "Triage");
        assert_eq!(cfg.fetch_batch_size, 25);
    }

    #[test]
    fn mailbox_config_rejects_bad_port() {
        let err = MailboxConfig::from_lookup(lookup_from(&[
            ("EMAIL_IMAP_HOST", "localhost"),
            ("EMAIL_IMAP_PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "EMAIL_IMAP_PORT"));
    }

    #[test]
    fn mailbox_config_rejects_zero_batch() {
        let err = MailboxConfig::from_lookup(lookup_from(&[
            ("EMAIL_IMAP_HOST", "localhost"),
            ("EMAIL_FETCH_BATCH_SIZE", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn triage_config_language() {
        let cfg = TriageConfig::from_lookup(lookup_from(&[("TRIAGE_LANGUAGE", "en")])).unwrap();
        assert_eq!(cfg.language, Language::English);

        let cfg = TriageConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.language, Language::Portuguese);

        assert!(TriageConfig::from_lookup(lookup_from(&[("TRIAGE_LANGUAGE", "klingon")])).is_err());
    }

    #[test]
    fn store_config_default_path() {
        let cfg = StoreConfig::from_lookup(lookup_from(&[]));
        assert_eq!(cfg.db_path, PathBuf::from("./data/inbox-triage.db"));
    }
}
