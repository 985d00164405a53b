//! Error types for inbox triage.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

/// Mailbox transport errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Login rejected for {username}: {reason}")]
    Login { username: String, reason: String },

    #[error("Failed to select folder {folder}: {reason}")]
    SelectFolder { folder: String, reason: String },

    #[error("Command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not connected")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MailboxError {
    /// Connect, login and folder-selection failures end the ingestion loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Login { .. } | Self::SelectFolder { .. }
        )
    }
}

/// Text normalization errors. Abort only the current message.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Input too large: {len} chars > {max}")]
    InputTooLarge { len: usize, max: usize },

    #[error("Malformed input: {0}")]
    Malformed(String),
}

/// No date could be extracted from the given text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Could not resolve a date from {text:?}")]
pub struct DateParseError {
    pub text: String,
}

/// Per-message pipeline errors. Logged, the message is skipped.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Message {uid} could not be parsed as RFC 822")]
    Parse { uid: u32 },

    #[error("Normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Persistence failed: {0}")]
    Persist(#[from] DatabaseError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] MailboxError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
