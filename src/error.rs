use std::io;

/// Custom error type for notify_webhook operations
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Git operation failed: {command}\n{message}")]
    GitCommandFailed { command: String, message: String },

    #[error("Malformed git output: {0}")]
    Parse(String),

    #[error("Malformed input line: {0}")]
    Input(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Helper type for Results that use NotifyError
pub type Result<T> = std::result::Result<T, NotifyError>;
