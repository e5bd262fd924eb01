use thiserror::Error;

/// Error taxonomy for the vault and transfer core.
#[derive(Debug, Error)]
pub enum AftError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed data: {0}")]
    Format(String),

    #[error("authentication failed{}", .0.as_ref().map(|m| format!(" (hint: {m})")).unwrap_or_default())]
    Auth(Option<String>),

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("not found in vault: {0}")]
    NotFound(String),

    #[error("destination already exists: {0}")]
    AlreadyExists(String),

    #[error("input exceeds vault size limit ({0} bytes)")]
    FileTooBig(i64),

    #[error("remote peer reported an error")]
    RemoteError,

    #[error("operation invalid in current state: {0}")]
    State(String),
}

pub type Result<T> = std::result::Result<T, AftError>;
