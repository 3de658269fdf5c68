use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("File unreadable: {path}, {reason}")]
    FileUnreadable {
        path: String,
        reason: String,
    },

    #[error("Encoding failure: {0}")]
    Encoding(String),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader {
        name: String,
        reason: String,
    },

    #[error("Transfer error: {message}")]
    Transfer {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Event store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Manager shutdown")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn file_unreadable(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::FileUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transfer(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Transfer {
            message: message.into(),
            status_code,
        }
    }

    pub fn store(message: impl ToString) -> Self {
        Self::Store(message.to_string())
    }

    pub fn internal(message: impl ToString) -> Self {
        Self::Internal(message.to_string())
    }

    /// HTTP status attached to the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transfer { status_code, .. } => *status_code,
            Self::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

impl From<url::ParseError> for UploadError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
