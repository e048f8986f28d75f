use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarginError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Permission denied: {0}")]
    Permission(#[from] PermissionError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Authorization failures surfaced to the reader.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionError {
    #[error("a verified identity is required")]
    AuthenticationRequired,

    #[error("only the author or an admin may do this")]
    NotAuthor,

    #[error("private notes are visible to their author only")]
    PrivateNote,
}

impl MarginError {
    pub fn is_permission(&self) -> bool {
        matches!(self, MarginError::Permission(_))
    }
}

impl From<reqwest::Error> for MarginError {
    fn from(err: reqwest::Error) -> Self {
        MarginError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for MarginError {
    fn from(err: serde_json::Error) -> Self {
        MarginError::Internal(format!("Serialization failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, MarginError>;

impl serde::Serialize for MarginError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
