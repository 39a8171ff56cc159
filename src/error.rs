//! Error handling for the Redfire B2BUA


pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Route error: {0}")]
    Route(String),

    #[error("Resolution error: {0}")]
    Resolve(String),

    #[error("Authorization error: {0}")]
    Auth(String),

    #[error("Accounting error: {0}")]
    Accounting(String),

    #[error("Media relay error: {0}")]
    MediaRelay(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    pub fn route<S: Into<String>>(msg: S) -> Self {
        Self::Route(msg.into())
    }

    pub fn resolve<S: Into<String>>(msg: S) -> Self {
        Self::Resolve(msg.into())
    }

    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Self::Auth(msg.into())
    }

    pub fn accounting<S: Into<String>>(msg: S) -> Self {
        Self::Accounting(msg.into())
    }

    pub fn media_relay<S: Into<String>>(msg: S) -> Self {
        Self::MediaRelay(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}
