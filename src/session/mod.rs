pub mod manager;
pub mod models;
pub mod monitor;

pub use manager::SessionManager;
pub use models::*;
pub use monitor::LivenessMonitor;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Device not connected")]
    NotConnected,

    #[error("Device already connected")]
    AlreadyConnected,

    #[error("Serial communication error: {0}")]
    Serial(#[from] crate::serial::SerialError),

    #[error("Invalid session configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<crate::config::ConfigError> for SessionError {
    fn from(e: crate::config::ConfigError) -> Self {
        SessionError::InvalidConfiguration(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
