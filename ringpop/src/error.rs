use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("ringpop is not ready")]
    NotReady,

    #[error("ring is empty")]
    EmptyRing,

    #[error("join failed: {0}")]
    Join(String),

    #[error("join did not complete within {0:?}")]
    JoinTimeout(Duration),

    #[error("ringpop is already bootstrapped")]
    AlreadyBootstrapped,

    #[error("ringpop has been destroyed")]
    Destroyed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Join failures leave the coordinator initialized, so bootstrap may be retried.
    pub fn is_join_failure(&self) -> bool {
        matches!(self, Self::Join(_) | Self::JoinTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
