//!
//! Crate errors
//!
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Encoding error")]
    EncodeError(#[from] rmp_serde::encode::Error),
    #[error("Decoding error")]
    DecodeError(#[from] rmp_serde::decode::Error),
    #[error("System error")]
    Errno(#[from] nix::errno::Errno),
    #[error("Cache error")]
    CacheError(#[from] qjazz_cache::Error),
    #[error("Unsupported message {0}")]
    UnsupportedMessage(i64),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Connection closed by peer")]
    ConnectionClosed,
    #[error("Termination requested")]
    Terminated,
    #[error("Engine error: {0}")]
    Engine(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
