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
    #[error("Json error")]
    JsonError(#[from] serde_json::Error),
    #[error("System error")]
    Errno(#[from] nix::errno::Errno),
    #[error("Response error {0}: {1}")]
    ResponseError(i64, serde_json::Value),
    #[error("Error: {0}")]
    Worker(String),
    #[error("Worker process is dead")]
    WorkerProcessDead,
    #[error("Worker process failed prematurely")]
    WorkerProcessFailure,
    #[error("Worker stalled")]
    WorkerStalled,
    #[error("Response data expected")]
    ResponseExpected,
    #[error("Unexpected no data response")]
    NoDataResponse,
    #[error("Unexpected response")]
    UnexpectedResponse,
    #[error("IO buffer overflow")]
    IoBufferOverflow,
    #[error("Rendez-vous was disconnected")]
    RendezVousDisconnected,
    #[error("The queue is closed")]
    QueueIsClosed,
    #[error("Max number of waiting requests exceeded")]
    MaxRequestsExceeded,
    #[error("Task failed: {0}")]
    TaskFailed(String),
    #[error("Missing or invalid config value {0}")]
    InvalidConfigValue(String),
    #[error("Invalid HTTP method {0}")]
    InvalidHttpMethod(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for String {
    fn from(err: Error) -> String {
        format!("{}", err)
    }
}
