//!
//! Crate errors
//!
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Invalid url: {0}")]
    InvalidUrl(String),
    #[error("Resource not allowed: {0}")]
    ResourceNotAllowed(String),
    #[error("Unknown scheme '{0}'")]
    UnknownScheme(String),
    #[error("Invalid search path root '{0}': {1}")]
    InvalidRootUrl(String, String),
    #[error("Project not found: {0}")]
    NotFound(String),
    #[error("Max number of projects reached ({0})")]
    MaxProjectsReached(usize),
    #[error("Project '{0}' has invalid layers")]
    StrictCheckingFailure(String),
    #[error("Failed to load project '{0}': {1}")]
    ProjectLoading(String, String),
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
