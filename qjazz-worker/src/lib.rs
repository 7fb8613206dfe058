//!
//! Worker process runtime
//!
//! Single threaded blocking driver hosted in each worker child
//! process: reads framed messages from the supervisor pipe,
//! dispatches them to the embedded server engine and streams the
//! responses back. The worker owns its project cache; admin
//! messages mutate this local cache over the same pipe.
//!
pub mod config;
pub mod connection;
pub mod engine;
pub mod errors;
pub mod messages;
pub mod ops;
pub mod rendezvous;
pub mod response;
pub mod runtime;
pub mod signals;
pub mod utils;

pub use config::QgisConfig;
pub use connection::{Connection, StdioConnection};
pub use engine::{QgisEngine, ServerRequest};
pub use errors::{Error, Result};
pub use runtime::Runtime;
