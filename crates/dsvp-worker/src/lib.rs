//! # dsvp-worker
//!
//! Client side of the worker link.
//!
//! - [`WorkerSession`]: the connection state machine (auth handshake,
//!   dispatch, retry counting), free of any I/O
//! - [`run`]: drives a session over `tokio-tungstenite`, reconnecting
//!   with the backoff scale until shutdown

#![deny(unsafe_code)]

pub mod error;
pub mod runner;
pub mod session;

pub use error::WorkerError;
pub use runner::{Runner, run};
pub use session::{Control, SessionState, WorkerSession};
