//! # dsvp-server
//!
//! The coordinator side of the worker link.
//!
//! - `WebSocket` endpoint (`/sock`): one [`WorkerConnection`] per socket,
//!   authenticated against the credential store with an `auth` message
//! - [`WorkerRegistry`]: live connections keyed by a monotonically
//!   increasing numeric id, owned by the server instance
//! - HTTP guards that authenticate `Authorization: Bearer` requests as
//!   workers or users
//! - Health, Prometheus metrics, and graceful shutdown via `CancellationToken`
//!
//! [`WorkerConnection`]: websocket::connection::WorkerConnection
//! [`WorkerRegistry`]: websocket::registry::WorkerRegistry

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod http_auth;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::DsvpServer;
