//! # dsvp-core
//!
//! Shared vocabulary of the coordinator and its workers:
//!
//! - **Envelope**: the typed JSON message exchanged over the worker socket,
//!   with [`envelope::decode`] / [`envelope::encode`]
//! - **Backoff**: the fixed reconnect delay scale used by workers
//! - **Credential keys**: base64 tokens decoded into canonical hex keys,
//!   from either a socket `auth` message or an HTTP `Authorization` header

#![deny(unsafe_code)]

pub mod backoff;
pub mod credential;
pub mod envelope;

pub use credential::{CredentialKey, TokenError};
pub use envelope::{AuthFailure, Envelope, MalformedMessage};
