//! # dsvp-settings
//!
//! Configuration for the coordinator (`dsvp-server`) and the worker
//! (`dsvp-worker`), loaded from three layers in priority order:
//!
//! 1. **Compiled defaults**: [`DsvpSettings::default()`]
//! 2. **Settings file**: `~/.dsvp/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `DSVP_*` and `PORT` (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{DsvpSettings, ServerSettings, WorkerSettings};
