//! hapro core library: relay configuration, domain types, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes for installation ids and backup slugs
//! - [`error`]: [`ConfigError`]
//! - [`config`]: load / overlay / resolve relay settings

pub mod config;
pub mod error;
pub mod types;

pub use config::{InstallationSource, RelayConfig};
pub use error::ConfigError;
pub use types::{BackupSlug, InstallationId, ARCHIVE_EXTENSION};
