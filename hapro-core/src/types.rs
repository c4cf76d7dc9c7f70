//! Domain types shared by the relay crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// File extension of a backup archive as written into the backup directory.
pub const ARCHIVE_EXTENSION: &str = ".tar";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Persistent identifier of this host instance; addresses every outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallationId(pub String);

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for InstallationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstallationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Backend job identifier of a backup; equals the archive file stem once
/// the backend has finished processing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupSlug(pub String);

impl BackupSlug {
    /// Derive the slug for an archive file name by stripping the archive
    /// extension (first occurrence, matching the backend's naming).
    pub fn from_archive(file_name: &str, extension: &str) -> Self {
        Self(file_name.replacen(extension, "", 1))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BackupSlug {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BackupSlug {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// `true` when `file_name` names a backup archive.
pub fn is_archive(file_name: &str, extension: &str) -> bool {
    file_name.ends_with(extension)
}
