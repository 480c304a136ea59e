//! Core types for the skill manager.
//!
//! Skills, install history records and supervised processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Unique identifier for install records.
/// Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where a skill directory was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillOrigin {
    /// Bundled with the skill manager's own distribution.
    Core,
    /// Installed into the user-writable skills directory.
    User,
}

impl SkillOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::User => "user",
        }
    }
}

/// A skill found on disk during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    /// Final path segment of `source_path`.
    pub name: String,
    pub source_path: PathBuf,
    pub origin: SkillOrigin,
}

impl SkillDescriptor {
    /// Build a descriptor from a skill directory. Returns `None` when the
    /// path has no usable final segment.
    pub fn from_dir(path: &Path, origin: SkillOrigin) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        Some(Self {
            name,
            source_path: path.to_path_buf(),
            origin,
        })
    }
}

/// Installer view of a package identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPackage {
    /// Canonical process name (also the install directory name).
    pub name: String,
    /// Canonical `owner/repo` (or bare `repo`) path used for fetching.
    pub canonical_path: String,
}

/// A chat request to install a package, consumed once by the install
/// pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub package: String,
    /// The relay's opaque `addl` blob; progress replies carry it back.
    pub reply_to: serde_json::Value,
}

/// Append-only history entry written after a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub id: Id,
    pub package: String,
    pub installed_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl InstalledRecord {
    pub fn new(package: impl Into<String>, installed_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Id::new(),
            package: package.into(),
            installed_path: installed_path.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A worker process owned by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisedProcess {
    pub name: String,
    pub working_directory: PathBuf,
    pub log_path: PathBuf,
    /// Set only while the process is running.
    pub pid: Option<u32>,
}
