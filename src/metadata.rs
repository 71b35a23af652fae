//! Project metadata stored as `project.json`

use crate::compression::CompressionMethod;
use crate::layout::ProjectLayout;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the metadata document at the project root
pub const METADATA_FILE: &str = "project.json";

/// Project format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u16,
    pub minor: u16,
}

impl FormatVersion {
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn is_compatible(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Complete metadata for a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub version: FormatVersion,

    /// Identity of this project; a rebuilt project always gets a fresh one
    pub id: Uuid,

    /// Display name, normally the directory stem
    pub name: String,

    pub layout: ProjectLayout,

    /// Codec used for brick payloads
    pub compression: CompressionMethod,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,
}

impl ProjectMetadata {
    pub fn new(name: impl Into<String>, layout: ProjectLayout) -> Self {
        let now = Utc::now();
        Self {
            version: FormatVersion::default(),
            id: Uuid::new_v4(),
            name: name.into(),
            layout,
            compression: CompressionMethod::default(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Set compression method
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }
}
