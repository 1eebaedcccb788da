//! Value types exchanged between the engine and its drivers

use std::fmt;
use std::io::Cursor;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

/// Version identifier assigned to a migration artifact.
///
/// Versions need not be contiguous but are strictly ordered. "No migration
/// has ever been applied" is modelled as `Option<Version>::None`; no sentinel
/// value leaks into the API.
pub type Version = u64;

/// Direction of a migration step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Check if this is an up migration
    pub fn is_up(&self) -> bool {
        matches!(self, Direction::Up)
    }

    /// Check if this is a down migration
    pub fn is_down(&self) -> bool {
        matches!(self, Direction::Down)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Single-use byte stream carrying a migration body.
///
/// Bodies may be large; the engine hands them to the database driver without
/// buffering them in full. Drivers that need the whole body buffer internally.
pub type MigrationBody = Box<dyn AsyncRead + Send + Unpin>;

/// A migration artifact as handed from a source to a database driver.
pub struct MigrationScript {
    /// Opaque body stream, consumed exactly once
    pub body: MigrationBody,
    /// Diagnostic identifier (file name, object key, ...)
    pub identifier: String,
}

impl MigrationScript {
    /// Create a script from an already-opened body stream
    pub fn new(identifier: impl Into<String>, body: MigrationBody) -> Self {
        Self {
            body,
            identifier: identifier.into(),
        }
    }

    /// Create a script from an in-memory body
    pub fn from_bytes(identifier: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            body: Box::new(Cursor::new(bytes)),
            identifier: identifier.into(),
        }
    }
}

impl fmt::Debug for MigrationScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationScript")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

/// Persisted `(version, dirty)` tuple owned by the database driver.
///
/// `dirty` records that a prior migration began but never confirmed
/// completion; the engine refuses to proceed on a dirty database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Currently applied version, `None` before any migration ran
    pub version: Option<Version>,
    /// Whether an in-flight migration failed to confirm completion
    pub dirty: bool,
}

impl SchemaVersion {
    /// State of a database no migration has ever touched
    pub const INITIAL: SchemaVersion = SchemaVersion {
        version: None,
        dirty: false,
    };

    /// Clean state at `version`
    pub fn clean(version: Option<Version>) -> Self {
        Self {
            version,
            dirty: false,
        }
    }
}
