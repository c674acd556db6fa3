use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

mod container;
mod history;
pub mod layout;
pub mod migrate;
mod sections;
mod snapshot;
mod wire;

pub use container::{
    Container, HEADER_BYTES, MAGIC, Section, SectionTag, TABLE_ENTRY_BYTES, checksum,
    read_container, write_container,
};
pub use layout::{CURRENT_VERSION, Layout, MIN_VERSION};
pub use migrate::{MigrateError, MigrationReport, migrate_bytes};
pub use snapshot::{SnapshotData, deserialize, read_frame, serialize, serialize_with_layout};

/// Hard failures while reading an ESNP container. Any of these leaves the
/// caller's live document untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("invalid magic {found:#010x}")]
    InvalidMagic { found: u32 },
    #[error("unsupported format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("container header truncated: {len} bytes")]
    TruncatedHeader { len: usize },
    #[error("section table truncated: {count} entries need {needed} bytes, have {len}")]
    TruncatedTable {
        count: u32,
        needed: usize,
        len: usize,
    },
    #[error("section {tag} truncated")]
    TruncatedSection { tag: SectionTag },
    #[error(
        "section {tag} checksum mismatch: table says {expected:#010x}, payload is {actual:#010x}"
    )]
    CrcMismatch {
        tag: SectionTag,
        expected: u32,
        actual: u32,
    },
    #[error("section {tag} at offset {offset} overlaps the header or section table")]
    SectionOverlapsHeader { tag: SectionTag, offset: u32 },
    #[error("sections {first} and {second} overlap")]
    OverlappingSections { first: SectionTag, second: SectionTag },
    #[error("section {tag} is declared more than once")]
    DuplicateSection { tag: SectionTag },
    #[error("size overflow while computing the length of {what}")]
    SizeOverflow { what: String },
    #[error("required section {tag} is missing")]
    MissingSection { tag: SectionTag },
    #[error("section {tag} is malformed: {reason}")]
    Malformed { tag: SectionTag, reason: String },
}

impl SnapshotError {
    pub(crate) fn malformed(tag: SectionTag, reason: impl Into<String>) -> Self {
        Self::Malformed {
            tag,
            reason: reason.into(),
        }
    }

    pub(crate) fn overflow(what: impl Into<String>) -> Self {
        Self::SizeOverflow { what: what.into() }
    }
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path:?}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: SnapshotError,
    },
}

pub trait SnapshotLoader {
    fn load(&self, path: &Path) -> Result<SnapshotData, IoError>;
}

pub trait SnapshotSaver {
    fn save(&self, snapshot: &SnapshotData, path: &Path) -> Result<(), IoError>;
}

/// File-backed ESNP reader and writer.
#[derive(Debug, Default, Clone, Copy)]
pub struct EsnpFile;

impl EsnpFile {
    pub fn new() -> Self {
        Self
    }

    pub fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, IoError> {
        fs::read(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), IoError> {
        fs::write(path, bytes).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl SnapshotLoader for EsnpFile {
    fn load(&self, path: &Path) -> Result<SnapshotData, IoError> {
        let bytes = self.read_bytes(path)?;
        deserialize(&bytes).map_err(|source| IoError::Snapshot {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl SnapshotSaver for EsnpFile {
    fn save(&self, snapshot: &SnapshotData, path: &Path) -> Result<(), IoError> {
        let bytes = serialize(&snapshot.document, &snapshot.selection, &snapshot.history)
            .map_err(|source| IoError::Snapshot {
                path: path.to_path_buf(),
                source,
            })?;
        self.write_bytes(path, &bytes)
    }
}
