//! Mechanical schema upgrade between adjacent format versions.
//!
//! Only ENTS and TEXT change shape between versions, and only by the size of
//! the zero-filled trailer after each record. Records are re-sliced byte for
//! byte; no field is ever decoded or reinterpreted.

use thiserror::Error;
use tracing::debug;

use crate::SnapshotError;
use crate::container::{Section, SectionTag, read_container, write_container};
use crate::layout::{EntsBlock, Layout, MIN_VERSION, TEXT_HEADER_BYTES, TEXT_RUN_BYTES};
use crate::sections::ents_counts;
use crate::wire::{ByteReader, ByteWriter};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrateError {
    /// The input is not at the version the target upgrades from. Tools
    /// report this as a skip rather than a failure.
    #[error("container is version {found}, upgrading to {target} needs version {expected}")]
    VersionMismatch {
        found: u32,
        expected: u32,
        target: u32,
    },
    #[error("no migration produces version {target}")]
    UnsupportedTarget { target: u32 },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl MigrateError {
    pub fn is_skip(&self) -> bool {
        matches!(self, MigrateError::VersionMismatch { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: u32,
    pub to: u32,
    pub resliced: Vec<SectionTag>,
    pub copied: Vec<SectionTag>,
}

/// Upgrades a container from `target - 1` to `target`, recomputing the
/// section table and checksums.
pub fn migrate_bytes(
    bytes: &[u8],
    target: u32,
) -> Result<(Vec<u8>, MigrationReport), MigrateError> {
    let to = Layout::for_version(target)
        .filter(|_| target > MIN_VERSION)
        .ok_or(MigrateError::UnsupportedTarget { target })?;
    let expected = target - 1;
    let container = read_container(bytes)?;
    if container.version != expected {
        return Err(MigrateError::VersionMismatch {
            found: container.version,
            expected,
            target,
        });
    }
    let from = Layout::for_version(expected).ok_or(MigrateError::UnsupportedTarget { target })?;

    let mut report = MigrationReport {
        from: expected,
        to: target,
        resliced: Vec::new(),
        copied: Vec::new(),
    };
    let mut sections = Vec::with_capacity(container.sections.len());
    for section in container.sections {
        let payload = match section.tag {
            SectionTag::ENTS => {
                report.resliced.push(section.tag);
                reslice_entities(&section.payload, from, to)?
            }
            SectionTag::TEXT => {
                report.resliced.push(section.tag);
                reslice_texts(&section.payload, from, to)?
            }
            _ => {
                report.copied.push(section.tag);
                section.payload
            }
        };
        sections.push(Section::new(section.tag, payload));
    }
    let out = write_container(target, &sections)?;
    debug!(
        from = expected,
        to = target,
        before = bytes.len(),
        after = out.len(),
        "migrated container"
    );
    Ok((out, report))
}

fn zeros(w: &mut ByteWriter, len: usize) {
    for _ in 0..len {
        w.u8(0);
    }
}

fn reslice_entities(payload: &[u8], from: Layout, to: Layout) -> Result<Vec<u8>, SnapshotError> {
    let counts = ents_counts(payload, from)?;
    let mut r = ByteReader::new(SectionTag::ENTS, payload);
    let mut w = ByteWriter::new();
    w.bytes(r.take(EntsBlock::HEADER_BYTES)?);
    for (block, count) in EntsBlock::ORDER.into_iter().zip(counts) {
        for _ in 0..count {
            let record = r.take(from.record_bytes(block))?;
            w.bytes(&record[..block.base_bytes()]);
            if block.has_trailer() {
                zeros(&mut w, to.trailer_bytes());
            }
        }
    }
    r.finish()?;
    Ok(w.into_inner())
}

fn reslice_texts(payload: &[u8], from: Layout, to: Layout) -> Result<Vec<u8>, SnapshotError> {
    // Offsets of run_count and content_len inside the fixed header.
    const RUN_COUNT_AT: usize = 32;
    const CONTENT_LEN_AT: usize = 36;

    let mut r = ByteReader::new(SectionTag::TEXT, payload);
    let mut w = ByteWriter::new();
    let count = r.u32()?;
    let count = r.expect_items(count, TEXT_HEADER_BYTES + from.trailer_bytes())?;
    w.u32(count as u32);
    for _ in 0..count {
        let header = r.take(TEXT_HEADER_BYTES)?;
        let word = |at: usize| {
            u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };
        let run_count = word(RUN_COUNT_AT);
        let content_len = word(CONTENT_LEN_AT) as usize;
        let runs = r.expect_items(run_count, TEXT_RUN_BYTES)? * TEXT_RUN_BYTES;
        let body = runs
            .checked_add(content_len)
            .ok_or_else(|| SnapshotError::overflow("TEXT record"))?;
        w.bytes(header);
        w.bytes(r.take(body)?);
        r.skip(from.trailer_bytes())?;
        zeros(&mut w, to.trailer_bytes());
    }
    r.finish()?;
    Ok(w.into_inner())
}
