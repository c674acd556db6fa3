//! ESNP framing: a 16-byte header, a table of 16-byte section entries and the
//! section payloads. The framing knows nothing about what a section holds.

use std::collections::HashSet;
use std::fmt;

use crc::{CRC_32_ISO_HDLC, Crc};

use crate::SnapshotError;

pub const MAGIC: [u8; 4] = *b"ESNP";
pub const HEADER_BYTES: usize = 16;
pub const TABLE_ENTRY_BYTES: usize = 16;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 with the reflected 0xEDB88320 polynomial.
pub fn checksum(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// Four-character section code, stored as its ASCII bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionTag(pub [u8; 4]);

impl SectionTag {
    pub const LAYR: SectionTag = SectionTag(*b"LAYR");
    pub const ENTS: SectionTag = SectionTag(*b"ENTS");
    pub const TEXT: SectionTag = SectionTag(*b"TEXT");
    pub const STYL: SectionTag = SectionTag(*b"STYL");
    pub const ORDR: SectionTag = SectionTag(*b"ORDR");
    pub const SELC: SectionTag = SectionTag(*b"SELC");
    pub const HIST: SectionTag = SectionTag(*b"HIST");
    pub const NIDX: SectionTag = SectionTag(*b"NIDX");

    pub fn from_u32(raw: u32) -> Self {
        Self(raw.to_le_bytes())
    }

    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// The tag as text, when it is printable ASCII.
    pub fn id_str(&self) -> Option<&str> {
        if self.0.iter().all(|b| b.is_ascii_graphic()) {
            std::str::from_utf8(&self.0).ok()
        } else {
            None
        }
    }
}

impl fmt::Display for SectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id_str() {
            Some(text) => f.write_str(text),
            None => write!(f, "{:#010x}", self.to_u32()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub tag: SectionTag,
    pub payload: Vec<u8>,
}

impl Section {
    pub fn new(tag: SectionTag, payload: Vec<u8>) -> Self {
        Self { tag, payload }
    }
}

/// A framed container whose table and checksums have been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub version: u32,
    /// In table order.
    pub sections: Vec<Section>,
}

impl Container {
    pub fn section(&self, tag: SectionTag) -> Option<&Section> {
        self.sections.iter().find(|section| section.tag == tag)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        write_container(self.version, &self.sections)
    }
}

/// Lays out the header, the table and the payloads back to back.
pub fn write_container(version: u32, sections: &[Section]) -> Result<Vec<u8>, SnapshotError> {
    let count =
        u32::try_from(sections.len()).map_err(|_| SnapshotError::overflow("section count"))?;
    let table_end = table_end(count)?;
    let total = sections.iter().try_fold(table_end, |acc, section| {
        acc.checked_add(section.payload.len())
            .ok_or_else(|| SnapshotError::overflow(format!("section {}", section.tag)))
    })?;
    if u32::try_from(total).is_err() {
        return Err(SnapshotError::overflow("container"));
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    let mut offset = table_end;
    for section in sections {
        out.extend_from_slice(&section.tag.0);
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        out.extend_from_slice(&(section.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&checksum(&section.payload).to_le_bytes());
        offset += section.payload.len();
    }
    for section in sections {
        out.extend_from_slice(&section.payload);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    tag: SectionTag,
    offset: u32,
    size: u32,
    crc: u32,
}

/// Validates the framing of `bytes` and copies out every section.
///
/// Bounds are checked for every entry before any payload is read; only then
/// are sections compared for overlap and their checksums verified. The
/// version is returned as found; interpreting it is the caller's job.
pub fn read_container(bytes: &[u8]) -> Result<Container, SnapshotError> {
    if bytes.len() < HEADER_BYTES {
        return Err(SnapshotError::TruncatedHeader { len: bytes.len() });
    }
    let word = |at: usize| {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    };
    if bytes[0..4] != MAGIC {
        return Err(SnapshotError::InvalidMagic { found: word(0) });
    }
    let version = word(4);
    let count = word(8);
    let table_end = table_end(count)?;
    if table_end > bytes.len() {
        return Err(SnapshotError::TruncatedTable {
            count,
            needed: table_end,
            len: bytes.len(),
        });
    }

    let mut entries = Vec::with_capacity(count as usize);
    let mut seen = HashSet::new();
    for i in 0..count as usize {
        let at = HEADER_BYTES + i * TABLE_ENTRY_BYTES;
        let entry = TableEntry {
            tag: SectionTag::from_u32(word(at)),
            offset: word(at + 4),
            size: word(at + 8),
            crc: word(at + 12),
        };
        let end = (entry.offset as usize)
            .checked_add(entry.size as usize)
            .ok_or_else(|| SnapshotError::overflow(format!("section {}", entry.tag)))?;
        if end > bytes.len() {
            return Err(SnapshotError::TruncatedSection { tag: entry.tag });
        }
        if (entry.offset as usize) < table_end {
            return Err(SnapshotError::SectionOverlapsHeader {
                tag: entry.tag,
                offset: entry.offset,
            });
        }
        if !seen.insert(entry.tag) {
            return Err(SnapshotError::DuplicateSection { tag: entry.tag });
        }
        entries.push(entry);
    }

    check_disjoint(&entries)?;

    let mut sections = Vec::with_capacity(entries.len());
    for entry in entries {
        let start = entry.offset as usize;
        let payload = &bytes[start..start + entry.size as usize];
        let actual = checksum(payload);
        if actual != entry.crc {
            return Err(SnapshotError::CrcMismatch {
                tag: entry.tag,
                expected: entry.crc,
                actual,
            });
        }
        sections.push(Section::new(entry.tag, payload.to_vec()));
    }
    Ok(Container { version, sections })
}

fn table_end(count: u32) -> Result<usize, SnapshotError> {
    (count as usize)
        .checked_mul(TABLE_ENTRY_BYTES)
        .and_then(|table| table.checked_add(HEADER_BYTES))
        .ok_or_else(|| SnapshotError::overflow("section table"))
}

fn check_disjoint(entries: &[TableEntry]) -> Result<(), SnapshotError> {
    let mut spans: Vec<&TableEntry> = entries.iter().filter(|entry| entry.size > 0).collect();
    spans.sort_by_key(|entry| entry.offset);
    for pair in spans.windows(2) {
        let first = pair[0];
        let second = pair[1];
        if u64::from(first.offset) + u64::from(first.size) > u64::from(second.offset) {
            return Err(SnapshotError::OverlappingSections {
                first: first.tag,
                second: second.tag,
            });
        }
    }
    Ok(())
}
