//! Fixed per-record byte sizes for each supported format version.

pub const CURRENT_VERSION: u32 = 4;
pub const MIN_VERSION: u32 = 3;

/// Id, layer and flags words at the start of every entity record.
pub const RECORD_PREFIX_BYTES: usize = 12;
pub const POINT_BYTES: usize = 8;
pub const TEXT_HEADER_BYTES: usize = 56;
pub const TEXT_RUN_BYTES: usize = 24;
/// Zero-filled word appended by version 4.
pub const RESERVED_BYTES: usize = 4;

/// Record blocks of the ENTS section, in payload order. The section starts
/// with one u32 count per block in this same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntsBlock {
    Rect,
    Line,
    Polyline,
    Point,
    Circle,
    Polygon,
    Arrow,
}

impl EntsBlock {
    pub const ORDER: [EntsBlock; 7] = [
        EntsBlock::Rect,
        EntsBlock::Line,
        EntsBlock::Polyline,
        EntsBlock::Point,
        EntsBlock::Circle,
        EntsBlock::Polygon,
        EntsBlock::Arrow,
    ];

    pub const HEADER_BYTES: usize = 4 * Self::ORDER.len();

    /// Size of a version 3 record.
    pub fn base_bytes(self) -> usize {
        match self {
            EntsBlock::Rect => 84,
            EntsBlock::Line => 56,
            EntsBlock::Polyline => 48,
            EntsBlock::Point => POINT_BYTES,
            EntsBlock::Circle => 84,
            EntsBlock::Polygon => 68,
            EntsBlock::Arrow => 60,
        }
    }

    /// Pool points are bare coordinates and never gain a trailer.
    pub fn has_trailer(self) -> bool {
        self != EntsBlock::Point
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub version: u32,
    trailer: usize,
}

impl Layout {
    pub const CURRENT: Layout = Layout {
        version: CURRENT_VERSION,
        trailer: RESERVED_BYTES,
    };

    pub fn for_version(version: u32) -> Option<Layout> {
        match version {
            3 => Some(Layout {
                version,
                trailer: 0,
            }),
            4 => Some(Layout::CURRENT),
            _ => None,
        }
    }

    #[inline]
    pub fn trailer_bytes(&self) -> usize {
        self.trailer
    }

    pub fn record_bytes(&self, block: EntsBlock) -> usize {
        if block.has_trailer() {
            block.base_bytes() + self.trailer
        } else {
            block.base_bytes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_four_adds_one_word_per_record() {
        let v3 = Layout::for_version(3).unwrap();
        let v4 = Layout::for_version(4).unwrap();
        assert_eq!(v4.record_bytes(EntsBlock::Rect), 88);
        assert_eq!(v4.record_bytes(EntsBlock::Line), 60);
        assert_eq!(v4.record_bytes(EntsBlock::Polyline), 52);
        assert_eq!(v4.record_bytes(EntsBlock::Circle), 88);
        assert_eq!(v4.record_bytes(EntsBlock::Polygon), 72);
        assert_eq!(v4.record_bytes(EntsBlock::Arrow), 64);
        for block in EntsBlock::ORDER {
            assert_eq!(v3.record_bytes(block), block.base_bytes());
        }
        assert_eq!(v4.record_bytes(EntsBlock::Point), v3.record_bytes(EntsBlock::Point));
        assert!(Layout::for_version(5).is_none());
    }
}
