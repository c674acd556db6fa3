//! Little-endian primitives shared by every section codec.

use draftdoc_core::geometry::Point2;
use draftdoc_core::style::{Color, PackedColor, StrokeStyle};

use crate::SnapshotError;
use crate::container::SectionTag;

#[derive(Debug, Default)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn bool32(&mut self, value: bool) {
        self.u32(u32::from(value));
    }

    pub(crate) fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn point(&mut self, point: Point2) {
        self.f32(point.x());
        self.f32(point.y());
    }

    pub(crate) fn color(&mut self, color: Color) {
        self.f32(color.r);
        self.f32(color.g);
        self.f32(color.b);
        self.f32(color.a);
    }

    pub(crate) fn packed(&mut self, color: PackedColor) {
        self.u32(color.0);
    }

    /// color (4 x f32), enabled as f32 0/1, width
    pub(crate) fn stroke(&mut self, stroke: &StrokeStyle) {
        self.color(stroke.color);
        self.f32(if stroke.enabled { 1.0 } else { 0.0 });
        self.f32(stroke.width);
    }

    /// Converts a collection length to the on-disk u32, refusing silent truncation.
    pub(crate) fn count(&mut self, len: usize, what: &str) -> Result<(), SnapshotError> {
        let value = u32::try_from(len).map_err(|_| SnapshotError::overflow(what))?;
        self.u32(value);
        Ok(())
    }
}

/// Cursor over one section payload. Every read is bounds checked and reports
/// the owning section on failure.
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    tag: SectionTag,
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(tag: SectionTag, data: &'a [u8]) -> Self {
        Self { tag, data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn malformed(&self, reason: impl Into<String>) -> SnapshotError {
        SnapshotError::malformed(self.tag, reason)
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| SnapshotError::overflow(format!("{} read", self.tag)))?;
        if end > self.data.len() {
            return Err(self.malformed(format!(
                "needs {len} bytes at offset {}, only {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32, SnapshotError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn f32(&mut self) -> Result<f32, SnapshotError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub(crate) fn bool32(&mut self) -> Result<bool, SnapshotError> {
        Ok(self.u32()? != 0)
    }

    pub(crate) fn flag(&mut self) -> Result<bool, SnapshotError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.malformed(format!("presence byte {other} is neither 0 nor 1"))),
        }
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), SnapshotError> {
        self.take(len).map(|_| ())
    }

    pub(crate) fn point(&mut self) -> Result<Point2, SnapshotError> {
        let x = self.f32()?;
        let y = self.f32()?;
        Ok(Point2::new(x, y))
    }

    pub(crate) fn color(&mut self) -> Result<Color, SnapshotError> {
        Ok(Color::rgba(self.f32()?, self.f32()?, self.f32()?, self.f32()?))
    }

    pub(crate) fn packed(&mut self) -> Result<PackedColor, SnapshotError> {
        Ok(PackedColor(self.u32()?))
    }

    pub(crate) fn stroke(&mut self) -> Result<StrokeStyle, SnapshotError> {
        let color = self.color()?;
        let enabled = self.f32()? != 0.0;
        let width = self.f32()?;
        Ok(StrokeStyle {
            color,
            enabled,
            width,
        })
    }

    /// Checks that `count` items of `size` bytes fit in what is left, so that
    /// corrupt counts fail before any allocation sized by them.
    pub(crate) fn expect_items(&self, count: u32, size: usize) -> Result<usize, SnapshotError> {
        let needed = (count as usize)
            .checked_mul(size)
            .ok_or_else(|| SnapshotError::overflow(format!("{} records", self.tag)))?;
        if needed > self.remaining() {
            return Err(self.malformed(format!(
                "{count} records of {size} bytes exceed the {} remaining bytes",
                self.remaining()
            )));
        }
        Ok(count as usize)
    }

    pub(crate) fn finish(&self) -> Result<(), SnapshotError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.malformed(format!("{} trailing bytes", self.remaining())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reports_short_reads_against_its_section() {
        let tag = SectionTag::ENTS;
        let mut reader = ByteReader::new(tag, &[1, 0, 0]);
        let err = reader.u32().unwrap_err();
        assert!(matches!(err, SnapshotError::Malformed { tag: t, .. } if t == tag));
    }

    #[test]
    fn expect_items_rejects_counts_larger_than_the_payload() {
        let reader = ByteReader::new(SectionTag::ORDR, &[0; 8]);
        assert_eq!(reader.expect_items(2, 4), Ok(2));
        assert!(reader.expect_items(3, 4).is_err());
        assert!(matches!(
            reader.expect_items(u32::MAX, usize::MAX),
            Err(SnapshotError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn stroke_layout_is_six_floats() {
        let mut writer = ByteWriter::new();
        writer.stroke(&StrokeStyle::solid(Color::WHITE, 2.5));
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), 24);
        let mut reader = ByteReader::new(SectionTag::ENTS, &bytes);
        let stroke = reader.stroke().unwrap();
        assert!(stroke.enabled);
        assert_eq!(stroke.width, 2.5);
        reader.finish().unwrap();
    }
}
