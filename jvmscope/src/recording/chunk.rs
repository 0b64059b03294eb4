//! Flight recording chunk header
//!
//! A recording is a sequence of self-contained chunks. Each starts with a
//! fixed 68-byte header, always big-endian:
//!
//! ```text
//!  0  magic             "FLR\0"
//!  4  major             u16
//!  6  minor             u16
//!  8  chunk_size        i64   including this header
//! 16  constant_pool     i64   offset relative to chunk start
//! 24  metadata          i64   offset relative to chunk start
//! 32  start_nanos       i64   epoch nanoseconds
//! 40  duration_nanos    i64
//! 48  start_ticks       i64
//! 56  ticks_per_second  i64
//! 64  features          i32   bit 0: compressed integers
//! ```

use super::reader::ByteReader;
use crate::domain::FormatError;

pub const CHUNK_MAGIC: [u8; 4] = *b"FLR\0";
pub const HEADER_SIZE: usize = 68;

/// Supported major versions (JDK 9 and later)
pub const SUPPORTED_MAJOR_VERSIONS: std::ops::RangeInclusive<u16> = 1..=2;

const FEATURE_COMPRESSED_INTS: i32 = 1;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Absolute offset of the chunk in the file
    pub offset: usize,
    pub major: u16,
    pub minor: u16,
    pub size: usize,
    pub constant_pool_offset: usize,
    pub metadata_offset: usize,
    pub start_nanos: i64,
    pub duration_nanos: i64,
    pub start_ticks: i64,
    pub ticks_per_second: i64,
    pub features: i32,
}

impl ChunkHeader {
    /// Parse and validate the header of the chunk starting at `offset`
    ///
    /// # Errors
    /// Bad magic, unsupported version, or offsets outside `buf`.
    pub fn parse(buf: &[u8], offset: usize) -> Result<Self, FormatError> {
        let mut r = ByteReader::new(buf, offset, buf.len(), false)?;
        if r.remaining() < HEADER_SIZE {
            return Err(FormatError::Truncated { offset, needed: HEADER_SIZE });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(r.bytes(4)?);
        if magic != CHUNK_MAGIC {
            return Err(FormatError::BadMagic(magic));
        }

        let major = r.be_u16()?;
        let minor = r.be_u16()?;
        if !SUPPORTED_MAJOR_VERSIONS.contains(&major) {
            return Err(FormatError::UnsupportedVersion { major, minor });
        }

        let size = header_offset(&mut r, "chunk size")?;
        let constant_pool_offset = header_offset(&mut r, "constant pool offset")?;
        let metadata_offset = header_offset(&mut r, "metadata offset")?;
        let start_nanos = r.be_i64()?;
        let duration_nanos = r.be_i64()?;
        let start_ticks = r.be_i64()?;
        let ticks_per_second = r.be_i64()?;
        let features = r.be_i32()?;

        if size < HEADER_SIZE {
            return Err(FormatError::Invalid {
                offset: offset + 8,
                reason: format!("chunk size {size} is smaller than the header"),
            });
        }
        match offset.checked_add(size) {
            Some(end) if end <= buf.len() => {}
            _ => return Err(FormatError::Truncated { offset, needed: size }),
        }
        if !(HEADER_SIZE..size).contains(&metadata_offset) {
            return Err(FormatError::Invalid {
                offset: offset + 24,
                reason: format!("metadata offset {metadata_offset} outside chunk of {size} bytes"),
            });
        }
        if ticks_per_second <= 0 {
            return Err(FormatError::Invalid {
                offset: offset + 56,
                reason: format!("ticks per second {ticks_per_second}"),
            });
        }

        Ok(Self {
            offset,
            major,
            minor,
            size,
            constant_pool_offset,
            metadata_offset,
            start_nanos,
            duration_nanos,
            start_ticks,
            ticks_per_second,
            features,
        })
    }

    #[must_use]
    pub fn compressed_integers(&self) -> bool {
        self.features & FEATURE_COMPRESSED_INTS != 0
    }

    /// Absolute offset one past the last byte of the chunk
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// First byte after the header
    #[must_use]
    pub fn body_start(&self) -> usize {
        self.offset + HEADER_SIZE
    }

    #[must_use]
    pub fn metadata_position(&self) -> usize {
        self.offset + self.metadata_offset
    }

    /// Convert a tick span to nanoseconds
    #[must_use]
    pub fn ticks_to_nanos(&self, ticks: i64) -> i64 {
        saturate(i128::from(ticks) * NANOS_PER_SECOND / i128::from(self.ticks_per_second))
    }

    /// Convert a tick counter value to epoch nanoseconds
    #[must_use]
    pub fn ticks_to_epoch_nanos(&self, ticks: i64) -> i64 {
        let since_start = i128::from(ticks) - i128::from(self.start_ticks);
        saturate(
            i128::from(self.start_nanos)
                + since_start * NANOS_PER_SECOND / i128::from(self.ticks_per_second),
        )
    }

    /// Tick span as fractional nanoseconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ticks_to_nanos_f64(&self, ticks: f64) -> f64 {
        ticks * 1e9 / self.ticks_per_second as f64
    }
}

fn header_offset(r: &mut ByteReader<'_>, what: &str) -> Result<usize, FormatError> {
    let at = r.position();
    let value = r.be_i64()?;
    usize::try_from(value)
        .map_err(|_| FormatError::Invalid {
            offset: at,
            reason: format!("negative {what} {value}"),
        })
}

#[allow(clippy::cast_possible_truncation)]
fn saturate(value: i128) -> i64 {
    value.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(major: u16, size: i64, metadata: i64, tps: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&CHUNK_MAGIC);
        buf.extend_from_slice(&major.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        for value in [size, 68, metadata, 1_000_000_000, 5, 100, tps] {
            buf.extend_from_slice(&value.to_be_bytes());
        }
        buf.extend_from_slice(&1i32.to_be_bytes());
        buf.resize(usize::try_from(size).unwrap().max(HEADER_SIZE), 0);
        buf
    }

    #[test]
    fn test_parse_header() {
        let buf = header_bytes(2, 100, 70, 1_000);
        let header = ChunkHeader::parse(&buf, 0).unwrap();
        assert_eq!(header.major, 2);
        assert_eq!(header.size, 100);
        assert_eq!(header.metadata_position(), 70);
        assert_eq!(header.end(), 100);
        assert!(header.compressed_integers());
    }

    #[test]
    fn test_tick_conversion() {
        let buf = header_bytes(2, 100, 70, 1_000);
        let header = ChunkHeader::parse(&buf, 0).unwrap();
        // 1000 ticks per second: one tick is one millisecond
        assert_eq!(header.ticks_to_nanos(3), 3_000_000);
        assert_eq!(header.ticks_to_epoch_nanos(102), 1_000_000_000 + 2_000_000);
        assert!((header.ticks_to_nanos_f64(0.5) - 500_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = header_bytes(2, 100, 70, 1_000);
        buf[..4].copy_from_slice(b"PK\x03\x04");
        assert_eq!(ChunkHeader::parse(&buf, 0), Err(FormatError::BadMagic(*b"PK\x03\x04")));
    }

    #[test]
    fn test_unsupported_version() {
        let buf = header_bytes(3, 100, 70, 1_000);
        assert_eq!(
            ChunkHeader::parse(&buf, 0),
            Err(FormatError::UnsupportedVersion { major: 3, minor: 0 })
        );
    }

    #[test]
    fn test_chunk_larger_than_file() {
        let mut buf = header_bytes(2, 100, 70, 1_000);
        buf.truncate(90);
        assert!(matches!(ChunkHeader::parse(&buf, 0), Err(FormatError::Truncated { .. })));
    }

    #[test]
    fn test_short_header() {
        assert_eq!(
            ChunkHeader::parse(b"FLR\0", 0),
            Err(FormatError::Truncated { offset: 0, needed: HEADER_SIZE })
        );
    }

    #[test]
    fn test_metadata_outside_chunk() {
        let buf = header_bytes(2, 100, 100, 1_000);
        assert!(matches!(ChunkHeader::parse(&buf, 0), Err(FormatError::Invalid { .. })));
    }
}
