//! Bounded big-endian cursor over a recording buffer
//!
//! Positions are absolute offsets into the whole file so that every
//! `FormatError` points at the exact failing byte.

use crate::domain::FormatError;

/// Longest LEB128 integer: eight 7-bit groups plus one full byte
const MAX_VARINT_BYTES: usize = 9;

#[derive(Debug, Clone)]
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Integers (short, int, long, char) are LEB128 encoded
    compressed: bool,
}

impl<'a> ByteReader<'a> {
    /// Reader over `buf[..end]`, starting at `pos`
    pub fn new(
        buf: &'a [u8],
        pos: usize,
        end: usize,
        compressed: bool,
    ) -> Result<Self, FormatError> {
        if end > buf.len() || pos > end {
            return Err(FormatError::Truncated { offset: pos, needed: end.saturating_sub(pos) });
        }
        Ok(Self { buf: &buf[..end], pos, compressed })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read a size-prefixed record and step over it
    ///
    /// The size includes the size field itself. The returned reader is
    /// bounded to the record and positioned right after the size field.
    pub fn record(&mut self) -> Result<ByteReader<'a>, FormatError> {
        let start = self.pos;
        let size = self.count()?;
        let size_len = self.pos - start;
        if size <= size_len {
            return Err(FormatError::Invalid {
                offset: start,
                reason: format!("record size {size}"),
            });
        }
        let end = start
            .checked_add(size)
            .filter(|&end| end <= self.buf.len())
            .ok_or(FormatError::Truncated { offset: start, needed: size })?;
        let record =
            ByteReader { buf: &self.buf[..end], pos: self.pos, compressed: self.compressed };
        self.pos = end;
        Ok(record)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        if self.remaining() < len {
            return Err(FormatError::Truncated { offset: self.pos, needed: len });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn be_u16(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn be_i32(&mut self) -> Result<i32, FormatError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn be_i64(&mut self) -> Result<i64, FormatError> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> Result<f32, FormatError> {
        Ok(f32::from_be_bytes(self.array()?))
    }

    pub fn f64(&mut self) -> Result<f64, FormatError> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    pub fn varint(&mut self) -> Result<u64, FormatError> {
        let start = self.pos;
        let mut value = 0u64;
        for i in 0..MAX_VARINT_BYTES - 1 {
            let byte =
                self.u8().map_err(|_| FormatError::Truncated { offset: start, needed: i + 1 })?;
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        let last = self
            .u8()
            .map_err(|_| FormatError::Truncated { offset: start, needed: MAX_VARINT_BYTES })?;
        Ok(value | (u64::from(last) << 56))
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn short(&mut self) -> Result<i16, FormatError> {
        if self.compressed {
            Ok(self.varint()? as i16)
        } else {
            Ok(i16::from_be_bytes(self.array()?))
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn char(&mut self) -> Result<u16, FormatError> {
        if self.compressed {
            Ok(self.varint()? as u16)
        } else {
            self.be_u16()
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn int(&mut self) -> Result<i32, FormatError> {
        if self.compressed {
            Ok(self.varint()? as i32)
        } else {
            self.be_i32()
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn long(&mut self) -> Result<i64, FormatError> {
        if self.compressed {
            Ok(self.varint()? as i64)
        } else {
            self.be_i64()
        }
    }

    /// A non-negative `int` used as a count or length
    pub fn count(&mut self) -> Result<usize, FormatError> {
        let offset = self.pos;
        let value = self.int()?;
        usize::try_from(value).map_err(|_| FormatError::Invalid {
            offset,
            reason: format!("negative length {value}"),
        })
    }

    /// Encoded string; `None` for the null encoding and constant-pool
    /// references, which are not resolved
    pub fn string(&mut self) -> Result<Option<String>, FormatError> {
        let offset = self.pos;
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(String::new())),
            2 => {
                self.long()?;
                Ok(None)
            }
            3 => {
                let len = self.count()?;
                let raw = self.bytes(len)?;
                String::from_utf8(raw.to_vec()).map(Some).map_err(|_| FormatError::Invalid {
                    offset,
                    reason: "string is not valid UTF-8".to_string(),
                })
            }
            4 => {
                let len = self.count()?;
                let mut units = Vec::with_capacity(len.min(self.remaining()));
                for _ in 0..len {
                    units.push(self.char()?);
                }
                Ok(Some(String::from_utf16_lossy(&units)))
            }
            5 => {
                let len = self.count()?;
                Ok(Some(self.bytes(len)?.iter().map(|&b| char::from(b)).collect()))
            }
            other => Err(FormatError::Invalid {
                offset,
                reason: format!("unknown string encoding {other}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(buf: &[u8], compressed: bool) -> ByteReader<'_> {
        ByteReader::new(buf, 0, buf.len(), compressed).unwrap()
    }

    #[test]
    fn test_varint() {
        assert_eq!(reader(&[0x05], true).varint().unwrap(), 5);
        assert_eq!(reader(&[0xac, 0x02], true).varint().unwrap(), 300);

        // Nine bytes: the last one contributes all 8 bits
        let mut all_ones = vec![0xff; 8];
        all_ones.push(0xff);
        assert_eq!(reader(&all_ones, true).long().unwrap(), -1);
    }

    #[test]
    fn test_truncated_varint() {
        let err = reader(&[0x80, 0x80], true).varint().unwrap_err();
        assert_eq!(err, FormatError::Truncated { offset: 0, needed: 3 });
    }

    #[test]
    fn test_fixed_width_integers() {
        let mut r = reader(&[0xff, 0xfe, 0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 1, 0], false);
        assert_eq!(r.short().unwrap(), -2);
        assert_eq!(r.int().unwrap(), 7);
        assert_eq!(r.long().unwrap(), 256);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_strings() {
        let mut r = reader(&[0, 1, 3, 2, b'h', b'i', 5, 1, 0xe9, 4, 2, 0x4f, 0x4b, 2, 9], true);
        assert_eq!(r.string().unwrap(), None);
        assert_eq!(r.string().unwrap(), Some(String::new()));
        assert_eq!(r.string().unwrap(), Some("hi".to_string()));
        assert_eq!(r.string().unwrap(), Some("\u{e9}".to_string()));
        assert_eq!(r.string().unwrap(), Some("OK".to_string()));
        // Constant-pool reference
        assert_eq!(r.string().unwrap(), None);
    }

    #[test]
    fn test_unknown_string_encoding() {
        let err = reader(&[9], true).string().unwrap_err();
        assert!(matches!(err, FormatError::Invalid { offset: 0, .. }));
    }

    #[test]
    fn test_record() {
        // size 3 (including itself), two payload bytes, then the next record
        let buf = [3, 7, 8, 2, 9];
        let mut r = reader(&buf, true);
        let mut first = r.record().unwrap();
        assert_eq!(first.bytes(2).unwrap(), &[7, 8]);
        assert!(first.u8().is_err());
        assert_eq!(r.position(), 3);

        let mut second = r.record().unwrap();
        assert_eq!(second.u8().unwrap(), 9);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_record_overrun() {
        let mut r = reader(&[10, 1, 2], true);
        assert_eq!(r.record().unwrap_err(), FormatError::Truncated { offset: 0, needed: 10 });

        let mut r = reader(&[1, 1, 2], true);
        assert!(matches!(r.record().unwrap_err(), FormatError::Invalid { .. }));
    }

    #[test]
    fn test_negative_count() {
        let err = reader(&[0xff, 0xff, 0xff, 0xff], false).count().unwrap_err();
        assert!(matches!(err, FormatError::Invalid { .. }));
    }
}
