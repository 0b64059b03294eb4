//! HotSpot instrumentation buffer (`hsperfdata`) reader
//!
//! Every HotSpot JVM started without `-XX:-UsePerfData` publishes a
//! memory-mapped file at `<tmp>/hsperfdata_<user>/<pid>`. The management
//! agent records its local connector address there, so reading the file is
//! enough to discover the endpoint without attaching.
//!
//! ```text
//! prologue (32 bytes)
//!   0  magic          u32  0xCAFEC0C0, always big-endian
//!   4  byte_order     u8   0 = big, 1 = little
//!   5  major          u8
//!   6  minor          u8
//!   7  accessible     u8
//!   8  used           i32
//!  12  overflow       i32
//!  16  mod_timestamp  i64
//!  24  entry_offset   i32
//!  28  num_entries    i32
//! entry (20 byte header, then name and data)
//!   0  entry_length   i32
//!   4  name_offset    i32
//!   8  vector_length  i32  0 for scalars
//!  12  data_type      u8   'J' long, 'B' byte vector
//!  13  flags          u8
//!  14  data_units     u8   5 = string
//!  15  variability    u8
//!  16  data_offset    i32
//! ```

use crate::domain::PerfDataError;

pub const PERFDATA_MAGIC: u32 = 0xcafe_c0c0;

/// Only major version 2 (JDK 6 and later) is understood
pub const SUPPORTED_MAJOR_VERSION: u8 = 2;

/// Local connector address published by the management agent
pub const CONNECTOR_ADDRESS_COUNTER: &str = "sun.management.JMXConnectorServer.address";

/// Prefix of the per-connector remote counters (`...JMXConnectorServer.<n>.<key>`)
pub const REMOTE_CONNECTOR_PREFIX: &str = "sun.management.JMXConnectorServer.";

/// Main class (or jar) and arguments of the JVM
pub const JAVA_COMMAND_COUNTER: &str = "sun.rt.javaCommand";

pub const VM_VERSION_COUNTER: &str = "java.property.java.vm.version";

const PROLOGUE_SIZE: usize = 32;
const ENTRY_HEADER_SIZE: usize = 20;

const TYPE_LONG: u8 = b'J';
const TYPE_INT: u8 = b'I';
const TYPE_BYTE: u8 = b'B';
const UNITS_STRING: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Big,
    Little,
}

/// Decoded counter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterValue {
    Long(i64),
    Text(String),
    Bytes(Vec<u8>),
}

/// A parsed instrumentation buffer
#[derive(Debug, Clone)]
pub struct PerfData {
    pub major: u8,
    pub minor: u8,
    /// False while the JVM is still initializing the buffer
    pub accessible: bool,
    counters: Vec<(String, CounterValue)>,
}

impl PerfData {
    /// Parse a complete buffer
    ///
    /// # Errors
    /// Returns an error on a bad magic, an unsupported version, or when an
    /// entry points outside the buffer.
    pub fn parse(buf: &[u8]) -> Result<Self, PerfDataError> {
        let magic = u32::from_be_bytes(array_at::<4>(buf, 0)?);
        if magic != PERFDATA_MAGIC {
            return Err(PerfDataError::BadMagic(magic));
        }

        let order = match byte_at(buf, 4)? {
            0 => ByteOrder::Big,
            1 => ByteOrder::Little,
            other => return Err(PerfDataError::BadByteOrder(other)),
        };
        let major = byte_at(buf, 5)?;
        let minor = byte_at(buf, 6)?;
        if major != SUPPORTED_MAJOR_VERSION {
            return Err(PerfDataError::UnsupportedVersion { major, minor });
        }
        let accessible = byte_at(buf, 7)? != 0;

        if buf.len() < PROLOGUE_SIZE {
            return Err(PerfDataError::Truncated { offset: 0, needed: PROLOGUE_SIZE });
        }
        let entry_offset = offset_at(buf, 24, order)?;
        let num_entries = offset_at(buf, 28, order)?;

        // Every entry needs at least its header
        let room = buf.len().saturating_sub(entry_offset) / ENTRY_HEADER_SIZE;
        if num_entries > room {
            return Err(PerfDataError::InvalidEntry {
                offset: 28,
                reason: format!("{num_entries} entries cannot fit in {} bytes", buf.len()),
            });
        }

        let mut counters = Vec::with_capacity(num_entries);
        let mut offset = entry_offset;
        for _ in 0..num_entries {
            let entry_length = offset_at(buf, offset, order)?;
            if entry_length < ENTRY_HEADER_SIZE {
                return Err(PerfDataError::InvalidEntry {
                    offset,
                    reason: format!("entry length {entry_length} is shorter than its header"),
                });
            }
            let end = offset.checked_add(entry_length).filter(|&e| e <= buf.len()).ok_or(
                PerfDataError::Truncated { offset, needed: entry_length },
            )?;
            let entry = &buf[offset..end];

            if let Some(counter) = parse_entry(entry, offset, order)? {
                counters.push(counter);
            }
            offset = end;
        }

        Ok(Self { major, minor, accessible, counters })
    }

    /// Look up a counter by its full name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CounterValue> {
        self.counters.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            CounterValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn long(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            CounterValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Local connector address, present once the management agent is running
    #[must_use]
    pub fn connector_address(&self) -> Option<&str> {
        self.text(CONNECTOR_ADDRESS_COUNTER).filter(|s| !s.is_empty())
    }

    /// Remote connector counters, keyed by the part after the prefix
    /// (e.g. `0.remoteAddress`, `0.authenticate`)
    #[must_use]
    pub fn remote_connectors(&self) -> Vec<(&str, &str)> {
        self.counters
            .iter()
            .filter_map(|(name, value)| {
                let key = name.strip_prefix(REMOTE_CONNECTOR_PREFIX)?;
                if !key.starts_with(|c: char| c.is_ascii_digit()) {
                    return None;
                }
                match value {
                    CounterValue::Text(s) => Some((key, s.as_str())),
                    _ => None,
                }
            })
            .collect()
    }

    #[must_use]
    pub fn java_command(&self) -> Option<&str> {
        self.text(JAVA_COMMAND_COUNTER).filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn vm_version(&self) -> Option<&str> {
        self.text(VM_VERSION_COUNTER)
    }

    /// Number of decoded counters
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

/// Decode one entry. Returns `None` for scalar types this reader ignores.
fn parse_entry(
    entry: &[u8],
    base: usize,
    order: ByteOrder,
) -> Result<Option<(String, CounterValue)>, PerfDataError> {
    let invalid = |reason: String| PerfDataError::InvalidEntry { offset: base, reason };

    let name_offset = offset_at(entry, 4, order)?;
    let vector_length = offset_at(entry, 8, order)?;
    let data_type = byte_at(entry, 12)?;
    let units = byte_at(entry, 14)?;
    let data_offset = offset_at(entry, 16, order)?;

    let name_bytes = entry
        .get(name_offset..)
        .ok_or_else(|| invalid(format!("name offset {name_offset} out of bounds")))?;
    let name_len = name_bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| invalid("unterminated name".to_string()))?;
    let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();

    let value = if vector_length == 0 {
        match data_type {
            TYPE_LONG => {
                let raw = array_at::<8>(entry, data_offset)?;
                CounterValue::Long(match order {
                    ByteOrder::Big => i64::from_be_bytes(raw),
                    ByteOrder::Little => i64::from_le_bytes(raw),
                })
            }
            TYPE_INT => {
                let raw = array_at::<4>(entry, data_offset)?;
                CounterValue::Long(i64::from(match order {
                    ByteOrder::Big => i32::from_be_bytes(raw),
                    ByteOrder::Little => i32::from_le_bytes(raw),
                }))
            }
            _ => return Ok(None),
        }
    } else {
        if data_type != TYPE_BYTE {
            return Ok(None);
        }
        let data = data_offset
            .checked_add(vector_length)
            .and_then(|end| entry.get(data_offset..end))
            .ok_or_else(|| invalid(format!("vector of {vector_length} bytes out of bounds")))?;
        if units == UNITS_STRING {
            let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
            CounterValue::Text(String::from_utf8_lossy(&data[..len]).into_owned())
        } else {
            CounterValue::Bytes(data.to_vec())
        }
    };

    Ok(Some((name, value)))
}

fn byte_at(buf: &[u8], offset: usize) -> Result<u8, PerfDataError> {
    buf.get(offset).copied().ok_or(PerfDataError::Truncated { offset, needed: 1 })
}

fn array_at<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], PerfDataError> {
    offset
        .checked_add(N)
        .and_then(|end| buf.get(offset..end))
        .and_then(|slice| slice.try_into().ok())
        .ok_or(PerfDataError::Truncated { offset, needed: N })
}

/// Read a non-negative i32 used as an offset, length or count
fn offset_at(buf: &[u8], offset: usize, order: ByteOrder) -> Result<usize, PerfDataError> {
    let raw = array_at::<4>(buf, offset)?;
    let value = match order {
        ByteOrder::Big => i32::from_be_bytes(raw),
        ByteOrder::Little => i32::from_le_bytes(raw),
    };
    usize::try_from(value).map_err(|_| PerfDataError::InvalidEntry {
        offset,
        reason: format!("negative value {value}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::fixture::PerfDataBuilder;

    #[test]
    fn test_parse_connector_address() {
        let buf = PerfDataBuilder::new()
            .long("sun.rt.createVmBeginTime", 1_700_000_000_000)
            .text(CONNECTOR_ADDRESS_COUNTER, "service:jmx:rmi://127.0.0.1/stub/rO0AB")
            .text(JAVA_COMMAND_COUNTER, "com.example.Main --port 8080")
            .build();

        let data = PerfData::parse(&buf).unwrap();
        assert_eq!(data.len(), 3);
        assert!(data.accessible);
        assert_eq!(data.connector_address(), Some("service:jmx:rmi://127.0.0.1/stub/rO0AB"));
        assert_eq!(data.java_command(), Some("com.example.Main --port 8080"));
        assert_eq!(data.long("sun.rt.createVmBeginTime"), Some(1_700_000_000_000));
    }

    #[test]
    fn test_parse_big_endian() {
        let buf = PerfDataBuilder::new()
            .big_endian()
            .long("java.threads.live", 42)
            .text(VM_VERSION_COUNTER, "21.0.2+13")
            .build();

        let data = PerfData::parse(&buf).unwrap();
        assert_eq!(data.long("java.threads.live"), Some(42));
        assert_eq!(data.vm_version(), Some("21.0.2+13"));
    }

    #[test]
    fn test_missing_connector_counter() {
        let buf = PerfDataBuilder::new().text(JAVA_COMMAND_COUNTER, "app.jar").build();
        let data = PerfData::parse(&buf).unwrap();
        assert_eq!(data.connector_address(), None);
    }

    #[test]
    fn test_remote_connectors() {
        let buf = PerfDataBuilder::new()
            .text(CONNECTOR_ADDRESS_COUNTER, "local")
            .text("sun.management.JMXConnectorServer.0.remoteAddress", "service:jmx:rmi:///jndi/x")
            .text("sun.management.JMXConnectorServer.0.authenticate", "false")
            .build();

        let data = PerfData::parse(&buf).unwrap();
        let remote = data.remote_connectors();
        assert_eq!(
            remote,
            vec![("0.remoteAddress", "service:jmx:rmi:///jndi/x"), ("0.authenticate", "false")]
        );
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = PerfDataBuilder::new().build();
        buf[0] = 0xde;
        assert!(matches!(PerfData::parse(&buf), Err(PerfDataError::BadMagic(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let buf = PerfDataBuilder::new().version(1, 0).build();
        assert_eq!(
            PerfData::parse(&buf).unwrap_err(),
            PerfDataError::UnsupportedVersion { major: 1, minor: 0 }
        );
    }

    #[test]
    fn test_truncated_buffer() {
        let buf = PerfDataBuilder::new().text(CONNECTOR_ADDRESS_COUNTER, "addr").build();
        let err = PerfData::parse(&buf[..buf.len() - 4]).unwrap_err();
        assert!(matches!(err, PerfDataError::Truncated { .. }));
    }

    #[test]
    fn test_oversized_entry_count_rejected() {
        let mut buf = PerfDataBuilder::new().text(JAVA_COMMAND_COUNTER, "Main").build();
        buf[28..32].copy_from_slice(&i32::MAX.to_le_bytes());
        let err = PerfData::parse(&buf).unwrap_err();
        assert!(matches!(err, PerfDataError::InvalidEntry { offset: 28, .. }));
    }

    #[test]
    fn test_not_accessible_flag() {
        let buf = PerfDataBuilder::new().accessible(false).build();
        assert!(!PerfData::parse(&buf).unwrap().accessible);
    }
}
