//! Synthetic instrumentation buffers for tests

use super::perfdata::PERFDATA_MAGIC;

enum Value {
    Long(i64),
    Text(String),
}

/// Builds an `hsperfdata` buffer with the given counters
pub struct PerfDataBuilder {
    little_endian: bool,
    major: u8,
    minor: u8,
    accessible: bool,
    entries: Vec<(String, Value)>,
}

impl Default for PerfDataBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfDataBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { little_endian: true, major: 2, minor: 0, accessible: true, entries: Vec::new() }
    }

    #[must_use]
    pub fn big_endian(mut self) -> Self {
        self.little_endian = false;
        self
    }

    #[must_use]
    pub fn version(mut self, major: u8, minor: u8) -> Self {
        self.major = major;
        self.minor = minor;
        self
    }

    #[must_use]
    pub fn accessible(mut self, accessible: bool) -> Self {
        self.accessible = accessible;
        self
    }

    #[must_use]
    pub fn long(mut self, name: &str, value: i64) -> Self {
        self.entries.push((name.to_string(), Value::Long(value)));
        self
    }

    #[must_use]
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.entries.push((name.to_string(), Value::Text(value.to_string())));
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let int = |v: usize| -> [u8; 4] {
            let v = i32::try_from(v).unwrap_or(i32::MAX);
            if self.little_endian {
                v.to_le_bytes()
            } else {
                v.to_be_bytes()
            }
        };

        let mut entries = Vec::new();
        for (name, value) in &self.entries {
            let name_offset = 20;
            let data_offset = align8(name_offset + name.len() + 1);
            let (data, data_type, units, vector_length) = match value {
                Value::Long(v) => {
                    let bytes = if self.little_endian { v.to_le_bytes() } else { v.to_be_bytes() };
                    (bytes.to_vec(), b'J', 4u8, 0usize)
                }
                Value::Text(s) => {
                    let mut bytes = s.as_bytes().to_vec();
                    bytes.push(0);
                    let len = bytes.len();
                    (bytes, b'B', 5u8, len)
                }
            };
            let entry_length = align8(data_offset + data.len());

            let mut entry = Vec::with_capacity(entry_length);
            entry.extend_from_slice(&int(entry_length));
            entry.extend_from_slice(&int(name_offset));
            entry.extend_from_slice(&int(vector_length));
            entry.extend_from_slice(&[data_type, 0, units, 1]);
            entry.extend_from_slice(&int(data_offset));
            entry.extend_from_slice(name.as_bytes());
            entry.push(0);
            entry.resize(data_offset, 0);
            entry.extend_from_slice(&data);
            entry.resize(entry_length, 0);
            entries.extend_from_slice(&entry);
        }

        let mut buf = Vec::with_capacity(32 + entries.len());
        buf.extend_from_slice(&PERFDATA_MAGIC.to_be_bytes());
        buf.push(u8::from(self.little_endian));
        buf.push(self.major);
        buf.push(self.minor);
        buf.push(u8::from(self.accessible));
        buf.extend_from_slice(&int(32 + entries.len()));
        buf.extend_from_slice(&int(0));
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&int(32));
        buf.extend_from_slice(&int(self.entries.len()));
        buf.extend_from_slice(&entries);
        buf
    }
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}
