//! Structured error types for jvmscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Every enum here is closed: callers match variants explicitly instead of
//! catching broad error hierarchies.

use super::types::{Pid, Unit};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Capability detection failed; probe support is unavailable for this process
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Local attach is not supported on {0}")]
    UnsupportedPlatform(&'static str),

    #[error("procfs is not readable at {path}")]
    ProcfsUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Temp root {path} is not a usable directory")]
    TempRootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No connector lookup could be resolved: {0}")]
    NoLookup(String),
}

/// Failure of a single connector lookup
///
/// `ProcessGone` and `IncompatibleRuntime` are the expected, silent outcomes.
/// Everything else is reported to operators.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Process {0} is gone")]
    ProcessGone(Pid),

    #[error("Process {pid} runs an incompatible runtime: {reason}")]
    IncompatibleRuntime { pid: Pid, reason: String },

    #[error("Instrumentation buffer of process {0} is not accessible yet")]
    NotAccessible(Pid),

    #[error("Failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt instrumentation buffer for process {pid}")]
    PerfData {
        pid: Pid,
        #[source]
        source: PerfDataError,
    },

    #[error("Attach protocol error with process {pid}: {reason}")]
    Protocol { pid: Pid, reason: String },

    #[error("Process {pid} did not open its attach socket within {waited:?}")]
    AttachTimeout { pid: Pid, waited: Duration },

    #[error("Failed to signal process {pid}")]
    Signal {
        pid: Pid,
        #[source]
        source: std::io::Error,
    },
}

impl ProbeError {
    /// True for the two conditions a probe absorbs without logging a warning
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ProbeError::ProcessGone(_) | ProbeError::IncompatibleRuntime { .. })
    }
}

/// Structural problem in a HotSpot instrumentation buffer
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PerfDataError {
    #[error("Bad magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("Unsupported perf data version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("Unknown byte order marker {0}")]
    BadByteOrder(u8),

    #[error("Buffer truncated at offset {offset} (need {needed} bytes)")]
    Truncated { offset: usize, needed: usize },

    #[error("Invalid entry at offset {offset}: {reason}")]
    InvalidEntry { offset: usize, reason: String },
}

/// Structural problem in a flight recording
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormatError {
    #[error("Bad magic {0:02x?}, not a flight recording")]
    BadMagic([u8; 4]),

    #[error("Unsupported recording version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Truncated at offset {offset} (need {needed} bytes)")]
    Truncated { offset: usize, needed: usize },

    #[error("Invalid data at offset {offset}: {reason}")]
    Invalid { offset: usize, reason: String },
}

/// The artifact could not be loaded as a recording
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Recording not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Recording is not readable: {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed recording {path}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Loading was cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Aggregation aborted because the selected attribute could not be read
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Event #{index} ({kind}) has no attribute '{attribute}'")]
    MissingAttribute { index: usize, kind: String, attribute: String },

    #[error("Attribute '{attribute}' mixes units: {expected:?} and {found:?}")]
    UnitMismatch { attribute: String, expected: Unit, found: Unit },
}
