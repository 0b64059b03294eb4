//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep process identifiers, connector addresses and
//! recorded quantities from being mixed up with plain integers and strings.

use serde::Serialize;
use std::fmt;

/// Process ID
///
/// Identifies a target process. Supplied by the caller, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl Pid {
    /// The PID of the current process
    #[must_use]
    pub fn current() -> Self {
        Pid(std::process::id())
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Pid(pid)
    }
}

impl From<Pid> for i32 {
    #[allow(clippy::cast_possible_wrap)]
    fn from(pid: Pid) -> Self {
        pid.0 as i32
    }
}

/// Management connector endpoint published by a running JVM
///
/// Opaque to this crate. In practice a JMX service URL such as
/// `service:jmx:rmi://127.0.0.1/stub/rO0ABXNy...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectorEndpoint(String);

impl ConnectorEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the endpoint as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectorEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timestamp in nanoseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Convert to seconds since the epoch (f64)
    #[allow(clippy::cast_precision_loss)]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_seconds())
    }
}

/// Base unit of a recorded quantity
///
/// Values are always stored in the base unit. Display units are picked only
/// when formatting a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Dimensionless value (counts, identifiers, raw numbers)
    Plain,
    /// Time span in nanoseconds
    Nanoseconds,
    /// Point in time, nanoseconds since the Unix epoch
    EpochNanoseconds,
    /// Data amount in bytes
    Bytes,
    /// Fraction where 1.0 is 100%
    Fraction,
    /// Frequency in hertz
    Hertz,
}

/// A numeric attribute value in its base unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    #[must_use]
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// Shorthand for a nanosecond time span
    #[must_use]
    pub fn nanos(value: f64) -> Self {
        Self::new(value, Unit::Nanoseconds)
    }

    /// Shorthand for a dimensionless value
    #[must_use]
    pub fn plain(value: f64) -> Self {
        Self::new(value, Unit::Plain)
    }
}
