//! Probe configuration
//!
//! Built from CLI flags (with environment fallbacks) in `main`, or from
//! `ProbeConfig::default()` when the library is used directly.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default location of HotSpot instrumentation buffers and attach sockets
pub const DEFAULT_TMP_ROOT: &str = "/tmp";

/// Default procfs mount point
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// How long the attach lookup waits for the target to open its socket
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(5);

/// Which connector lookup capability detection should resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupStrategy {
    /// Instrumentation buffer first, dynamic attach as fallback
    #[default]
    Auto,
    /// Only read the instrumentation buffer
    PerfData,
    /// Only use the dynamic attach socket
    Attach,
}

impl FromStr for LookupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "perfdata" | "perf-data" | "hsperfdata" => Ok(Self::PerfData),
            "attach" => Ok(Self::Attach),
            other => Err(format!("unknown lookup strategy '{other}' (auto, perfdata, attach)")),
        }
    }
}

/// Configuration consumed by capability detection and the lookups it resolves
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Directory holding `hsperfdata_<user>` and `.java_pid<pid>` sockets
    pub tmp_root: PathBuf,
    /// procfs mount point
    pub proc_root: PathBuf,
    pub strategy: LookupStrategy,
    pub attach_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            tmp_root: PathBuf::from(DEFAULT_TMP_ROOT),
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            strategy: LookupStrategy::Auto,
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
        }
    }
}

impl ProbeConfig {
    #[must_use]
    pub fn with_tmp_root(mut self, tmp_root: impl Into<PathBuf>) -> Self {
        self.tmp_root = tmp_root.into();
        self
    }

    #[must_use]
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: LookupStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProbeConfig::default();
        assert_eq!(config.tmp_root, PathBuf::from("/tmp"));
        assert_eq!(config.proc_root, PathBuf::from("/proc"));
        assert_eq!(config.strategy, LookupStrategy::Auto);
        assert_eq!(config.attach_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("auto".parse::<LookupStrategy>(), Ok(LookupStrategy::Auto));
        assert_eq!("PerfData".parse::<LookupStrategy>(), Ok(LookupStrategy::PerfData));
        assert_eq!("hsperfdata".parse::<LookupStrategy>(), Ok(LookupStrategy::PerfData));
        assert_eq!("attach".parse::<LookupStrategy>(), Ok(LookupStrategy::Attach));
        assert!("jmx".parse::<LookupStrategy>().is_err());
    }

    #[test]
    fn test_builder() {
        let config = ProbeConfig::default()
            .with_tmp_root("/var/tmp")
            .with_strategy(LookupStrategy::Attach)
            .with_attach_timeout(Duration::from_millis(250));
        assert_eq!(config.tmp_root, PathBuf::from("/var/tmp"));
        assert_eq!(config.strategy, LookupStrategy::Attach);
        assert_eq!(config.attach_timeout, Duration::from_millis(250));
    }
}
