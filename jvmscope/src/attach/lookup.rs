//! Connector address lookups
//!
//! Two ways to learn a JVM's local connector address:
//!
//! - [`PerfDataLookup`]: read the `sun.management.JMXConnectorServer.address`
//!   counter from the target's instrumentation buffer. Read-only, no
//!   interaction with the target. Primary.
//! - [`AttachListenerLookup`](super::listener::AttachListenerLookup): ask the
//!   target's attach listener for its agent properties. Works when perf data
//!   is disabled, at the cost of waking the listener. Legacy fallback.

use super::perfdata::PerfData;
use super::target::TargetProcess;
use crate::config::ProbeConfig;
use crate::domain::{ConnectorEndpoint, PerfDataError, Pid, ProbeError};
use log::debug;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory name prefix of per-user instrumentation buffers
pub const PERFDATA_DIR_PREFIX: &str = "hsperfdata_";

/// A resolved facility that maps a pid to its connector endpoint
///
/// `Ok(None)` means the target is reachable but publishes no endpoint
/// (management agent not started).
pub trait ConnectorLookup: Send + Sync + fmt::Debug {
    /// Short name for logs and diagnostics
    fn name(&self) -> &'static str;

    /// # Errors
    /// Returns a `ProbeError` describing why the lookup failed.
    fn lookup(&self, pid: Pid) -> Result<Option<ConnectorEndpoint>, ProbeError>;
}

/// Reads connector addresses from `hsperfdata` buffers
#[derive(Debug, Clone)]
pub struct PerfDataLookup {
    config: ProbeConfig,
}

impl PerfDataLookup {
    /// Resolve the lookup if this host publishes instrumentation buffers
    ///
    /// Returns `None` when the temp root holds no `hsperfdata_*` directory,
    /// which is the case when every JVM runs with `-XX:-UsePerfData` or
    /// none has run yet.
    #[must_use]
    pub fn resolve(config: &ProbeConfig) -> Option<Self> {
        if perfdata_dirs(&config.tmp_root).is_empty() {
            debug!("No {PERFDATA_DIR_PREFIX}* directory under {}", config.tmp_root.display());
            return None;
        }
        Some(Self { config: config.clone() })
    }

    /// Construct without checking the temp root
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Read and parse the buffer of a process
    ///
    /// # Errors
    /// `ProcessGone` when the process or its buffer is gone,
    /// `IncompatibleRuntime` for buffer versions this reader does not know.
    pub fn read(&self, pid: Pid) -> Result<PerfData, ProbeError> {
        let target = TargetProcess::resolve(&self.config, pid)?;
        let path = find_buffer(&target).ok_or(ProbeError::ProcessGone(pid))?;
        read_buffer(pid, &path)
    }
}

impl ConnectorLookup for PerfDataLookup {
    fn name(&self) -> &'static str {
        "perfdata"
    }

    fn lookup(&self, pid: Pid) -> Result<Option<ConnectorEndpoint>, ProbeError> {
        let data = self.read(pid)?;
        if !data.accessible {
            return Err(ProbeError::NotAccessible(pid));
        }
        Ok(data.connector_address().map(ConnectorEndpoint::new))
    }
}

/// Read and parse a buffer file, classifying failures for the probe
///
/// # Errors
/// See [`PerfDataLookup::read`].
pub fn read_buffer(pid: Pid, path: &Path) -> Result<PerfData, ProbeError> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ProbeError::ProcessGone(pid),
        _ => ProbeError::Io { path: path.to_path_buf(), source: e },
    })?;
    PerfData::parse(&bytes).map_err(|e| match e {
        PerfDataError::UnsupportedVersion { major, minor } => ProbeError::IncompatibleRuntime {
            pid,
            reason: format!("perf data version {major}.{minor}"),
        },
        other => ProbeError::PerfData { pid, source: other },
    })
}

/// All `hsperfdata_*` directories directly under `tmp_root`
#[must_use]
pub fn perfdata_dirs(tmp_root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(tmp_root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(PERFDATA_DIR_PREFIX))
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Locate the buffer of a target: host temp root first, then the
/// container's own temp root under its namespace pid.
fn find_buffer(target: &TargetProcess) -> Option<PathBuf> {
    let tmp_dirs = target.tmp_dirs();
    let (host_tmp, container_tmp) = tmp_dirs.split_first()?;

    let host_name = target.pid.0.to_string();
    let found = perfdata_dirs(host_tmp)
        .into_iter()
        .map(|dir| dir.join(&host_name))
        .find(|candidate| candidate.is_file());
    if found.is_some() {
        return found;
    }

    let ns_name = target.ns_pid.to_string();
    container_tmp
        .iter()
        .flat_map(|tmp| perfdata_dirs(tmp))
        .map(|dir| dir.join(&ns_name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::fixture::PerfDataBuilder;
    use crate::attach::perfdata::CONNECTOR_ADDRESS_COUNTER;

    /// Lay out a fake procfs and temp root for one process
    fn fake_host(pid: u32, buffer: Option<Vec<u8>>) -> (tempfile::TempDir, ProbeConfig) {
        let dir = tempfile::tempdir().unwrap();
        let proc_dir = dir.path().join("proc").join(pid.to_string());
        fs::create_dir_all(&proc_dir).unwrap();
        fs::write(proc_dir.join("status"), format!("Name:\tjava\nNSpid:\t{pid}\n")).unwrap();

        let user_dir = dir.path().join("tmp").join("hsperfdata_duke");
        fs::create_dir_all(&user_dir).unwrap();
        if let Some(buffer) = buffer {
            fs::write(user_dir.join(pid.to_string()), buffer).unwrap();
        }

        let config = ProbeConfig::default()
            .with_proc_root(dir.path().join("proc"))
            .with_tmp_root(dir.path().join("tmp"));
        (dir, config)
    }

    #[test]
    fn test_lookup_finds_connector() {
        let buffer = PerfDataBuilder::new()
            .text(CONNECTOR_ADDRESS_COUNTER, "service:jmx:rmi://127.0.0.1/stub/xyz")
            .build();
        let (_dir, config) = fake_host(4242, Some(buffer));

        let lookup = PerfDataLookup::resolve(&config).expect("hsperfdata dir exists");
        let endpoint = lookup.lookup(Pid(4242)).unwrap();
        assert_eq!(endpoint, Some(ConnectorEndpoint::new("service:jmx:rmi://127.0.0.1/stub/xyz")));
    }

    #[test]
    fn test_lookup_without_agent() {
        let buffer = PerfDataBuilder::new().text("sun.rt.javaCommand", "Main").build();
        let (_dir, config) = fake_host(4242, Some(buffer));

        let lookup = PerfDataLookup::new(config);
        assert_eq!(lookup.lookup(Pid(4242)).unwrap(), None);
    }

    #[test]
    fn test_missing_buffer_is_process_gone() {
        let (_dir, config) = fake_host(4242, None);
        let err = PerfDataLookup::new(config).lookup(Pid(4242)).unwrap_err();
        assert!(matches!(err, ProbeError::ProcessGone(_)));
    }

    #[test]
    fn test_missing_process_is_process_gone() {
        let (_dir, config) = fake_host(4242, None);
        let err = PerfDataLookup::new(config).lookup(Pid(999_999)).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_old_buffer_is_incompatible() {
        let buffer = PerfDataBuilder::new().version(1, 0).build();
        let (_dir, config) = fake_host(4242, Some(buffer));
        let err = PerfDataLookup::new(config).lookup(Pid(4242)).unwrap_err();
        assert!(matches!(err, ProbeError::IncompatibleRuntime { .. }));
    }

    #[test]
    fn test_inaccessible_buffer() {
        let buffer = PerfDataBuilder::new().accessible(false).build();
        let (_dir, config) = fake_host(4242, Some(buffer));
        let err = PerfDataLookup::new(config).lookup(Pid(4242)).unwrap_err();
        assert!(matches!(err, ProbeError::NotAccessible(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_resolve_requires_perfdata_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProbeConfig::default().with_tmp_root(dir.path());
        assert!(PerfDataLookup::resolve(&config).is_none());
    }

    #[test]
    fn test_container_buffer_under_ns_pid() {
        let dir = tempfile::tempdir().unwrap();
        let proc_dir = dir.path().join("proc/4242");
        fs::create_dir_all(&proc_dir).unwrap();
        fs::write(proc_dir.join("status"), "NSpid:\t4242\t1\n").unwrap();
        fs::create_dir_all(dir.path().join("tmp")).unwrap();

        // The container sees the configured temp root under /proc/<pid>/root
        let tmp_root = dir.path().join("tmp");
        let relative = tmp_root.strip_prefix("/").unwrap();
        let container_dir = proc_dir.join("root").join(relative).join("hsperfdata_app");
        fs::create_dir_all(&container_dir).unwrap();
        let buffer = PerfDataBuilder::new().text(CONNECTOR_ADDRESS_COUNTER, "inside").build();
        fs::write(container_dir.join("1"), buffer).unwrap();

        let config =
            ProbeConfig::default().with_proc_root(dir.path().join("proc")).with_tmp_root(tmp_root);
        let endpoint = PerfDataLookup::new(config).lookup(Pid(4242)).unwrap();
        assert_eq!(endpoint, Some(ConnectorEndpoint::new("inside")));
    }
}
