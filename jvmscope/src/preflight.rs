//! Capability detection for connector probing
//!
//! Validates that this host can introspect local JVMs and resolves the
//! connector lookup to use. Runs once per process; the outcome is a value,
//! never a process exit, so the host application decides whether missing
//! support is fatal.

use crate::attach::{AttachListenerLookup, AttachProbe, ConnectorLookup, PerfDataLookup};
use crate::config::{LookupStrategy, ProbeConfig};
use crate::domain::{CapabilityError, ConnectorEndpoint, Pid};
use anyhow::{bail, Result};
use log::{debug, info};
use std::fs;

/// Outcome of capability detection
#[derive(Debug)]
pub enum ProbeSupport {
    Available(AttachProbe),
    Unavailable(CapabilityError),
}

impl ProbeSupport {
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, ProbeSupport::Available(_))
    }

    #[must_use]
    pub fn as_probe(&self) -> Option<&AttachProbe> {
        match self {
            ProbeSupport::Available(probe) => Some(probe),
            ProbeSupport::Unavailable(_) => None,
        }
    }

    /// Probe `pid`, or `None` when support is unavailable
    #[must_use]
    pub fn probe(&self, pid: Pid) -> Option<ConnectorEndpoint> {
        match self {
            ProbeSupport::Available(probe) => probe.probe(pid),
            ProbeSupport::Unavailable(err) => {
                debug!("Probe of {pid} skipped: {err}");
                None
            }
        }
    }
}

/// Run capability detection
pub fn initialize(config: &ProbeConfig) -> ProbeSupport {
    match detect(config) {
        Ok(probe) => {
            info!("Connector probing enabled via {} lookup", probe.lookup_name());
            ProbeSupport::Available(probe)
        }
        Err(err) => {
            debug!("Cannot enable attach: {err}");
            ProbeSupport::Unavailable(err)
        }
    }
}

fn detect(config: &ProbeConfig) -> Result<AttachProbe, CapabilityError> {
    check_platform()?;
    check_procfs(config)?;
    check_temp_root(config)?;
    let lookup = resolve_lookup(config)?;
    Ok(AttachProbe::new(lookup))
}

/// procfs layout, attach sockets and `SIGQUIT` triggering are Linux-specific
fn check_platform() -> Result<(), CapabilityError> {
    if cfg!(target_os = "linux") {
        Ok(())
    } else {
        Err(CapabilityError::UnsupportedPlatform(std::env::consts::OS))
    }
}

fn check_procfs(config: &ProbeConfig) -> Result<(), CapabilityError> {
    let path = config.proc_root.join("self").join("status");
    fs::read_to_string(&path)
        .map(|_| ())
        .map_err(|source| CapabilityError::ProcfsUnavailable { path, source })
}

fn check_temp_root(config: &ProbeConfig) -> Result<(), CapabilityError> {
    let path = config.tmp_root.clone();
    match fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(CapabilityError::TempRootUnavailable {
            path,
            source: std::io::Error::other("not a directory"),
        }),
        Err(source) => Err(CapabilityError::TempRootUnavailable { path, source }),
    }
}

/// Primary lookup first, legacy lookup as fallback, unless forced
fn resolve_lookup(config: &ProbeConfig) -> Result<Box<dyn ConnectorLookup>, CapabilityError> {
    let perfdata =
        || PerfDataLookup::resolve(config).map(|l| Box::new(l) as Box<dyn ConnectorLookup>);
    let attach =
        || AttachListenerLookup::resolve(config).map(|l| Box::new(l) as Box<dyn ConnectorLookup>);

    let resolved = match config.strategy {
        LookupStrategy::PerfData => perfdata(),
        LookupStrategy::Attach => attach(),
        LookupStrategy::Auto => perfdata().or_else(|| {
            debug!("Instrumentation buffers unavailable, falling back to attach listener");
            attach()
        }),
    };

    resolved.ok_or_else(|| {
        CapabilityError::NoLookup(format!(
            "strategy {:?} found nothing usable under {}",
            config.strategy,
            config.tmp_root.display()
        ))
    })
}

/// Check if the target process exists
///
/// # Errors
/// Returns an actionable error when `/proc/<pid>` is missing.
pub fn check_process_exists(config: &ProbeConfig, pid: Pid) -> Result<()> {
    let proc_path = config.proc_root.join(pid.0.to_string());
    if !proc_path.exists() {
        bail!(
            "Process {} not found.\n\n\
             Is the process still running? Check with: ps -p {}",
            pid.0,
            pid.0
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Fake procfs with a readable `self/status`
    fn fake_proc(root: &std::path::Path) -> PathBuf {
        let proc_root = root.join("proc");
        fs::create_dir_all(proc_root.join("self")).unwrap();
        fs::write(proc_root.join("self/status"), "Name:\tjvmscope\n").unwrap();
        proc_root
    }

    #[test]
    fn test_missing_procfs_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProbeConfig::default()
            .with_proc_root(dir.path().join("no-proc"))
            .with_tmp_root(dir.path());
        let support = initialize(&config);
        assert!(!support.is_available());
        assert!(support.as_probe().is_none());
        assert_eq!(support.probe(Pid(1)), None);
    }

    #[test]
    fn test_missing_temp_root_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProbeConfig::default()
            .with_proc_root(fake_proc(dir.path()))
            .with_tmp_root(dir.path().join("no-tmp"));
        let support = initialize(&config);
        #[cfg(target_os = "linux")]
        assert!(matches!(
            support,
            ProbeSupport::Unavailable(CapabilityError::TempRootUnavailable { .. })
        ));
        assert!(!support.is_available());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_auto_prefers_perfdata() {
        let dir = tempfile::tempdir().unwrap();
        let tmp_root = dir.path().join("tmp");
        fs::create_dir_all(tmp_root.join("hsperfdata_duke")).unwrap();
        let config = ProbeConfig::default()
            .with_proc_root(fake_proc(dir.path()))
            .with_tmp_root(&tmp_root);

        let support = initialize(&config);
        assert_eq!(support.as_probe().map(AttachProbe::lookup_name), Some("perfdata"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_auto_falls_back_to_attach() {
        let dir = tempfile::tempdir().unwrap();
        let tmp_root = dir.path().join("tmp");
        fs::create_dir_all(&tmp_root).unwrap();
        let config = ProbeConfig::default()
            .with_proc_root(fake_proc(dir.path()))
            .with_tmp_root(&tmp_root);

        let support = initialize(&config);
        assert_eq!(support.as_probe().map(AttachProbe::lookup_name), Some("attach"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_forced_perfdata_without_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let tmp_root = dir.path().join("tmp");
        fs::create_dir_all(&tmp_root).unwrap();
        let config = ProbeConfig::default()
            .with_proc_root(fake_proc(dir.path()))
            .with_tmp_root(&tmp_root)
            .with_strategy(LookupStrategy::PerfData);

        let support = initialize(&config);
        assert!(matches!(support, ProbeSupport::Unavailable(CapabilityError::NoLookup(_))));
    }

    #[test]
    fn test_process_not_found() {
        let result = check_process_exists(&ProbeConfig::default(), Pid(999_999_999));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("not found"));
    }
}
