//! Target process resolution through procfs
//!
//! A JVM running in a container sees its own pid namespace and its own
//! `/tmp`. Files it publishes are reached from the host through
//! `/proc/<pid>/root`, named after the namespace pid.

use crate::config::ProbeConfig;
use crate::domain::{Pid, ProbeError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A live process as seen from this host
#[derive(Debug, Clone)]
pub struct TargetProcess {
    pub pid: Pid,
    /// Pid inside the innermost pid namespace (equal to `pid` on the host)
    pub ns_pid: u32,
    /// Effective uid
    pub uid: Option<u32>,
    proc_dir: PathBuf,
    tmp_root: PathBuf,
}

impl TargetProcess {
    /// Resolve a pid against procfs
    ///
    /// # Errors
    /// `ProcessGone` when the process does not exist (or exits while its
    /// status is read).
    pub fn resolve(config: &ProbeConfig, pid: Pid) -> Result<Self, ProbeError> {
        let proc_dir = config.proc_root.join(pid.0.to_string());
        let status_path = proc_dir.join("status");
        let status = fs::read_to_string(&status_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProbeError::ProcessGone(pid),
            _ => ProbeError::Io { path: status_path.clone(), source: e },
        })?;

        Ok(Self {
            pid,
            ns_pid: parse_ns_pid(&status).unwrap_or(pid.0),
            uid: parse_uid(&status),
            proc_dir,
            tmp_root: config.tmp_root.clone(),
        })
    }

    /// True when the process lives in a nested pid namespace
    #[must_use]
    pub fn is_containerized(&self) -> bool {
        self.ns_pid != self.pid.0
    }

    /// Candidate temp directories, host view first
    #[must_use]
    pub fn tmp_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.tmp_root.clone()];
        if self.is_containerized() {
            dirs.push(resolve_in_root(&self.proc_dir, &self.tmp_root));
        }
        dirs
    }

    /// Working directory as seen from the host
    #[must_use]
    pub fn cwd(&self) -> PathBuf {
        self.proc_dir.join("cwd")
    }

    /// Whether the HotSpot VM library is mapped into the process
    ///
    /// # Errors
    /// `ProcessGone` if the maps file vanished.
    pub fn maps_hotspot(&self) -> Result<bool, ProbeError> {
        let maps_path = self.proc_dir.join("maps");
        let maps = fs::read_to_string(&maps_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProbeError::ProcessGone(self.pid),
            _ => ProbeError::Io { path: maps_path.clone(), source: e },
        })?;
        Ok(maps.lines().any(|line| line.ends_with("/libjvm.so")))
    }

    /// Whether the process still exists
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.proc_dir.exists()
    }
}

/// Map an absolute path inside the process's mount namespace to the host
fn resolve_in_root(proc_dir: &Path, path: &Path) -> PathBuf {
    let relative = path.strip_prefix("/").unwrap_or(path);
    proc_dir.join("root").join(relative)
}

/// Innermost pid from the `NSpid:` line of `/proc/<pid>/status`
fn parse_ns_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("NSpid:"))
        .and_then(|rest| rest.split_whitespace().last())
        .and_then(|pid| pid.parse().ok())
}

/// Effective uid from the `Uid:` line (real, effective, saved, fs)
fn parse_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().nth(1))
        .and_then(|uid| uid.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tjava\nUmask:\t0022\nState:\tS (sleeping)\n\
                          Tgid:\t4242\nPid:\t4242\nUid:\t1000\t1001\t1000\t1000\n\
                          NSpid:\t4242\t7\n";

    #[test]
    fn test_parse_ns_pid() {
        assert_eq!(parse_ns_pid(STATUS), Some(7));
        assert_eq!(parse_ns_pid("NSpid:\t99\n"), Some(99));
        assert_eq!(parse_ns_pid("Name:\tjava\n"), None);
    }

    #[test]
    fn test_parse_uid() {
        assert_eq!(parse_uid(STATUS), Some(1001));
        assert_eq!(parse_uid("Name:\tjava\n"), None);
    }

    #[test]
    fn test_resolve_in_root() {
        let root = resolve_in_root(Path::new("/proc/4242"), Path::new("/tmp"));
        assert_eq!(root, PathBuf::from("/proc/4242/root/tmp"));
    }

    #[test]
    fn test_resolve_missing_process() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProbeConfig::default().with_proc_root(dir.path());
        let err = TargetProcess::resolve(&config, Pid(4242)).unwrap_err();
        assert!(matches!(err, ProbeError::ProcessGone(Pid(4242))));
    }

    #[test]
    fn test_resolve_containerized() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("4242")).unwrap();
        fs::write(dir.path().join("4242/status"), STATUS).unwrap();
        let config = ProbeConfig::default().with_proc_root(dir.path());

        let target = TargetProcess::resolve(&config, Pid(4242)).unwrap();
        assert!(target.is_containerized());
        assert_eq!(target.ns_pid, 7);
        assert_eq!(target.uid, Some(1001));
        assert_eq!(
            target.tmp_dirs(),
            vec![PathBuf::from("/tmp"), dir.path().join("4242/root/tmp")]
        );
    }

    #[test]
    fn test_resolve_self() {
        let result = TargetProcess::resolve(&ProbeConfig::default(), Pid::current());
        #[cfg(target_os = "linux")]
        {
            let target = result.unwrap();
            assert!(target.is_alive());
            assert!(!target.maps_hotspot().unwrap());
        }
        #[cfg(not(target_os = "linux"))]
        let _ = result;
    }
}
