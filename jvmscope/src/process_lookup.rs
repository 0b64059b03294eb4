//! Discover local JVMs and resolve a PID from a main class or jar name.
//!
//! Every JVM with perf data enabled leaves `<tmp>/hsperfdata_<user>/<pid>`.
//! Stale buffers of crashed JVMs are skipped by checking `/proc/<pid>`.

use crate::attach::lookup::{perfdata_dirs, read_buffer, PERFDATA_DIR_PREFIX};
use crate::config::ProbeConfig;
use crate::domain::Pid;
use anyhow::{bail, Context, Result};
use log::debug;
use std::fs;
use std::path::PathBuf;

/// A local JVM found through its instrumentation buffer.
#[derive(Debug, Clone)]
pub struct JvmProcess {
    pub pid: Pid,
    /// Owner, taken from the `hsperfdata_<user>` directory name
    pub user: String,
    /// Main class or jar plus arguments, or the `comm` name as a fallback
    pub command: String,
    pub vm_version: Option<String>,
    pub perfdata: PathBuf,
}

impl JvmProcess {
    /// Main class or jar, without arguments
    #[must_use]
    pub fn main_class(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or("")
    }
}

/// List live JVMs on this host, sorted by PID.
///
/// # Errors
/// Returns an error if the temp root cannot be read.
pub fn list_jvms(config: &ProbeConfig) -> Result<Vec<JvmProcess>> {
    fs::read_dir(&config.tmp_root)
        .with_context(|| format!("Failed to read {}", config.tmp_root.display()))?;

    let mut jvms = Vec::new();
    for dir in perfdata_dirs(&config.tmp_root) {
        let user = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(PERFDATA_DIR_PREFIX))
            .unwrap_or("")
            .to_string();

        let Ok(entries) = fs::read_dir(&dir) else {
            debug!("Skipping unreadable {}", dir.display());
            continue;
        };

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Ok(raw_pid) = file_name.to_string_lossy().parse::<u32>() else {
                continue;
            };
            let pid = Pid(raw_pid);

            // Skip stale buffers left behind by dead JVMs
            if !config.proc_root.join(raw_pid.to_string()).exists() {
                debug!("Skipping stale buffer {}", entry.path().display());
                continue;
            }

            let perfdata = entry.path();
            let data = match read_buffer(pid, &perfdata) {
                Ok(data) => data,
                Err(e) => {
                    debug!("Skipping {}: {e}", perfdata.display());
                    continue;
                }
            };

            let command = match data.java_command() {
                Some(cmd) => cmd.to_string(),
                None => read_comm(config, pid).unwrap_or_default(),
            };

            jvms.push(JvmProcess {
                pid,
                user: user.clone(),
                command,
                vm_version: data.vm_version().map(str::to_string),
                perfdata,
            });
        }
    }

    jvms.sort_by_key(|j| j.pid);
    Ok(jvms)
}

/// Find a JVM by main class, jar, or command substring.
///
/// # Errors
/// - No JVMs found
/// - Multiple JVMs found (ambiguous)
pub fn find_jvm_by_name(config: &ProbeConfig, name: &str) -> Result<JvmProcess> {
    let mut matches: Vec<JvmProcess> =
        list_jvms(config)?.into_iter().filter(|jvm| is_match(&jvm.command, name)).collect();

    match matches.len() {
        0 => bail!(
            "No JVM matching '{name}' found.\n\
             List running JVMs with: jvmscope list"
        ),
        1 => Ok(matches.remove(0)),
        _ => {
            let list: Vec<String> =
                matches.iter().map(|m| format!("  {} ({})", m.pid.0, m.command)).collect();
            bail!(
                "Multiple JVMs match '{name}':\n{}\n\n\
                 Specify the PID explicitly: jvmscope connector <PID>",
                list.join("\n")
            )
        }
    }
}

/// Command name from `/proc/<pid>/stat`, used when perf data lacks one.
fn read_comm(config: &ProbeConfig, pid: Pid) -> Result<String> {
    let stat_path = config.proc_root.join(pid.0.to_string()).join("stat");
    let stat = fs::read_to_string(&stat_path)
        .with_context(|| format!("Cannot read {}", stat_path.display()))?;
    extract_comm(&stat)
}

/// Extract command name from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ..."
fn extract_comm(stat_line: &str) -> Result<String> {
    let open = stat_line.find('(').context("Invalid stat format")?;
    let close = stat_line.rfind(')').context("Invalid stat format")?;
    if open >= close {
        bail!("Invalid stat format");
    }
    Ok(stat_line[open + 1..close].to_string())
}

/// Check if a JVM command matches the search pattern.
fn is_match(command: &str, pattern: &str) -> bool {
    let main = command.split_whitespace().next().unwrap_or("");

    // Simple class name ("Main" for "com.example.Main") or jar basename
    let simple = main.rsplit(['.', '/']).find(|s| !s.is_empty() && *s != "jar").unwrap_or(main);
    let jar_name = std::path::Path::new(main).file_name().and_then(|n| n.to_str()).unwrap_or(main);

    main == pattern
        || simple == pattern
        || jar_name == pattern
        // Substring match for flexibility
        || command.contains(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::fixture::PerfDataBuilder;
    use crate::attach::perfdata::{JAVA_COMMAND_COUNTER, VM_VERSION_COUNTER};

    #[test]
    fn test_extract_comm() {
        let stat = "1234 (java) S 1 1234 1234 0 -1 4194304";
        assert_eq!(extract_comm(stat).unwrap(), "java");
    }

    #[test]
    fn test_extract_comm_with_parens() {
        // Command names can contain parentheses
        let stat = "1234 (app (v2)) S 1 1234";
        assert_eq!(extract_comm(stat).unwrap(), "app (v2)");
    }

    #[test]
    fn test_is_match() {
        let cmd = "com.example.OrderService --port 8080";
        assert!(is_match(cmd, "com.example.OrderService"));
        assert!(is_match(cmd, "OrderService"));
        assert!(is_match(cmd, "Order"));
        assert!(!is_match(cmd, "Billing"));

        let jar = "/opt/app/billing.jar -Dx=y";
        assert!(is_match(jar, "billing.jar"));
        assert!(is_match(jar, "billing"));
    }

    fn fake_host() -> (tempfile::TempDir, ProbeConfig) {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        let user_dir = dir.path().join("tmp/hsperfdata_duke");
        fs::create_dir_all(&user_dir).unwrap();

        for (pid, command) in [(300, "com.example.OrderService"), (200, "/opt/billing.jar")] {
            fs::create_dir_all(proc_root.join(pid.to_string())).unwrap();
            let buffer = PerfDataBuilder::new()
                .text(JAVA_COMMAND_COUNTER, command)
                .text(VM_VERSION_COUNTER, "21.0.2+13")
                .build();
            fs::write(user_dir.join(pid.to_string()), buffer).unwrap();
        }

        // Stale buffer without a live process
        fs::write(user_dir.join("999"), PerfDataBuilder::new().build()).unwrap();
        // Not a pid
        fs::write(user_dir.join("README"), b"x").unwrap();

        let config = ProbeConfig::default()
            .with_proc_root(proc_root)
            .with_tmp_root(dir.path().join("tmp"));
        (dir, config)
    }

    #[test]
    fn test_list_jvms() {
        let (_dir, config) = fake_host();
        let jvms = list_jvms(&config).unwrap();

        let pids: Vec<u32> = jvms.iter().map(|j| j.pid.0).collect();
        assert_eq!(pids, vec![200, 300]);
        assert_eq!(jvms[0].user, "duke");
        assert_eq!(jvms[0].main_class(), "/opt/billing.jar");
        assert_eq!(jvms[1].vm_version.as_deref(), Some("21.0.2+13"));
    }

    #[test]
    fn test_list_skips_corrupt_buffer() {
        let (dir, config) = fake_host();
        let mut buffer =
            PerfDataBuilder::new().text(JAVA_COMMAND_COUNTER, "com.example.Broken").build();
        buffer[28..32].copy_from_slice(&i32::MAX.to_le_bytes());
        fs::create_dir_all(dir.path().join("proc/400")).unwrap();
        fs::write(dir.path().join("tmp/hsperfdata_duke/400"), buffer).unwrap();

        let pids: Vec<u32> = list_jvms(&config).unwrap().iter().map(|j| j.pid.0).collect();
        assert_eq!(pids, vec![200, 300]);
    }

    #[test]
    fn test_find_jvm_by_name() {
        let (_dir, config) = fake_host();
        assert_eq!(find_jvm_by_name(&config, "OrderService").unwrap().pid, Pid(300));
        assert_eq!(find_jvm_by_name(&config, "billing").unwrap().pid, Pid(200));

        let err = find_jvm_by_name(&config, "Inventory").unwrap_err().to_string();
        assert!(err.contains("No JVM matching"));

        let err = find_jvm_by_name(&config, "o").unwrap_err().to_string();
        assert!(err.contains("Multiple JVMs"));
    }

    #[test]
    fn test_list_jvms_missing_tmp_root() {
        let config = ProbeConfig::default().with_tmp_root("/nonexistent/jvmscope/tmp");
        assert!(list_jvms(&config).is_err());
    }
}
