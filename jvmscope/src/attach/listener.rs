//! HotSpot dynamic attach listener client
//!
//! Protocol (Linux):
//! 1. If `<tmp>/.java_pid<nspid>` is not a socket yet, create the trigger
//!    file `.attach_pid<nspid>` in the target's cwd (or temp root) and send
//!    `SIGQUIT`. The VM sees the trigger and starts its attach listener.
//! 2. Connect to the socket and send `1\0<command>\0<arg0>\0<arg1>\0<arg2>\0`.
//! 3. The reply is a status line (`0` on success) followed by the output.
//!
//! `agentProperties` returns the agent's `java.util.Properties` in text form;
//! the management agent stores its local connector address there.

#![allow(unsafe_code)] // kill() and geteuid() require unsafe

use super::lookup::ConnectorLookup;
use super::target::TargetProcess;
use crate::config::ProbeConfig;
use crate::domain::{ConnectorEndpoint, Pid, ProbeError};
use log::debug;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Agent property holding the local connector address
pub const LOCAL_CONNECTOR_PROPERTY: &str = "com.sun.management.jmxremote.localConnectorAddress";

const PROTOCOL_VERSION: &str = "1";
const AGENT_PROPERTIES_COMMAND: &str = "agentProperties";

/// Poll interval while waiting for the listener to come up
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Asks the target's attach listener for its agent properties
#[derive(Debug, Clone)]
pub struct AttachListenerLookup {
    config: ProbeConfig,
}

impl AttachListenerLookup {
    /// Resolve the lookup; available on every Unix host with a temp root
    #[must_use]
    pub fn resolve(config: &ProbeConfig) -> Option<Self> {
        if !cfg!(unix) || !config.tmp_root.is_dir() {
            return None;
        }
        Some(Self { config: config.clone() })
    }

    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Run one attach command and return its output (status line stripped)
    ///
    /// # Errors
    /// See [`ProbeError`]; non-HotSpot targets yield `IncompatibleRuntime`.
    pub fn execute(&self, pid: Pid, command: &str, args: &[&str]) -> Result<String, ProbeError> {
        let target = TargetProcess::resolve(&self.config, pid)?;
        if !target.maps_hotspot()? {
            return Err(ProbeError::IncompatibleRuntime {
                pid,
                reason: "no HotSpot VM mapped".to_string(),
            });
        }
        if target.uid.is_some_and(|uid| uid != current_euid()) && current_euid() != 0 {
            debug!("{pid} is owned by another user, the attach listener may reject us");
        }

        let socket = match find_socket(&target) {
            Some(socket) => socket,
            None => self.start_listener(&target)?,
        };

        let mut stream = UnixStream::connect(&socket).map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => ProbeError::ProcessGone(pid),
            _ => ProbeError::Io { path: socket.clone(), source: e },
        })?;
        let io_err = |e: std::io::Error| ProbeError::Io { path: socket.clone(), source: e };
        stream.set_read_timeout(Some(self.config.attach_timeout)).map_err(io_err)?;
        stream.write_all(&encode_request(command, args)).map_err(io_err)?;

        let mut reply = String::new();
        stream.read_to_string(&mut reply).map_err(io_err)?;
        parse_reply(pid, &reply)
    }

    /// Create the trigger file, signal the VM, and wait for its socket
    fn start_listener(&self, target: &TargetProcess) -> Result<PathBuf, ProbeError> {
        let pid = target.pid;
        let trigger = create_trigger(target)?;
        debug!("Created attach trigger {} for {pid}", trigger.display());

        let result = signal_quit(pid).and_then(|()| {
            let deadline = Instant::now() + self.config.attach_timeout;
            loop {
                if let Some(socket) = find_socket(target) {
                    return Ok(socket);
                }
                if !target.is_alive() {
                    return Err(ProbeError::ProcessGone(pid));
                }
                if Instant::now() >= deadline {
                    return Err(ProbeError::AttachTimeout {
                        pid,
                        waited: self.config.attach_timeout,
                    });
                }
                std::thread::sleep(SOCKET_POLL_INTERVAL);
            }
        });

        if let Err(e) = fs::remove_file(&trigger) {
            debug!("Could not remove {}: {e}", trigger.display());
        }
        result
    }
}

impl ConnectorLookup for AttachListenerLookup {
    fn name(&self) -> &'static str {
        "attach"
    }

    fn lookup(&self, pid: Pid) -> Result<Option<ConnectorEndpoint>, ProbeError> {
        let properties = self.execute(pid, AGENT_PROPERTIES_COMMAND, &[])?;
        Ok(find_property(&properties, LOCAL_CONNECTOR_PROPERTY)
            .filter(|v| !v.is_empty())
            .map(ConnectorEndpoint::new))
    }
}

/// First existing `.java_pid<nspid>` socket among the target's temp dirs
fn find_socket(target: &TargetProcess) -> Option<PathBuf> {
    let name = format!(".java_pid{}", target.ns_pid);
    target.tmp_dirs().into_iter().map(|dir| dir.join(&name)).find(|path| is_socket(path))
}

fn is_socket(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.file_type().is_socket())
}

/// Create `.attach_pid<nspid>` in the cwd, falling back to the temp dirs
fn create_trigger(target: &TargetProcess) -> Result<PathBuf, ProbeError> {
    let name = format!(".attach_pid{}", target.ns_pid);
    let mut candidates = vec![target.cwd().join(&name)];
    candidates.extend(target.tmp_dirs().into_iter().rev().map(|dir| dir.join(&name)));

    let mut last_err = None;
    for candidate in candidates {
        match fs::File::create(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) => {
                debug!("Cannot create {}: {e}", candidate.display());
                last_err = Some((candidate, e));
            }
        }
    }
    match last_err {
        Some((path, source)) => Err(ProbeError::Io { path, source }),
        None => Err(ProbeError::Protocol {
            pid: target.pid,
            reason: "no location for the attach trigger".to_string(),
        }),
    }
}

fn signal_quit(pid: Pid) -> Result<(), ProbeError> {
    let raw = i32::from(pid);
    if raw <= 0 {
        // kill() would address a process group
        return Err(ProbeError::ProcessGone(pid));
    }
    // SAFETY: kill() has no memory safety requirements
    if unsafe { libc::kill(raw, libc::SIGQUIT) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Err(ProbeError::ProcessGone(pid))
    } else {
        Err(ProbeError::Signal { pid, source: err })
    }
}

fn current_euid() -> u32 {
    // SAFETY: geteuid() cannot fail
    unsafe { libc::geteuid() }
}

/// Encode a request: version, command and exactly three arguments
fn encode_request(command: &str, args: &[&str]) -> Vec<u8> {
    let mut parts = vec![PROTOCOL_VERSION, command];
    parts.extend((0..3).map(|i| args.get(i).copied().unwrap_or("")));

    let mut request = Vec::new();
    for part in parts {
        request.extend_from_slice(part.as_bytes());
        request.push(0);
    }
    request
}

/// Split the status line from the output
fn parse_reply(pid: Pid, reply: &str) -> Result<String, ProbeError> {
    let (status, body) = reply.split_once('\n').unwrap_or((reply, ""));
    match status.trim().parse::<i32>() {
        Ok(0) => Ok(body.to_string()),
        Ok(code) => Err(ProbeError::Protocol {
            pid,
            reason: format!("command failed with status {code}: {}", body.trim()),
        }),
        Err(_) => Err(ProbeError::Protocol {
            pid,
            reason: format!("unexpected reply status '{}'", status.trim()),
        }),
    }
}

/// Find a key in `java.util.Properties` text output
fn find_property(properties: &str, key: &str) -> Option<String> {
    properties.lines().find_map(|line| {
        let line = line.trim_start();
        if line.starts_with('#') || line.starts_with('!') {
            return None;
        }
        let (raw_key, raw_value) = split_property(line)?;
        (unescape(raw_key) == key).then(|| unescape(raw_value))
    })
}

/// Split at the first unescaped `=` or `:`
fn split_property(line: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '=' | ':' if !escaped => return Some((&line[..i], &line[i + 1..])),
            _ => escaped = false,
        }
    }
    None
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Some(decoded) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
                {
                    out.push(decoded);
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request() {
        assert_eq!(encode_request("agentProperties", &[]), b"1\0agentProperties\0\0\0\0".to_vec());
        assert_eq!(
            encode_request("jcmd", &["VM.version"]),
            b"1\0jcmd\0VM.version\0\0\0".to_vec()
        );
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply(Pid(1), "0\nkey=value\n").unwrap(), "key=value\n");
        let err = parse_reply(Pid(1), "101\nProtocol mismatch").unwrap_err();
        assert!(err.to_string().contains("status 101"));
        assert!(parse_reply(Pid(1), "garbage").is_err());
    }

    #[test]
    fn test_find_property() {
        let properties = "#Thu Jan 01 00:00:00 UTC 2026\n\
             sun.jvm.args=-Xmx1g\n\
             com.sun.management.jmxremote.localConnectorAddress=\
             service\\:jmx\\:rmi\\://127.0.0.1/stub/rO0\n";
        assert_eq!(
            find_property(properties, LOCAL_CONNECTOR_PROPERTY),
            Some("service:jmx:rmi://127.0.0.1/stub/rO0".to_string())
        );
        assert_eq!(find_property(properties, "missing.key"), None);
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\:b\=c"), "a:b=c");
        assert_eq!(unescape(r"tab\there"), "tab\there");
        assert_eq!(unescape(r"\u0041BC"), "ABC");
    }

    #[test]
    fn test_execute_on_self_is_incompatible() {
        let lookup = AttachListenerLookup::new(ProbeConfig::default());
        let result = lookup.lookup(Pid::current());
        #[cfg(target_os = "linux")]
        assert!(matches!(result, Err(ProbeError::IncompatibleRuntime { .. })));
        #[cfg(not(target_os = "linux"))]
        let _ = result;
    }

    #[test]
    fn test_execute_on_missing_process() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProbeConfig::default().with_proc_root(dir.path());
        let err = AttachListenerLookup::new(config).lookup(Pid(4242)).unwrap_err();
        assert!(matches!(err, ProbeError::ProcessGone(_)));
    }
}
