//! Connector endpoint probing for local JVMs
//!
//! [`AttachProbe`] wraps the [`ConnectorLookup`] resolved by capability
//! detection ([`crate::preflight::initialize`]) and turns every lookup
//! failure into "no result". The probe never returns an error and never
//! panics: absence of an endpoint is the only failure signal.
//!
//! ## Failure policy
//!
//! | Lookup outcome                        | Probe result | Log level |
//! |---------------------------------------|--------------|-----------|
//! | endpoint published                    | `Some`       | -         |
//! | no management agent                   | `None`       | -         |
//! | `ProcessGone`, `IncompatibleRuntime`  | `None`       | debug     |
//! | anything else                         | `None`       | warn      |
//!
//! For long-running hosts the process-wide helpers ([`install`],
//! [`is_available`], [`probe`]) run capability detection exactly once and
//! share the result.

pub mod listener;
pub mod lookup;
pub mod perfdata;
pub mod target;

#[cfg(any(test, feature = "test-utils"))]
pub mod fixture;

pub use listener::AttachListenerLookup;
pub use lookup::{ConnectorLookup, PerfDataLookup};

use crate::config::ProbeConfig;
use crate::domain::{ConnectorEndpoint, Pid, ProbeError};
use crate::preflight::{self, ProbeSupport};
use log::{debug, warn};
use std::error::Error;
use std::sync::OnceLock;

/// Resolved, ready-to-use connector probe
///
/// Only obtainable from a successful capability detection, so holding one
/// proves probing is supported.
#[derive(Debug)]
pub struct AttachProbe {
    lookup: Box<dyn ConnectorLookup>,
}

impl AttachProbe {
    pub fn new(lookup: Box<dyn ConnectorLookup>) -> Self {
        Self { lookup }
    }

    /// Name of the resolved lookup (`perfdata` or `attach`)
    #[must_use]
    pub fn lookup_name(&self) -> &'static str {
        self.lookup.name()
    }

    /// Extract the connector endpoint published by `pid`, if any
    #[must_use]
    pub fn probe(&self, pid: Pid) -> Option<ConnectorEndpoint> {
        match self.lookup.lookup(pid) {
            Ok(endpoint) => endpoint,
            Err(err) if err.is_transient() => {
                debug!("No connector address for {pid}: {err}");
                None
            }
            Err(err) => {
                warn!("Could not get connector address for {pid}: {}", error_chain(&err));
                None
            }
        }
    }

    /// Run the lookup without absorbing failures
    ///
    /// For diagnostics; [`probe`](Self::probe) is the supported entry point.
    ///
    /// # Errors
    /// Whatever the resolved lookup reports.
    pub fn try_probe(&self, pid: Pid) -> Result<Option<ConnectorEndpoint>, ProbeError> {
        self.lookup.lookup(pid)
    }
}

/// Format an error with its full `source()` chain
#[must_use]
pub fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

static SUPPORT: OnceLock<ProbeSupport> = OnceLock::new();

/// Run process-wide capability detection with `config`
///
/// Only the first call (or the first [`is_available`] / [`probe`]) decides;
/// later calls return the cached result and ignore their argument.
pub fn install(config: &ProbeConfig) -> &'static ProbeSupport {
    SUPPORT.get_or_init(|| preflight::initialize(config))
}

/// Process-wide support, detected with the default configuration if
/// [`install`] was never called
pub fn support() -> &'static ProbeSupport {
    SUPPORT.get_or_init(|| preflight::initialize(&ProbeConfig::default()))
}

/// Whether probing is available in this process. Stable for its lifetime.
pub fn is_available() -> bool {
    support().is_available()
}

/// Probe through the process-wide support; `None` when unavailable
pub fn probe(pid: Pid) -> Option<ConnectorEndpoint> {
    support().probe(pid)
}
