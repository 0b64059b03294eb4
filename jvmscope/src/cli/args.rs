//! CLI argument definitions

use crate::analysis::{AttributeSelector, KindFilter};
use crate::config::{LookupStrategy, ProbeConfig, DEFAULT_TMP_ROOT};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Kind aggregated by `stats` when no `--kind` or `--prefix` is given
pub const DEFAULT_KIND: &str = "jdk.JavaMonitorEnter";

#[derive(Parser, Debug)]
#[command(
    name = "jvmscope",
    version,
    about = "Find JVM management endpoints and summarize flight recordings",
    after_help = "\
EXAMPLES:
    jvmscope list                                   List local JVMs
    jvmscope connector 4242                         Connector address of PID 4242
    jvmscope connector OrderService                 Same, resolving the PID by main class
    jvmscope stats app.jfr                          Monitor-enter duration statistics
    jvmscope stats app.jfr --kind jdk.ThreadSleep   Another event kind
    jvmscope stats app.jfr --prefix jdk.GC --json   All GC events, as JSON
    jvmscope kinds app.jfr                          Event counts per kind"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding hsperfdata_<user> and attach sockets
    #[arg(
        long,
        global = true,
        env = "JVMSCOPE_TMPDIR",
        value_name = "DIR",
        default_value = DEFAULT_TMP_ROOT
    )]
    pub tmpdir: PathBuf,

    /// Connector lookup: auto, perfdata or attach
    #[arg(long, global = true, env = "JVMSCOPE_LOOKUP", default_value = "auto")]
    pub lookup: LookupStrategy,

    /// How long to wait for a JVM to open its attach socket
    #[arg(
        long,
        global = true,
        env = "JVMSCOPE_ATTACH_TIMEOUT_MS",
        value_name = "MS",
        default_value = "5000"
    )]
    pub attach_timeout_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the local management connector address of a JVM
    Connector {
        /// PID or main class / jar name
        #[arg(value_name = "TARGET")]
        target: String,
    },

    /// List local JVMs with instrumentation buffers
    List,

    /// Count, mean and standard deviation of one attribute
    Stats {
        /// Flight recording (.jfr)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Event kind to include (repeatable)
        #[arg(short, long = "kind", value_name = "KIND", conflicts_with = "prefix")]
        kinds: Vec<String>,

        /// Include every kind starting with this prefix
        #[arg(short, long, value_name = "PREFIX")]
        prefix: Option<String>,

        /// Numeric attribute to aggregate
        #[arg(short, long, default_value = "duration")]
        attribute: String,

        /// Print a JSON report instead of one line
        #[arg(long)]
        json: bool,
    },

    /// Count events per kind
    Kinds {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

impl Args {
    #[must_use]
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig::default()
            .with_tmp_root(&self.tmpdir)
            .with_strategy(self.lookup)
            .with_attach_timeout(Duration::from_millis(self.attach_timeout_ms))
    }
}

/// Kind filter for `stats`; defaults to monitor-enter events
#[must_use]
pub fn stats_filter(kinds: &[String], prefix: Option<&str>) -> KindFilter {
    if kinds.is_empty() && prefix.is_none() {
        return KindFilter::Exact(DEFAULT_KIND.to_string());
    }
    KindFilter::from_parts(kinds.to_vec(), prefix.map(str::to_string))
}

#[must_use]
pub fn stats_selector(attribute: &str) -> AttributeSelector {
    AttributeSelector::from(attribute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_defaults() {
        let args = Args::try_parse_from(["jvmscope", "stats", "app.jfr"]).unwrap();
        let Command::Stats { file, kinds, prefix, attribute, json } = args.command else {
            panic!("expected stats");
        };
        assert_eq!(file, PathBuf::from("app.jfr"));
        assert_eq!(
            stats_filter(&kinds, prefix.as_deref()),
            KindFilter::Exact(DEFAULT_KIND.to_string())
        );
        assert_eq!(stats_selector(&attribute), AttributeSelector::Duration);
        assert!(!json);
    }

    #[test]
    fn test_repeated_kinds() {
        let args = Args::try_parse_from([
            "jvmscope", "stats", "app.jfr", "--kind", "jdk.ThreadSleep", "--kind", "jdk.ThreadPark",
        ])
        .unwrap();
        let Command::Stats { kinds, prefix, .. } = args.command else {
            panic!("expected stats");
        };
        assert!(matches!(
            stats_filter(&kinds, prefix.as_deref()),
            KindFilter::AnyOf(k) if k.len() == 2
        ));
    }

    #[test]
    fn test_kind_conflicts_with_prefix() {
        let result = Args::try_parse_from([
            "jvmscope", "stats", "a.jfr", "--kind", "X", "--prefix", "jdk.",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_probe_options() {
        let args = Args::try_parse_from([
            "jvmscope",
            "connector",
            "4242",
            "--tmpdir",
            "/var/tmp",
            "--lookup",
            "attach",
            "--attach-timeout-ms",
            "250",
        ])
        .unwrap();
        let config = args.probe_config();
        assert_eq!(config.tmp_root, PathBuf::from("/var/tmp"));
        assert_eq!(config.strategy, LookupStrategy::Attach);
        assert_eq!(config.attach_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_lookup_rejected() {
        assert!(Args::try_parse_from(["jvmscope", "list", "--lookup", "jmx"]).is_err());
    }
}
