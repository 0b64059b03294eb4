//! # jvmscope - Main Entry Point
//!
//! Subcommands:
//! - **connector** (`jvmscope connector <PID|NAME>`): print a JVM's local connector address
//! - **list**: local JVMs found through their instrumentation buffers
//! - **stats** (`jvmscope stats app.jfr`): aggregate one attribute of a recording
//! - **kinds**: event counts per kind
//!
//! Recordings are decoded on a blocking task; Ctrl+C cancels the load.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use jvmscope::analysis::display::{kind_table, report_line};
use jvmscope::analysis::{aggregate, filter, summarize_kinds};
use jvmscope::attach::{self, error_chain};
use jvmscope::cli::args::{stats_filter, stats_selector};
use jvmscope::cli::{Args, Command};
use jvmscope::config::ProbeConfig;
use jvmscope::domain::{LoadError, Pid, RecordingError, SelectorError};
use jvmscope::export::{JsonReport, KindsReport};
use jvmscope::preflight::{check_process_exists, ProbeSupport};
use jvmscope::process_lookup::{find_jvm_by_name, list_jvms};
use jvmscope::recording::{self, EventStream};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NO_CONNECTOR: i32 = 3;
const EXIT_DATAERR: i32 = 65;
const EXIT_UNAVAILABLE: i32 = 69;
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(code) => code,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(recording_err) = cause.downcast_ref::<RecordingError>() {
            return match recording_err {
                RecordingError::Load(LoadError::Malformed { .. }) => EXIT_DATAERR,
                RecordingError::Cancelled => EXIT_INTERRUPTED,
                _ => EXIT_ERROR,
            };
        }
        if cause.downcast_ref::<SelectorError>().is_some() {
            return EXIT_USAGE;
        }
    }
    EXIT_ERROR
}

#[tokio::main]
async fn run() -> Result<i32> {
    let args = Args::parse();
    let config = args.probe_config();
    debug!("Probe configuration: {config:?}");

    match args.command {
        Command::Connector { target } => connector(&config, &target),
        Command::List => list(&config),
        Command::Stats { file, kinds, prefix, attribute, json } => {
            let filter_spec = stats_filter(&kinds, prefix.as_deref());
            let selector = stats_selector(&attribute);

            let stream = load_cancellable(file.clone()).await?;
            let selected = filter(&stream, &filter_spec);
            info!("{} of {} events match {filter_spec}", selected.len(), stream.len());

            let result = aggregate(&selected, &selector)?;
            if json {
                JsonReport::new(&file, &filter_spec, &selector, result)
                    .export(std::io::stdout().lock())?;
            } else {
                println!("{}", report_line(&result));
            }
            Ok(EXIT_SUCCESS)
        }
        Command::Kinds { file, json } => {
            let stream = load_cancellable(file.clone()).await?;
            let summaries = summarize_kinds(&stream);
            if json {
                KindsReport::new(&file, summaries).export(std::io::stdout().lock())?;
            } else {
                print!("{}", kind_table(&summaries));
            }
            Ok(EXIT_SUCCESS)
        }
    }
}

/// Resolve a PID from either a number or a JVM name
fn resolve_target(config: &ProbeConfig, target: &str) -> Result<Pid> {
    if let Ok(raw) = target.parse::<u32>() {
        return Ok(Pid(raw));
    }
    let jvm = find_jvm_by_name(config, target)?;
    info!("Resolved '{target}' to {} ({})", jvm.pid, jvm.command);
    Ok(jvm.pid)
}

fn connector(config: &ProbeConfig, target: &str) -> Result<i32> {
    let pid = resolve_target(config, target)?;
    check_process_exists(config, pid)?;

    let support = attach::install(config);
    if let ProbeSupport::Unavailable(err) = support {
        eprintln!("error: connector probing is unavailable on this host: {}", error_chain(err));
        return Ok(EXIT_UNAVAILABLE);
    }

    match support.probe(pid) {
        Some(endpoint) => {
            println!("{endpoint}");
            Ok(EXIT_SUCCESS)
        }
        None => {
            eprintln!("No connector address published by process {}", pid.0);
            eprintln!("Is the management agent running? Start it with:");
            eprintln!("  jcmd {} ManagementAgent.start_local", pid.0);
            Ok(EXIT_NO_CONNECTOR)
        }
    }
}

fn list(config: &ProbeConfig) -> Result<i32> {
    let jvms = list_jvms(config)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{:>8}  {:<12}  {:<12}  COMMAND", "PID", "USER", "VERSION")?;
    for jvm in &jvms {
        writeln!(
            out,
            "{:>8}  {:<12}  {:<12}  {}",
            jvm.pid.0,
            jvm.user,
            jvm.vm_version.as_deref().unwrap_or("-"),
            jvm.command
        )?;
    }
    debug!("Listed {} JVMs under {}", jvms.len(), config.tmp_root.display());
    Ok(EXIT_SUCCESS)
}

/// Load on a blocking task, cancelling on Ctrl+C
async fn load_cancellable(path: PathBuf) -> Result<EventStream> {
    let token = CancellationToken::new();
    let worker_token = token.clone();
    let display = path.display().to_string();
    let mut handle =
        tokio::task::spawn_blocking(move || recording::load_with_cancel(&path, &worker_token));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let joined = tokio::select! {
        joined = &mut handle => joined,
        signal = &mut ctrl_c => {
            on_interrupt(signal, &token, &display);
            handle.await
        }
    };

    let stream = joined.context("Recording loader task failed")??;
    Ok(stream)
}

/// Cancel only on a delivered Ctrl+C; a failed listener leaves the load running
fn on_interrupt(signal: std::io::Result<()>, token: &CancellationToken, display: &str) {
    match signal {
        Ok(()) => {
            info!("Interrupted, cancelling load of {display}");
            token.cancel();
        }
        Err(e) => warn!("Cannot listen for Ctrl+C, loading {display} uninterruptibly: {e}"),
    }
}
