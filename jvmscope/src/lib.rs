//! # jvmscope - Local JVM Introspection and Flight Recording Statistics
//!
//! jvmscope answers two questions about Java processes on the local host:
//! where a JVM's management connector is listening, and what a flight
//! recording (`.jfr`) says about one kind of event.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │     Running JVM (HotSpot)    │      │     Flight recording (.jfr)  │
//! │  hsperfdata buffer, attach   │      │   chunks: header, metadata,  │
//! │  listener socket             │      │   constant pools, events     │
//! └──────────────┬───────────────┘      └──────────────┬───────────────┘
//!                │ mmap'd counters / attach command    │ bytes
//!                ▼                                     ▼
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │  preflight ─▶ attach         │      │  recording                   │
//! │  capability   ConnectorLookup│      │  chunk ─▶ metadata ─▶ parser │
//! │  detection    (perfdata or   │      │           EventStream        │
//! │               attach socket) │      └──────────────┬───────────────┘
//! └──────────────┬───────────────┘                     ▼
//!                │ Option<ConnectorEndpoint>  ┌──────────────────────────┐
//!                ▼                            │  analysis                │
//!          connector address                  │  filter ─▶ aggregate     │
//!                                             │  kinds, display          │
//!                                             └──────────────┬───────────┘
//!                                                            ▼
//!                                               report line / export (JSON)
//! ```
//!
//! ## Module Structure
//!
//! - [`preflight`]: one-time capability detection (platform, procfs, temp
//!   root) and lookup resolution
//! - [`attach`]: connector lookups and the never-failing [`attach::AttachProbe`]
//!   - `perfdata`: HotSpot instrumentation buffer reader
//!   - `listener`: legacy attach-listener handshake
//!   - `target`: per-process facts (uid, namespaces, liveness)
//! - [`process_lookup`]: enumerate local JVMs, resolve a name to a PID
//! - [`recording`]: JFR chunk, metadata and event decoding into an [`recording::EventStream`]
//! - [`analysis`]: kind filters, count/mean/stddev aggregation, per-kind summaries
//! - [`export`]: JSON reports
//! - [`cli`]: command-line argument parsing
//! - [`config`]: probe configuration (temp root, procfs root, strategy)
//! - [`domain`]: core types (Pid, Quantity, Unit) and error enums
//!
//! ## Typical Usage
//!
//! ```bash
//! # Connector address of a running JVM
//! jvmscope connector 4242
//!
//! # Mean and standard deviation of monitor-enter durations
//! jvmscope stats app.jfr
//!
//! # Same for every GC event, as JSON
//! jvmscope stats app.jfr --prefix jdk.GC --json
//! ```
//!
//! ## Key Concepts
//!
//! - **hsperfdata**: memory-mapped counter file each HotSpot JVM publishes
//!   under `<tmp>/hsperfdata_<user>/<pid>`
//! - **Attach listener**: Unix socket a JVM opens after `.attach_pid` + `SIGQUIT`
//! - **Chunk**: self-contained unit of a recording with its own metadata and clock
//! - **Ticks**: recording clock units, converted with the chunk's ticks-per-second

pub mod analysis;
pub mod attach;
pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod preflight;
pub mod process_lookup;
pub mod recording;
