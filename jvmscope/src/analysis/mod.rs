//! Analysis of loaded recordings
//!
//! Pure functions over an [`EventStream`](crate::recording::EventStream):
//! none of them mutate their input, so one loaded stream can be filtered
//! and aggregated any number of times.
//!
//! ```text
//! EventStream ──► filter(KindFilter) ──► aggregate(AttributeSelector) ──► AggregateResult
//!      │                                                                        │
//!      └──► summarize_kinds() ──► Vec<KindSummary>           display::report_line()
//! ```

pub mod display;
pub mod filter;
pub mod kinds;
pub mod statistics;

pub use filter::{filter, KindFilter, KindPredicate};
pub use kinds::{summarize_kinds, KindSummary};
pub use statistics::{aggregate, AggregateResult, AttributeSelector};
