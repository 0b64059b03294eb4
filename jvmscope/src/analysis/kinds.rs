//! Per-kind event counts
//!
//! Answers "what is in this recording?" before picking a kind to aggregate.

// Percentage calculations intentionally convert usize to f64
#![allow(clippy::cast_precision_loss)]

use crate::recording::EventStream;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindSummary {
    pub kind: String,
    pub count: usize,
    /// Share of all events (0.0 - 100.0)
    pub percentage: f64,
}

/// Count events per kind, most frequent first, ties broken by name
#[must_use]
pub fn summarize_kinds(stream: &EventStream) -> Vec<KindSummary> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for event in stream {
        *counts.entry(event.kind()).or_insert(0) += 1;
    }

    let total = stream.len();
    let mut summaries: Vec<KindSummary> = counts
        .into_iter()
        .map(|(kind, count)| KindSummary {
            kind: kind.to_string(),
            count,
            percentage: count as f64 / total as f64 * 100.0,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.kind.cmp(&b.kind)));
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timestamp;
    use crate::recording::Event;

    #[test]
    fn test_summarize_kinds() {
        let stream: EventStream = ["B", "A", "C", "A", "B", "A"]
            .into_iter()
            .map(|kind| Event::new(kind, Timestamp(0), Vec::new()))
            .collect();

        let summary = summarize_kinds(&stream);
        let ranked: Vec<(&str, usize)> =
            summary.iter().map(|s| (s.kind.as_str(), s.count)).collect();
        assert_eq!(ranked, vec![("A", 3), ("B", 2), ("C", 1)]);
        assert!((summary[0].percentage - 50.0).abs() < 1e-9);

        let total: f64 = summary.iter().map(|s| s.percentage).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_ties_sorted_by_name() {
        let stream: EventStream =
            ["z", "y"].into_iter().map(|kind| Event::new(kind, Timestamp(0), Vec::new())).collect();
        let kinds: Vec<String> = summarize_kinds(&stream).into_iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec!["y", "z"]);
    }

    #[test]
    fn test_empty_stream() {
        assert!(summarize_kinds(&EventStream::default()).is_empty());
    }
}
