//! Kind-based event selection

use crate::recording::EventStream;
use std::fmt;

/// Anything that can decide whether an event kind is selected
pub trait KindPredicate {
    fn matches(&self, kind: &str) -> bool;
}

impl<F: Fn(&str) -> bool> KindPredicate for F {
    fn matches(&self, kind: &str) -> bool {
        self(kind)
    }
}

/// Common kind predicates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindFilter {
    All,
    Exact(String),
    AnyOf(Vec<String>),
    /// Kinds starting with a namespace, e.g. `jdk.GC`
    Prefix(String),
}

impl KindFilter {
    /// Build from CLI-style arguments: several exact kinds or one prefix
    ///
    /// No kinds and no prefix selects everything.
    #[must_use]
    pub fn from_parts(kinds: Vec<String>, prefix: Option<String>) -> Self {
        match (prefix, kinds.len()) {
            (Some(prefix), _) => KindFilter::Prefix(prefix),
            (None, 0) => KindFilter::All,
            (None, 1) => KindFilter::Exact(kinds.into_iter().next().unwrap_or_default()),
            (None, _) => KindFilter::AnyOf(kinds),
        }
    }
}

impl KindPredicate for KindFilter {
    fn matches(&self, kind: &str) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Exact(expected) => kind == expected,
            KindFilter::AnyOf(kinds) => kinds.iter().any(|k| k == kind),
            KindFilter::Prefix(prefix) => kind.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for KindFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KindFilter::All => f.write_str("*"),
            KindFilter::Exact(kind) => f.write_str(kind),
            KindFilter::AnyOf(kinds) => f.write_str(&kinds.join(",")),
            KindFilter::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// Events whose kind matches `predicate`, in their original order
#[must_use]
pub fn filter<P: KindPredicate + ?Sized>(stream: &EventStream, predicate: &P) -> EventStream {
    stream.iter().filter(|event| predicate.matches(event.kind())).cloned().collect()
}
