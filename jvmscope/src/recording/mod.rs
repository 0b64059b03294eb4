//! Flight recording loader
//!
//! Reads a JFR recording into an [`EventStream`]. Loading is all or
//! nothing: any structural problem anywhere in the file fails the whole
//! load with a [`LoadError`].
//!
//! Only what aggregation needs is kept per event: its kind, its start time
//! and its top-level numeric fields normalized to base units (nanoseconds
//! for timespans, epoch nanoseconds for timestamps, bytes for data amounts).

pub mod chunk;
pub mod metadata;
mod parser;
mod reader;

#[cfg(any(test, feature = "test-utils"))]
pub mod fixture;

pub use parser::CANCEL_CHECK_INTERVAL;

use crate::domain::{FormatError, LoadError, Quantity, RecordingError, Timestamp};
use log::{debug, info};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Attribute holding an event's duration
pub const DURATION_ATTRIBUTE: &str = "duration";

/// One recorded event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: Arc<str>,
    timestamp: Timestamp,
    attributes: Vec<(Arc<str>, Quantity)>,
}

impl Event {
    pub fn new(
        kind: impl Into<Arc<str>>,
        timestamp: Timestamp,
        attributes: Vec<(Arc<str>, Quantity)>,
    ) -> Self {
        Self { kind: kind.into(), timestamp, attributes }
    }

    /// Event type name, e.g. `jdk.JavaMonitorEnter`
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<Quantity> {
        self.attributes.iter().find(|(n, _)| &**n == name).map(|(_, q)| *q)
    }

    #[must_use]
    pub fn duration(&self) -> Option<Quantity> {
        self.attribute(DURATION_ATTRIBUTE)
    }

    /// Attributes in field declaration order
    pub fn attributes(&self) -> impl Iterator<Item = (&str, Quantity)> {
        self.attributes.iter().map(|(n, q)| (&**n, *q))
    }
}

/// Events in file order: chunk order, then record order within a chunk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventStream {
    events: Vec<Event>,
}

impl EventStream {
    #[must_use]
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// Decode a recording held in memory
    ///
    /// # Errors
    /// Returns the first structural problem found.
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        Ok(Self::new(parser::parse_recording(bytes, None)?.unwrap_or_default()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }
}

impl FromIterator<Event> for EventStream {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for EventStream {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a EventStream {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Load a recording from disk
///
/// # Errors
/// - `Load(NotFound)`: the path does not exist
/// - `Load(Unreadable)`: permission denied or not a regular file
/// - `Load(Malformed)`: not a valid recording
/// - `Io`: any other I/O failure
pub fn load(path: &Path) -> Result<EventStream, RecordingError> {
    load_with_cancel(path, &CancellationToken::new())
}

/// [`load`], stopping early with `RecordingError::Cancelled` once `cancel`
/// fires
///
/// # Errors
/// See [`load`].
pub fn load_with_cancel(
    path: &Path,
    cancel: &CancellationToken,
) -> Result<EventStream, RecordingError> {
    let started = Instant::now();
    let bytes = read_file(path)?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());

    let events = parser::parse_recording(&bytes, Some(cancel))
        .map_err(|source| LoadError::Malformed { path: path.to_path_buf(), source })?
        .ok_or(RecordingError::Cancelled)?;

    info!("Loaded {} events from {} in {:?}", events.len(), path.display(), started.elapsed());
    Ok(EventStream::new(events))
}

fn read_file(path: &Path) -> Result<Vec<u8>, RecordingError> {
    if path.is_dir() {
        return Err(LoadError::Unreadable {
            path: path.to_path_buf(),
            source: std::io::Error::other("is a directory"),
        }
        .into());
    }
    std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => LoadError::NotFound { path: path.to_path_buf() }.into(),
        ErrorKind::PermissionDenied => {
            LoadError::Unreadable { path: path.to_path_buf(), source: e }.into()
        }
        _ => RecordingError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixture::{FieldSpec, RecordingBuilder, Value};

    fn sample_recording() -> RecordingBuilder {
        let mut builder = RecordingBuilder::new();
        let enter =
            builder.event_type("jdk.JavaMonitorEnter", vec![FieldSpec::class_ref("monitorClass")]);
        let sleep = builder
            .event_type("jdk.ThreadSleep", vec![FieldSpec::long("time").timespan("NANOSECONDS")]);
        builder
            .event(enter, 10, vec![Value::Ref(1)])
            .event(sleep, 99, vec![Value::Long(1_000)])
            .event(enter, 20, vec![Value::Ref(2)]);
        builder
    }

    #[test]
    fn test_load_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.jfr");
        sample_recording().write_to(&path).unwrap();

        let stream = load(&path).unwrap();
        assert_eq!(stream.len(), 3);
        let durations: Vec<f64> =
            stream.iter().filter_map(Event::duration).map(|q| q.value).collect();
        assert_eq!(durations, vec![10.0, 99.0, 20.0]);
        assert_eq!(stream.as_slice()[1].attribute("time"), Some(Quantity::nanos(1_000.0)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/jvmscope/app.jfr")).unwrap_err();
        assert!(matches!(err, RecordingError::Load(LoadError::NotFound { .. })));
    }

    #[test]
    fn test_load_directory_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, RecordingError::Load(LoadError::Unreadable { .. })));
    }

    #[test]
    fn test_load_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, vec![b'x'; 200]).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(
            err,
            RecordingError::Load(LoadError::Malformed { source: FormatError::BadMagic(_), .. })
        ));
    }

    #[test]
    fn test_load_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.jfr");
        let bytes = sample_recording().build();
        std::fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, RecordingError::Load(LoadError::Malformed { .. })));
    }

    #[test]
    fn test_load_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.jfr");
        sample_recording().write_to(&path).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(load_with_cancel(&path, &token), Err(RecordingError::Cancelled)));
    }

    #[test]
    fn test_parse_in_memory() {
        let stream = EventStream::parse(&sample_recording().build()).unwrap();
        let kinds: Vec<&str> = stream.iter().map(Event::kind).collect();
        assert_eq!(kinds, vec!["jdk.JavaMonitorEnter", "jdk.ThreadSleep", "jdk.JavaMonitorEnter"]);
    }
}
