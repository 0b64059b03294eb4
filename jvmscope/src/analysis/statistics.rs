//! Count, mean and population standard deviation of one attribute
//!
//! Standard deviation uses the two-pass definition
//! `sqrt(mean((x - mean)^2))` in `f64`, which stays accurate for
//! nanosecond-scale values where the one-pass sum of squares would cancel.

// Counts are converted to f64 for averaging
#![allow(clippy::cast_precision_loss)]

use crate::domain::{SelectorError, Unit};
use crate::recording::{EventStream, DURATION_ATTRIBUTE};
use serde::Serialize;
use std::fmt;

/// Which numeric attribute to aggregate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttributeSelector {
    /// The event's `duration`, always in nanoseconds
    #[default]
    Duration,
    /// Any top-level numeric field by name
    Named(String),
}

impl AttributeSelector {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            AttributeSelector::Duration => DURATION_ATTRIBUTE,
            AttributeSelector::Named(name) => name,
        }
    }

    /// Unit every selected value must carry, if fixed by the selector
    #[must_use]
    pub fn expected_unit(&self) -> Option<Unit> {
        match self {
            AttributeSelector::Duration => Some(Unit::Nanoseconds),
            AttributeSelector::Named(_) => None,
        }
    }
}

impl From<&str> for AttributeSelector {
    fn from(name: &str) -> Self {
        if name == DURATION_ATTRIBUTE {
            AttributeSelector::Duration
        } else {
            AttributeSelector::Named(name.to_string())
        }
    }
}

impl fmt::Display for AttributeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Aggregate over a (possibly empty) stream
///
/// `mean` and `stddev` are `None` exactly when `count == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateResult {
    pub count: usize,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    /// Base unit of `mean` and `stddev`
    pub unit: Unit,
}

impl AggregateResult {
    #[must_use]
    pub fn empty(unit: Unit) -> Self {
        Self { count: 0, mean: None, stddev: None, unit }
    }
}

/// Aggregate the selected attribute over every event of `stream`
///
/// # Errors
/// - `MissingAttribute` when any event lacks the attribute
/// - `UnitMismatch` when events disagree on its unit
pub fn aggregate(
    stream: &EventStream,
    selector: &AttributeSelector,
) -> Result<AggregateResult, SelectorError> {
    let attribute = selector.name();
    let mut unit = selector.expected_unit();
    let mut values = Vec::with_capacity(stream.len());

    for (index, event) in stream.iter().enumerate() {
        let quantity = event.attribute(attribute).ok_or_else(|| SelectorError::MissingAttribute {
            index,
            kind: event.kind().to_string(),
            attribute: attribute.to_string(),
        })?;

        match unit {
            Some(expected) if expected != quantity.unit => {
                return Err(SelectorError::UnitMismatch {
                    attribute: attribute.to_string(),
                    expected,
                    found: quantity.unit,
                });
            }
            Some(_) => {}
            None => unit = Some(quantity.unit),
        }
        values.push(quantity.value);
    }

    let unit = unit.unwrap_or(Unit::Plain);
    if values.is_empty() {
        return Ok(AggregateResult::empty(unit));
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Ok(AggregateResult {
        count: values.len(),
        mean: Some(mean),
        stddev: Some(variance.sqrt()),
        unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Quantity, Timestamp};
    use crate::recording::Event;
    use std::sync::Arc;

    fn durations(values: &[f64]) -> EventStream {
        values
            .iter()
            .map(|v| {
                Event::new(
                    "jdk.JavaMonitorEnter",
                    Timestamp(0),
                    vec![(Arc::from("duration"), Quantity::nanos(*v))],
                )
            })
            .collect()
    }

    #[test]
    fn test_mean_and_population_stddev() {
        let result =
            aggregate(&durations(&[10.0, 20.0, 30.0]), &AttributeSelector::Duration).unwrap();
        assert_eq!(result.count, 3);
        assert!((result.mean.unwrap() - 20.0).abs() < 1e-9);
        assert!((result.stddev.unwrap() - (200.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert!((result.stddev.unwrap() - 8.165).abs() < 1e-3);
        assert_eq!(result.unit, Unit::Nanoseconds);
    }

    #[test]
    fn test_identical_values_have_zero_stddev() {
        let result = aggregate(&durations(&[42.0; 7]), &AttributeSelector::Duration).unwrap();
        assert_eq!(result.mean, Some(42.0));
        assert_eq!(result.stddev, Some(0.0));
    }

    #[test]
    fn test_single_value() {
        let result = aggregate(&durations(&[5.0]), &AttributeSelector::Duration).unwrap();
        assert_eq!((result.count, result.mean, result.stddev), (1, Some(5.0), Some(0.0)));
    }

    #[test]
    fn test_empty_stream_is_sentinel() {
        let result = aggregate(&EventStream::default(), &AttributeSelector::Duration).unwrap();
        assert_eq!(result, AggregateResult::empty(Unit::Nanoseconds));
        assert!(result.mean.is_none() && result.stddev.is_none());
    }

    #[test]
    fn test_large_nanosecond_values_stay_accurate() {
        let base = 1.0e15;
        let stream = durations(&[base + 1.0, base + 2.0, base + 3.0]);
        let result = aggregate(&stream, &AttributeSelector::Duration).unwrap();
        assert!((result.stddev.unwrap() - (2.0f64 / 3.0).sqrt()).abs() < 1e-3);
    }

    #[test]
    fn test_missing_attribute_aborts() {
        let mut events: Vec<Event> = durations(&[1.0]).into_iter().collect();
        events.push(Event::new("jdk.ThreadPark", Timestamp(0), Vec::new()));
        let err = aggregate(&EventStream::new(events), &AttributeSelector::Duration).unwrap_err();
        assert_eq!(
            err,
            SelectorError::MissingAttribute {
                index: 1,
                kind: "jdk.ThreadPark".to_string(),
                attribute: "duration".to_string(),
            }
        );
    }

    #[test]
    fn test_unit_mismatch_aborts() {
        let stream: EventStream = [Quantity::new(1.0, Unit::Bytes), Quantity::plain(2.0)]
            .into_iter()
            .map(|q| Event::new("test.Alloc", Timestamp(0), vec![(Arc::from("size"), q)]))
            .collect();
        let err = aggregate(&stream, &AttributeSelector::from("size")).unwrap_err();
        assert!(matches!(
            err,
            SelectorError::UnitMismatch { expected: Unit::Bytes, found: Unit::Plain, .. }
        ));
    }

    #[test]
    fn test_duration_must_be_a_timespan() {
        let odd = Event::new(
            "test.Odd",
            Timestamp(0),
            vec![(Arc::from("duration"), Quantity::plain(1.0))],
        );
        let stream: EventStream = std::iter::once(odd).collect();
        assert!(aggregate(&stream, &AttributeSelector::Duration).is_err());
    }

    #[test]
    fn test_named_selector_takes_unit_from_events() {
        let stream: EventStream = [512.0, 1536.0]
            .into_iter()
            .map(|v| {
                Event::new(
                    "test.Alloc",
                    Timestamp(0),
                    vec![(Arc::from("size"), Quantity::new(v, Unit::Bytes))],
                )
            })
            .collect();
        let result = aggregate(&stream, &"size".into()).unwrap();
        assert_eq!(result.unit, Unit::Bytes);
        assert_eq!(result.mean, Some(1024.0));
    }

    #[test]
    fn test_selector_from_name() {
        assert_eq!(AttributeSelector::from("duration"), AttributeSelector::Duration);
        assert_eq!(AttributeSelector::from("size"), AttributeSelector::Named("size".to_string()));
        assert_eq!(AttributeSelector::Duration.to_string(), "duration");
    }
}
