//! Chunk metadata: the type system of a recording
//!
//! The metadata event holds a string table followed by an element tree:
//!
//! ```text
//! root
//! ├── metadata
//! │   └── class        id, name, superType, simpleType
//! │       ├── annotation   class, value
//! │       ├── setting      (ignored)
//! │       └── field        name, class, constantPool, dimension
//! │           └── annotation
//! └── region           (ignored)
//! ```
//!
//! Every element name, attribute key and attribute value is an index into
//! the string table.

use super::chunk::ChunkHeader;
use super::reader::ByteReader;
use crate::domain::FormatError;
use std::collections::HashMap;

/// Type id of the metadata event
pub const METADATA_EVENT_TYPE: i64 = 0;

/// Type id of constant pool records
pub const CONSTANT_POOL_EVENT_TYPE: i64 = 1;

/// Supertype of every event class
pub const EVENT_SUPER_TYPE: &str = "jdk.jfr.Event";

const MAX_ELEMENT_DEPTH: usize = 32;

pub const TIMESPAN_ANNOTATION: &str = "jdk.jfr.Timespan";
pub const TIMESTAMP_ANNOTATION: &str = "jdk.jfr.Timestamp";
pub const DATA_AMOUNT_ANNOTATION: &str = "jdk.jfr.DataAmount";
pub const PERCENTAGE_ANNOTATION: &str = "jdk.jfr.Percentage";
pub const FREQUENCY_ANNOTATION: &str = "jdk.jfr.Frequency";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimespanUnit {
    Ticks,
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampUnit {
    Ticks,
    MillisecondsSinceEpoch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAmountUnit {
    Bytes,
    Bits,
}

/// Content type of a numeric field, derived from its annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    Plain,
    Timespan(TimespanUnit),
    Timestamp(TimestampUnit),
    DataAmount(DataAmountUnit),
    Percentage,
    Frequency,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationDef {
    pub class_id: i64,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub class_id: i64,
    /// Value is a constant pool index instead of inline data
    pub constant_pool: bool,
    /// Value is an array
    pub array: bool,
    pub annotations: Vec<AnnotationDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub id: i64,
    pub name: String,
    pub super_type: Option<String>,
    pub fields: Vec<FieldDef>,
    pub annotations: Vec<AnnotationDef>,
}

impl ClassDef {
    #[must_use]
    pub fn is_event(&self) -> bool {
        self.super_type.as_deref() == Some(EVENT_SUPER_TYPE)
    }
}

/// All classes declared by one chunk
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    classes: HashMap<i64, ClassDef>,
}

/// Generic element of the tree, before interpretation
#[derive(Debug)]
struct Element {
    offset: usize,
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn required(&self, key: &str) -> Result<&str, FormatError> {
        self.attribute(key).ok_or_else(|| FormatError::Invalid {
            offset: self.offset,
            reason: format!("<{}> without '{key}'", self.name),
        })
    }

    fn id(&self, key: &str) -> Result<i64, FormatError> {
        let raw = self.required(key)?;
        raw.parse().map_err(|_| FormatError::Invalid {
            offset: self.offset,
            reason: format!("<{}> has non-numeric '{key}' {raw:?}", self.name),
        })
    }

    fn children_named<'e>(&'e self, name: &'e str) -> impl Iterator<Item = &'e Element> + 'e {
        self.children.iter().filter(move |c| c.name == name)
    }
}

impl Metadata {
    /// Parse the metadata event of a chunk
    ///
    /// # Errors
    /// Returns an error when the event is truncated, overruns the chunk, or
    /// the element tree is inconsistent.
    pub fn parse(buf: &[u8], header: &ChunkHeader) -> Result<Self, FormatError> {
        let start = header.metadata_position();
        let mut r =
            ByteReader::new(buf, start, header.end(), header.compressed_integers())?.record()?;

        let type_offset = r.position();
        let event_type = r.long()?;
        if event_type != METADATA_EVENT_TYPE {
            return Err(FormatError::Invalid {
                offset: type_offset,
                reason: format!("expected metadata event, found type {event_type}"),
            });
        }
        let _start_time = r.long()?;
        let _duration = r.long()?;
        let _metadata_id = r.long()?;

        let string_count = r.count()?;
        let mut strings = Vec::with_capacity(string_count.min(r.remaining()));
        for _ in 0..string_count {
            strings.push(r.string()?.unwrap_or_default());
        }

        let root = read_element(&mut r, &strings, 0)?;
        let mut classes = HashMap::new();
        for metadata in root.children_named("metadata") {
            for element in metadata.children_named("class") {
                let class = parse_class(element)?;
                classes.insert(class.id, class);
            }
        }
        Ok(Self { classes })
    }

    #[must_use]
    pub fn class(&self, id: i64) -> Option<&ClassDef> {
        self.classes.get(&id)
    }

    pub fn event_classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.values().filter(|c| c.is_event())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Resolve a field's content type from its annotations
    ///
    /// Unknown unit values fall back to [`ContentType::Plain`].
    #[must_use]
    pub fn content_type(&self, field: &FieldDef) -> ContentType {
        field
            .annotations
            .iter()
            .find_map(|annotation| {
                let name = self.class(annotation.class_id)?.name.as_str();
                let value = annotation.value.as_deref();
                match name {
                    TIMESPAN_ANNOTATION => timespan_unit(value).map(ContentType::Timespan),
                    TIMESTAMP_ANNOTATION => timestamp_unit(value).map(ContentType::Timestamp),
                    DATA_AMOUNT_ANNOTATION => data_amount_unit(value).map(ContentType::DataAmount),
                    PERCENTAGE_ANNOTATION => Some(ContentType::Percentage),
                    FREQUENCY_ANNOTATION => Some(ContentType::Frequency),
                    _ => None,
                }
            })
            .unwrap_or_default()
    }
}

fn timespan_unit(value: Option<&str>) -> Option<TimespanUnit> {
    match value.unwrap_or("NANOSECONDS") {
        "TICKS" => Some(TimespanUnit::Ticks),
        "NANOSECONDS" => Some(TimespanUnit::Nanoseconds),
        "MICROSECONDS" => Some(TimespanUnit::Microseconds),
        "MILLISECONDS" => Some(TimespanUnit::Milliseconds),
        "SECONDS" => Some(TimespanUnit::Seconds),
        _ => None,
    }
}

fn timestamp_unit(value: Option<&str>) -> Option<TimestampUnit> {
    match value.unwrap_or("MILLISECONDS_SINCE_EPOCH") {
        "TICKS" => Some(TimestampUnit::Ticks),
        "MILLISECONDS_SINCE_EPOCH" => Some(TimestampUnit::MillisecondsSinceEpoch),
        _ => None,
    }
}

fn data_amount_unit(value: Option<&str>) -> Option<DataAmountUnit> {
    match value.unwrap_or("BYTES") {
        "BYTES" => Some(DataAmountUnit::Bytes),
        "BITS" => Some(DataAmountUnit::Bits),
        _ => None,
    }
}

fn read_element(
    r: &mut ByteReader<'_>,
    strings: &[String],
    depth: usize,
) -> Result<Element, FormatError> {
    let offset = r.position();
    if depth > MAX_ELEMENT_DEPTH {
        return Err(FormatError::Invalid {
            offset,
            reason: "metadata nested too deeply".to_string(),
        });
    }

    let name = lookup_string(r, strings)?;
    let attribute_count = r.count()?;
    let mut attributes = Vec::with_capacity(attribute_count.min(r.remaining()));
    for _ in 0..attribute_count {
        let key = lookup_string(r, strings)?;
        let value = lookup_string(r, strings)?;
        attributes.push((key, value));
    }

    let child_count = r.count()?;
    let mut children = Vec::with_capacity(child_count.min(r.remaining()));
    for _ in 0..child_count {
        children.push(read_element(r, strings, depth + 1)?);
    }

    Ok(Element { offset, name, attributes, children })
}

fn lookup_string(r: &mut ByteReader<'_>, strings: &[String]) -> Result<String, FormatError> {
    let offset = r.position();
    let index = r.count()?;
    strings.get(index).cloned().ok_or_else(|| FormatError::Invalid {
        offset,
        reason: format!("string index {index} out of {} strings", strings.len()),
    })
}

fn parse_class(element: &Element) -> Result<ClassDef, FormatError> {
    let fields = element
        .children_named("field")
        .map(|field| {
            Ok(FieldDef {
                name: field.required("name")?.to_string(),
                class_id: field.id("class")?,
                constant_pool: field.attribute("constantPool") == Some("true"),
                array: field.attribute("dimension").is_some_and(|d| d != "0"),
                annotations: parse_annotations(field)?,
            })
        })
        .collect::<Result<Vec<_>, FormatError>>()?;

    Ok(ClassDef {
        id: element.id("id")?,
        name: element.required("name")?.to_string(),
        super_type: element.attribute("superType").map(str::to_string),
        fields,
        annotations: parse_annotations(element)?,
    })
}

fn parse_annotations(element: &Element) -> Result<Vec<AnnotationDef>, FormatError> {
    element
        .children_named("annotation")
        .map(|a| {
            Ok(AnnotationDef {
                class_id: a.id("class")?,
                value: a.attribute("value").map(str::to_string),
            })
        })
        .collect()
}
