//! Writer for synthetic flight recordings
//!
//! Produces well-formed chunks (header, events, an empty constant pool and
//! a metadata event) so the reader can be exercised without a JVM. Every
//! event type gets the standard `startTime` and `duration` fields first,
//! both tick based, followed by the declared fields.
//!
//! ```ignore
//! let mut builder = RecordingBuilder::new();
//! let monitor = vec![FieldSpec::class_ref("monitorClass")];
//! let enter = builder.event_type("jdk.JavaMonitorEnter", monitor);
//! builder.event(enter, 10, vec![Value::Ref(1)]);
//! builder.write_to(&path)?;
//! ```

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::missing_panics_doc)]

use super::chunk::{CHUNK_MAGIC, HEADER_SIZE};
use super::metadata::{
    CONSTANT_POOL_EVENT_TYPE, DATA_AMOUNT_ANNOTATION, EVENT_SUPER_TYPE, FREQUENCY_ANNOTATION,
    METADATA_EVENT_TYPE, PERCENTAGE_ANNOTATION, TIMESPAN_ANNOTATION, TIMESTAMP_ANNOTATION,
};
use std::collections::HashMap;
use std::path::Path;

/// Default ticks per second: one tick per nanosecond
pub const DEFAULT_TICKS_PER_SECOND: i64 = 1_000_000_000;
pub const DEFAULT_START_NANOS: i64 = 1_700_000_000_000_000_000;
pub const DEFAULT_START_TICKS: i64 = 1_000;

const FIRST_EVENT_CLASS_ID: i64 = 100;
const FIRST_NAMED_CLASS_ID: i64 = 500;
const FIRST_STRUCT_CLASS_ID: i64 = 1_000;

/// Built-in classes and their ids
const BUILTIN_CLASSES: &[(i64, &str)] = &[
    (4, "boolean"),
    (5, "byte"),
    (6, "short"),
    (7, "int"),
    (8, "long"),
    (9, "char"),
    (10, "float"),
    (11, "double"),
    (12, "java.lang.String"),
    (13, "java.lang.Class"),
];

const ANNOTATION_CLASSES: &[(i64, &str)] = &[
    (20, TIMESPAN_ANNOTATION),
    (21, TIMESTAMP_ANNOTATION),
    (22, DATA_AMOUNT_ANNOTATION),
    (23, PERCENTAGE_ANNOTATION),
    (24, FREQUENCY_ANNOTATION),
];

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Char,
    Float,
    Double,
    String,
    /// Constant pool reference to a `java.lang.Class`
    ClassRef,
    LongArray,
    /// Inline value of a nested class
    Struct(Vec<FieldSpec>),
    /// Inline value of a class declared with [`RecordingBuilder::struct_type`].
    /// Layout only; values of this kind cannot be written.
    Named(String),
}

impl FieldKind {
    fn class_id(&self) -> i64 {
        let name = match self {
            FieldKind::Boolean => "boolean",
            FieldKind::Byte => "byte",
            FieldKind::Short => "short",
            FieldKind::Int => "int",
            FieldKind::Long | FieldKind::LongArray => "long",
            FieldKind::Char => "char",
            FieldKind::Float => "float",
            FieldKind::Double => "double",
            FieldKind::String => "java.lang.String",
            FieldKind::ClassRef => "java.lang.Class",
            FieldKind::Struct(_) | FieldKind::Named(_) => {
                unreachable!("struct classes get generated ids")
            }
        };
        builtin_id(name)
    }
}

fn builtin_id(name: &str) -> i64 {
    BUILTIN_CLASSES
        .iter()
        .chain(ANNOTATION_CLASSES)
        .find(|(_, n)| *n == name)
        .map(|(id, _)| *id)
        .unwrap_or_else(|| panic!("no builtin class {name}"))
}

/// Field declaration of an event type
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Content annotation class and its value
    pub annotation: Option<(&'static str, Option<&'static str>)>,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self { name: name.to_string(), kind, annotation: None }
    }

    pub fn long(name: &str) -> Self {
        Self::new(name, FieldKind::Long)
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub fn double(name: &str) -> Self {
        Self::new(name, FieldKind::Double)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn class_ref(name: &str) -> Self {
        Self::new(name, FieldKind::ClassRef)
    }

    pub fn structure(name: &str, fields: Vec<FieldSpec>) -> Self {
        Self::new(name, FieldKind::Struct(fields))
    }

    pub fn named(name: &str, class: &str) -> Self {
        Self::new(name, FieldKind::Named(class.to_string()))
    }

    #[must_use]
    pub fn timespan(mut self, unit: &'static str) -> Self {
        self.annotation = Some((TIMESPAN_ANNOTATION, Some(unit)));
        self
    }

    #[must_use]
    pub fn timestamp(mut self, unit: &'static str) -> Self {
        self.annotation = Some((TIMESTAMP_ANNOTATION, Some(unit)));
        self
    }

    #[must_use]
    pub fn bytes(mut self) -> Self {
        self.annotation = Some((DATA_AMOUNT_ANNOTATION, Some("BYTES")));
        self
    }

    #[must_use]
    pub fn bits(mut self) -> Self {
        self.annotation = Some((DATA_AMOUNT_ANNOTATION, Some("BITS")));
        self
    }

    #[must_use]
    pub fn percentage(mut self) -> Self {
        self.annotation = Some((PERCENTAGE_ANNOTATION, None));
        self
    }

    #[must_use]
    pub fn frequency(mut self) -> Self {
        self.annotation = Some((FREQUENCY_ANNOTATION, None));
        self
    }
}

/// Field value of an event; must match the declared [`FieldKind`]
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Char(u16),
    Float(f32),
    Double(f64),
    Str(Option<String>),
    Ref(i64),
    Longs(Vec<i64>),
    Struct(Vec<Value>),
    /// Bytes written as-is, whatever the field kind
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTypeId(usize);

#[derive(Debug, Clone)]
struct EventType {
    name: String,
    fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone)]
struct Record {
    type_index: usize,
    start_ticks: i64,
    duration_ticks: i64,
    values: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct RecordingBuilder {
    compressed: bool,
    major: u16,
    minor: u16,
    ticks_per_second: i64,
    start_nanos: i64,
    start_ticks: i64,
    types: Vec<EventType>,
    structs: Vec<EventType>,
    chunks: Vec<Vec<Record>>,
    current: Vec<Record>,
    next_start: i64,
}

impl Default for RecordingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBuilder {
    pub fn new() -> Self {
        Self {
            compressed: true,
            major: 2,
            minor: 0,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            start_nanos: DEFAULT_START_NANOS,
            start_ticks: DEFAULT_START_TICKS,
            types: Vec::new(),
            structs: Vec::new(),
            chunks: Vec::new(),
            current: Vec::new(),
            next_start: DEFAULT_START_TICKS,
        }
    }

    /// Write fixed-width integers instead of LEB128
    pub fn uncompressed(&mut self) -> &mut Self {
        self.compressed = false;
        self
    }

    pub fn version(&mut self, major: u16, minor: u16) -> &mut Self {
        self.major = major;
        self.minor = minor;
        self
    }

    pub fn ticks_per_second(&mut self, ticks_per_second: i64) -> &mut Self {
        self.ticks_per_second = ticks_per_second;
        self
    }

    /// Declare an event type; `startTime` and `duration` are prepended
    pub fn event_type(&mut self, name: &str, fields: Vec<FieldSpec>) -> EventTypeId {
        let mut all = vec![
            FieldSpec::long("startTime").timestamp("TICKS"),
            FieldSpec::long("duration").timespan("TICKS"),
        ];
        all.extend(fields);
        self.types.push(EventType { name: name.to_string(), fields: all });
        EventTypeId(self.types.len() - 1)
    }

    /// Declare a class that fields reference by name through
    /// [`FieldSpec::named`]; each declaration becomes exactly one class
    pub fn struct_type(&mut self, name: &str, fields: Vec<FieldSpec>) -> &mut Self {
        self.structs.push(EventType { name: name.to_string(), fields });
        self
    }

    /// Append an event starting one tick after the previous one
    pub fn event(&mut self, ty: EventTypeId, duration_ticks: i64, values: Vec<Value>) -> &mut Self {
        let start = self.next_start;
        self.event_at(ty, start, duration_ticks, values)
    }

    pub fn event_at(
        &mut self,
        ty: EventTypeId,
        start_ticks: i64,
        duration_ticks: i64,
        values: Vec<Value>,
    ) -> &mut Self {
        let declared = self.types[ty.0].fields.len() - 2;
        assert_eq!(values.len(), declared, "{} expects {declared} values", self.types[ty.0].name);
        self.current.push(Record { type_index: ty.0, start_ticks, duration_ticks, values });
        self.next_start = start_ticks + 1;
        self
    }

    /// Close the current chunk; later events go into a new one
    pub fn next_chunk(&mut self) -> &mut Self {
        let records = std::mem::take(&mut self.current);
        self.chunks.push(records);
        self
    }

    /// Serialize every chunk, including the open one
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunks: Vec<&[Record]> = self.chunks.iter().map(Vec::as_slice).collect();
        if !self.current.is_empty() || chunks.is_empty() {
            chunks.push(&self.current);
        }
        for records in chunks {
            out.extend(self.build_chunk(records));
        }
        out
    }

    /// # Errors
    /// Returns any I/O error from writing the file.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }

    fn build_chunk(&self, records: &[Record]) -> Vec<u8> {
        let mut body = Writer::new(self.compressed);
        for record in records {
            let ty = &self.types[record.type_index];
            let mut w = Writer::new(self.compressed);
            w.long(FIRST_EVENT_CLASS_ID + i64::try_from(record.type_index).unwrap_or(i64::MAX));
            w.long(record.start_ticks);
            w.long(record.duration_ticks);
            for (field, value) in ty.fields[2..].iter().zip(&record.values) {
                w.value(&field.kind, value);
            }
            body.record(&w.buf);
        }

        let constant_pool_offset = HEADER_SIZE + body.buf.len();
        let mut pool = Writer::new(self.compressed);
        pool.long(CONSTANT_POOL_EVENT_TYPE);
        pool.long(self.start_ticks);
        pool.long(0); // duration
        pool.long(0); // delta to previous pool
        pool.int(0); // flush flag
        pool.int(0); // pool count
        body.record(&pool.buf);

        let metadata_offset = HEADER_SIZE + body.buf.len();
        body.record(&self.metadata_event());

        let size = HEADER_SIZE + body.buf.len();
        let mut chunk = Vec::with_capacity(size);
        chunk.extend_from_slice(&CHUNK_MAGIC);
        chunk.extend_from_slice(&self.major.to_be_bytes());
        chunk.extend_from_slice(&self.minor.to_be_bytes());
        for value in [size, constant_pool_offset, metadata_offset] {
            chunk.extend_from_slice(&i64::try_from(value).unwrap_or(i64::MAX).to_be_bytes());
        }
        chunk.extend_from_slice(&self.start_nanos.to_be_bytes());
        chunk.extend_from_slice(&0i64.to_be_bytes()); // duration
        chunk.extend_from_slice(&self.start_ticks.to_be_bytes());
        chunk.extend_from_slice(&self.ticks_per_second.to_be_bytes());
        chunk.extend_from_slice(&i32::from(self.compressed).to_be_bytes());
        chunk.extend(body.buf);
        chunk
    }

    fn metadata_event(&self) -> Vec<u8> {
        let mut classes = Vec::new();
        for (id, name) in BUILTIN_CLASSES {
            classes.push(class_element(*id, name, None, Vec::new()));
        }
        for (id, name) in ANNOTATION_CLASSES {
            let value = Element::new("field")
                .attr("name", "value")
                .attr("class", &builtin_id("java.lang.String").to_string());
            classes.push(class_element(
                *id,
                name,
                Some("java.lang.annotation.Annotation"),
                vec![value],
            ));
        }

        let named: HashMap<&str, i64> = self
            .structs
            .iter()
            .enumerate()
            .map(|(index, ty)| {
                let offset = i64::try_from(index).unwrap_or(i64::MAX);
                (ty.name.as_str(), FIRST_NAMED_CLASS_ID + offset)
            })
            .collect();
        let mut next_struct_id = FIRST_STRUCT_CLASS_ID;
        for ty in &self.structs {
            let fields = field_elements(&ty.fields, &named, &mut classes, &mut next_struct_id);
            classes.push(class_element(named[ty.name.as_str()], &ty.name, None, fields));
        }
        for (index, ty) in self.types.iter().enumerate() {
            let id = FIRST_EVENT_CLASS_ID + i64::try_from(index).unwrap_or(i64::MAX);
            let fields = field_elements(&ty.fields, &named, &mut classes, &mut next_struct_id);
            classes.push(class_element(id, &ty.name, Some(EVENT_SUPER_TYPE), fields));
        }

        let mut metadata = Element::new("metadata");
        metadata.children = classes;
        let mut root = Element::new("root");
        root.children = vec![metadata, Element::new("region").attr("locale", "en_US")];

        let mut strings = StringTable::default();
        root.intern(&mut strings);

        let mut w = Writer::new(self.compressed);
        w.long(METADATA_EVENT_TYPE);
        w.long(self.start_ticks);
        w.long(0); // duration
        w.long(1); // metadata id
        w.int(i32::try_from(strings.strings.len()).unwrap_or(i32::MAX));
        for s in &strings.strings {
            w.string(Some(s));
        }
        root.write(&mut w, &strings);
        w.buf
    }
}

fn class_element(id: i64, name: &str, super_type: Option<&str>, fields: Vec<Element>) -> Element {
    let mut class = Element::new("class").attr("id", &id.to_string()).attr("name", name);
    if let Some(super_type) = super_type {
        class = class.attr("superType", super_type);
    }
    class.children = fields;
    class
}

/// Field elements for `fields`, registering nested struct classes
fn field_elements(
    fields: &[FieldSpec],
    named: &HashMap<&str, i64>,
    classes: &mut Vec<Element>,
    next_id: &mut i64,
) -> Vec<Element> {
    fields
        .iter()
        .map(|field| {
            let class_id = match &field.kind {
                FieldKind::Struct(nested) => {
                    let id = *next_id;
                    *next_id += 1;
                    let nested_fields = field_elements(nested, named, classes, next_id);
                    let name = format!("fixture.Struct{id}");
                    classes.push(class_element(id, &name, None, nested_fields));
                    id
                }
                FieldKind::Named(class) => {
                    *named.get(class.as_str()).unwrap_or_else(|| panic!("no struct type {class}"))
                }
                kind => kind.class_id(),
            };

            let mut element = Element::new("field")
                .attr("name", &field.name)
                .attr("class", &class_id.to_string());
            if field.kind == FieldKind::ClassRef {
                element = element.attr("constantPool", "true");
            }
            if field.kind == FieldKind::LongArray {
                element = element.attr("dimension", "1");
            }
            if let Some((annotation, value)) = field.annotation {
                let mut a =
                    Element::new("annotation").attr("class", &builtin_id(annotation).to_string());
                if let Some(value) = value {
                    a = a.attr("value", value);
                }
                element.children.push(a);
            }
            element
        })
        .collect()
}

#[derive(Debug, Default)]
struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, usize>,
}

impl StringTable {
    fn intern(&mut self, s: &str) {
        if !self.index.contains_key(s) {
            self.index.insert(s.to_string(), self.strings.len());
            self.strings.push(s.to_string());
        }
    }

    fn get(&self, s: &str) -> i32 {
        self.index.get(s).and_then(|&i| i32::try_from(i).ok()).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    fn new(name: &str) -> Self {
        Self { name: name.to_string(), attributes: Vec::new(), children: Vec::new() }
    }

    fn attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    fn intern(&self, strings: &mut StringTable) {
        strings.intern(&self.name);
        for (key, value) in &self.attributes {
            strings.intern(key);
            strings.intern(value);
        }
        for child in &self.children {
            child.intern(strings);
        }
    }

    fn write(&self, w: &mut Writer, strings: &StringTable) {
        w.int(strings.get(&self.name));
        w.int(i32::try_from(self.attributes.len()).unwrap_or(i32::MAX));
        for (key, value) in &self.attributes {
            w.int(strings.get(key));
            w.int(strings.get(value));
        }
        w.int(i32::try_from(self.children.len()).unwrap_or(i32::MAX));
        for child in &self.children {
            child.write(w, strings);
        }
    }
}

/// Encoder mirroring the reader's integer and string encodings
#[derive(Debug)]
struct Writer {
    buf: Vec<u8>,
    compressed: bool,
}

impl Writer {
    fn new(compressed: bool) -> Self {
        Self { buf: Vec::new(), compressed }
    }

    fn varint(&mut self, mut value: u64) {
        for _ in 0..8 {
            if value < 0x80 {
                self.buf.push(value as u8);
                return;
            }
            self.buf.push((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    fn short(&mut self, value: i16) {
        if self.compressed {
            self.varint(u64::from(value as u16));
        } else {
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn char(&mut self, value: u16) {
        if self.compressed {
            self.varint(u64::from(value));
        } else {
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn int(&mut self, value: i32) {
        if self.compressed {
            self.varint(u64::from(value as u32));
        } else {
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn long(&mut self, value: i64) {
        if self.compressed {
            self.varint(value as u64);
        } else {
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn string(&mut self, value: Option<&str>) {
        match value {
            None => self.buf.push(0),
            Some("") => self.buf.push(1),
            Some(s) => {
                self.buf.push(3);
                self.int(i32::try_from(s.len()).unwrap_or(i32::MAX));
                self.buf.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Size-prefixed record with a fixed 4-byte size field
    fn record(&mut self, body: &[u8]) {
        let size = u32::try_from(body.len() + 4).unwrap_or(u32::MAX);
        if self.compressed {
            self.buf.extend_from_slice(&[
                (size as u8 & 0x7f) | 0x80,
                ((size >> 7) as u8 & 0x7f) | 0x80,
                ((size >> 14) as u8 & 0x7f) | 0x80,
                (size >> 21) as u8 & 0x7f,
            ]);
        } else {
            self.buf.extend_from_slice(&size.to_be_bytes());
        }
        self.buf.extend_from_slice(body);
    }

    fn value(&mut self, kind: &FieldKind, value: &Value) {
        match (kind, value) {
            (_, Value::Raw(bytes)) => self.buf.extend_from_slice(bytes),
            (FieldKind::Boolean, Value::Boolean(v)) => self.buf.push(u8::from(*v)),
            (FieldKind::Byte, Value::Byte(v)) => self.buf.push(*v as u8),
            (FieldKind::Short, Value::Short(v)) => self.short(*v),
            (FieldKind::Int, Value::Int(v)) => self.int(*v),
            (FieldKind::Long, Value::Long(v)) | (FieldKind::ClassRef, Value::Ref(v)) => {
                self.long(*v);
            }
            (FieldKind::Char, Value::Char(v)) => self.char(*v),
            (FieldKind::Float, Value::Float(v)) => self.buf.extend_from_slice(&v.to_be_bytes()),
            (FieldKind::Double, Value::Double(v)) => self.buf.extend_from_slice(&v.to_be_bytes()),
            (FieldKind::String, Value::Str(v)) => self.string(v.as_deref()),
            (FieldKind::LongArray, Value::Longs(values)) => {
                self.int(i32::try_from(values.len()).unwrap_or(i32::MAX));
                for v in values {
                    self.long(*v);
                }
            }
            (FieldKind::Struct(fields), Value::Struct(values)) => {
                assert_eq!(fields.len(), values.len(), "struct arity mismatch");
                for (field, value) in fields.iter().zip(values) {
                    self.value(&field.kind, value);
                }
            }
            (kind, value) => panic!("value {value:?} does not fit field kind {kind:?}"),
        }
    }
}
