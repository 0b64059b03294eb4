//! Event decoding
//!
//! Each chunk's metadata is compiled into one [`EventLayout`] per event
//! class. Records are then decoded field by field: top-level numeric fields
//! become attributes, everything else (strings, constant pool references,
//! arrays, inline structs) is consumed and dropped.

use super::chunk::ChunkHeader;
use super::metadata::{
    ClassDef, ContentType, DataAmountUnit, FieldDef, Metadata, TimespanUnit, TimestampUnit,
    CONSTANT_POOL_EVENT_TYPE, METADATA_EVENT_TYPE,
};
use super::reader::ByteReader;
use super::Event;
use crate::domain::{FormatError, Quantity, Timestamp, Unit};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How many records are decoded between cancellation checks
pub const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Field carrying the event's start time
const START_TIME_FIELD: &str = "startTime";

/// Deepest nesting of inline classes accepted
const MAX_INLINE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
enum Decoder {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Char,
    Float,
    Double,
    String,
    ConstantPool,
    Array(Box<Decoder>),
    /// Inline value of the class with this id
    Struct(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Raw {
    Int(i64),
    Float(f64),
}

impl Raw {
    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Raw::Int(v) => v as f64,
            Raw::Float(v) => v,
        }
    }
}

#[derive(Debug)]
struct FieldLayout {
    name: Arc<str>,
    decoder: Decoder,
    content: ContentType,
}

#[derive(Debug)]
struct EventLayout {
    kind: Arc<str>,
    fields: Vec<FieldLayout>,
}

#[derive(Debug)]
struct StructLayout {
    fields: Vec<Decoder>,
    /// Fewest bytes one value occupies; zero when no primitive is reachable
    min_size: usize,
    /// Levels of inline classes, this one included
    height: usize,
}

/// Decoders of one chunk. Each inline class is compiled once and shared by
/// every field that embeds it.
#[derive(Debug, Default)]
struct Layouts {
    events: HashMap<i64, EventLayout>,
    structs: HashMap<i64, StructLayout>,
}

impl Layouts {
    fn min_size(&self, decoder: &Decoder) -> usize {
        match decoder {
            Decoder::Struct(id) => self.structs.get(id).map_or(0, |s| s.min_size),
            _ => 1,
        }
    }

    fn height(&self, decoder: &Decoder) -> usize {
        match decoder {
            Decoder::Struct(id) => self.structs.get(id).map_or(0, |s| s.height),
            Decoder::Array(element) => self.height(element),
            _ => 0,
        }
    }
}

/// Decode every chunk of a recording
///
/// Returns `Ok(None)` when `cancel` fires, checked between chunks and every
/// [`CANCEL_CHECK_INTERVAL`] records.
pub(crate) fn parse_recording(
    buf: &[u8],
    cancel: Option<&CancellationToken>,
) -> Result<Option<Vec<Event>>, FormatError> {
    let cancelled = || cancel.is_some_and(CancellationToken::is_cancelled);

    if buf.is_empty() {
        return Err(FormatError::Truncated { offset: 0, needed: super::chunk::HEADER_SIZE });
    }

    let mut events = Vec::new();
    let mut records = 0usize;
    let mut offset = 0;
    let mut chunks = 0usize;
    while offset < buf.len() {
        if cancelled() {
            return Ok(None);
        }

        let header = ChunkHeader::parse(buf, offset)?;
        let metadata = Metadata::parse(buf, &header)?;
        let layouts = compile_layouts(&metadata, &header)?;
        debug!(
            "Chunk {chunks} at {offset}: {} bytes, v{}.{}, {} classes, {} event types",
            header.size,
            header.major,
            header.minor,
            metadata.len(),
            layouts.events.len()
        );

        let mut r = ByteReader::new(
            buf,
            header.body_start(),
            header.end(),
            header.compressed_integers(),
        )?;
        while r.remaining() > 0 {
            records += 1;
            if records % CANCEL_CHECK_INTERVAL == 0 && cancelled() {
                return Ok(None);
            }
            if let Some(event) = decode_record(&mut r, &layouts, &header)? {
                events.push(event);
            }
        }

        chunks += 1;
        offset = header.end();
    }

    debug!("Decoded {} events from {records} records in {chunks} chunks", events.len());
    Ok(Some(events))
}

fn compile_layouts(metadata: &Metadata, header: &ChunkHeader) -> Result<Layouts, FormatError> {
    let mut compiler =
        Compiler { metadata, header, layouts: Layouts::default(), stack: Vec::new() };
    for class in metadata.event_classes() {
        let fields = class
            .fields
            .iter()
            .map(|field| {
                Ok(FieldLayout {
                    name: Arc::from(field.name.as_str()),
                    decoder: compiler.field(field)?,
                    content: metadata.content_type(field),
                })
            })
            .collect::<Result<Vec<_>, FormatError>>()?;
        let kind = Arc::from(class.name.as_str());
        compiler.layouts.events.insert(class.id, EventLayout { kind, fields });
    }
    Ok(compiler.layouts)
}

struct Compiler<'a> {
    metadata: &'a Metadata,
    header: &'a ChunkHeader,
    layouts: Layouts,
    /// Inline classes being compiled, outermost first
    stack: Vec<i64>,
}

impl Compiler<'_> {
    fn invalid(&self, reason: String) -> FormatError {
        FormatError::Invalid { offset: self.header.metadata_position(), reason }
    }

    fn field(&mut self, field: &FieldDef) -> Result<Decoder, FormatError> {
        let metadata = self.metadata;
        let element = if field.constant_pool {
            Decoder::ConstantPool
        } else {
            let class = metadata.class(field.class_id).ok_or_else(|| {
                self.invalid(format!("field '{}' has unknown class {}", field.name, field.class_id))
            })?;
            match class.name.as_str() {
                "boolean" => Decoder::Boolean,
                "byte" => Decoder::Byte,
                "short" => Decoder::Short,
                "int" => Decoder::Int,
                "long" => Decoder::Long,
                "char" => Decoder::Char,
                "float" => Decoder::Float,
                "double" => Decoder::Double,
                "java.lang.String" => Decoder::String,
                _ => self.structure(class)?,
            }
        };

        Ok(if field.array { Decoder::Array(Box::new(element)) } else { element })
    }

    fn structure(&mut self, class: &ClassDef) -> Result<Decoder, FormatError> {
        if !self.layouts.structs.contains_key(&class.id) {
            self.compile_struct(class)?;
        }
        let height = self.layouts.structs.get(&class.id).map_or(0, |s| s.height);
        if self.stack.len() + height > MAX_INLINE_DEPTH {
            return Err(self.invalid(format!("inline class '{}' nests too deeply", class.name)));
        }
        Ok(Decoder::Struct(class.id))
    }

    fn compile_struct(&mut self, class: &ClassDef) -> Result<(), FormatError> {
        if self.stack.contains(&class.id) {
            return Err(self.invalid(format!("inline class '{}' contains itself", class.name)));
        }
        if self.stack.len() >= MAX_INLINE_DEPTH {
            return Err(self.invalid(format!("inline class '{}' nests too deeply", class.name)));
        }

        self.stack.push(class.id);
        let fields: Result<Vec<_>, _> =
            class.fields.iter().map(|field| self.field(field)).collect();
        self.stack.pop();
        let fields = fields?;

        let min_size = fields
            .iter()
            .fold(0usize, |total, field| total.saturating_add(self.layouts.min_size(field)));
        let height = 1 + fields.iter().map(|field| self.layouts.height(field)).max().unwrap_or(0);
        self.layouts.structs.insert(class.id, StructLayout { fields, min_size, height });
        Ok(())
    }
}

/// Decode one record; `None` for metadata and constant pool records
fn decode_record(
    r: &mut ByteReader<'_>,
    layouts: &Layouts,
    header: &ChunkHeader,
) -> Result<Option<Event>, FormatError> {
    let mut record = r.record()?;
    let type_offset = record.position();
    let type_id = record.long()?;
    if type_id == METADATA_EVENT_TYPE || type_id == CONSTANT_POOL_EVENT_TYPE {
        return Ok(None);
    }

    let layout = layouts.events.get(&type_id).ok_or_else(|| FormatError::Invalid {
        offset: type_offset,
        reason: format!("unknown event type {type_id}"),
    })?;

    let mut timestamp = None;
    let mut attributes = Vec::new();
    for field in &layout.fields {
        let Some(raw) = decode_value(&mut record, &field.decoder, layouts)? else {
            continue;
        };
        if let ContentType::Timestamp(unit) = field.content {
            if &*field.name == START_TIME_FIELD {
                timestamp = Some(Timestamp(epoch_nanos(raw, unit, header)));
            }
        }
        attributes.push((Arc::clone(&field.name), normalize(raw, field.content, header)));
    }

    Ok(Some(Event::new(
        Arc::clone(&layout.kind),
        timestamp.unwrap_or(Timestamp(header.start_nanos)),
        attributes,
    )))
}

/// Decode one value; only numeric primitives produce a result
fn decode_value(
    r: &mut ByteReader<'_>,
    decoder: &Decoder,
    layouts: &Layouts,
) -> Result<Option<Raw>, FormatError> {
    let raw = match decoder {
        Decoder::Byte => Raw::Int(i64::from(r.u8()? as i8)),
        Decoder::Short => Raw::Int(i64::from(r.short()?)),
        Decoder::Int => Raw::Int(i64::from(r.int()?)),
        Decoder::Long => Raw::Int(r.long()?),
        Decoder::Float => Raw::Float(f64::from(r.f32()?)),
        Decoder::Double => Raw::Float(r.f64()?),
        Decoder::Boolean => {
            r.u8()?;
            return Ok(None);
        }
        Decoder::Char => {
            r.char()?;
            return Ok(None);
        }
        Decoder::String => {
            r.string()?;
            return Ok(None);
        }
        Decoder::ConstantPool => {
            r.long()?;
            return Ok(None);
        }
        Decoder::Array(element) => {
            let offset = r.position();
            let count = r.count()?;
            let min_size = layouts.min_size(element);
            if min_size > 0 {
                if count > r.remaining() / min_size {
                    return Err(FormatError::Truncated {
                        offset,
                        needed: count.saturating_mul(min_size),
                    });
                }
                for _ in 0..count {
                    decode_value(r, element, layouts)?;
                }
            }
            return Ok(None);
        }
        Decoder::Struct(id) => {
            // Classes without primitives occupy no bytes
            let Some(layout) = layouts.structs.get(id).filter(|s| s.min_size > 0) else {
                return Ok(None);
            };
            if layout.min_size > r.remaining() {
                return Err(FormatError::Truncated {
                    offset: r.position(),
                    needed: layout.min_size,
                });
            }
            for field in &layout.fields {
                decode_value(r, field, layouts)?;
            }
            return Ok(None);
        }
    };
    Ok(Some(raw))
}

/// Convert a raw value to its base unit
fn normalize(raw: Raw, content: ContentType, header: &ChunkHeader) -> Quantity {
    match content {
        ContentType::Plain => Quantity::plain(raw.as_f64()),
        ContentType::Timespan(unit) => Quantity::nanos(timespan_nanos(raw, unit, header)),
        #[allow(clippy::cast_precision_loss)]
        ContentType::Timestamp(unit) => {
            Quantity::new(epoch_nanos(raw, unit, header) as f64, Unit::EpochNanoseconds)
        }
        ContentType::DataAmount(DataAmountUnit::Bytes) => Quantity::new(raw.as_f64(), Unit::Bytes),
        ContentType::DataAmount(DataAmountUnit::Bits) => {
            Quantity::new(raw.as_f64() / 8.0, Unit::Bytes)
        }
        ContentType::Percentage => Quantity::new(raw.as_f64(), Unit::Fraction),
        ContentType::Frequency => Quantity::new(raw.as_f64(), Unit::Hertz),
    }
}

#[allow(clippy::cast_precision_loss)]
fn timespan_nanos(raw: Raw, unit: TimespanUnit, header: &ChunkHeader) -> f64 {
    match (unit, raw) {
        (TimespanUnit::Ticks, Raw::Int(ticks)) => header.ticks_to_nanos(ticks) as f64,
        (TimespanUnit::Ticks, Raw::Float(ticks)) => header.ticks_to_nanos_f64(ticks),
        (TimespanUnit::Nanoseconds, _) => raw.as_f64(),
        (TimespanUnit::Microseconds, _) => raw.as_f64() * 1e3,
        (TimespanUnit::Milliseconds, _) => raw.as_f64() * 1e6,
        (TimespanUnit::Seconds, _) => raw.as_f64() * 1e9,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn epoch_nanos(raw: Raw, unit: TimestampUnit, header: &ChunkHeader) -> i64 {
    match (unit, raw) {
        (TimestampUnit::Ticks, Raw::Int(ticks)) => header.ticks_to_epoch_nanos(ticks),
        (TimestampUnit::Ticks, Raw::Float(ticks)) => header.ticks_to_epoch_nanos(ticks as i64),
        (TimestampUnit::MillisecondsSinceEpoch, Raw::Int(millis)) => {
            millis.saturating_mul(1_000_000)
        }
        (TimestampUnit::MillisecondsSinceEpoch, Raw::Float(millis)) => (millis * 1e6) as i64,
    }
}
