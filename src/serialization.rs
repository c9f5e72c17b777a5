//! JSON rendering of message trees.
//!
//! Slots become object keys (an array of instances when the slot repeats),
//! fields are keyed `SEG-n`, composites are arrays of their components and
//! absent content is omitted. Intended for inspection and logging, not as an
//! interchange format.

use std::io::Write;

use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::error::Result;
use crate::model::{Message, NodeId, Segment, Value};
use crate::schema::StructureDef;

/// Render a message tree as JSON.
pub fn to_json(message: &Message) -> Result<Json> {
    group_json(message, message.root())
}

fn group_json(message: &Message, group: NodeId) -> Result<Json> {
    let mut map = Map::new();
    for (slot, reps) in message.slots(group)? {
        if reps.is_empty() {
            continue;
        }
        let items = reps
            .iter()
            .map(|id| match &slot.structure {
                StructureDef::Segment(_) => segment_json(message.segment(*id)?),
                StructureDef::Group(_) => group_json(message, *id),
            })
            .collect::<Result<Vec<_>>>()?;
        let value = if slot.slot.repeating {
            Json::Array(items)
        } else {
            items.into_iter().next().unwrap_or(Json::Null)
        };
        map.insert(slot.slot.name.clone(), value);
    }
    Ok(Json::Object(map))
}

fn segment_json(segment: &Segment) -> Result<Json> {
    let mut map = Map::new();
    for field in segment.def().fields() {
        let reps = segment.field_repetitions(field.index)?;
        if reps.iter().all(Value::is_empty) {
            continue;
        }
        let mut items: Vec<Json> = reps.iter().map(value_json).collect();
        let value = if field.is_repeating() {
            Json::Array(items)
        } else {
            items.swap_remove(0)
        };
        map.insert(format!("{}-{}", segment.name(), field.index), value);
    }
    Ok(Json::Object(map))
}

fn value_json(value: &Value) -> Json {
    match value {
        Value::Primitive(p) => p
            .value()
            .map(|s| Json::String(s.to_string()))
            .unwrap_or(Json::Null),
        Value::Composite(c) => Json::Array(c.components().iter().map(value_json).collect()),
    }
}

/// NDJSON (Newline Delimited JSON) writer
///
/// Writes one JSON document per line: decoded messages, validation issues,
/// anything serializable.
pub struct NdjsonWriter<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a single item as an NDJSON line
    pub fn write<T: Serialize>(&mut self, item: &T) -> Result<()> {
        let json = serde_json::to_string(item)?;
        writeln!(self.writer, "{}", json)?;
        Ok(())
    }

    /// Write a message rendered with [`to_json`]
    pub fn write_message(&mut self, message: &Message) -> Result<()> {
        self.write(&to_json(message)?)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
