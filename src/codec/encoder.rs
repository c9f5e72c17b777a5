//! Message tree to wire text.

use crate::codec::escape::escape;
use crate::codec::{CodecOptions, Delimiters};
use crate::error::{Hl7Error, Result, WirePosition};
use crate::model::{Message, Segment, Value};

/// Where the encoder currently is, turned into a [`WirePosition`] only when
/// an error needs one.
#[derive(Clone, Copy)]
struct Loc<'a> {
    number: usize,
    segment: &'a str,
    field: usize,
    repetition: usize,
    component: Option<usize>,
    subcomponent: Option<usize>,
}

impl Loc<'_> {
    fn position(&self) -> WirePosition {
        let mut position = WirePosition::segment(self.number, self.segment)
            .with_field(self.field)
            .with_repetition(self.repetition);
        if let Some(c) = self.component {
            position = position.with_component(c);
        }
        if let Some(s) = self.subcomponent {
            position = position.with_subcomponent(s);
        }
        position
    }
}

/// Encode every present segment of `message` in slot order.
pub fn encode(message: &Message, options: &CodecOptions) -> Result<String> {
    let d = message.delimiters();
    let ids = message.descendant_segments(message.root())?;

    let mut out = String::new();
    for (i, id) in ids.iter().enumerate() {
        let segment = message.segment(*id)?;
        if i > 0 {
            out.push(d.segment);
        }
        out.push_str(&encode_segment(segment, d, i + 1)?);
    }
    if options.trailing_segment_delimiter && !ids.is_empty() {
        out.push(d.segment);
    }

    tracing::debug!(
        message = message.name(),
        segments = ids.len(),
        bytes = out.len(),
        "Encoded message"
    );
    Ok(out)
}

/// One segment line without its terminator.
pub fn encode_segment(segment: &Segment, d: &Delimiters, number: usize) -> Result<String> {
    let header = segment.def().is_header();
    // header fields 1 and 2 are written from the delimiters
    let first = if header { 3 } else { 1 };

    let mut fields = Vec::with_capacity(segment.field_count());
    for index in first..=segment.field_count() {
        let loc = Loc {
            number,
            segment: segment.name(),
            field: index,
            repetition: 0,
            component: None,
            subcomponent: None,
        };
        fields.push(encode_field(segment.field_repetitions(index)?, d, loc)?);
    }
    truncate_trailing_empty(&mut fields);

    let mut line = String::from(segment.name());
    if header {
        line.push(d.field);
        line.push_str(&d.encoding_characters());
    }
    for field in &fields {
        line.push(d.field);
        line.push_str(field);
    }
    Ok(line)
}

fn encode_field(reps: &[Value], d: &Delimiters, loc: Loc<'_>) -> Result<String> {
    let mut parts = Vec::with_capacity(reps.len());
    for (r, value) in reps.iter().enumerate() {
        let loc = Loc {
            repetition: r,
            ..loc
        };
        parts.push(encode_value(value, d, 0, loc)?);
    }
    truncate_trailing_empty(&mut parts);
    Ok(parts.join(&d.repetition.to_string()))
}

/// `level` 0 is a field repetition, 1 a component, 2 a sub-component.
fn encode_value(value: &Value, d: &Delimiters, level: usize, loc: Loc<'_>) -> Result<String> {
    let composite = match value {
        Value::Primitive(p) => {
            let text = p.value().unwrap_or_default();
            return Ok(escape(text, d, || loc.position())?.into_owned());
        }
        Value::Composite(c) => c,
    };

    let separator = match level {
        0 => d.component,
        1 => d.subcomponent,
        _ => {
            // no delimiter left below sub-components: only the first leaf fits
            if !only_first_leaf(value) {
                return Err(Hl7Error::UnencodableValue {
                    position: loc.position(),
                    reason: format!(
                        "{} below sub-component level has content past its first component",
                        value.datatype_name()
                    ),
                });
            }
            let text = value.as_text().unwrap_or_default();
            return Ok(escape(text, d, || loc.position())?.into_owned());
        }
    };

    let mut parts = Vec::with_capacity(composite.arity());
    for (k, component) in composite.components().iter().enumerate() {
        let loc = if level == 0 {
            Loc {
                component: Some(k + 1),
                ..loc
            }
        } else {
            Loc {
                subcomponent: Some(k + 1),
                ..loc
            }
        };
        parts.push(encode_value(component, d, level + 1, loc)?);
    }
    truncate_trailing_empty(&mut parts);
    Ok(parts.join(&separator.to_string()))
}

/// Whether every component off the first-leaf path is empty.
fn only_first_leaf(value: &Value) -> bool {
    match value {
        Value::Primitive(_) => true,
        Value::Composite(c) => match c.components().split_first() {
            Some((first, rest)) => only_first_leaf(first) && rest.iter().all(Value::is_empty),
            None => true,
        },
    }
}

fn truncate_trailing_empty(parts: &mut Vec<String>) {
    while parts.last().is_some_and(|p| p.is_empty()) {
        parts.pop();
    }
}
