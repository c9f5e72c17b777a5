//! Wire text to message tree.
//!
//! Segments are placed by walking the message grammar with a stack of open
//! groups. For each segment the innermost open group is tried first: a new
//! repetition of the current slot, then any later slot (entering nested
//! groups that can start with the segment). Only when the innermost group
//! cannot take the segment are its enclosing groups tried, in turn.

use std::sync::Arc;

use crate::codec::escape::unescape;
use crate::codec::{CodecOptions, Delimiters};
use crate::error::{Hl7Error, Result, WirePosition};
use crate::factory::ModelClassFactory;
use crate::model::{Message, NodeId, Segment, Value};
use crate::schema::{GroupDef, StructureDef, HEADER_SEGMENTS};

/// An open group instance and the slot most recently filled in it.
#[derive(Debug, Clone)]
struct Frame {
    group: NodeId,
    def: Arc<GroupDef>,
    position: Option<usize>,
}

pub struct Decoder<'a> {
    factory: &'a dyn ModelClassFactory,
    options: &'a CodecOptions,
    delimiters: Delimiters,
}

impl<'a> Decoder<'a> {
    /// `delimiters` apply unless the text opens with a header segment.
    pub fn new(
        factory: &'a dyn ModelClassFactory,
        options: &'a CodecOptions,
        delimiters: Delimiters,
    ) -> Self {
        Self {
            factory,
            options,
            delimiters,
        }
    }

    pub fn decode(&self, text: &str, root_name: &str, version: &str) -> Result<Message> {
        let def = self.factory.message(root_name, version)?;
        let lines = self.split_segments(text);

        let delimiters = match lines.first() {
            Some(first) if is_header_line(first) => {
                let d = self.delimiters.from_header(first).ok_or_else(|| {
                    Hl7Error::MalformedWireText {
                        position: WirePosition::segment(1, &first[..3]),
                        reason: "header segment does not carry four encoding characters"
                            .to_string(),
                    }
                })?;
                d.validate()?;
                d
            }
            _ => self.delimiters.clone(),
        };

        let mut message = Message::from_def(def.clone(), version, delimiters.clone());
        let mut stack = vec![Frame {
            group: message.root(),
            def,
            position: None,
        }];

        for (i, line) in lines.iter().enumerate() {
            let number = i + 1;
            let name = segment_name(line, &delimiters, number)?;
            let id = match self.place(&mut message, &mut stack, name)? {
                Some(id) => id,
                None => return Err(self.unplaceable(name, version, number)),
            };
            tracing::trace!(segment = name, number, depth = stack.len(), "Placed segment");
            fill_segment(message.segment_mut(id)?, line, &delimiters, number)?;
        }

        tracing::debug!(
            message = root_name,
            version,
            segments = lines.len(),
            "Decoded message"
        );
        Ok(message)
    }

    fn split_segments<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let segment = self.delimiters.segment;
        let newlines = self.options.accept_newline_terminators;
        text.split(|c: char| c == segment || (newlines && (c == '\r' || c == '\n')))
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Place segment `name`, innermost open group first.
    fn place(
        &self,
        message: &mut Message,
        stack: &mut Vec<Frame>,
        name: &str,
    ) -> Result<Option<NodeId>> {
        for level in (0..stack.len()).rev() {
            if let Some(id) = self.place_at(message, stack, level, name)? {
                return Ok(Some(id));
            }
            tracing::trace!(
                segment = name,
                group = %stack[level].def.name,
                "Segment does not fit, trying enclosing group"
            );
        }
        Ok(None)
    }

    fn place_at(
        &self,
        message: &mut Message,
        stack: &mut Vec<Frame>,
        level: usize,
        name: &str,
    ) -> Result<Option<NodeId>> {
        let Some(target) = self.find_slot(message, &stack[level], name)? else {
            return Ok(None);
        };

        stack.truncate(level + 1);
        let frame = &mut stack[level];
        frame.position = Some(target);
        let group = frame.group;
        let def = frame.def.clone();
        let slot = def
            .slot_at(target)
            .ok_or_else(|| Hl7Error::InvalidSchema(format!("{} has no slot {}", def.name, target)))?;

        match &slot.structure {
            StructureDef::Segment(_) => Ok(Some(message.add(group, &slot.slot.name)?)),
            StructureDef::Group(inner) => {
                if stack.len() >= self.options.max_group_depth {
                    return Err(Hl7Error::NestingTooDeep {
                        max: self.options.max_group_depth,
                    });
                }
                let child = message.add(group, &slot.slot.name)?;
                tracing::debug!(group = %inner.name, segment = name, "Opened group");
                stack.push(Frame {
                    group: child,
                    def: inner.clone(),
                    position: None,
                });
                self.place_at(message, stack, level + 1, name)
            }
        }
    }

    /// Slot of `frame` that takes `name` next: the current slot again when it
    /// repeats, otherwise the first later slot that accepts it.
    fn find_slot(&self, message: &Message, frame: &Frame, name: &str) -> Result<Option<usize>> {
        let def = &frame.def;
        let start = match frame.position {
            Some(p) => {
                let repeats = def.slot_at(p).is_some_and(|s| s.slot.repeating);
                if repeats && def.slot_accepts(p, name) {
                    return Ok(Some(p));
                }
                p + 1
            }
            None => 0,
        };

        let mut skipped = Vec::new();
        for q in start..def.slot_count() {
            if def.slot_accepts(q, name) {
                if !skipped.is_empty() {
                    if !self.options.lenient_required {
                        return Ok(None);
                    }
                    tracing::warn!(
                        group = %def.name,
                        segment = name,
                        missing = ?skipped,
                        "Skipping required slots with no content"
                    );
                }
                return Ok(Some(q));
            }
            if let Some(slot) = def.slot_at(q) {
                if slot.slot.required && message.repetition_count(frame.group, &slot.slot.name)? == 0 {
                    skipped.push(slot.slot.name.clone());
                }
            }
        }
        Ok(None)
    }

    fn unplaceable(&self, name: &str, version: &str, number: usize) -> Hl7Error {
        if let Err(err @ Hl7Error::UnknownStructure { .. }) = self.factory.segment(name, version) {
            return err;
        }
        Hl7Error::UnexpectedSegment {
            name: name.to_string(),
            position: WirePosition::segment(number, name),
        }
    }
}

fn is_header_line(line: &str) -> bool {
    line.get(..3).is_some_and(|name| HEADER_SEGMENTS.contains(&name))
}

fn segment_name<'t>(line: &'t str, d: &Delimiters, number: usize) -> Result<&'t str> {
    let name = line.split(d.field).next().unwrap_or_default();
    let valid = name.len() == 3
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if !valid {
        return Err(Hl7Error::MalformedWireText {
            position: WirePosition::segment(number, ""),
            reason: format!("'{}' is not a segment name", name),
        });
    }
    Ok(name)
}

/// Fill a freshly created segment from its wire line.
fn fill_segment(segment: &mut Segment, line: &str, d: &Delimiters, number: usize) -> Result<()> {
    let mut tokens: Vec<&str> = line.split(d.field).skip(1).collect();
    let header = segment.def().is_header();
    // header field 1 is the separator itself and field 2 the encoding
    // characters, both already set from the delimiters
    let first = if header {
        if !tokens.is_empty() {
            tokens.remove(0);
        }
        3
    } else {
        1
    };
    while tokens.last().is_some_and(|t| t.is_empty()) {
        tokens.pop();
    }

    let found = first + tokens.len() - 1;
    if !tokens.is_empty() && found > segment.field_count() {
        return Err(Hl7Error::SegmentOverflow {
            segment: segment.name().to_string(),
            declared: segment.field_count(),
            found,
            position: WirePosition::segment(number, segment.name()).with_field(found),
        });
    }

    let name = segment.name().to_string();
    for (offset, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            continue;
        }
        let index = first + offset;
        let mut reps: Vec<&str> = token.split(d.repetition).collect();
        while reps.last().is_some_and(|r| r.is_empty()) {
            reps.pop();
        }
        for (r, rep) in reps.iter().enumerate() {
            let position = WirePosition::segment(number, name.as_str())
                .with_field(index)
                .with_repetition(r);
            let value = segment.add_field_repetition(index)?;
            parse_value(value, rep, d, 0, &position)?;
        }
    }
    Ok(())
}

/// `level` 0 is a field repetition, 1 a component, 2 a sub-component.
fn parse_value(
    value: &mut Value,
    text: &str,
    d: &Delimiters,
    level: usize,
    position: &WirePosition,
) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    if level >= 2 && value.as_composite().is_some() {
        // below sub-components the first leaf carries the text
        let text = unescape(text, d, || position.clone())?.into_owned();
        return value.set_text(text);
    }

    match value {
        Value::Primitive(p) => {
            let nested = [d.component, d.subcomponent];
            if let Some(c) = text.chars().find(|c| nested[level.min(2)..].contains(c)) {
                return Err(Hl7Error::MalformedWireText {
                    position: position.clone(),
                    reason: format!(
                        "'{}' found in a value of primitive type {}",
                        c,
                        p.datatype().name
                    ),
                });
            }
            p.set_value(unescape(text, d, || position.clone())?.into_owned());
            Ok(())
        }
        Value::Composite(c) => {
            let separator = if level == 0 { d.component } else { d.subcomponent };
            let mut parts: Vec<&str> = text.split(separator).collect();
            while parts.last().is_some_and(|p| p.is_empty()) {
                parts.pop();
            }
            if parts.len() > c.arity() {
                return Err(Hl7Error::MalformedWireText {
                    position: position.clone(),
                    reason: format!(
                        "{} carries {} components but has {}",
                        c.def().name,
                        parts.len(),
                        c.arity()
                    ),
                });
            }
            for (k, part) in parts.iter().enumerate() {
                let position = if level == 0 {
                    position.clone().with_component(k + 1)
                } else {
                    position.clone().with_subcomponent(k + 1)
                };
                parse_value(c.component_at_mut(k)?, part, d, level + 1, &position)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CompositeDef, DataType, FieldDef, SegmentDef};

    fn mop() -> DataType {
        DataType::composite(CompositeDef::new(
            "MOP",
            vec![
                ("Indicator".to_string(), DataType::primitive("ID")),
                ("Quantity".to_string(), DataType::primitive("NM")),
                ("Denomination".to_string(), DataType::primitive("ID")),
            ],
        ))
    }

    fn ivc() -> Arc<SegmentDef> {
        SegmentDef::new(
            "IVC",
            vec![
                FieldDef::new("A", DataType::primitive("ST")),
                FieldDef::new("B", DataType::primitive("ST")).repeating(),
                FieldDef::new("Amount", mop()),
            ],
        )
    }

    fn segment() -> Segment {
        Segment::new(ivc())
    }

    #[test]
    fn test_fill_composite_field() {
        let mut seg = segment();
        fill_segment(&mut seg, "IVC|||AT^10.5^USD", &Delimiters::default(), 1).unwrap();

        let value = seg.field(3, 0).unwrap().unwrap().as_composite().unwrap();
        assert_eq!(value.component_at(0).unwrap().as_text(), Some("AT"));
        assert_eq!(value.component_at(1).unwrap().as_text(), Some("10.5"));
        assert_eq!(value.component_at(2).unwrap().as_text(), Some("USD"));
        assert!(matches!(
            value.component_at(3),
            Err(Hl7Error::ComponentIndex { index: 3, arity: 3, .. })
        ));
    }

    #[test]
    fn test_fill_keeps_interior_empty_repetitions() {
        let mut seg = segment();
        fill_segment(&mut seg, "IVC||a~~c~", &Delimiters::default(), 1).unwrap();

        assert_eq!(seg.repetition_count(2).unwrap(), 3);
        assert!(seg.field(2, 1).unwrap().unwrap().is_empty());
        assert_eq!(seg.field(2, 2).unwrap().unwrap().as_text(), Some("c"));
        assert_eq!(seg.repetition_count(1).unwrap(), 0);
    }

    #[test]
    fn test_trailing_empty_fields_are_not_overflow() {
        let mut seg = segment();
        fill_segment(&mut seg, "IVC|a||||", &Delimiters::default(), 1).unwrap();
        assert_eq!(seg.field_text(1).unwrap(), Some("a"));
    }

    #[test]
    fn test_segment_overflow() {
        let mut seg = segment();
        let err = fill_segment(&mut seg, "IVC|a|b|c|d", &Delimiters::default(), 4).unwrap_err();
        match err {
            Hl7Error::SegmentOverflow {
                declared,
                found,
                position,
                ..
            } => {
                assert_eq!(declared, 3);
                assert_eq!(found, 4);
                assert_eq!(position.segment_number, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_component_delimiter_in_primitive() {
        let mut seg = segment();
        let err = fill_segment(&mut seg, "IVC|a^b", &Delimiters::default(), 1).unwrap_err();
        assert!(matches!(err, Hl7Error::MalformedWireText { .. }));
    }

    #[test]
    fn test_too_many_components() {
        let mut seg = segment();
        let err = fill_segment(&mut seg, "IVC|||AT^1^USD^X", &Delimiters::default(), 1).unwrap_err();
        match err {
            Hl7Error::MalformedWireText { position, .. } => {
                assert_eq!(position.field, Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_escaped_values_are_resolved() {
        let mut seg = segment();
        fill_segment(&mut seg, "IVC|R\\T\\D|||", &Delimiters::default(), 1).unwrap();
        assert_eq!(seg.field_text(1).unwrap(), Some("R&D"));
    }

    #[test]
    fn test_segment_name_validation() {
        let d = Delimiters::default();
        assert_eq!(segment_name("PID|1", &d, 1).unwrap(), "PID");
        assert_eq!(segment_name("ZX1", &d, 1).unwrap(), "ZX1");
        assert!(matches!(segment_name("PIDX|1", &d, 2), Err(Hl7Error::MalformedWireText { .. })));
        assert!(matches!(segment_name("pid|1", &d, 2), Err(Hl7Error::MalformedWireText { .. })));
    }
}
