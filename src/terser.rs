//! Path-based access to values inside a message.
//!
//! A path names the groups leading to a segment, then a field and optionally
//! a component and sub-component:
//!
//! ```text
//! [/]SLOT[(rep)]/.../SEGMENT[(rep)]-FIELD[(rep)][-COMPONENT[-SUBCOMPONENT]]
//! ```
//!
//! Repetitions are 0-based; field, component and sub-component numbers are
//! 1-based as in HL7 documentation. `REQUEST(1)/OBR-4-2` is the text of the
//! universal service identifier in the second request group.

use std::fmt;
use std::str::FromStr;

use crate::error::{Hl7Error, Result};
use crate::model::{Message, NodeId, Value};
use crate::schema::{DataType, SlotKind, StructureDef};

/// A named step of a path with its repetition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub rep: usize,
}

/// Parsed terser path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerserPath {
    /// The raw path string
    pub raw: String,
    /// Group slots from the root down
    pub groups: Vec<PathSegment>,
    pub segment: PathSegment,
    /// 1-based field number
    pub field: usize,
    pub field_rep: usize,
    /// 1-based component number
    pub component: Option<usize>,
    /// 1-based sub-component number
    pub subcomponent: Option<usize>,
}

impl TerserPath {
    /// Parse a path.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use hl7tree::TerserPath;
    ///
    /// let path = TerserPath::parse("REQUEST(1)/RESPONSE/OBX-5(2)-1")?;
    /// assert_eq!(path.groups.len(), 2);
    /// assert_eq!(path.field, 5);
    /// assert_eq!(path.field_rep, 2);
    /// ```
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: &str| Hl7Error::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let mut parts: Vec<&str> = trimmed.split('/').collect();
        let last = parts.pop().filter(|p| !p.is_empty()).ok_or_else(|| invalid("missing segment"))?;

        let groups = parts
            .iter()
            .map(|part| parse_step(part).ok_or_else(|| invalid(&format!("bad group step '{}'", part))))
            .collect::<Result<Vec<_>>>()?;

        let mut pieces = last.split('-');
        let segment = pieces
            .next()
            .and_then(parse_step)
            .ok_or_else(|| invalid("bad segment step"))?;
        let field_step = pieces
            .next()
            .and_then(parse_step)
            .ok_or_else(|| invalid("missing field number"))?;
        let field = parse_number(&field_step.name).ok_or_else(|| invalid("field numbers start at 1"))?;

        let mut numbers = Vec::new();
        for piece in pieces {
            numbers.push(parse_number(piece).ok_or_else(|| {
                invalid(&format!("bad component number '{}'", piece))
            })?);
        }
        if numbers.len() > 2 {
            return Err(invalid("too many levels after the field"));
        }

        Ok(Self {
            raw: path.to_string(),
            groups,
            segment,
            field,
            field_rep: field_step.rep,
            component: numbers.first().copied(),
            subcomponent: numbers.get(1).copied(),
        })
    }
}

impl FromStr for TerserPath {
    type Err = Hl7Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TerserPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// `NAME` or `NAME(rep)`.
fn parse_step(part: &str) -> Option<PathSegment> {
    let (name, rep) = match part.find('(') {
        Some(open) => {
            let rep = part[open + 1..].strip_suffix(')')?.parse().ok()?;
            (&part[..open], rep)
        }
        None => (part, 0),
    };
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(PathSegment {
        name: name.to_string(),
        rep,
    })
}

fn parse_number(s: &str) -> Option<usize> {
    s.parse().ok().filter(|n| *n >= 1)
}

/// Trait for types that can extract values by terser path
pub trait Extractor {
    /// Extract a value at the given path
    ///
    /// Returns `Some(value)` if the path exists and holds text, `None`
    /// otherwise. Never creates anything.
    fn extract(&self, path: &TerserPath) -> Option<String>;

    /// Extract a value and parse it to a specific type
    fn extract_as<T>(&self, path: &TerserPath) -> Option<T>
    where
        T: FromStr,
    {
        self.extract(path).and_then(|s| s.parse().ok())
    }
}

impl Extractor for Message {
    fn extract(&self, path: &TerserPath) -> Option<String> {
        read(self, path).ok().flatten()
    }
}

/// Read the text at `path` without changing the message.
pub fn read(message: &Message, path: &TerserPath) -> Result<Option<String>> {
    let mut group = message.root();
    for step in &path.groups {
        match message.find(group, &step.name, step.rep)? {
            Some(id) => group = id,
            None => return Ok(None),
        }
    }
    let Some(id) = message.find(group, &path.segment.name, path.segment.rep)? else {
        return Ok(None);
    };
    let Some(mut value) = message.segment(id)?.field(path.field, path.field_rep)? else {
        return Ok(None);
    };
    for number in [path.component, path.subcomponent].into_iter().flatten() {
        value = component(value, number)?;
    }
    Ok(value.as_text().map(str::to_string))
}

/// Component `number` (1-based) of a value. A primitive is its own first
/// component.
fn component(value: &Value, number: usize) -> Result<&Value> {
    match value {
        Value::Composite(c) => c.component_at(number - 1),
        Value::Primitive(_) if number == 1 => Ok(value),
        Value::Primitive(_) => Err(primitive_index(value, number)),
    }
}

fn component_mut(value: &mut Value, number: usize) -> Result<&mut Value> {
    if value.as_composite().is_none() {
        return if number == 1 {
            Ok(value)
        } else {
            Err(primitive_index(value, number))
        };
    }
    let name = value.datatype_name().to_string();
    value
        .as_composite_mut()
        .ok_or(Hl7Error::TypeMismatch {
            expected: "composite".to_string(),
            actual: name,
        })?
        .component_at_mut(number - 1)
}

fn primitive_index(value: &Value, number: usize) -> Hl7Error {
    Hl7Error::ComponentIndex {
        datatype: value.datatype_name().to_string(),
        index: number - 1,
        arity: 1,
    }
}

/// Read/write access to a message by path.
///
/// # Example
///
/// ```ignore
/// use hl7tree::Terser;
///
/// let mut terser = Terser::new(&mut message);
/// terser.set("REQUEST/OBR-4-1", "24331-1")?;
/// assert_eq!(terser.get("REQUEST/OBR-4")?.as_deref(), Some("24331-1"));
/// ```
pub struct Terser<'m> {
    message: &'m mut Message,
}

impl<'m> Terser<'m> {
    pub fn new(message: &'m mut Message) -> Self {
        Self { message }
    }

    /// Text at `path`; `None` when anything along the path is absent.
    pub fn get(&self, path: &str) -> Result<Option<String>> {
        read(self.message, &TerserPath::parse(path)?)
    }

    /// Set the text at `path`, creating groups, segments and repetitions
    /// along the way with the `get_rep` rules.
    ///
    /// Field and component numbers are checked against the schema first. If
    /// a later step still fails, groups and segments created by this call
    /// are removed again, so an error leaves the message as it was.
    pub fn set(&mut self, path: &str, text: &str) -> Result<()> {
        let path = TerserPath::parse(path)?;
        check_path(self.message, &path)?;

        let message = &mut *self.message;
        let mut created = Vec::new();
        let result = assign(message, &path, text, &mut created);
        if result.is_err() {
            for (group, name, id) in created.into_iter().rev() {
                message.remove(group, &name, id)?;
            }
        }
        result
    }
}

/// Nodes created while walking a path: parent group, slot name, instance.
type Created = Vec<(NodeId, String, NodeId)>;

fn assign(
    message: &mut Message,
    path: &TerserPath,
    text: &str,
    created: &mut Created,
) -> Result<()> {
    let mut group = message.root();
    for step in &path.groups {
        group = step_into(message, group, step, created)?;
    }
    let id = step_into(message, group, &path.segment, created)?;
    let mut value = message
        .segment_mut(id)?
        .get_field(path.field, path.field_rep)?;
    for number in [path.component, path.subcomponent].into_iter().flatten() {
        value = component_mut(value, number)?;
    }
    value.set_text(text)
}

fn step_into(
    message: &mut Message,
    group: NodeId,
    step: &PathSegment,
    created: &mut Created,
) -> Result<NodeId> {
    let existed = message.find(group, &step.name, step.rep)?.is_some();
    let id = message.get_rep(group, &step.name, step.rep)?;
    if !existed {
        created.push((group, step.name.clone(), id));
    }
    Ok(id)
}

/// Resolve `path` against the message schema without touching the tree.
fn check_path(message: &Message, path: &TerserPath) -> Result<()> {
    let mut def = message.def().clone();
    for step in &path.groups {
        def = match &def.require_slot(&step.name)?.structure {
            StructureDef::Group(g) => g.clone(),
            StructureDef::Segment(_) => {
                return Err(kind_mismatch(SlotKind::Group, SlotKind::Segment))
            }
        };
    }
    let segment = match &def.require_slot(&path.segment.name)?.structure {
        StructureDef::Segment(s) => s.clone(),
        StructureDef::Group(_) => {
            return Err(kind_mismatch(SlotKind::Segment, SlotKind::Group))
        }
    };

    let mut datatype = &segment.field(path.field)?.datatype;
    for number in [path.component, path.subcomponent].into_iter().flatten() {
        datatype = match datatype {
            DataType::Composite(c) => &c.component(number - 1)?.datatype,
            DataType::Primitive(_) if number == 1 => datatype,
            DataType::Primitive(p) => {
                return Err(Hl7Error::ComponentIndex {
                    datatype: p.name.clone(),
                    index: number - 1,
                    arity: 1,
                })
            }
        };
    }
    Ok(())
}

fn kind_mismatch(expected: SlotKind, actual: SlotKind) -> Hl7Error {
    Hl7Error::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::SchemaRegistry;

    #[test]
    fn test_parse_full_path() {
        let path = TerserPath::parse("/REQUEST(1)/RESPONSE/OBX(2)-5(3)-1-2").unwrap();

        assert_eq!(
            path.groups,
            vec![
                PathSegment { name: "REQUEST".to_string(), rep: 1 },
                PathSegment { name: "RESPONSE".to_string(), rep: 0 },
            ]
        );
        assert_eq!(path.segment, PathSegment { name: "OBX".to_string(), rep: 2 });
        assert_eq!(path.field, 5);
        assert_eq!(path.field_rep, 3);
        assert_eq!(path.component, Some(1));
        assert_eq!(path.subcomponent, Some(2));
    }

    #[test]
    fn test_parse_segment_only_path() {
        let path: TerserPath = "MSH-10".parse().unwrap();
        assert!(path.groups.is_empty());
        assert_eq!(path.segment.name, "MSH");
        assert_eq!(path.field, 10);
        assert_eq!(path.component, None);
        assert_eq!(path.to_string(), "MSH-10");
    }

    fn message() -> Message {
        let registry = SchemaRegistry::standard().unwrap();
        Message::new(&registry, "EHC_E12", "2.8.1").unwrap()
    }

    #[test]
    fn test_set_creates_along_path() {
        let mut msg = message();
        let mut terser = Terser::new(&mut msg);
        terser.set("REQUEST/RESPONSE/OBX-3-2", "Cholesterol").unwrap();
        terser.set("IVC-8-1-2", "USD").unwrap();

        assert_eq!(
            terser.get("REQUEST/RESPONSE/OBX-3-2").unwrap().as_deref(),
            Some("Cholesterol")
        );
        assert_eq!(terser.get("IVC-8-1-2").unwrap().as_deref(), Some("USD"));
        assert_eq!(terser.get("REQUEST(1)/OBR-4").unwrap(), None);
    }

    #[test]
    fn test_failed_set_leaves_message_unchanged() {
        let mut msg = message();
        let before = msg.node_count();

        {
            let mut terser = Terser::new(&mut msg);
            assert!(matches!(
                terser.set("REQUEST/OBR-99", "x"),
                Err(Hl7Error::FieldIndex { index: 99, count: 7, .. })
            ));
            assert!(matches!(
                terser.set("REQUEST/OBR-4-10", "x"),
                Err(Hl7Error::ComponentIndex { index: 9, arity: 9, .. })
            ));
            assert!(matches!(
                terser.set("REQUEST/OBR-1-2", "x"),
                Err(Hl7Error::ComponentIndex { arity: 1, .. })
            ));
            assert!(matches!(
                terser.set("REQUEST/OBX-1", "x"),
                Err(Hl7Error::UnknownStructureName { .. })
            ));
            // passes the schema check, fails on the missing field repetition
            assert!(matches!(
                terser.set("REQUEST/RESPONSE/OBX-5(1)", "x"),
                Err(Hl7Error::RepetitionGap { requested: 1, count: 0, .. })
            ));
        }

        let root = msg.root();
        assert_eq!(msg.node_count(), before);
        assert_eq!(msg.repetition_count(root, "REQUEST").unwrap(), 0);
    }

    #[test]
    fn test_failed_set_keeps_existing_nodes() {
        let mut msg = message();
        let mut terser = Terser::new(&mut msg);
        terser.set("REQUEST/OBR-4-1", "24331-1").unwrap();
        assert!(terser.set("REQUEST/RESPONSE/OBX-5(1)", "x").is_err());

        let root = msg.root();
        let request = msg.find(root, "REQUEST", 0).unwrap().unwrap();
        assert_eq!(msg.repetition_count(request, "OBR").unwrap(), 1);
        assert_eq!(msg.repetition_count(request, "RESPONSE").unwrap(), 0);
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        for bad in ["", "/", "MSH", "MSH-0", "MSH-1-0", "MSH-1-2-3-4", "REQ(x)/OBR-1", "OBR(1-4"] {
            assert!(
                matches!(TerserPath::parse(bad), Err(Hl7Error::InvalidPath { .. })),
                "{bad} should be rejected"
            );
        }
    }
}
