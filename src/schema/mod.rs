//! Resolved, immutable schema descriptors.
//!
//! A schema describes the shape of one message version: which groups hold which
//! segments, which fields a segment carries, and how a composite datatype splits
//! into components. Descriptors are built once (by [`crate::factory`] or by hand
//! through the constructors below) and shared through `Arc` afterwards. Nothing
//! in this module is mutable after construction.

pub mod loader;
pub mod resolve;

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::{Hl7Error, Result};

/// Segment names whose field 1 holds the field separator and field 2 the
/// encoding characters.
pub const HEADER_SEGMENTS: [&str; 3] = ["MSH", "FHS", "BHS"];

/// Kind of structure a group slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Segment,
    Group,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Segment => write!(f, "segment"),
            SlotKind::Group => write!(f, "group"),
        }
    }
}

/// A primitive (scalar) HL7 datatype such as `ST`, `NM` or `ID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveDef {
    pub name: String,
    /// HL7 table number for coded values (informational only)
    pub table: Option<u32>,
}

/// Declared datatype of a field or component.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Primitive(Arc<PrimitiveDef>),
    Composite(Arc<CompositeDef>),
}

impl DataType {
    /// Shorthand for an untabled primitive.
    pub fn primitive(name: impl Into<String>) -> Self {
        DataType::Primitive(Arc::new(PrimitiveDef {
            name: name.into(),
            table: None,
        }))
    }

    pub fn coded(name: impl Into<String>, table: u32) -> Self {
        DataType::Primitive(Arc::new(PrimitiveDef {
            name: name.into(),
            table: Some(table),
        }))
    }

    pub fn composite(def: Arc<CompositeDef>) -> Self {
        DataType::Composite(def)
    }

    pub fn name(&self) -> &str {
        match self {
            DataType::Primitive(p) => &p.name,
            DataType::Composite(c) => &c.name,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, DataType::Composite(_))
    }

    /// Two datatypes are compatible when they share kind and name. Table
    /// bindings do not take part in compatibility.
    pub fn is_compatible(&self, other: &DataType) -> bool {
        match (self, other) {
            (DataType::Primitive(a), DataType::Primitive(b)) => a.name == b.name,
            (DataType::Composite(a), DataType::Composite(b)) => {
                Arc::ptr_eq(a, b) || (a.name == b.name && a.arity() == b.arity())
            }
            _ => false,
        }
    }
}

/// One position inside a composite datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDef {
    /// 0-based position
    pub position: usize,
    pub name: String,
    pub datatype: DataType,
}

/// Fixed-arity composite datatype, e.g. `MOP` (Money or Percentage).
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeDef {
    pub name: String,
    pub description: Option<String>,
    components: Vec<ComponentDef>,
}

impl CompositeDef {
    /// Build a composite from `(component name, datatype)` pairs. Positions are
    /// assigned in order.
    pub fn new(
        name: impl Into<String>,
        components: Vec<(String, DataType)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            description: None,
            components: components
                .into_iter()
                .enumerate()
                .map(|(position, (name, datatype))| ComponentDef {
                    position,
                    name,
                    datatype,
                })
                .collect(),
        })
    }

    pub fn with_description(
        name: impl Into<String>,
        description: impl Into<String>,
        components: Vec<(String, DataType)>,
    ) -> Arc<Self> {
        let mut def = Arc::unwrap_or_clone(Self::new(name, components));
        def.description = Some(description.into());
        Arc::new(def)
    }

    pub fn arity(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[ComponentDef] {
        &self.components
    }

    pub fn component(&self, index: usize) -> Result<&ComponentDef> {
        self.components.get(index).ok_or_else(|| Hl7Error::ComponentIndex {
            datatype: self.name.clone(),
            index,
            arity: self.arity(),
        })
    }
}

/// Field declaration within a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// 1-based field number
    pub index: usize,
    pub name: String,
    pub datatype: DataType,
    pub required: bool,
    pub min_reps: usize,
    /// `None` means unbounded
    pub max_reps: Option<usize>,
}

impl FieldDef {
    /// Optional, non-repeating field. The index is assigned by [`SegmentDef::new`].
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            index: 0,
            name: name.into(),
            datatype,
            required: false,
            min_reps: 0,
            max_reps: Some(1),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.min_reps = self.min_reps.max(1);
        self
    }

    pub fn repeating(mut self) -> Self {
        self.max_reps = None;
        self
    }

    pub fn max_reps(mut self, max: usize) -> Self {
        self.max_reps = Some(max);
        self
    }

    pub fn is_repeating(&self) -> bool {
        self.max_reps != Some(1)
    }
}

/// Segment declaration: a named, ordered list of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDef {
    pub name: String,
    pub description: Option<String>,
    fields: Vec<FieldDef>,
}

impl SegmentDef {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            description: None,
            fields: fields
                .into_iter()
                .enumerate()
                .map(|(i, mut field)| {
                    field.index = i + 1;
                    field
                })
                .collect(),
        })
    }

    pub fn with_description(
        name: impl Into<String>,
        description: impl Into<String>,
        fields: Vec<FieldDef>,
    ) -> Arc<Self> {
        let mut def = Arc::unwrap_or_clone(Self::new(name, fields));
        def.description = Some(description.into());
        Arc::new(def)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Field declaration by 1-based index.
    pub fn field(&self, index: usize) -> Result<&FieldDef> {
        if index == 0 {
            return Err(self.field_index_error(index));
        }
        self.fields
            .get(index - 1)
            .ok_or_else(|| self.field_index_error(index))
    }

    pub fn is_header(&self) -> bool {
        HEADER_SEGMENTS.contains(&self.name.as_str())
    }

    fn field_index_error(&self, index: usize) -> Hl7Error {
        Hl7Error::FieldIndex {
            segment: self.name.clone(),
            index,
            count: self.fields.len(),
        }
    }
}

/// Position of one child inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSlot {
    pub name: String,
    pub kind: SlotKind,
    pub required: bool,
    pub repeating: bool,
    pub position: usize,
}

/// The structure a slot holds.
#[derive(Debug, Clone, PartialEq)]
pub enum StructureDef {
    Segment(Arc<SegmentDef>),
    Group(Arc<GroupDef>),
}

impl StructureDef {
    /// Structure name (for segments, the wire name).
    pub fn name(&self) -> &str {
        match self {
            StructureDef::Segment(s) => &s.name,
            StructureDef::Group(g) => &g.name,
        }
    }

    pub fn kind(&self) -> SlotKind {
        match self {
            StructureDef::Segment(_) => SlotKind::Segment,
            StructureDef::Group(_) => SlotKind::Group,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotDef {
    pub slot: SchemaSlot,
    pub structure: StructureDef,
}

impl SlotDef {
    /// Segment names that can open a new instance of this slot.
    fn opening_names(&self) -> Vec<String> {
        match &self.structure {
            StructureDef::Segment(s) => vec![s.name.clone()],
            StructureDef::Group(g) => g.starts.iter().cloned().collect(),
        }
    }
}

/// Group declaration: an ordered list of named slots. Messages are groups too.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDef {
    pub name: String,
    slots: IndexMap<String, SlotDef>,
    /// Segment names that can open an instance of this group, skipping only
    /// optional leading slots.
    starts: IndexSet<String>,
    depth: usize,
}

impl GroupDef {
    pub fn builder(name: impl Into<String>) -> GroupBuilder {
        GroupBuilder {
            name: name.into(),
            slots: Vec::new(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> impl Iterator<Item = &SlotDef> {
        self.slots.values()
    }

    pub fn slot_at(&self, position: usize) -> Option<&SlotDef> {
        self.slots.get_index(position).map(|(_, slot)| slot)
    }

    pub fn slot(&self, name: &str) -> Option<&SlotDef> {
        self.slots.get(name)
    }

    /// Slot by name, failing with `UnknownStructureName` when undeclared.
    pub fn require_slot(&self, name: &str) -> Result<&SlotDef> {
        self.slots
            .get(name)
            .ok_or_else(|| Hl7Error::UnknownStructureName {
                structure: self.name.clone(),
                name: name.to_string(),
            })
    }

    /// Whether a segment with this wire name can open an instance of the group.
    pub fn can_start_with(&self, segment: &str) -> bool {
        self.starts.contains(segment)
    }

    /// Whether a slot at `position` can be opened by `segment`.
    pub fn slot_accepts(&self, position: usize, segment: &str) -> bool {
        match self.slot_at(position).map(|s| &s.structure) {
            Some(StructureDef::Segment(s)) => s.name == segment,
            Some(StructureDef::Group(g)) => g.can_start_with(segment),
            None => false,
        }
    }

    /// Levels of group nesting below (and including) this group.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Every segment wire name reachable from this group.
    pub fn segment_names(&self) -> IndexSet<String> {
        let mut names = IndexSet::new();
        for slot in self.slots.values() {
            match &slot.structure {
                StructureDef::Segment(s) => {
                    names.insert(s.name.clone());
                }
                StructureDef::Group(g) => names.extend(g.segment_names()),
            }
        }
        names
    }
}

/// Incremental constructor for [`GroupDef`].
#[derive(Debug, Clone)]
pub struct GroupBuilder {
    name: String,
    slots: Vec<(String, StructureDef, bool, bool)>,
}

impl GroupBuilder {
    /// Add a segment slot named after the segment.
    pub fn segment(self, def: Arc<SegmentDef>, required: bool, repeating: bool) -> Self {
        let name = def.name.clone();
        self.segment_as(name, def, required, repeating)
    }

    /// Add a segment slot under an explicit slot name (e.g. `NTE2`).
    pub fn segment_as(
        mut self,
        slot: impl Into<String>,
        def: Arc<SegmentDef>,
        required: bool,
        repeating: bool,
    ) -> Self {
        self.slots
            .push((slot.into(), StructureDef::Segment(def), required, repeating));
        self
    }

    pub fn group(
        mut self,
        slot: impl Into<String>,
        def: Arc<GroupDef>,
        required: bool,
        repeating: bool,
    ) -> Self {
        self.slots
            .push((slot.into(), StructureDef::Group(def), required, repeating));
        self
    }

    pub fn build(self) -> Result<Arc<GroupDef>> {
        let mut slots = IndexMap::with_capacity(self.slots.len());
        let mut depth = 1;

        for (position, (name, structure, required, repeating)) in
            self.slots.into_iter().enumerate()
        {
            if let StructureDef::Group(g) = &structure {
                depth = depth.max(g.depth + 1);
            }
            let slot = SchemaSlot {
                name: name.clone(),
                kind: structure.kind(),
                required,
                repeating,
                position,
            };
            if slots
                .insert(name.clone(), SlotDef { slot, structure })
                .is_some()
            {
                return Err(Hl7Error::InvalidSchema(format!(
                    "Group '{}' declares slot '{}' more than once",
                    self.name, name
                )));
            }
        }

        let mut starts = IndexSet::new();
        for slot in slots.values() {
            starts.extend(slot.opening_names());
            if slot.slot.required {
                break;
            }
        }

        Ok(Arc::new(GroupDef {
            name: self.name,
            slots,
            starts,
            depth,
        }))
    }
}
