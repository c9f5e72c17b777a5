//! The message structure tree.
//!
//! A [`Message`] owns every group and segment instance of one message in an
//! arena and hands out [`NodeId`] handles. Group operations take the handle of
//! the group they act on; [`Message::root`] is the message itself.
//!
//! Accessors follow the "ensure-then-return" rule: [`Message::get`] and
//! [`Message::get_rep`] take `&mut self` because asking for the first (or the
//! next) repetition of a slot creates it. [`Message::get_all`],
//! [`Message::find`] and [`Message::repetition_count`] never create anything.

use std::sync::Arc;

use crate::codec::Delimiters;
use crate::error::{Hl7Error, Result};
use crate::factory::ModelClassFactory;
use crate::model::arena::{Arena, NodeId};
use crate::model::segment::Segment;
use crate::schema::{GroupDef, SlotDef, SlotKind, StructureDef};

#[derive(Debug, Clone)]
pub(crate) struct GroupNode {
    def: Arc<GroupDef>,
    /// Instances per slot position
    children: Vec<Vec<NodeId>>,
}

impl GroupNode {
    fn new(def: Arc<GroupDef>) -> Self {
        let children = vec![Vec::new(); def.slot_count()];
        Self { def, children }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Group(GroupNode),
    Segment(Segment),
}

/// A message: the root group of a structure tree bound to one version.
#[derive(Debug, Clone)]
pub struct Message {
    version: String,
    def: Arc<GroupDef>,
    delimiters: Delimiters,
    nodes: Arena<Node>,
    root: NodeId,
}

impl Message {
    /// Create an empty message of type `name` for `version`, using the
    /// factory's schema and default delimiters for that version.
    pub fn new(factory: &dyn ModelClassFactory, name: &str, version: &str) -> Result<Self> {
        let def = factory.message(name, version)?;
        let delimiters = factory.delimiters(version)?;
        Ok(Self::from_def(def, version, delimiters))
    }

    /// Create an empty message from an already resolved message schema.
    pub fn from_def(def: Arc<GroupDef>, version: impl Into<String>, delimiters: Delimiters) -> Self {
        let mut nodes = Arena::new();
        let root = nodes.insert(Node::Group(GroupNode::new(def.clone())));
        Self {
            version: version.into(),
            def,
            delimiters,
            nodes,
            root,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn def(&self) -> &Arc<GroupDef> {
        &self.def
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    /// Override the delimiters. Header segments already in the tree get their
    /// separator fields rewritten.
    pub fn set_delimiters(&mut self, delimiters: Delimiters) -> Result<()> {
        delimiters.validate()?;
        self.delimiters = delimiters;
        let ids: Vec<NodeId> = self.descendant_segments(self.root)?;
        for id in ids {
            let delimiters = self.delimiters.clone();
            if let Some(Node::Segment(seg)) = self.nodes.get_mut(id) {
                init_header(seg, &delimiters)?;
            }
        }
        Ok(())
    }

    /// Number of live group and segment instances, the root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Repetition 0 of `name` in `group`, created if the slot is empty.
    ///
    /// Same as `get_rep(group, name, 0)`.
    pub fn get(&mut self, group: NodeId, name: &str) -> Result<NodeId> {
        self.get_rep(group, name, 0)
    }

    /// Repetition `rep` of `name` in `group`.
    ///
    /// Existing repetitions are returned as is. Asking for `rep == count`
    /// creates and appends a new instance; asking beyond that is a
    /// `RepetitionGap` error. A non-repeating slot only has repetition 0.
    pub fn get_rep(&mut self, group: NodeId, name: &str, rep: usize) -> Result<NodeId> {
        let (slot, reps) = self.slot_reps(group, name)?;
        let count = reps.len();
        if rep < count {
            return Ok(reps[rep]);
        }
        if rep > count {
            return Err(Hl7Error::RepetitionGap {
                name: name.to_string(),
                requested: rep,
                count,
            });
        }
        if !slot.slot.repeating && count >= 1 {
            return Err(Hl7Error::RepeatingNotAllowed {
                name: name.to_string(),
            });
        }
        let slot = slot.clone();
        self.append(group, &slot)
    }

    /// All current repetitions of `name`, in order. Never creates anything.
    pub fn get_all(&self, group: NodeId, name: &str) -> Result<&[NodeId]> {
        Ok(self.slot_reps(group, name)?.1)
    }

    /// Repetition `rep` of `name` if it exists. Never creates anything.
    pub fn find(&self, group: NodeId, name: &str, rep: usize) -> Result<Option<NodeId>> {
        Ok(self.get_all(group, name)?.get(rep).copied())
    }

    pub fn repetition_count(&self, group: NodeId, name: &str) -> Result<usize> {
        Ok(self.get_all(group, name)?.len())
    }

    /// Append a new instance of `name` regardless of the current count.
    /// A non-repeating slot that already holds one is a `RepeatingNotAllowed`
    /// error.
    pub fn add(&mut self, group: NodeId, name: &str) -> Result<NodeId> {
        let (slot, reps) = self.slot_reps(group, name)?;
        if !slot.slot.repeating && !reps.is_empty() {
            return Err(Hl7Error::RepeatingNotAllowed {
                name: name.to_string(),
            });
        }
        let slot = slot.clone();
        self.append(group, &slot)
    }

    /// Remove a specific instance of `name`. Later repetitions shift down.
    pub fn remove(&mut self, group: NodeId, name: &str, instance: NodeId) -> Result<()> {
        let position = self.slot_position(group, name)?;
        let reps = &mut self.group_node_mut(group)?.children[position];
        let index = reps
            .iter()
            .position(|id| *id == instance)
            .ok_or_else(|| Hl7Error::NotFound {
                name: name.to_string(),
            })?;
        reps.remove(index);
        self.free_subtree(instance);
        Ok(())
    }

    /// Remove the repetition at `index`. Later repetitions shift down.
    pub fn remove_at(&mut self, group: NodeId, name: &str, index: usize) -> Result<()> {
        let position = self.slot_position(group, name)?;
        let reps = &mut self.group_node_mut(group)?.children[position];
        if index >= reps.len() {
            return Err(Hl7Error::IndexOutOfRange {
                name: name.to_string(),
                index,
                count: reps.len(),
            });
        }
        let removed = reps.remove(index);
        self.free_subtree(removed);
        Ok(())
    }

    /// Kind of the structure behind a handle.
    pub fn kind(&self, id: NodeId) -> Result<SlotKind> {
        match self.node(id)? {
            Node::Group(_) => Ok(SlotKind::Group),
            Node::Segment(_) => Ok(SlotKind::Segment),
        }
    }

    /// Structure name behind a handle (group name or segment wire name).
    pub fn structure_name(&self, id: NodeId) -> Result<&str> {
        match self.node(id)? {
            Node::Group(g) => Ok(&g.def.name),
            Node::Segment(s) => Ok(s.name()),
        }
    }

    pub fn group_def(&self, group: NodeId) -> Result<&Arc<GroupDef>> {
        Ok(&self.group_node(group)?.def)
    }

    pub fn segment(&self, id: NodeId) -> Result<&Segment> {
        match self.node(id)? {
            Node::Segment(s) => Ok(s),
            Node::Group(_) => Err(kind_mismatch(SlotKind::Segment, SlotKind::Group)),
        }
    }

    pub fn segment_mut(&mut self, id: NodeId) -> Result<&mut Segment> {
        match self.node_mut(id)? {
            Node::Segment(s) => Ok(s),
            Node::Group(_) => Err(kind_mismatch(SlotKind::Segment, SlotKind::Group)),
        }
    }

    /// Segment `name` directly under the root, created if absent.
    pub fn root_segment_mut(&mut self, name: &str) -> Result<&mut Segment> {
        let id = self.get(self.root, name)?;
        self.segment_mut(id)
    }

    /// Whether a group instance has no segment anywhere below it.
    pub fn is_group_empty(&self, group: NodeId) -> Result<bool> {
        Ok(self.descendant_segments(group)?.is_empty())
    }

    /// Segment handles below `group`, in schema order.
    pub fn descendant_segments(&self, group: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack = vec![group];
        // depth-first, children pushed in reverse to keep schema order
        while let Some(id) = stack.pop() {
            match self.node(id)? {
                Node::Segment(_) => out.push(id),
                Node::Group(g) => {
                    for reps in g.children.iter().rev() {
                        stack.extend(reps.iter().rev());
                    }
                }
            }
        }
        Ok(out)
    }

    /// Slot definitions of `group` paired with their current instances.
    pub fn slots(&self, group: NodeId) -> Result<Vec<(&SlotDef, &[NodeId])>> {
        let node = self.group_node(group)?;
        Ok(node
            .def
            .slots()
            .zip(node.children.iter())
            .map(|(slot, reps)| (slot, reps.as_slice()))
            .collect())
    }

    fn append(&mut self, group: NodeId, slot: &SlotDef) -> Result<NodeId> {
        let node = match &slot.structure {
            StructureDef::Segment(def) => {
                let mut seg = Segment::new(def.clone());
                init_header(&mut seg, &self.delimiters)?;
                Node::Segment(seg)
            }
            StructureDef::Group(def) => Node::Group(GroupNode::new(def.clone())),
        };
        // check the parent before allocating
        self.group_node(group)?;
        let id = self.nodes.insert(node);
        self.group_node_mut(group)?.children[slot.slot.position].push(id);
        Ok(id)
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(Node::Group(g)) = self.nodes.remove(id) {
                stack.extend(g.children.into_iter().flatten());
            }
        }
    }

    fn slot_reps(&self, group: NodeId, name: &str) -> Result<(&SlotDef, &[NodeId])> {
        let node = self.group_node(group)?;
        let slot = node.def.require_slot(name)?;
        Ok((slot, &node.children[slot.slot.position]))
    }

    fn slot_position(&self, group: NodeId, name: &str) -> Result<usize> {
        Ok(self.slot_reps(group, name)?.0.slot.position)
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id).ok_or_else(|| stale(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id).ok_or_else(|| stale(id))
    }

    pub(crate) fn group_node(&self, id: NodeId) -> Result<&GroupNode> {
        match self.node(id)? {
            Node::Group(g) => Ok(g),
            Node::Segment(_) => Err(kind_mismatch(SlotKind::Group, SlotKind::Segment)),
        }
    }

    fn group_node_mut(&mut self, id: NodeId) -> Result<&mut GroupNode> {
        match self.node_mut(id)? {
            Node::Group(g) => Ok(g),
            Node::Segment(_) => Err(kind_mismatch(SlotKind::Group, SlotKind::Segment)),
        }
    }

    fn node_eq(&self, a: NodeId, other: &Message, b: NodeId) -> bool {
        match (self.nodes.get(a), other.nodes.get(b)) {
            (Some(Node::Segment(x)), Some(Node::Segment(y))) => x == y,
            (Some(Node::Group(x)), Some(Node::Group(y))) => {
                x.def == y.def
                    && x.children.len() == y.children.len()
                    && x.children.iter().zip(&y.children).all(|(xs, ys)| {
                        xs.len() == ys.len()
                            && xs.iter().zip(ys).all(|(xa, yb)| self.node_eq(*xa, other, *yb))
                    })
            }
            _ => false,
        }
    }
}

/// Structural equality: same schema, same present slots and repetition
/// counts, same field values. Handles and delimiters do not take part.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.node_eq(self.root, other, other.root)
    }
}

/// Header segments carry the field separator in field 1 and the encoding
/// characters in field 2.
fn init_header(seg: &mut Segment, delimiters: &Delimiters) -> Result<()> {
    if !seg.def().is_header() || seg.field_count() < 2 {
        return Ok(());
    }
    seg.set_field_text(1, delimiters.field.to_string())?;
    seg.set_field_text(2, delimiters.encoding_characters())?;
    Ok(())
}

fn stale(id: NodeId) -> Hl7Error {
    Hl7Error::NotFound {
        name: format!("{:?}", id),
    }
}

fn kind_mismatch(expected: SlotKind, actual: SlotKind) -> Hl7Error {
    Hl7Error::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}
