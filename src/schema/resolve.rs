//! Resolution of a parsed schema set into shared descriptors.
//!
//! Composites may nest composites and groups may nest groups, so definitions are
//! built in dependency order computed with Kahn's algorithm. A cycle is reported
//! as an `InvalidSchema` error naming the structures involved.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::codec::Delimiters;
use crate::error::{Hl7Error, Result};
use crate::schema::loader::{CompositeV1, GroupV1, SchemaSetV1};
use crate::schema::{CompositeDef, DataType, FieldDef, GroupDef, PrimitiveDef, SegmentDef};

/// Primitive datatype names understood without declaration.
pub const STANDARD_PRIMITIVES: &[&str] = &[
    "ST", "ID", "IS", "NM", "SI", "TX", "FT", "DT", "DTM", "TM", "GTS", "SNM", "NUL", "varies",
];

/// Fully resolved schemas of one HL7 version.
#[derive(Debug, Clone)]
pub struct VersionSchemas {
    pub version: String,
    pub delimiters: Delimiters,
    primitives: IndexSet<String>,
    composites: IndexMap<String, Arc<CompositeDef>>,
    segments: IndexMap<String, Arc<SegmentDef>>,
    groups: IndexMap<String, Arc<GroupDef>>,
    messages: IndexMap<String, Arc<GroupDef>>,
}

impl VersionSchemas {
    /// Empty schema table for a version, knowing only the standard primitives.
    pub fn empty(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            delimiters: Delimiters::default(),
            primitives: STANDARD_PRIMITIVES.iter().map(|p| p.to_string()).collect(),
            composites: IndexMap::new(),
            segments: IndexMap::new(),
            groups: IndexMap::new(),
            messages: IndexMap::new(),
        }
    }

    /// Resolve a schema set on its own.
    pub fn build(set: &SchemaSetV1) -> Result<Self> {
        Self::empty(set.spec.version.clone()).extend(set)
    }

    /// Resolve a schema set on top of this one. Names the set does not define
    /// resolve against `self`; redefining an existing name is an error.
    pub fn extend(&self, set: &SchemaSetV1) -> Result<Self> {
        let spec = &set.spec;
        if spec.version != self.version {
            return Err(Hl7Error::InvalidSchema(format!(
                "Schema set '{}' is for version '{}', cannot extend version '{}'",
                set.metadata.name, spec.version, self.version
            )));
        }

        let mut out = self.clone();
        if let Some(delimiters) = &spec.encoding {
            delimiters.validate()?;
            out.delimiters = delimiters.clone();
        }
        out.primitives.extend(spec.primitives.iter().cloned());

        out.resolve_composites(&spec.composites)?;

        for segment in &spec.segments {
            if out.segments.contains_key(&segment.name) {
                return Err(redefined("segment", &segment.name));
            }
            let fields = segment
                .fields
                .iter()
                .map(|f| {
                    let datatype = out.datatype(&f.datatype, f.table).map_err(|_| {
                        Hl7Error::InvalidSchema(format!(
                            "Field '{}' of segment '{}' uses unknown datatype '{}'",
                            f.name, segment.name, f.datatype
                        ))
                    })?;
                    let mut field = FieldDef::new(f.name.clone(), datatype);
                    if f.required {
                        field = field.required();
                    }
                    if f.repeating {
                        field = field.repeating();
                    }
                    if let Some(max) = f.max_reps {
                        field = field.max_reps(max);
                    }
                    if let Some(min) = f.min_reps {
                        field.min_reps = min;
                    }
                    Ok(field)
                })
                .collect::<Result<Vec<_>>>()?;

            let def = match &segment.description {
                Some(desc) => SegmentDef::with_description(segment.name.clone(), desc.clone(), fields),
                None => SegmentDef::new(segment.name.clone(), fields),
            };
            out.segments.insert(segment.name.clone(), def);
        }

        out.resolve_groups(&spec.groups, &spec.messages)?;

        tracing::debug!(
            version = %out.version,
            composites = out.composites.len(),
            segments = out.segments.len(),
            groups = out.groups.len(),
            messages = out.messages.len(),
            "Resolved schema set '{}'",
            set.metadata.name
        );

        Ok(out)
    }

    pub fn composite(&self, name: &str) -> Option<&Arc<CompositeDef>> {
        self.composites.get(name)
    }

    pub fn segment(&self, name: &str) -> Option<&Arc<SegmentDef>> {
        self.segments.get(name)
    }

    pub fn group(&self, name: &str) -> Option<&Arc<GroupDef>> {
        self.groups.get(name)
    }

    pub fn message(&self, name: &str) -> Option<&Arc<GroupDef>> {
        self.messages.get(name)
    }

    pub fn is_primitive(&self, name: &str) -> bool {
        self.primitives.contains(name)
    }

    pub fn message_names(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(|k| k.as_str())
    }

    pub fn segment_names(&self) -> impl Iterator<Item = &str> {
        self.segments.keys().map(|k| k.as_str())
    }

    /// Register a programmatically built segment.
    pub fn insert_segment(&mut self, def: Arc<SegmentDef>) -> Result<()> {
        if self.segments.contains_key(&def.name) {
            return Err(redefined("segment", &def.name));
        }
        self.segments.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn insert_composite(&mut self, def: Arc<CompositeDef>) -> Result<()> {
        if self.composites.contains_key(&def.name) {
            return Err(redefined("composite", &def.name));
        }
        self.composites.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn insert_group(&mut self, def: Arc<GroupDef>) -> Result<()> {
        if self.groups.contains_key(&def.name) || self.messages.contains_key(&def.name) {
            return Err(redefined("group", &def.name));
        }
        self.groups.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn insert_message(&mut self, def: Arc<GroupDef>) -> Result<()> {
        if self.groups.contains_key(&def.name) || self.messages.contains_key(&def.name) {
            return Err(redefined("message", &def.name));
        }
        self.messages.insert(def.name.clone(), def);
        Ok(())
    }

    fn datatype(&self, name: &str, table: Option<u32>) -> Result<DataType> {
        if let Some(def) = self.composites.get(name) {
            return Ok(DataType::Composite(def.clone()));
        }
        if self.primitives.contains(name) {
            return Ok(DataType::Primitive(Arc::new(PrimitiveDef {
                name: name.to_string(),
                table,
            })));
        }
        Err(Hl7Error::UnknownStructure {
            name: name.to_string(),
            version: self.version.clone(),
        })
    }

    fn resolve_composites(&mut self, composites: &[CompositeV1]) -> Result<()> {
        let mut deps = IndexMap::new();
        for composite in composites {
            if self.composites.contains_key(&composite.name) {
                return Err(redefined("composite", &composite.name));
            }
            deps.insert(
                composite.name.clone(),
                composite.components.iter().map(|c| c.datatype.clone()).collect(),
            );
        }

        let by_name: IndexMap<&str, &CompositeV1> =
            composites.iter().map(|c| (c.name.as_str(), c)).collect();

        for name in resolution_order(&deps)? {
            let composite = by_name[name.as_str()];
            let components = composite
                .components
                .iter()
                .map(|c| {
                    let datatype = self.datatype(&c.datatype, c.table).map_err(|_| {
                        Hl7Error::InvalidSchema(format!(
                            "Component '{}' of composite '{}' uses unknown datatype '{}'",
                            c.name, composite.name, c.datatype
                        ))
                    })?;
                    Ok((c.name.clone(), datatype))
                })
                .collect::<Result<Vec<_>>>()?;

            let def = match &composite.description {
                Some(desc) => CompositeDef::with_description(name.clone(), desc.clone(), components),
                None => CompositeDef::new(name.clone(), components),
            };
            self.composites.insert(name, def);
        }
        Ok(())
    }

    fn resolve_groups(&mut self, groups: &[GroupV1], messages: &[GroupV1]) -> Result<()> {
        let mut deps = IndexMap::new();
        let mut by_name = IndexMap::new();
        for (group, is_message) in groups
            .iter()
            .map(|g| (g, false))
            .chain(messages.iter().map(|m| (m, true)))
        {
            if self.groups.contains_key(&group.name) || self.messages.contains_key(&group.name) {
                return Err(redefined("group", &group.name));
            }
            deps.insert(
                group.name.clone(),
                group
                    .slots
                    .iter()
                    .filter_map(|s| s.group.clone())
                    .collect(),
            );
            by_name.insert(group.name.clone(), (group, is_message));
        }

        for name in resolution_order(&deps)? {
            let (group, is_message) = by_name[&name];
            let mut builder = GroupDef::builder(name.clone());
            for slot in &group.slots {
                let slot_name = slot.slot_name().to_string();
                if let Some(segment) = &slot.segment {
                    let def = self.segments.get(segment).ok_or_else(|| {
                        Hl7Error::InvalidSchema(format!(
                            "Group '{}' references unknown segment '{}'",
                            name, segment
                        ))
                    })?;
                    builder = builder.segment_as(slot_name, def.clone(), slot.required, slot.repeating);
                } else if let Some(child) = &slot.group {
                    if self.messages.contains_key(child) {
                        return Err(Hl7Error::InvalidSchema(format!(
                            "Group '{}' cannot nest message '{}'",
                            name, child
                        )));
                    }
                    let def = self.groups.get(child).ok_or_else(|| {
                        Hl7Error::InvalidSchema(format!(
                            "Group '{}' references unknown group '{}'",
                            name, child
                        ))
                    })?;
                    builder = builder.group(slot_name, def.clone(), slot.required, slot.repeating);
                }
            }
            let def = builder.build()?;
            if is_message {
                self.messages.insert(name, def);
            } else {
                self.groups.insert(name, def);
            }
        }
        Ok(())
    }
}

fn redefined(what: &str, name: &str) -> Hl7Error {
    Hl7Error::InvalidSchema(format!("{} '{}' is already defined", what, name))
}

/// Order declarations so that each one comes after the declarations it uses
/// (Kahn's algorithm).
///
/// Dependencies on names outside `deps` (primitives, structures from a base
/// schema) are ignored. Declaration order is kept among independent entries.
pub fn resolution_order(deps: &IndexMap<String, Vec<String>>) -> Result<Vec<String>> {
    let mut in_degree: IndexMap<&str, usize> = deps.keys().map(|k| (k.as_str(), 0)).collect();
    let mut dependents: IndexMap<&str, Vec<&str>> =
        deps.keys().map(|k| (k.as_str(), Vec::new())).collect();

    for (name, uses) in deps {
        let mut seen = IndexSet::new();
        for dep in uses.iter().filter(|d| deps.contains_key(*d)) {
            if !seen.insert(dep.as_str()) {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(name.as_str()) {
                *degree += 1;
            }
            if let Some(list) = dependents.get_mut(dep.as_str()) {
                list.push(name.as_str());
            }
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut sorted = Vec::with_capacity(deps.len());
    while let Some(name) = queue.pop_front() {
        sorted.push(name.to_string());
        for dependent in &dependents[name] {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    if sorted.len() != deps.len() {
        let unresolved: Vec<&str> = deps
            .keys()
            .map(|k| k.as_str())
            .filter(|k| !sorted.iter().any(|s| s == k))
            .collect();
        return Err(Hl7Error::InvalidSchema(format!(
            "Circular dependency detected involving: {:?}",
            unresolved
        )));
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::loader::parse_schema_set;
    use crate::schema::{SlotKind, StructureDef};

    fn deps(entries: &[(&str, &[&str])]) -> IndexMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(name, uses)| (name.to_string(), uses.iter().map(|u| u.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_order_linear_chain() {
        let order = resolution_order(&deps(&[("C", &["B"]), ("B", &["A"]), ("A", &[])])).unwrap();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_order_ignores_external_names() {
        let order = resolution_order(&deps(&[("CWE", &["ST", "ID"]), ("MOP", &["ID", "NM"])])).unwrap();
        assert_eq!(order, vec!["CWE", "MOP"]);
    }

    #[test]
    fn test_order_detects_cycle() {
        let err = resolution_order(&deps(&[("A", &["B"]), ("B", &["A"]), ("C", &[])])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Circular dependency"));
        assert!(msg.contains("\"A\""));
        assert!(!msg.contains("\"C\""));
    }

    const SET: &str = r#"
apiVersion: hl7tree.io/v1
kind: SchemaSet
metadata:
  name: nested
spec:
  version: "2.8.1"
  composites:
    - name: XPN
      components:
        - { name: Family Name, type: FN }
        - { name: Given Name, type: ST }
    - name: FN
      components:
        - { name: Surname, type: ST }
        - { name: Own Surname Prefix, type: ST }
  segments:
    - name: PID
      fields:
        - { name: Set ID, type: SI }
        - { name: Patient Name, type: XPN, repeating: true }
    - name: OBX
      fields:
        - { name: Value, type: ST }
  groups:
    - name: T_RESULT
      slots:
        - { segment: OBX, required: true }
  messages:
    - name: T_T01
      slots:
        - { segment: PID, required: true }
        - { group: T_RESULT, name: RESULT, repeating: true }
"#;

    #[test]
    fn test_build_resolves_forward_references() {
        let set = parse_schema_set(SET).unwrap();
        let schemas = VersionSchemas::build(&set).unwrap();

        let xpn = schemas.composite("XPN").unwrap();
        assert!(xpn.component(0).unwrap().datatype.is_composite());

        let pid = schemas.segment("PID").unwrap();
        assert!(pid.field(2).unwrap().is_repeating());

        let msg = schemas.message("T_T01").unwrap();
        let slot = msg.require_slot("RESULT").unwrap();
        assert_eq!(slot.slot.kind, SlotKind::Group);
        assert!(matches!(&slot.structure, StructureDef::Group(g) if g.name == "T_RESULT"));
    }

    #[test]
    fn test_build_rejects_unknown_datatype() {
        let yaml = SET.replace("type: SI", "type: XYZ");
        let set = parse_schema_set(&yaml).unwrap();
        let err = VersionSchemas::build(&set).unwrap_err();
        assert!(err.to_string().contains("unknown datatype 'XYZ'"));
    }

    #[test]
    fn test_build_rejects_self_nesting_group() {
        let yaml = SET.replace(
            "- { segment: OBX, required: true }",
            "- { segment: OBX, required: true }\n        - { group: T_RESULT, name: AGAIN }",
        );
        let set = parse_schema_set(&yaml).unwrap();
        let err = VersionSchemas::build(&set).unwrap_err();
        assert!(err.to_string().contains("Circular dependency"));
    }

    #[test]
    fn test_extend_resolves_against_base() {
        let base = VersionSchemas::build(&parse_schema_set(SET).unwrap()).unwrap();
        let ext = parse_schema_set(
            r#"
apiVersion: hl7tree.io/v1
kind: SchemaSet
metadata:
  name: site-extension
spec:
  version: "2.8.1"
  segments:
    - name: ZPI
      fields:
        - { name: Preferred Name, type: XPN }
  messages:
    - name: T_Z01
      slots:
        - { segment: PID, required: true }
        - { segment: ZPI }
"#,
        )
        .unwrap();

        let merged = base.extend(&ext).unwrap();
        assert!(merged.segment("ZPI").is_some());
        assert!(merged.message("T_T01").is_some());
        assert!(merged.message("T_Z01").is_some());
        assert!(base.segment("ZPI").is_none());
    }

    #[test]
    fn test_extend_rejects_redefinition() {
        let set = parse_schema_set(SET).unwrap();
        let base = VersionSchemas::build(&set).unwrap();
        let err = base.extend(&set).unwrap_err();
        assert!(err.to_string().contains("already defined"));
    }
}
