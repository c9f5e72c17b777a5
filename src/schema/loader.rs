//! YAML schema set loader.
//!
//! Schema sets use a K8s-style envelope:
//!
//! ```yaml
//! apiVersion: hl7tree.io/v1
//! kind: SchemaSet
//! metadata:
//!   name: hl7-v2.8.1
//! spec:
//!   version: "2.8.1"
//!   composites:
//!     - name: MOP
//!       components:
//!         - { name: Money or Percentage Indicator, type: ID, table: 148 }
//!         - { name: Money or Percentage Quantity, type: NM }
//!         - { name: Monetary Denomination, type: ID, table: 913 }
//!   segments:
//!     - name: PSL
//!       fields:
//!         - { name: Provider Product/Service Line Item Number, type: EI, required: true }
//!   groups: []
//!   messages:
//!     - name: EHC_E12
//!       slots:
//!         - { segment: MSH, required: true }
//!         - { segment: PSL, repeating: true }
//! ```
//!
//! The loader only parses and checks the document's own consistency. Name
//! resolution happens in [`crate::schema::resolve`].

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::Delimiters;
use crate::error::{Hl7Error, Result};

pub const API_VERSION: &str = "hl7tree.io/v1";
pub const KIND: &str = "SchemaSet";

/// Schema set document (K8s-style).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSetV1 {
    pub api_version: String,
    pub kind: String,
    pub metadata: MetadataV1,
    pub spec: SchemaSpecV1,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataV1 {
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSpecV1 {
    /// HL7 version string, e.g. "2.8.1"
    pub version: String,

    /// Version-wide default delimiters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Delimiters>,

    /// Extra primitive datatype names beyond the standard ones
    #[serde(default)]
    pub primitives: Vec<String>,

    #[serde(default)]
    pub composites: Vec<CompositeV1>,

    #[serde(default)]
    pub segments: Vec<SegmentV1>,

    #[serde(default)]
    pub groups: Vec<GroupV1>,

    #[serde(default)]
    pub messages: Vec<GroupV1>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompositeV1 {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub components: Vec<ComponentV1>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComponentV1 {
    pub name: String,
    #[serde(rename = "type")]
    pub datatype: String,
    #[serde(default)]
    pub table: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SegmentV1 {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldV1>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldV1 {
    pub name: String,
    #[serde(rename = "type")]
    pub datatype: String,
    #[serde(default)]
    pub table: Option<u32>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub repeating: bool,
    #[serde(default)]
    pub min_reps: Option<usize>,
    #[serde(default)]
    pub max_reps: Option<usize>,
}

/// Group or message declaration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupV1 {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub slots: Vec<SlotV1>,
}

/// Exactly one of `segment` / `group` must be set. `name` overrides the slot
/// name, which otherwise defaults to the structure name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlotV1 {
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub repeating: bool,
}

impl SlotV1 {
    /// Name of the referenced segment or group.
    pub fn structure(&self) -> &str {
        self.segment
            .as_deref()
            .or(self.group.as_deref())
            .unwrap_or_default()
    }

    pub fn slot_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.structure())
    }
}

/// Parse a schema set from YAML text and check its envelope and shape.
pub fn parse_schema_set(yaml: &str) -> Result<SchemaSetV1> {
    let set: SchemaSetV1 = serde_yaml::from_str(yaml)?;
    validate_schema_set(&set)?;
    Ok(set)
}

/// Load a single schema set from a YAML file.
///
/// # Example
///
/// ```ignore
/// use hl7tree::schema::loader::load_schema_set;
///
/// let set = load_schema_set("config/schemas/v2.8.1.yaml")?;
/// assert_eq!(set.spec.version, "2.8.1");
/// ```
pub fn load_schema_set<P: AsRef<Path>>(path: P) -> Result<SchemaSetV1> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    parse_schema_set(&contents).map_err(|e| match e {
        Hl7Error::InvalidSchema(msg) => {
            Hl7Error::InvalidSchema(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Load every `.yaml` / `.yml` schema set in a directory, sorted by file name.
pub fn load_schema_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<SchemaSetV1>> {
    let dir_path = dir.as_ref();

    if !dir_path.is_dir() {
        return Err(Hl7Error::InvalidSchema(format!(
            "Schema directory does not exist: {}",
            dir_path.display()
        )));
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir_path)? {
        let path = entry?.path();
        if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                paths.push(path);
            }
        }
    }
    paths.sort();

    paths.iter().map(load_schema_set).collect()
}

/// Check envelope fields and per-declaration shape.
///
/// Checks for:
/// - Supported apiVersion and kind
/// - Non-empty names, unique per namespace
/// - Slots referencing exactly one of segment/group
pub fn validate_schema_set(set: &SchemaSetV1) -> Result<()> {
    if set.api_version != API_VERSION {
        return Err(Hl7Error::InvalidSchema(format!(
            "Unsupported apiVersion '{}', expected '{}'",
            set.api_version, API_VERSION
        )));
    }
    if set.kind != KIND {
        return Err(Hl7Error::InvalidSchema(format!(
            "Unsupported kind '{}', expected '{}'",
            set.kind, KIND
        )));
    }

    let spec = &set.spec;
    if spec.version.trim().is_empty() {
        return Err(Hl7Error::InvalidSchema(
            "Schema set version cannot be empty".to_string(),
        ));
    }

    check_unique("composite", spec.composites.iter().map(|c| c.name.as_str()))?;
    check_unique("segment", spec.segments.iter().map(|s| s.name.as_str()))?;
    check_unique(
        "group or message",
        spec.groups
            .iter()
            .chain(spec.messages.iter())
            .map(|g| g.name.as_str()),
    )?;

    for composite in &spec.composites {
        if composite.components.is_empty() {
            return Err(Hl7Error::InvalidSchema(format!(
                "Composite '{}' has no components",
                composite.name
            )));
        }
    }

    for segment in &spec.segments {
        if !is_valid_segment_name(&segment.name) {
            return Err(Hl7Error::InvalidSchema(format!(
                "Invalid segment name '{}': expected three uppercase letters or digits",
                segment.name
            )));
        }
        for field in &segment.fields {
            if let (Some(min), Some(max)) = (field.min_reps, field.max_reps) {
                if min > max {
                    return Err(Hl7Error::InvalidSchema(format!(
                        "Field '{}' of segment '{}' has minReps {} above maxReps {}",
                        field.name, segment.name, min, max
                    )));
                }
            }
        }
    }

    for group in spec.groups.iter().chain(spec.messages.iter()) {
        for slot in &group.slots {
            match (&slot.segment, &slot.group) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(Hl7Error::InvalidSchema(format!(
                        "Slot in '{}' must reference exactly one of segment or group",
                        group.name
                    )))
                }
            }
        }
    }

    Ok(())
}

/// Segment names are three characters: an uppercase letter followed by
/// uppercase letters or digits.
pub fn is_valid_segment_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 3
        && bytes[0].is_ascii_uppercase()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

fn check_unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(Hl7Error::InvalidSchema(format!("{} name cannot be empty", what)));
        }
        if !seen.insert(name) {
            return Err(Hl7Error::InvalidSchema(format!(
                "Duplicate {} '{}'",
                what, name
            )));
        }
    }
    Ok(())
}
