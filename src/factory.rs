//! Model class factory: resolves `(structure name, version)` to a schema.
//!
//! The tree and the codec only ever see the [`ModelClassFactory`] trait, so a
//! custom factory (extension segments, site-specific message structures) can
//! stand in for the standard one. [`SchemaRegistry`] is the YAML-backed
//! implementation; [`LayeredFactory`] puts one factory in front of another.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::codec::Delimiters;
use crate::error::{Hl7Error, Result};
use crate::schema::loader::{load_schema_dir, load_schema_set, parse_schema_set, SchemaSetV1};
use crate::schema::resolve::VersionSchemas;
use crate::schema::{CompositeDef, GroupDef, SegmentDef};

/// Built-in abridged v2.8.1 schema set.
pub const STANDARD_SCHEMA_YAML: &str = include_str!("../config/schemas/v2.8.1.yaml");

static STANDARD: Lazy<std::result::Result<Arc<SchemaRegistry>, String>> = Lazy::new(|| {
    SchemaRegistry::from_yaml(STANDARD_SCHEMA_YAML)
        .map(Arc::new)
        .map_err(|e| e.to_string())
});

/// Shared registry holding the built-in schema set.
pub fn standard_registry() -> Result<Arc<SchemaRegistry>> {
    STANDARD
        .as_ref()
        .map(Arc::clone)
        .map_err(|e| Hl7Error::InvalidSchema(e.clone()))
}

/// A resolved schema of one of the four kinds a factory can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDefinition {
    Segment(Arc<SegmentDef>),
    Group(Arc<GroupDef>),
    Composite(Arc<CompositeDef>),
    Message(Arc<GroupDef>),
}

impl SchemaDefinition {
    pub fn name(&self) -> &str {
        match self {
            SchemaDefinition::Segment(s) => &s.name,
            SchemaDefinition::Group(g) | SchemaDefinition::Message(g) => &g.name,
            SchemaDefinition::Composite(c) => &c.name,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SchemaDefinition::Segment(_) => "segment",
            SchemaDefinition::Group(_) => "group",
            SchemaDefinition::Composite(_) => "composite",
            SchemaDefinition::Message(_) => "message",
        }
    }

    fn mismatch(&self, expected: &str) -> Hl7Error {
        Hl7Error::TypeMismatch {
            expected: expected.to_string(),
            actual: self.kind().to_string(),
        }
    }
}

/// Source of schema definitions.
///
/// Implementations must be deterministic: the same `(name, version)` always
/// resolves to the same definition. Definitions are immutable and shared.
///
/// # Example
///
/// ```ignore
/// use hl7tree::{Message, SchemaRegistry};
///
/// let registry = SchemaRegistry::standard()?;
/// let mut message = Message::new(&registry, "EHC_E12", "2.8.1")?;
/// ```
pub trait ModelClassFactory: Send + Sync {
    /// Resolve `name` for `version`.
    ///
    /// Fails with `UnknownVersion` when nothing is registered for `version`
    /// and `UnknownStructure` when `name` is not defined there.
    fn resolve(&self, name: &str, version: &str) -> Result<SchemaDefinition>;

    /// Default delimiters of `version`.
    fn delimiters(&self, _version: &str) -> Result<Delimiters> {
        Ok(Delimiters::default())
    }

    fn segment(&self, name: &str, version: &str) -> Result<Arc<SegmentDef>> {
        match self.resolve(name, version)? {
            SchemaDefinition::Segment(s) => Ok(s),
            other => Err(other.mismatch("segment")),
        }
    }

    fn group(&self, name: &str, version: &str) -> Result<Arc<GroupDef>> {
        match self.resolve(name, version)? {
            SchemaDefinition::Group(g) | SchemaDefinition::Message(g) => Ok(g),
            other => Err(other.mismatch("group")),
        }
    }

    fn composite(&self, name: &str, version: &str) -> Result<Arc<CompositeDef>> {
        match self.resolve(name, version)? {
            SchemaDefinition::Composite(c) => Ok(c),
            other => Err(other.mismatch("composite")),
        }
    }

    fn message(&self, name: &str, version: &str) -> Result<Arc<GroupDef>> {
        match self.resolve(name, version)? {
            SchemaDefinition::Message(m) => Ok(m),
            other => Err(other.mismatch("message")),
        }
    }
}

/// Schema sets indexed by version.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    versions: HashMap<String, Arc<VersionSchemas>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in schema set.
    pub fn standard() -> Result<Self> {
        Self::from_yaml(STANDARD_SCHEMA_YAML)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut registry = Self::new();
        registry.register_set(&parse_schema_set(yaml)?)?;
        Ok(registry)
    }

    /// Add a resolved version, replacing any previous one.
    pub fn register(&mut self, schemas: VersionSchemas) {
        tracing::info!(version = %schemas.version, "Registered schemas");
        self.versions
            .insert(schemas.version.clone(), Arc::new(schemas));
    }

    /// Resolve a schema set and merge it into its version. The set may refer
    /// to anything already registered for that version.
    pub fn register_set(&mut self, set: &SchemaSetV1) -> Result<()> {
        let version = &set.spec.version;
        let schemas = match self.versions.get(version) {
            Some(existing) => existing.extend(set)?,
            None => VersionSchemas::build(set)?,
        };
        tracing::info!(
            name = %set.metadata.name,
            version = %version,
            "Loaded schema set"
        );
        self.register(schemas);
        Ok(())
    }

    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let set = load_schema_set(path)?;
        self.register_set(&set)
    }

    /// Load every schema set in a directory, in file name order.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let sets = load_schema_dir(dir)?;
        for set in &sets {
            self.register_set(set)?;
        }
        Ok(sets.len())
    }

    pub fn versions(&self) -> Vec<&str> {
        let mut versions: Vec<&str> = self.versions.keys().map(String::as_str).collect();
        versions.sort_unstable();
        versions
    }

    pub fn version(&self, version: &str) -> Result<&Arc<VersionSchemas>> {
        self.versions
            .get(version)
            .ok_or_else(|| Hl7Error::UnknownVersion(version.to_string()))
    }
}

impl ModelClassFactory for SchemaRegistry {
    fn resolve(&self, name: &str, version: &str) -> Result<SchemaDefinition> {
        let schemas = self.version(version)?;
        // message names shadow group names, segments shadow composites
        if let Some(m) = schemas.message(name) {
            return Ok(SchemaDefinition::Message(m.clone()));
        }
        if let Some(g) = schemas.group(name) {
            return Ok(SchemaDefinition::Group(g.clone()));
        }
        if let Some(s) = schemas.segment(name) {
            return Ok(SchemaDefinition::Segment(s.clone()));
        }
        if let Some(c) = schemas.composite(name) {
            return Ok(SchemaDefinition::Composite(c.clone()));
        }
        Err(Hl7Error::UnknownStructure {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    fn delimiters(&self, version: &str) -> Result<Delimiters> {
        Ok(self.version(version)?.delimiters.clone())
    }

    fn segment(&self, name: &str, version: &str) -> Result<Arc<SegmentDef>> {
        lookup(self.version(version)?.segment(name), name, version)
    }

    fn group(&self, name: &str, version: &str) -> Result<Arc<GroupDef>> {
        let schemas = self.version(version)?;
        let found = schemas.group(name).or_else(|| schemas.message(name));
        lookup(found, name, version)
    }
}

fn lookup<T>(found: Option<&Arc<T>>, name: &str, version: &str) -> Result<Arc<T>> {
    found.cloned().ok_or_else(|| Hl7Error::UnknownStructure {
        name: name.to_string(),
        version: version.to_string(),
    })
}

/// Two factories stacked: `overlay` is asked first, `base` answers whatever
/// the overlay does not define.
#[derive(Clone)]
pub struct LayeredFactory {
    overlay: Arc<dyn ModelClassFactory>,
    base: Arc<dyn ModelClassFactory>,
}

impl LayeredFactory {
    pub fn new(overlay: Arc<dyn ModelClassFactory>, base: Arc<dyn ModelClassFactory>) -> Self {
        Self { overlay, base }
    }
}

impl ModelClassFactory for LayeredFactory {
    fn resolve(&self, name: &str, version: &str) -> Result<SchemaDefinition> {
        match self.overlay.resolve(name, version) {
            Err(Hl7Error::UnknownStructure { .. }) | Err(Hl7Error::UnknownVersion(_)) => {
                self.base.resolve(name, version)
            }
            other => other,
        }
    }

    fn delimiters(&self, version: &str) -> Result<Delimiters> {
        match self.overlay.delimiters(version) {
            Err(Hl7Error::UnknownVersion(_)) => self.base.delimiters(version),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OVERLAY: &str = r#"
apiVersion: hl7tree.io/v1
kind: SchemaSet
metadata:
  name: site-extensions
spec:
  version: "2.8.1"
  segments:
    - name: ZPI
      fields:
        - name: Site Code
          type: ST
  messages:
    - name: ZPI_Z01
      slots:
        - segment: MSH
          required: true
        - segment: ZPI
          repeating: true
"#;

    #[test]
    fn test_standard_registry_resolves_kinds() {
        let registry = SchemaRegistry::standard().unwrap();

        assert!(matches!(
            registry.resolve("EHC_E12", "2.8.1").unwrap(),
            SchemaDefinition::Message(_)
        ));
        assert!(matches!(
            registry.resolve("EHC_E12_REQUEST", "2.8.1").unwrap(),
            SchemaDefinition::Group(_)
        ));
        assert!(matches!(
            registry.resolve("IVC", "2.8.1").unwrap(),
            SchemaDefinition::Segment(_)
        ));
        let mop = registry.composite("MOP", "2.8.1").unwrap();
        assert_eq!(mop.arity(), 3);
    }

    #[test]
    fn test_unknown_version_and_structure() {
        let registry = SchemaRegistry::standard().unwrap();
        assert!(matches!(
            registry.resolve("MSH", "9.9"),
            Err(Hl7Error::UnknownVersion(_))
        ));
        assert!(matches!(
            registry.resolve("ZZZ", "2.8.1"),
            Err(Hl7Error::UnknownStructure { .. })
        ));
        assert!(matches!(
            registry.segment("ZZZ", "2.8.1"),
            Err(Hl7Error::UnknownStructure { .. })
        ));
    }

    #[test]
    fn test_typed_lookup_kind_mismatch() {
        let registry = SchemaRegistry::standard().unwrap();
        assert!(matches!(
            registry.message("IVC", "2.8.1"),
            Err(Hl7Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let registry = SchemaRegistry::standard().unwrap();
        let a = registry.segment("IVC", "2.8.1").unwrap();
        let b = registry.segment("IVC", "2.8.1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_register_set_extends_version() {
        let mut registry = SchemaRegistry::standard().unwrap();
        registry.register_set(&parse_schema_set(OVERLAY).unwrap()).unwrap();

        let message = registry.message("ZPI_Z01", "2.8.1").unwrap();
        assert_eq!(message.slot_count(), 2);
        // existing definitions are still there
        assert!(registry.segment("MSH", "2.8.1").is_ok());
    }

    #[test]
    fn test_layered_factory_falls_back() {
        let base = Arc::new(SchemaRegistry::standard().unwrap());
        let mut overlay = SchemaRegistry::new();
        let mut schemas = VersionSchemas::empty("2.8.1");
        schemas
            .insert_segment(SegmentDef::new("ZPI", Vec::new()))
            .unwrap();
        overlay.register(schemas);

        let layered = LayeredFactory::new(Arc::new(overlay), base);
        assert!(layered.segment("ZPI", "2.8.1").is_ok());
        assert!(layered.segment("MSH", "2.8.1").is_ok());
        assert!(matches!(
            layered.resolve("ZZZ", "2.8.1"),
            Err(Hl7Error::UnknownStructure { .. })
        ));
        assert!(matches!(
            layered.resolve("MSH", "2.3"),
            Err(Hl7Error::UnknownVersion(_))
        ));
    }

    #[test]
    fn test_shared_standard_registry() {
        let a = standard_registry().unwrap();
        let b = standard_registry().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.versions(), vec!["2.8.1"]);
    }
}
