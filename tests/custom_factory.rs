//! Tests for site extensions and alternative schema factories

use std::fs;
use std::sync::Arc;

use hl7tree::schema::loader::parse_schema_set;
use hl7tree::schema::resolve::VersionSchemas;
use hl7tree::{
    DataType, FieldDef, GroupDef, Hl7Error, LayeredFactory, Message, ModelClassFactory,
    PipeParser, Result, SchemaDefinition, SchemaRegistry, SegmentDef, TerserPath,
};
use hl7tree::{Extractor, Terser};
use tempfile::TempDir;

const SITE_EXTENSIONS: &str = r#"
apiVersion: hl7tree.io/v1
kind: SchemaSet
metadata:
  name: site-extensions
spec:
  version: "2.8.1"
  segments:
    - name: ZTR
      fields:
        - { name: Tracking Code, type: ST, required: true }
        - { name: Batch, type: ST }
        - { name: Station, type: ST }
    - name: ZMP
      fields:
        - { name: Adjustment, type: MOP }
  groups:
    - name: ZTR_Z01_NOTES
      slots:
        - { segment: NTE, required: true, repeating: true }
  messages:
    - name: ZTR_Z01
      slots:
        - { segment: MSH, required: true }
        - { segment: ZMP }
        - { segment: ZTR, required: true }
        - { group: ZTR_Z01_NOTES, name: NOTES, repeating: true }
"#;

fn extended_parser() -> PipeParser {
    let mut registry = SchemaRegistry::standard().unwrap();
    registry
        .register_set(&parse_schema_set(SITE_EXTENSIONS).unwrap())
        .unwrap();
    PipeParser::new(Arc::new(registry))
}

#[test]
fn test_truncated_segment_round_trips() {
    let parser = extended_parser();
    let text = "MSH|^~\\&|APP\rZTR|x\r";

    let message = parser.decode(text, "ZTR_Z01", "2.8.1").unwrap();
    let ztr = message.find(message.root(), "ZTR", 0).unwrap().unwrap();
    let segment = message.segment(ztr).unwrap();

    assert_eq!(segment.field_count(), 3);
    assert_eq!(segment.field_text(1).unwrap(), Some("x"));
    assert_eq!(segment.field(2, 0).unwrap(), None);
    assert_eq!(parser.encode(&message).unwrap(), text);
}

#[test]
fn test_fixed_arity_composite() {
    let parser = extended_parser();
    let message = parser
        .decode("MSH|^~\\&|APP\rZMP|AT^10.5^USD\rZTR|x\r", "ZTR_Z01", "2.8.1")
        .unwrap();

    let zmp = message.find(message.root(), "ZMP", 0).unwrap().unwrap();
    let value = message.segment(zmp).unwrap().field(1, 0).unwrap().unwrap();
    let mop = value.as_composite().unwrap();

    assert_eq!(mop.arity(), 3);
    assert_eq!(mop.component_at(0).unwrap().as_text(), Some("AT"));
    assert_eq!(mop.component_at(1).unwrap().as_text(), Some("10.5"));
    assert_eq!(mop.component_at(2).unwrap().as_text(), Some("USD"));
    assert!(matches!(
        mop.component_at(3),
        Err(Hl7Error::ComponentIndex {
            index: 3,
            arity: 3,
            ..
        })
    ));
}

#[test]
fn test_extension_groups() {
    let parser = extended_parser();
    let text = "MSH|^~\\&|APP\rZTR|x\rNTE|1||first\rNTE|2||second\r";

    let mut message = parser.decode(text, "ZTR_Z01", "2.8.1").unwrap();
    let root = message.root();
    assert_eq!(message.repetition_count(root, "NOTES").unwrap(), 1);
    let notes = message.find(root, "NOTES", 0).unwrap().unwrap();
    assert_eq!(message.repetition_count(notes, "NTE").unwrap(), 2);
    assert_eq!(
        message
            .extract(&TerserPath::parse("NOTES/NTE(1)-3").unwrap())
            .as_deref(),
        Some("second")
    );

    // an empty group repetition adds nothing to the wire text
    message.add(root, "NOTES").unwrap();
    assert_eq!(message.repetition_count(root, "NOTES").unwrap(), 2);
    assert_eq!(parser.encode(&message).unwrap(), text);
}

#[test]
fn test_load_extensions_from_directory() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("site.yaml"), SITE_EXTENSIONS).unwrap();
    fs::write(dir.path().join("README.txt"), "not a schema").unwrap();

    let mut registry = SchemaRegistry::standard().unwrap();
    assert_eq!(registry.load_dir(dir.path()).unwrap(), 1);

    assert!(registry.message("ZTR_Z01", "2.8.1").is_ok());
    assert!(registry.message("EHC_E12", "2.8.1").is_ok());
}

/// Factory with two hand-built structures and no YAML behind it.
struct TrackingFactory {
    header: Arc<SegmentDef>,
    detail: Arc<SegmentDef>,
    message: Arc<GroupDef>,
}

impl TrackingFactory {
    fn new() -> Self {
        let header = SegmentDef::new(
            "HDR",
            vec![
                FieldDef::new("Id", DataType::primitive("ST")).required(),
                FieldDef::new("Created", DataType::primitive("DTM")),
            ],
        );
        let detail = SegmentDef::new(
            "DET",
            vec![FieldDef::new("Line", DataType::primitive("ST")).repeating()],
        );
        let message = GroupDef::builder("TRK_T01")
            .segment(header.clone(), true, false)
            .segment(detail.clone(), false, true)
            .build()
            .unwrap();
        Self {
            header,
            detail,
            message,
        }
    }
}

impl ModelClassFactory for TrackingFactory {
    fn resolve(&self, name: &str, version: &str) -> Result<SchemaDefinition> {
        if version != "1.0" {
            return Err(Hl7Error::UnknownVersion(version.to_string()));
        }
        match name {
            "TRK_T01" => Ok(SchemaDefinition::Message(self.message.clone())),
            "HDR" => Ok(SchemaDefinition::Segment(self.header.clone())),
            "DET" => Ok(SchemaDefinition::Segment(self.detail.clone())),
            _ => Err(Hl7Error::UnknownStructure {
                name: name.to_string(),
                version: version.to_string(),
            }),
        }
    }
}

#[test]
fn test_custom_factory_backs_codec_and_tree() {
    let factory = TrackingFactory::new();
    let mut message = Message::new(&factory, "TRK_T01", "1.0").unwrap();
    {
        let mut terser = Terser::new(&mut message);
        terser.set("HDR-1", "T-9").unwrap();
        terser.set("DET-1", "a").unwrap();
        terser.set("DET-1(1)", "b").unwrap();
        terser.set("DET(1)-1", "c").unwrap();
    }

    let parser = PipeParser::new(Arc::new(factory));
    let text = parser.encode(&message).unwrap();
    assert_eq!(text, "HDR|T-9\rDET|a~b\rDET|c\r");

    let decoded = parser.decode(&text, "TRK_T01", "1.0").unwrap();
    assert!(decoded == message);
    assert!(matches!(
        parser.decode("HDR|T-9\rZZZ|1\r", "TRK_T01", "1.0"),
        Err(Hl7Error::UnknownStructure { .. })
    ));
}

#[test]
fn test_field_repetitions_cannot_skip() {
    let factory = TrackingFactory::new();
    let mut message = Message::new(&factory, "TRK_T01", "1.0").unwrap();

    let err = Terser::new(&mut message).set("DET-1(2)", "x").unwrap_err();
    assert!(matches!(
        err,
        Hl7Error::RepetitionGap {
            requested: 2,
            count: 0,
            ..
        }
    ));
    // the failed set does not leave an empty DET behind
    assert_eq!(message.repetition_count(message.root(), "DET").unwrap(), 0);
    assert_eq!(PipeParser::new(Arc::new(factory)).encode(&message).unwrap(), "");
}

#[test]
fn test_layered_factory_decodes_overlay_messages() {
    let base = Arc::new(SchemaRegistry::standard().unwrap());
    let zpi = SegmentDef::new(
        "ZPI",
        vec![FieldDef::new("Site Code", DataType::primitive("ST"))],
    );
    let message_def = GroupDef::builder("ZPI_Z01")
        .segment(base.segment("MSH", "2.8.1").unwrap(), true, false)
        .segment(zpi.clone(), false, true)
        .build()
        .unwrap();

    let mut schemas = VersionSchemas::empty("2.8.1");
    schemas.insert_segment(zpi).unwrap();
    schemas.insert_message(message_def).unwrap();
    let mut overlay = SchemaRegistry::new();
    overlay.register(schemas);

    let layered = Arc::new(LayeredFactory::new(Arc::new(overlay), base));
    let parser = PipeParser::new(layered.clone());

    let text = "MSH|^~\\&|APP\rZPI|site1\rZPI|site2\r";
    let message = parser.decode(text, "ZPI_Z01", "2.8.1").unwrap();
    assert_eq!(message.repetition_count(message.root(), "ZPI").unwrap(), 2);
    assert_eq!(parser.encode(&message).unwrap(), text);

    // standard structures still come from the base registry
    let ehc = Message::new(layered.as_ref(), "EHC_E12", "2.8.1").unwrap();
    assert_eq!(ehc.name(), "EHC_E12");
}
