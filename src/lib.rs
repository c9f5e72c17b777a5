//! # hl7tree: HL7 v2 Message Structure Engine
//!
//! hl7tree holds HL7 v2 messages as typed trees and converts them to and
//! from the pipe-delimited wire format. Message, group, segment and datatype
//! schemas come from YAML schema sets, so supporting a new version or a
//! site-specific Z-segment is a matter of configuration.
//!
//! ## Features
//!
//! - **Structure tree**: groups and segments addressed by slot name and
//!   repetition, with "accessed implies exists" creation on `get`
//! - **Fixed-arity composites**: components are always present; out of range
//!   access is an error, never a silent resize
//! - **Swappable schemas**: any [`ModelClassFactory`] can back the tree and
//!   the codec; [`LayeredFactory`] adds extensions on top of the standard set
//! - **Wire codec**: grammar-driven decoding with innermost-first
//!   backtracking, escape sequences and truncation of trailing empties
//! - **Terser paths**, structural validation and JSON rendering
//!
//! ## Example: Schema Set
//!
//! ```yaml
//! apiVersion: hl7tree.io/v1
//! kind: SchemaSet
//! metadata:
//!   name: site-extensions
//! spec:
//!   version: "2.8.1"
//!   segments:
//!     - name: ZPI
//!       fields:
//!         - { name: Site Code, type: ST, required: true }
//!         - { name: Charge, type: MOP }
//! ```
//!
//! ## Example: Decode, Edit, Encode
//!
//! ```ignore
//! use std::sync::Arc;
//! use hl7tree::{PipeParser, SchemaRegistry, Terser};
//!
//! let parser = PipeParser::new(Arc::new(SchemaRegistry::standard()?));
//! let mut message = parser.decode(&text, "EHC_E12", "2.8.1")?;
//!
//! let request = message.get_rep(message.root(), "REQUEST", 0)?;
//! let notes = message.repetition_count(request, "NTE")?;
//!
//! Terser::new(&mut message).set("IVC-1-1", "INV-2026-0042")?;
//! let wire = parser.encode(&message)?;
//! ```

pub mod codec;
pub mod error;
pub mod factory;
pub mod model;
pub mod schema;
pub mod serialization;
pub mod terser;
pub mod validation;

pub use codec::{CodecOptions, Delimiters, PipeParser};
pub use error::{Hl7Error, Result, WirePosition};
pub use factory::{
    standard_registry, LayeredFactory, ModelClassFactory, SchemaDefinition, SchemaRegistry,
};
pub use model::{Composite, Message, NodeId, Primitive, Segment, Value};
pub use schema::{
    CompositeDef, DataType, FieldDef, GroupDef, PrimitiveDef, SegmentDef, SlotKind, StructureDef,
};
pub use serialization::{to_json, NdjsonWriter};
pub use terser::{Extractor, Terser, TerserPath};
pub use validation::{validate, IssueKind, ValidationIssue};
