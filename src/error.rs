//! Error type shared by the schema, tree and codec layers.
//!
//! Every structural violation (unknown name, bad index, repetition gap) is
//! surfaced to the caller. Nothing in this crate recovers silently or retries.

use std::fmt;
use thiserror::Error;

/// Location inside a wire-format message, used to make decode and encode
/// failures diagnosable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WirePosition {
    /// 1-based ordinal of the segment within the message
    pub segment_number: usize,
    /// Segment name token, if it was read
    pub segment: String,
    /// 1-based field number
    pub field: Option<usize>,
    /// 0-based field repetition
    pub repetition: Option<usize>,
    /// 1-based component number
    pub component: Option<usize>,
    /// 1-based sub-component number
    pub subcomponent: Option<usize>,
}

impl WirePosition {
    pub fn segment(segment_number: usize, segment: impl Into<String>) -> Self {
        Self {
            segment_number,
            segment: segment.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, field: usize) -> Self {
        self.field = Some(field);
        self
    }

    pub fn with_repetition(mut self, repetition: usize) -> Self {
        self.repetition = Some(repetition);
        self
    }

    pub fn with_component(mut self, component: usize) -> Self {
        self.component = Some(component);
        self
    }

    pub fn with_subcomponent(mut self, subcomponent: usize) -> Self {
        self.subcomponent = Some(subcomponent);
        self
    }
}

impl fmt::Display for WirePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segment.is_empty() {
            write!(f, "segment #{}", self.segment_number)?;
        } else {
            write!(f, "segment #{} ({})", self.segment_number, self.segment)?;
        }
        if let Some(field) = self.field {
            write!(f, ", field {}", field)?;
        }
        if let Some(rep) = self.repetition {
            write!(f, ", repetition {}", rep)?;
        }
        if let Some(component) = self.component {
            write!(f, ", component {}", component)?;
        }
        if let Some(sub) = self.subcomponent {
            write!(f, ", sub-component {}", sub)?;
        }
        Ok(())
    }
}

/// Errors raised by the hl7tree engine.
#[derive(Error, Debug)]
pub enum Hl7Error {
    #[error("'{name}' is not a slot of structure '{structure}'")]
    UnknownStructureName { structure: String, name: String },

    #[error("No schema registered for version '{0}'")]
    UnknownVersion(String),

    #[error("Structure '{name}' is not defined for version '{version}'")]
    UnknownStructure { name: String, version: String },

    #[error("Slot '{name}' does not repeat and already holds an instance")]
    RepeatingNotAllowed { name: String },

    #[error("Cannot access repetition {requested} of '{name}': only {count} exist")]
    RepetitionGap {
        name: String,
        requested: usize,
        count: usize,
    },

    #[error("Field {field} of segment '{segment}' allows at most {max} repetitions")]
    MaxRepetitionExceeded {
        segment: String,
        field: usize,
        max: usize,
    },

    #[error("Element {index} doesn't exist in {arity} element {datatype} composite")]
    ComponentIndex {
        datatype: String,
        index: usize,
        arity: usize,
    },

    #[error("Segment '{segment}' has {count} fields, field {index} does not exist")]
    FieldIndex {
        segment: String,
        index: usize,
        count: usize,
    },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Segment '{segment}' declares {declared} fields but the text carries {found} at {position}")]
    SegmentOverflow {
        segment: String,
        declared: usize,
        found: usize,
        position: WirePosition,
    },

    #[error("Malformed wire text at {position}: {reason}")]
    MalformedWireText {
        position: WirePosition,
        reason: String,
    },

    #[error("Segment '{name}' is not expected at {position}")]
    UnexpectedSegment { name: String, position: WirePosition },

    #[error("Cannot encode character U+{code:04X} at {position}")]
    UnescapableCharacter { code: u32, position: WirePosition },

    #[error("Cannot encode value at {position}: {reason}")]
    UnencodableValue {
        position: WirePosition,
        reason: String,
    },

    #[error("Group nesting exceeds the configured maximum depth of {max}")]
    NestingTooDeep { max: usize },

    #[error("Instance not found in '{name}'")]
    NotFound { name: String },

    #[error("Index {index} out of range for '{name}' ({count} repetitions)")]
    IndexOutOfRange {
        name: String,
        index: usize,
        count: usize,
    },

    #[error("Invalid delimiters: {0}")]
    InvalidDelimiters(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Hl7Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_display_full() {
        let pos = WirePosition::segment(3, "IVC")
            .with_field(2)
            .with_repetition(0)
            .with_component(1);

        assert_eq!(
            pos.to_string(),
            "segment #3 (IVC), field 2, repetition 0, component 1"
        );
    }

    #[test]
    fn test_position_display_unnamed() {
        let pos = WirePosition::segment(1, "");
        assert_eq!(pos.to_string(), "segment #1");
    }

    #[test]
    fn test_component_index_message() {
        let err = Hl7Error::ComponentIndex {
            datatype: "MOP".to_string(),
            index: 3,
            arity: 3,
        };
        assert_eq!(err.to_string(), "Element 3 doesn't exist in 3 element MOP composite");
    }
}
