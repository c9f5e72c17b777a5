//! Codec configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

fn default_max_group_depth() -> usize {
    32
}

fn default_true() -> bool {
    true
}

/// Options controlling encode and decode.
///
/// ```yaml
/// maxGroupDepth: 16
/// acceptNewlineTerminators: true
/// trailingSegmentDelimiter: false
/// lenientRequired: true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecOptions {
    /// Deepest group nesting the decoder will open
    #[serde(default = "default_max_group_depth")]
    pub max_group_depth: usize,

    /// Accept `\n` and `\r\n` as segment terminators on decode
    #[serde(default = "default_true")]
    pub accept_newline_terminators: bool,

    /// Terminate the last segment with the segment delimiter on encode
    #[serde(default = "default_true")]
    pub trailing_segment_delimiter: bool,

    /// Let the decoder move past required slots that received no segment.
    /// When off, such a segment is reported as unexpected.
    #[serde(default = "default_true")]
    pub lenient_required: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            max_group_depth: default_max_group_depth(),
            accept_newline_terminators: true,
            trailing_segment_delimiter: true,
            lenient_required: true,
        }
    }
}

impl CodecOptions {
    /// Load options from a YAML file. Missing keys take their defaults.
    ///
    /// # Example
    /// ```ignore
    /// use hl7tree::CodecOptions;
    ///
    /// let options = CodecOptions::load_from_file("config/codec.yaml")?;
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CodecOptions::default();
        assert_eq!(options.max_group_depth, 32);
        assert!(options.accept_newline_terminators);
        assert!(options.trailing_segment_delimiter);
        assert!(options.lenient_required);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let options = CodecOptions::from_yaml_str("maxGroupDepth: 4").unwrap();
        assert_eq!(options.max_group_depth, 4);
        assert!(options.accept_newline_terminators);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codec.yaml");
        fs::write(&path, "trailingSegmentDelimiter: false\n").unwrap();

        let options = CodecOptions::load_from_file(&path).unwrap();
        assert!(!options.trailing_segment_delimiter);
        assert_eq!(options.max_group_depth, 32);
    }
}
