//! Pipe-delimited (ER7) wire codec.
//!
//! The wire form uses five delimiters, from coarsest to finest: segment,
//! field, repetition, component and sub-component, plus one escape character.
//! [`PipeParser`] encodes a [`Message`] tree to text and decodes text into a
//! tree for a given message structure and version.

pub mod decoder;
pub mod encoder;
pub mod escape;
pub mod options;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Hl7Error, Result};
use crate::factory::ModelClassFactory;
use crate::model::Message;

pub use options::CodecOptions;

/// The delimiter set of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Delimiters {
    pub segment: char,
    pub field: char,
    pub repetition: char,
    pub component: char,
    pub subcomponent: char,
    pub escape: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            segment: '\r',
            field: '|',
            repetition: '~',
            component: '^',
            subcomponent: '&',
            escape: '\\',
        }
    }
}

impl Delimiters {
    /// All six characters must be distinct, and none may be alphanumeric or a
    /// space (segment names and data would become ambiguous).
    pub fn validate(&self) -> Result<()> {
        let all = self.all();
        for (i, c) in all.iter().enumerate() {
            if c.is_alphanumeric() || *c == ' ' {
                return Err(Hl7Error::InvalidDelimiters(format!(
                    "'{}' cannot be used as a delimiter",
                    c.escape_default()
                )));
            }
            if all[i + 1..].contains(c) {
                return Err(Hl7Error::InvalidDelimiters(format!(
                    "'{}' is used for more than one delimiter",
                    c.escape_default()
                )));
            }
        }
        Ok(())
    }

    /// Value of MSH-2: component, repetition, escape, sub-component.
    pub fn encoding_characters(&self) -> String {
        [self.component, self.repetition, self.escape, self.subcomponent]
            .iter()
            .collect()
    }

    /// Read the field separator and encoding characters from the start of a
    /// header segment (`MSH|^~\&|...`). The segment delimiter is kept from
    /// `self`.
    pub fn from_header(&self, segment: &str) -> Option<Delimiters> {
        let mut chars = segment.chars().skip(3);
        let field = chars.next()?;
        let encoding: Vec<char> = chars.take_while(|c| *c != field).collect();
        if encoding.len() != 4 {
            return None;
        }
        Some(Delimiters {
            segment: self.segment,
            field,
            component: encoding[0],
            repetition: encoding[1],
            escape: encoding[2],
            subcomponent: encoding[3],
        })
    }

    fn all(&self) -> [char; 6] {
        [
            self.segment,
            self.field,
            self.repetition,
            self.component,
            self.subcomponent,
            self.escape,
        ]
    }
}

/// Encoder/decoder bound to a model class factory.
///
/// # Example
///
/// ```ignore
/// use hl7tree::{PipeParser, SchemaRegistry};
///
/// let registry = SchemaRegistry::standard()?;
/// let parser = PipeParser::new(std::sync::Arc::new(registry));
/// let message = parser.decode(text, "EHC_E12", "2.8.1")?;
/// let round_trip = parser.encode(&message)?;
/// ```
#[derive(Clone)]
pub struct PipeParser {
    factory: Arc<dyn ModelClassFactory>,
    options: CodecOptions,
    delimiters: Option<Delimiters>,
}

impl PipeParser {
    pub fn new(factory: Arc<dyn ModelClassFactory>) -> Self {
        Self {
            factory,
            options: CodecOptions::default(),
            delimiters: None,
        }
    }

    pub fn with_options(mut self, options: CodecOptions) -> Self {
        self.options = options;
        self
    }

    /// Delimiters to assume when decoding text that does not start with a
    /// header segment. Without this, the version's defaults apply.
    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = Some(delimiters);
        self
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    pub fn factory(&self) -> &Arc<dyn ModelClassFactory> {
        &self.factory
    }

    /// Encode a message with its own delimiters.
    pub fn encode(&self, message: &Message) -> Result<String> {
        encoder::encode(message, &self.options)
    }

    /// Decode `text` as message structure `root_name` of `version`.
    pub fn decode(&self, text: &str, root_name: &str, version: &str) -> Result<Message> {
        let delimiters = match &self.delimiters {
            Some(d) => d.clone(),
            None => self.factory.delimiters(version)?,
        };
        decoder::Decoder::new(self.factory.as_ref(), &self.options, delimiters)
            .decode(text, root_name, version)
    }
}
