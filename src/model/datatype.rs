//! Datatype instances: primitive scalars and fixed-arity composites.

use std::fmt;
use std::sync::Arc;

use crate::error::{Hl7Error, Result};
use crate::schema::{CompositeDef, DataType, PrimitiveDef};

/// A scalar value. `None` means the value is absent; setting an empty string
/// stores `None`, so "empty" and "absent" are the same state.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    datatype: Arc<PrimitiveDef>,
    value: Option<String>,
}

impl Primitive {
    pub fn new(datatype: Arc<PrimitiveDef>) -> Self {
        Self {
            datatype,
            value: None,
        }
    }

    pub fn datatype(&self) -> &Arc<PrimitiveDef> {
        &self.datatype
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        let value = value.into();
        self.value = if value.is_empty() { None } else { Some(value) };
    }

    pub fn clear(&mut self) {
        self.value = None;
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

/// An ordered tuple of exactly `arity` component values.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    def: Arc<CompositeDef>,
    components: Vec<Value>,
}

impl Composite {
    /// Default-initialize every declared component.
    pub fn new(def: Arc<CompositeDef>) -> Self {
        let components = def
            .components()
            .iter()
            .map(|c| Value::new(&c.datatype))
            .collect();
        Self { def, components }
    }

    pub fn def(&self) -> &Arc<CompositeDef> {
        &self.def
    }

    pub fn arity(&self) -> usize {
        self.def.arity()
    }

    pub fn components(&self) -> &[Value] {
        &self.components
    }

    /// Component at a 0-based position.
    pub fn component_at(&self, index: usize) -> Result<&Value> {
        let arity = self.arity();
        self.components
            .get(index)
            .ok_or_else(|| self.index_error(index, arity))
    }

    pub fn component_at_mut(&mut self, index: usize) -> Result<&mut Value> {
        let arity = self.arity();
        let err = self.index_error(index, arity);
        self.components.get_mut(index).ok_or(err)
    }

    /// Replace the component at `index`. The value's datatype must be
    /// compatible with the declared datatype of that position.
    pub fn set_component_at(&mut self, index: usize, value: Value) -> Result<()> {
        let declared = &self.def.component(index)?.datatype;
        let actual = value.datatype();
        if !declared.is_compatible(&actual) {
            return Err(Hl7Error::TypeMismatch {
                expected: declared.name().to_string(),
                actual: actual.name().to_string(),
            });
        }
        self.components[index] = value;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.components.iter().all(Value::is_empty)
    }

    fn index_error(&self, index: usize, arity: usize) -> Hl7Error {
        Hl7Error::ComponentIndex {
            datatype: self.def.name.clone(),
            index,
            arity,
        }
    }
}

/// A datatype instance held by a field repetition or a composite component.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Primitive(Primitive),
    Composite(Composite),
}

impl Value {
    /// Empty instance of a declared datatype.
    pub fn new(datatype: &DataType) -> Self {
        match datatype {
            DataType::Primitive(p) => Value::Primitive(Primitive::new(p.clone())),
            DataType::Composite(c) => Value::Composite(Composite::new(c.clone())),
        }
    }

    /// Primitive of the given type carrying `text`.
    pub fn text(datatype: &str, text: impl Into<String>) -> Self {
        let mut p = Primitive::new(Arc::new(PrimitiveDef {
            name: datatype.to_string(),
            table: None,
        }));
        p.set_value(text);
        Value::Primitive(p)
    }

    pub fn datatype(&self) -> DataType {
        match self {
            Value::Primitive(p) => DataType::Primitive(p.datatype.clone()),
            Value::Composite(c) => DataType::Composite(c.def.clone()),
        }
    }

    pub fn datatype_name(&self) -> &str {
        match self {
            Value::Primitive(p) => &p.datatype.name,
            Value::Composite(c) => &c.def.name,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Primitive(p) => p.is_empty(),
            Value::Composite(c) => c.is_empty(),
        }
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Value::Primitive(p) => Some(p),
            Value::Composite(_) => None,
        }
    }

    pub fn as_primitive_mut(&mut self) -> Option<&mut Primitive> {
        match self {
            Value::Primitive(p) => Some(p),
            Value::Composite(_) => None,
        }
    }

    pub fn as_composite(&self) -> Option<&Composite> {
        match self {
            Value::Composite(c) => Some(c),
            Value::Primitive(_) => None,
        }
    }

    pub fn as_composite_mut(&mut self) -> Option<&mut Composite> {
        match self {
            Value::Composite(c) => Some(c),
            Value::Primitive(_) => None,
        }
    }

    /// First primitive reached by descending through component 0.
    pub fn first_leaf(&self) -> Option<&Primitive> {
        match self {
            Value::Primitive(p) => Some(p),
            Value::Composite(c) => c.components.first().and_then(Value::first_leaf),
        }
    }

    pub fn first_leaf_mut(&mut self) -> Option<&mut Primitive> {
        match self {
            Value::Primitive(p) => Some(p),
            Value::Composite(c) => c.components.first_mut().and_then(Value::first_leaf_mut),
        }
    }

    /// Scalar reading of the value: the primitive's text, or the text of a
    /// composite's first leaf.
    pub fn as_text(&self) -> Option<&str> {
        self.first_leaf().and_then(Primitive::value)
    }

    /// Scalar write: sets the primitive, or the first leaf of a composite.
    pub fn set_text(&mut self, text: impl Into<String>) -> Result<()> {
        let name = self.datatype_name().to_string();
        let leaf = self.first_leaf_mut().ok_or(Hl7Error::ComponentIndex {
            datatype: name,
            index: 0,
            arity: 0,
        })?;
        leaf.set_value(text);
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Primitive(p) => write!(f, "{}", p.value().unwrap_or_default()),
            Value::Composite(c) => {
                let parts: Vec<String> = c.components.iter().map(|v| v.to_string()).collect();
                write!(f, "{}({})", c.def.name, parts.join(", "))
            }
        }
    }
}
