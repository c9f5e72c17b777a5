//! Segment instances: per-field repetition lists of datatype instances.

use std::sync::Arc;

use crate::error::{Hl7Error, Result};
use crate::model::datatype::Value;
use crate::schema::SegmentDef;

/// A segment instance. Fields are addressed by their 1-based HL7 number.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    def: Arc<SegmentDef>,
    fields: Vec<Vec<Value>>,
}

impl Segment {
    pub fn new(def: Arc<SegmentDef>) -> Self {
        let fields = vec![Vec::new(); def.field_count()];
        Self { def, fields }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &Arc<SegmentDef> {
        &self.def
    }

    pub fn field_count(&self) -> usize {
        self.def.field_count()
    }

    /// Current repetitions of a field. Never creates anything.
    pub fn field_repetitions(&self, index: usize) -> Result<&[Value]> {
        self.def.field(index)?;
        Ok(&self.fields[index - 1])
    }

    pub fn repetition_count(&self, index: usize) -> Result<usize> {
        Ok(self.field_repetitions(index)?.len())
    }

    /// Read-only access to one repetition; `None` when it does not exist.
    pub fn field(&self, index: usize, rep: usize) -> Result<Option<&Value>> {
        Ok(self.field_repetitions(index)?.get(rep))
    }

    /// Repetition `rep` of a field, creating it when `rep` is exactly one
    /// past the current count.
    ///
    /// This accessor mutates: asking for the next repetition appends a
    /// default-initialized instance. Asking further out is a
    /// `RepetitionGap` error.
    pub fn get_field(&mut self, index: usize, rep: usize) -> Result<&mut Value> {
        let count = self.repetition_count(index)?;
        if rep > count {
            return Err(Hl7Error::RepetitionGap {
                name: self.field_label(index),
                requested: rep,
                count,
            });
        }
        if rep == count {
            return self.add_field_repetition(index);
        }
        Ok(&mut self.fields[index - 1][rep])
    }

    /// Append a default-initialized repetition.
    pub fn add_field_repetition(&mut self, index: usize) -> Result<&mut Value> {
        let field = self.def.field(index)?;
        let reps = &mut self.fields[index - 1];
        if let Some(max) = field.max_reps {
            if reps.len() >= max {
                return Err(Hl7Error::MaxRepetitionExceeded {
                    segment: self.def.name.clone(),
                    field: index,
                    max,
                });
            }
        }
        reps.push(Value::new(&field.datatype));
        let last = reps.len() - 1;
        Ok(&mut reps[last])
    }

    /// Remove one repetition; later repetitions shift down.
    pub fn remove_field_repetition(&mut self, index: usize, rep: usize) -> Result<Value> {
        let count = self.repetition_count(index)?;
        if rep >= count {
            return Err(Hl7Error::IndexOutOfRange {
                name: self.field_label(index),
                index: rep,
                count,
            });
        }
        Ok(self.fields[index - 1].remove(rep))
    }

    pub fn clear_field(&mut self, index: usize) -> Result<()> {
        self.def.field(index)?;
        self.fields[index - 1].clear();
        Ok(())
    }

    /// Set repetition 0 of a field from text (first leaf for composites).
    pub fn set_field_text(&mut self, index: usize, text: impl Into<String>) -> Result<()> {
        self.get_field(index, 0)?.set_text(text)
    }

    /// Text of repetition 0 of a field, if present.
    pub fn field_text(&self, index: usize) -> Result<Option<&str>> {
        Ok(self.field(index, 0)?.and_then(Value::as_text))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.iter().flatten().all(Value::is_empty)
    }

    fn field_label(&self, index: usize) -> String {
        format!("{}-{}", self.def.name, index)
    }
}
