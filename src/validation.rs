//! Structural validation of a message tree.
//!
//! Reports what a receiver would reject: required slots or fields with no
//! content, too few field repetitions, and primitive values that do not fit
//! their datatype's lexical form. Table/terminology checks are not done.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::model::{Message, NodeId, Segment, Value};
use crate::schema::StructureDef;

static NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)$").expect("NM pattern is valid"));

static SEQUENCE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+$").expect("SI pattern is valid"));

static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}(\d{2}(\d{2})?)?$").expect("DT pattern is valid"));

static TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{2}(\d{2}(\d{2}(\.\d{1,4})?)?)?([+-]\d{4})?$").expect("TM pattern is valid")
});

static DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}(\d{2}(\d{2}(\d{2}(\d{2}(\d{2}(\.\d{1,4})?)?)?)?)?)?([+-]\d{4})?$")
        .expect("DTM pattern is valid")
});

fn pattern(datatype: &str) -> Option<&'static Regex> {
    match datatype {
        "NM" => Some(&*NUMERIC),
        "SI" => Some(&*SEQUENCE_ID),
        "DT" => Some(&*DATE),
        "TM" => Some(&*TIME),
        "DTM" => Some(&*DATE_TIME),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingSlot,
    MissingField,
    TooFewRepetitions,
    InvalidFormat,
}

/// One problem found in a message. `location` uses terser path syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub location: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Check every present group and segment of `message`.
pub fn validate(message: &Message) -> Result<Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    validate_group(message, message.root(), "", &mut issues)?;
    tracing::debug!(
        message = message.name(),
        issues = issues.len(),
        "Validated message"
    );
    Ok(issues)
}

fn validate_group(
    message: &Message,
    group: NodeId,
    prefix: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Result<()> {
    for (slot, reps) in message.slots(group)? {
        let name = &slot.slot.name;
        if slot.slot.required && reps.is_empty() {
            issues.push(ValidationIssue {
                kind: IssueKind::MissingSlot,
                location: format!("{}{}", prefix, name),
                message: format!("required {} '{}' is missing", slot.slot.kind, name),
            });
        }
        for (rep, id) in reps.iter().enumerate() {
            let step = if rep == 0 {
                format!("{}{}", prefix, name)
            } else {
                format!("{}{}({})", prefix, name, rep)
            };
            match &slot.structure {
                StructureDef::Segment(_) => {
                    validate_segment(message.segment(*id)?, &step, issues)?;
                }
                StructureDef::Group(_) => {
                    validate_group(message, *id, &format!("{}/", step), issues)?;
                }
            }
        }
    }
    Ok(())
}

fn validate_segment(
    segment: &Segment,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Result<()> {
    for field in segment.def().fields() {
        let reps = segment.field_repetitions(field.index)?;
        let present = reps.iter().filter(|v| !v.is_empty()).count();
        let at = format!("{}-{}", location, field.index);

        if field.required && present == 0 {
            issues.push(ValidationIssue {
                kind: IssueKind::MissingField,
                location: at.clone(),
                message: format!("required field '{}' is empty", field.name),
            });
        } else if present < field.min_reps {
            issues.push(ValidationIssue {
                kind: IssueKind::TooFewRepetitions,
                location: at.clone(),
                message: format!(
                    "field '{}' needs at least {} repetitions, has {}",
                    field.name, field.min_reps, present
                ),
            });
        }

        for (rep, value) in reps.iter().enumerate() {
            let at = if rep == 0 {
                at.clone()
            } else {
                format!("{}-{}({})", location, field.index, rep)
            };
            check_format(value, &at, issues);
        }
    }
    Ok(())
}

fn check_format(value: &Value, location: &str, issues: &mut Vec<ValidationIssue>) {
    match value {
        Value::Primitive(p) => {
            let Some(text) = p.value() else { return };
            let name = &p.datatype().name;
            if let Some(re) = pattern(name) {
                if !re.is_match(text) {
                    issues.push(ValidationIssue {
                        kind: IssueKind::InvalidFormat,
                        location: location.to_string(),
                        message: format!("'{}' is not a valid {} value", text, name),
                    });
                }
            }
        }
        Value::Composite(c) => {
            for (k, component) in c.components().iter().enumerate() {
                check_format(component, &format!("{}-{}", location, k + 1), issues);
            }
        }
    }
}
