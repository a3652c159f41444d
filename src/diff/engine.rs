//! Minimal partial-update diffs.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::record::{Patch, Record};

use super::equality::values_equal;

/// Failure computing a diff.
#[derive(Debug, Error)]
pub enum DiffError {
    /// A snapshot was not a JSON object.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A typed snapshot failed to serialize.
    #[error("snapshot could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Computes the fields of `updated` that differ from `original`.
///
/// Only keys present in `updated` are considered; a field dropped from
/// `updated` never shows up in the patch. Both snapshots must be JSON
/// objects.
pub fn compute_changes(original: &Value, updated: &Value) -> Result<Patch, DiffError> {
    let original = as_object(original, "original")?;
    let updated = as_object(updated, "updated")?;
    Ok(diff_records(original, updated))
}

/// [`compute_changes`] over already-decoded records.
pub fn diff_records(original: &Record, updated: &Record) -> Patch {
    let mut patch = Patch::new();
    for (field, value) in updated {
        if !values_equal(original.get(field), Some(value)) {
            patch.set(field.clone(), value.clone());
        }
    }
    trace!(changed = patch.len(), considered = updated.len(), "computed patch");
    patch
}

/// Diffs two snapshots of the same declared type through their JSON form.
pub fn diff_typed<T: Serialize + ?Sized>(original: &T, updated: &T) -> Result<Patch, DiffError> {
    let original = serde_json::to_value(original)?;
    let updated = serde_json::to_value(updated)?;
    compute_changes(&original, &updated)
}

/// True when `patch` carries no fields and no request is needed.
pub fn is_empty_patch(patch: &Patch) -> bool {
    patch.is_empty()
}

fn as_object<'a>(value: &'a Value, which: &str) -> Result<&'a Record, DiffError> {
    value.as_object().ok_or_else(|| {
        DiffError::InvalidArgument(format!("{which} snapshot must be an object, got {}", kind(value)))
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
