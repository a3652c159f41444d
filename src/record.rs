//! Record and patch types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque backend resource: field name to JSON value.
pub type Record = Map<String, Value>;

/// Sparse set of fields that should be sent in a partial update.
///
/// Every key in a patch was taken from the "updated" snapshot it was
/// computed from; an empty patch means no request is needed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch {
    fields: Record,
}

impl Patch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields carried by the patch.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns the value set for `field`, if any.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns true when `field` is part of the patch.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Iterates over the patched field names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Sets `field` to `value`, replacing an earlier entry.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Overwrites every patched field of `rec` in place.
    pub fn apply_to(&self, rec: &mut Record) {
        for (field, value) in &self.fields {
            rec.insert(field.clone(), value.clone());
        }
    }

    /// Borrows the patch body.
    pub fn as_record(&self) -> &Record {
        &self.fields
    }

    /// Consumes the patch, returning the request body.
    pub fn into_record(self) -> Record {
        self.fields
    }
}

impl From<Patch> for Value {
    fn from(patch: Patch) -> Self {
        Value::Object(patch.fields)
    }
}
