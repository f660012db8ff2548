//! Opaque, field-addressable record payloads.

use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A record's business data, opaque to the engine.
///
/// The engine never interprets individual fields beyond name identity:
/// a payload is a schema-version tag plus a map of field name to CBOR
/// value. Field-level merging only compares values for equality, so the
/// engine needs no compile-time knowledge of the application's schema.
///
/// `manual_overrides` carries per-field flags set by the application at
/// edit time; the conflict resolver lets a flagged local field win over
/// a remote change that would otherwise take precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Application schema version this payload was written under.
    pub schema_version: u16,
    /// Field name to CBOR value.
    pub fields: BTreeMap<String, Value>,
    /// Fields the user explicitly pinned during a local edit.
    #[serde(default)]
    pub manual_overrides: BTreeSet<String>,
}

impl Payload {
    /// Creates an empty payload for the given schema version.
    pub fn new(schema_version: u16) -> Self {
        Self {
            schema_version,
            fields: BTreeMap::new(),
            manual_overrides: BTreeSet::new(),
        }
    }

    /// Sets a field, returning `self` for chaining.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Sets a text field, returning `self` for chaining.
    #[must_use]
    pub fn with_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(name, Value::Text(value.into()))
    }

    /// Sets an integer field, returning `self` for chaining.
    #[must_use]
    pub fn with_integer(self, name: impl Into<String>, value: i64) -> Self {
        self.with_field(name, Value::Integer(value.into()))
    }

    /// Sets or replaces a field in place.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Returns a field value, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Removes a field, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Returns true if no fields are set.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Iterates over field names in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Flags a field as a manual override.
    pub fn mark_override(&mut self, name: impl Into<String>) {
        self.manual_overrides.insert(name.into());
    }

    /// Returns true if the field carries a manual-override flag.
    pub fn is_override(&self, name: &str) -> bool {
        self.manual_overrides.contains(name)
    }

    /// Merges another payload's fields over this one.
    ///
    /// Fields present in `other` replace fields of the same name here;
    /// fields absent from `other` are kept. Override flags from `other`
    /// are unioned in. Used to apply a partial update.
    pub fn apply(&mut self, other: &Payload) {
        for (name, value) in &other.fields {
            self.fields.insert(name.clone(), value.clone());
        }
        for name in &other.manual_overrides {
            self.manual_overrides.insert(name.clone());
        }
        self.schema_version = self.schema_version.max(other.schema_version);
    }

    /// Returns the names of fields whose value differs from `base`.
    ///
    /// A field counts as changed when it was added, removed, or holds a
    /// different value than in `base`. Names are returned in sorted
    /// order, which keeps downstream merge decisions deterministic.
    pub fn changed_since(&self, base: &Payload) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (name, value) in &self.fields {
            if base.fields.get(name) != Some(value) {
                changed.insert(name.clone());
            }
        }
        for name in base.fields.keys() {
            if !self.fields.contains_key(name) {
                changed.insert(name.clone());
            }
        }
        changed
    }

    /// Returns true if `self` and `other` hold a different value for `name`.
    pub fn differs_on(&self, other: &Payload, name: &str) -> bool {
        self.fields.get(name) != other.fields.get(name)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Payload {
        Payload::new(1)
            .with_text("name", "north lot")
            .with_integer("capacity", 120)
    }

    #[test]
    fn set_and_get() {
        let payload = sample();
        assert_eq!(payload.get("name"), Some(&Value::Text("north lot".into())));
        assert_eq!(payload.len(), 2);
        assert!(!payload.is_empty());
    }

    #[test]
    fn override_flags() {
        let mut payload = sample();
        assert!(!payload.is_override("capacity"));

        payload.mark_override("capacity");
        assert!(payload.is_override("capacity"));
        assert!(!payload.is_override("name"));
    }

    #[test]
    fn apply_replaces_and_keeps() {
        let mut base = sample();
        let patch = Payload::new(1).with_integer("capacity", 90);

        base.apply(&patch);

        assert_eq!(base.get("capacity"), Some(&Value::Integer(90.into())));
        // Untouched field survives.
        assert_eq!(base.get("name"), Some(&Value::Text("north lot".into())));
    }

    #[test]
    fn changed_since_detects_add_remove_modify() {
        let base = sample();

        let mut edited = base.clone();
        edited.set("capacity", Value::Integer(90.into()));
        edited.set("notes", Value::Text("resurfaced".into()));
        edited.remove("name");

        let changed = edited.changed_since(&base);
        assert_eq!(
            changed.into_iter().collect::<Vec<_>>(),
            vec!["capacity".to_string(), "name".to_string(), "notes".to_string()]
        );
    }

    #[test]
    fn changed_since_empty_for_identical() {
        let base = sample();
        assert!(base.clone().changed_since(&base).is_empty());
    }

    #[test]
    fn differs_on() {
        let a = sample();
        let mut b = sample();
        b.set("capacity", Value::Integer(1.into()));

        assert!(a.differs_on(&b, "capacity"));
        assert!(!a.differs_on(&b, "name"));
        assert!(!a.differs_on(&b, "missing"));
    }
}
