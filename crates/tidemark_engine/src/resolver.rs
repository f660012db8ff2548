//! Deterministic conflict resolution.
//!
//! `resolve` is a pure function over the two payloads and their common
//! ancestor: same input, same output, no hidden state. Rules apply in
//! strict order; a later rule only runs for fields the earlier rules
//! left undecided.
//!
//! 1. Changes to disjoint fields merge field-by-field: remote wins for
//!    fields only it changed, local wins for fields only it changed.
//! 2. A contested user-editable field keeps the local value (most
//!    recent user intent).
//! 3. A contested business-critical field takes the remote value, to
//!    avoid diverging financial state, unless the local edit carried a
//!    manual-override flag for that field.
//! 4. A contested field with no classification cannot be disambiguated
//!    (e.g. two individually valid status transitions); the whole
//!    record goes to manual review.

use std::collections::BTreeMap;
use tidemark_protocol::{Payload, ResolutionStrategy};

/// Merge class of a business field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    /// Free text, names, notes: local wins when contested.
    UserEditable,
    /// Fees, quantities, and other fields where divergence is costly:
    /// remote wins when contested, unless locally overridden.
    Critical,
}

/// Per-field merge classification supplied by the application.
///
/// Fields left unclassified fall through to manual review when both
/// sides change them, which is the safe default for state-machine
/// fields like statuses.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    classes: BTreeMap<String, FieldClass>,
}

impl FieldCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies a field as user-editable.
    #[must_use]
    pub fn with_user_editable(mut self, name: impl Into<String>) -> Self {
        self.classes.insert(name.into(), FieldClass::UserEditable);
        self
    }

    /// Classifies a field as business-critical.
    #[must_use]
    pub fn with_critical(mut self, name: impl Into<String>) -> Self {
        self.classes.insert(name.into(), FieldClass::Critical);
        self
    }

    /// Returns a field's class, if classified.
    pub fn classify(&self, name: &str) -> Option<FieldClass> {
        self.classes.get(name).copied()
    }
}

/// Input to [`resolve`].
#[derive(Debug, Clone, Copy)]
pub struct ConflictInput<'a> {
    /// Payload both sides last agreed on; `None` if never synced, in
    /// which case every field counts as changed on both sides.
    pub base: Option<&'a Payload>,
    /// The local payload with unsynced changes.
    pub local: &'a Payload,
    /// The remote's current payload.
    pub remote: &'a Payload,
    /// Field classifications.
    pub catalog: &'a FieldCatalog,
}

/// Outcome of conflict resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Auto-resolved; `payload` is the converged record data.
    Merged {
        /// The merged payload.
        payload: Payload,
        /// Which rule dominated, for reporting.
        strategy: ResolutionStrategy,
    },
    /// Not auto-resolvable; must persist for an operator.
    ManualReview {
        /// The fields neither rule could disambiguate, sorted.
        contested: Vec<String>,
    },
}

/// Resolves a local/remote divergence against their common ancestor.
pub fn resolve(input: &ConflictInput<'_>) -> Resolution {
    let empty = Payload::new(0);
    let base = input.base.unwrap_or(&empty);

    let local_changed = input.local.changed_since(base);
    let remote_changed = input.remote.changed_since(base);

    // Remote is the baseline; local-won fields overlay it below.
    let mut merged = input.remote.clone();
    merged.schema_version = input.local.schema_version.max(input.remote.schema_version);
    merged.manual_overrides = input.local.manual_overrides.clone();

    // Rule 1: fields only the local side changed.
    for field in &local_changed {
        if remote_changed.contains(field) {
            continue;
        }
        match input.local.get(field) {
            Some(value) => merged.set(field.clone(), value.clone()),
            None => {
                merged.remove(field);
            }
        }
    }

    // Rules 2-4: fields both sides changed.
    let mut unresolved = Vec::new();
    let mut local_won = 0usize;
    let mut remote_won = 0usize;

    for field in local_changed.intersection(&remote_changed) {
        if !input.local.differs_on(input.remote, field) {
            // Both sides arrived at the same value; nothing contested.
            continue;
        }
        match input.catalog.classify(field) {
            Some(FieldClass::UserEditable) => {
                take_local(&mut merged, input.local, field);
                local_won += 1;
            }
            Some(FieldClass::Critical) => {
                if input.local.is_override(field) {
                    take_local(&mut merged, input.local, field);
                    local_won += 1;
                } else {
                    remote_won += 1;
                }
            }
            None => unresolved.push(field.clone()),
        }
    }

    if !unresolved.is_empty() {
        return Resolution::ManualReview {
            contested: unresolved,
        };
    }

    let strategy = match (local_won, remote_won) {
        (0, 0) => ResolutionStrategy::FieldMerge,
        (_, 0) => ResolutionStrategy::LocalWins,
        (0, _) => ResolutionStrategy::RemoteWins,
        _ => ResolutionStrategy::FieldMerge,
    };

    Resolution::Merged {
        payload: merged,
        strategy,
    }
}

fn take_local(merged: &mut Payload, local: &Payload, field: &str) {
    match local.get(field) {
        Some(value) => merged.set(field.to_string(), value.clone()),
        None => {
            merged.remove(field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::value::Value;

    fn catalog() -> FieldCatalog {
        FieldCatalog::new()
            .with_user_editable("notes")
            .with_user_editable("driver_name")
            .with_critical("fee")
    }

    fn base() -> Payload {
        Payload::new(1)
            .with_text("notes", "original")
            .with_text("driver_name", "unknown")
            .with_integer("fee", 100)
            .with_text("status", "open")
    }

    fn resolve_triple(base: &Payload, local: &Payload, remote: &Payload) -> Resolution {
        let catalog = catalog();
        resolve(&ConflictInput {
            base: Some(base),
            local,
            remote,
            catalog: &catalog,
        })
    }

    #[test]
    fn disjoint_changes_merge_field_by_field() {
        let base = base();
        let mut local = base.clone();
        local.set("notes", Value::Text("local note".into()));
        let mut remote = base.clone();
        remote.set("fee", Value::Integer(250.into()));

        let resolution = resolve_triple(&base, &local, &remote);
        let Resolution::Merged { payload, strategy } = resolution else {
            panic!("expected merge");
        };

        assert_eq!(strategy, ResolutionStrategy::FieldMerge);
        assert_eq!(payload.get("notes"), Some(&Value::Text("local note".into())));
        assert_eq!(payload.get("fee"), Some(&Value::Integer(250.into())));
    }

    #[test]
    fn contested_user_editable_field_keeps_local() {
        let base = base();
        let mut local = base.clone();
        local.set("notes", Value::Text("local".into()));
        let mut remote = base.clone();
        remote.set("notes", Value::Text("remote".into()));

        let Resolution::Merged { payload, strategy } = resolve_triple(&base, &local, &remote)
        else {
            panic!("expected merge");
        };

        assert_eq!(strategy, ResolutionStrategy::LocalWins);
        assert_eq!(payload.get("notes"), Some(&Value::Text("local".into())));
    }

    #[test]
    fn contested_critical_field_takes_remote() {
        let base = base();
        let mut local = base.clone();
        local.set("fee", Value::Integer(150.into()));
        let mut remote = base.clone();
        remote.set("fee", Value::Integer(300.into()));

        let Resolution::Merged { payload, strategy } = resolve_triple(&base, &local, &remote)
        else {
            panic!("expected merge");
        };

        assert_eq!(strategy, ResolutionStrategy::RemoteWins);
        assert_eq!(payload.get("fee"), Some(&Value::Integer(300.into())));
    }

    #[test]
    fn manual_override_beats_remote_on_critical_field() {
        let base = base();
        let mut local = base.clone();
        local.set("fee", Value::Integer(150.into()));
        local.mark_override("fee");
        let mut remote = base.clone();
        remote.set("fee", Value::Integer(300.into()));

        let Resolution::Merged { payload, strategy } = resolve_triple(&base, &local, &remote)
        else {
            panic!("expected merge");
        };

        assert_eq!(strategy, ResolutionStrategy::LocalWins);
        assert_eq!(payload.get("fee"), Some(&Value::Integer(150.into())));
        // The override flag survives into the merged payload.
        assert!(payload.is_override("fee"));
    }

    #[test]
    fn contested_unclassified_field_goes_to_manual_review() {
        let base = base();
        let mut local = base.clone();
        local.set("status", Value::Text("exited".into()));
        let mut remote = base.clone();
        remote.set("status", Value::Text("billed".into()));

        let resolution = resolve_triple(&base, &local, &remote);
        assert_eq!(
            resolution,
            Resolution::ManualReview {
                contested: vec!["status".into()]
            }
        );
    }

    #[test]
    fn identical_changes_are_not_contested() {
        let base = base();
        let mut local = base.clone();
        local.set("status", Value::Text("exited".into()));
        let mut remote = base.clone();
        remote.set("status", Value::Text("exited".into()));

        let Resolution::Merged { payload, strategy } = resolve_triple(&base, &local, &remote)
        else {
            panic!("expected merge");
        };

        assert_eq!(strategy, ResolutionStrategy::FieldMerge);
        assert_eq!(payload.get("status"), Some(&Value::Text("exited".into())));
    }

    #[test]
    fn local_field_removal_merges() {
        let base = base();
        let mut local = base.clone();
        local.remove("notes");
        let mut remote = base.clone();
        remote.set("fee", Value::Integer(250.into()));

        let Resolution::Merged { payload, .. } = resolve_triple(&base, &local, &remote) else {
            panic!("expected merge");
        };

        assert_eq!(payload.get("notes"), None);
        assert_eq!(payload.get("fee"), Some(&Value::Integer(250.into())));
    }

    #[test]
    fn missing_base_treats_everything_as_changed() {
        let local = Payload::new(1).with_text("notes", "local");
        let remote = Payload::new(1).with_text("notes", "remote");
        let catalog = catalog();

        let resolution = resolve(&ConflictInput {
            base: None,
            local: &local,
            remote: &remote,
            catalog: &catalog,
        });

        let Resolution::Merged { payload, .. } = resolution else {
            panic!("expected merge");
        };
        // notes is user-editable: local wins even without an ancestor.
        assert_eq!(payload.get("notes"), Some(&Value::Text("local".into())));
    }

    #[test]
    fn mixed_contested_outcomes_report_field_merge() {
        let base = base();
        let mut local = base.clone();
        local.set("notes", Value::Text("local".into()));
        local.set("fee", Value::Integer(150.into()));
        let mut remote = base.clone();
        remote.set("notes", Value::Text("remote".into()));
        remote.set("fee", Value::Integer(300.into()));

        let Resolution::Merged { payload, strategy } = resolve_triple(&base, &local, &remote)
        else {
            panic!("expected merge");
        };

        assert_eq!(strategy, ResolutionStrategy::FieldMerge);
        assert_eq!(payload.get("notes"), Some(&Value::Text("local".into())));
        assert_eq!(payload.get("fee"), Some(&Value::Integer(300.into())));
    }
}

#[cfg(test)]
mod determinism {
    use super::*;
    use ciborium::value::Value;
    use proptest::prelude::*;

    const FIELDS: [&str; 5] = ["notes", "driver_name", "fee", "status", "slot"];

    fn arb_payload() -> impl Strategy<Value = Payload> {
        proptest::collection::btree_map(
            proptest::sample::select(FIELDS.to_vec()),
            0i64..50,
            0..FIELDS.len(),
        )
        .prop_map(|fields| {
            let mut payload = Payload::new(1);
            for (name, value) in fields {
                payload.set(name, Value::Integer(value.into()));
            }
            payload
        })
    }

    proptest! {
        #[test]
        fn resolve_is_deterministic(
            base in arb_payload(),
            local in arb_payload(),
            remote in arb_payload(),
        ) {
            let catalog = FieldCatalog::new()
                .with_user_editable("notes")
                .with_user_editable("driver_name")
                .with_critical("fee")
                .with_critical("slot");
            let input = ConflictInput {
                base: Some(&base),
                local: &local,
                remote: &remote,
                catalog: &catalog,
            };

            let first = resolve(&input);
            let second = resolve(&input);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn merge_never_invents_fields(
            base in arb_payload(),
            local in arb_payload(),
            remote in arb_payload(),
        ) {
            let catalog = FieldCatalog::new()
                .with_user_editable("notes")
                .with_critical("fee");
            let input = ConflictInput {
                base: Some(&base),
                local: &local,
                remote: &remote,
                catalog: &catalog,
            };

            if let Resolution::Merged { payload, .. } = resolve(&input) {
                for name in payload.field_names() {
                    prop_assert!(
                        local.get(name).is_some() || remote.get(name).is_some(),
                        "field {} appeared from nowhere",
                        name
                    );
                }
            }
        }
    }
}
