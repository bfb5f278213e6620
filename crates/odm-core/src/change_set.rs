//! Field-level change sets.
//!
//! A snapshot is the field map of a document as last loaded or flushed. The
//! change set of a managed document is the difference between its snapshot
//! and its current field map, restricted to the fields that differ.

use std::collections::BTreeMap;

use crate::value::FieldValue;

/// Field map of a document at one point in time.
pub type Snapshot = BTreeMap<String, FieldValue>;

/// Old and new value of one changed field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldChange {
    pub old: FieldValue,
    pub new: FieldValue,
}

/// The changed fields of one document, ordered by field name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    changes: BTreeMap<String, FieldChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no field changed.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.changes.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.changes.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.changes.iter()
    }

    /// Names of the changed fields.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }

    pub(crate) fn record(&mut self, field: String, old: FieldValue, new: FieldValue) {
        self.changes.insert(field, FieldChange { old, new });
    }
}

/// Compute the change set between a snapshot and the current field map.
///
/// A field missing on either side counts as [`FieldValue::Null`], so removing
/// a field and nulling it are the same change.
pub fn compute_change_set(original: &Snapshot, current: &Snapshot) -> ChangeSet {
    let mut set = ChangeSet::new();

    for (field, new) in current {
        let old = original.get(field).unwrap_or(&FieldValue::Null);
        if old != new {
            set.record(field.clone(), old.clone(), new.clone());
        }
    }

    for (field, old) in original {
        if !current.contains_key(field) && !old.is_null() {
            set.record(field.clone(), old.clone(), FieldValue::Null);
        }
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::value::EmbeddedValue;
    use proptest::prelude::*;

    fn snap(pairs: &[(&str, FieldValue)]) -> Snapshot {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let s = snap(&[("a", 1.into()), ("b", "x".into())]);
        assert!(compute_change_set(&s, &s.clone()).is_empty());
    }

    #[test]
    fn single_modification() {
        let old = snap(&[("name", "x".into()), ("age", 3.into())]);
        let new = snap(&[("name", "y".into()), ("age", 3.into())]);
        let set = compute_change_set(&old, &new);
        assert_eq!(set.len(), 1);
        let change = set.get("name").unwrap();
        assert_eq!(change.old, FieldValue::from("x"));
        assert_eq!(change.new, FieldValue::from("y"));
    }

    #[test]
    fn added_field_changes_from_null() {
        let set = compute_change_set(&Snapshot::new(), &snap(&[("a", 1.into())]));
        assert_eq!(set.get("a").unwrap().old, FieldValue::Null);
    }

    #[test]
    fn removed_field_changes_to_null() {
        let set = compute_change_set(&snap(&[("a", 1.into())]), &Snapshot::new());
        assert_eq!(set.get("a").unwrap().new, FieldValue::Null);
    }

    #[test]
    fn missing_and_null_are_equal() {
        let old = snap(&[("a", FieldValue::Null)]);
        assert!(compute_change_set(&old, &Snapshot::new()).is_empty());
        assert!(compute_change_set(&Snapshot::new(), &old).is_empty());
    }

    #[test]
    fn reference_swap_is_a_change_even_with_equal_content() {
        let a = Document::with_id("User", 1);
        let b = Document::with_id("User", 1);
        let set = compute_change_set(
            &snap(&[("owner", (&a).into())]),
            &snap(&[("owner", (&b).into())]),
        );
        assert!(set.contains("owner"));
    }

    #[test]
    fn embedded_values_compare_structurally() {
        let old = snap(&[("addr", EmbeddedValue::new("Address").with("city", "Oslo").into())]);
        let same = snap(&[("addr", EmbeddedValue::new("Address").with("city", "Oslo").into())]);
        assert!(compute_change_set(&old, &same).is_empty());
    }

    fn scalar() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            Just(FieldValue::Null),
            any::<bool>().prop_map(FieldValue::Bool),
            any::<i64>().prop_map(FieldValue::Int),
            "[a-z]{0,6}".prop_map(FieldValue::String),
        ]
    }

    fn snapshot() -> impl Strategy<Value = Snapshot> {
        prop::collection::btree_map("[a-e]", scalar(), 0..5)
    }

    proptest! {
        #[test]
        fn mutating_one_field_yields_exactly_that_change(
            original in snapshot(),
            field in "[a-e]",
            value in scalar(),
        ) {
            let old = original.get(&field).cloned().unwrap_or(FieldValue::Null);
            prop_assume!(old != value);

            let mut current = original.clone();
            current.insert(field.clone(), value.clone());

            let set = compute_change_set(&original, &current);
            prop_assert_eq!(set.len(), 1);
            let change = set.get(&field).unwrap();
            prop_assert_eq!(&change.old, &old);
            prop_assert_eq!(&change.new, &value);
        }

        #[test]
        fn applying_the_change_set_reproduces_current(
            original in snapshot(),
            current in snapshot(),
        ) {
            let set = compute_change_set(&original, &current);
            let mut patched = original.clone();
            for (field, change) in set.iter() {
                patched.insert(field.clone(), change.new.clone());
            }
            prop_assert!(compute_change_set(&patched, &current).is_empty());
        }
    }
}
