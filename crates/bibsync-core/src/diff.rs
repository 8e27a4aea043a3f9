//! Field-level comparison of two bibliography snapshots.

use crate::types::{Delta, FieldMap, Snapshot};

/// Compute the fields of `new` that were added or changed relative to `old`.
///
/// Only additions and modifications are reported. A key that disappears from
/// the bibliography, or a field that disappears from an entry, produces
/// nothing: removals are never pushed into documents.
pub fn diff(old: &Snapshot, new: &Snapshot) -> Delta {
    let empty = FieldMap::new();
    let mut delta = Delta::new();

    for (key, new_fields) in new {
        let old_fields = old.get(key).unwrap_or(&empty);
        let changed = diff_fields(old_fields, new_fields);
        if !changed.is_empty() {
            delta.insert(key.clone(), changed);
        }
    }

    delta
}

/// Fields of `new` whose value differs from (or is missing in) `old`.
pub fn diff_fields(old: &FieldMap, new: &FieldMap) -> FieldMap {
    new.iter()
        .filter(|(name, value)| old.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
