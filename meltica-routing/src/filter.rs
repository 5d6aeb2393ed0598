//! Filter-set diffing used by the subscription manager to compute incremental
//! subscribe/unsubscribe deltas instead of a full resubscribe on every filter edit.

use std::collections::{BTreeMap, BTreeSet};

use smol_str::SmolStr;

use crate::route::FilterRule;

/// The set of values added and removed per field between two filter lists.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct FilterDelta {
    pub added: Vec<FilterRule>,
    pub removed: Vec<FilterRule>,
}

impl FilterDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

fn by_field(filters: &[FilterRule]) -> BTreeMap<&SmolStr, BTreeSet<&SmolStr>> {
    let mut map: BTreeMap<&SmolStr, BTreeSet<&SmolStr>> = BTreeMap::new();
    for rule in filters {
        map.entry(&rule.field).or_default().extend(rule.values.iter());
    }
    map
}

/// Computes the symmetric difference of `old` and `new`, field by field, producing the
/// `FilterRule`s that must be subscribed (added) and unsubscribed (removed) to bring the
/// provider side from `old` to `new` without touching values unaffected by the edit.
pub fn diff(old: &[FilterRule], new: &[FilterRule]) -> FilterDelta {
    let old_by_field = by_field(old);
    let new_by_field = by_field(new);

    let mut fields: BTreeSet<&SmolStr> = BTreeSet::new();
    fields.extend(old_by_field.keys().copied());
    fields.extend(new_by_field.keys().copied());

    let mut delta = FilterDelta::default();
    for field in fields {
        let old_values = old_by_field.get(field).cloned().unwrap_or_default();
        let new_values = new_by_field.get(field).cloned().unwrap_or_default();

        let added: Vec<SmolStr> = new_values.difference(&old_values).map(|v| (*v).clone()).collect();
        let removed: Vec<SmolStr> = old_values.difference(&new_values).map(|v| (*v).clone()).collect();

        if !added.is_empty() {
            delta.added.push(FilterRule::new(field.as_str(), added));
        }
        if !removed.is_empty() {
            delta.removed.push(FilterRule::new(field.as_str(), removed));
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert_eq;

    #[test]
    fn diff_detects_added_and_removed_values_per_field() {
        let old = vec![FilterRule::new("instrument", ["BTC", "ETH"])];
        let new = vec![FilterRule::new("instrument", ["ETH", "SOL"])];
        let delta = diff(&old, &new);
        assert_eq!(delta.added, vec![FilterRule::new("instrument", ["SOL"])]);
        assert_eq!(delta.removed, vec![FilterRule::new("instrument", ["BTC"])]);
    }

    #[test]
    fn diff_is_empty_for_identical_filter_sets() {
        let filters = vec![FilterRule::new("instrument", ["BTC"])];
        assert!(diff(&filters, &filters).is_empty());
    }

    #[test]
    fn diff_handles_new_field_as_pure_addition() {
        let old = vec![FilterRule::new("instrument", ["BTC"])];
        let new = vec![FilterRule::new("instrument", ["BTC"]), FilterRule::new("venue", ["spot"])];
        let delta = diff(&old, &new);
        assert_eq!(delta.added, vec![FilterRule::new("venue", ["spot"])]);
        assert!(delta.removed.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn diff_is_symmetric_difference(old_values in proptest::collection::vec(0u8..6, 0..6), new_values in proptest::collection::vec(0u8..6, 0..6)) {
            let old = vec![FilterRule::new("instrument", old_values.iter().map(|v| v.to_string()))];
            let new = vec![FilterRule::new("instrument", new_values.iter().map(|v| v.to_string()))];
            let delta = diff(&old, &new);

            let old_set: BTreeSet<_> = old_values.iter().map(|v| v.to_string()).collect();
            let new_set: BTreeSet<_> = new_values.iter().map(|v| v.to_string()).collect();

            let expect_added: BTreeSet<_> = new_set.difference(&old_set).cloned().collect();
            let expect_removed: BTreeSet<_> = old_set.difference(&new_set).cloned().collect();

            let got_added: BTreeSet<String> = delta.added.iter().flat_map(|r| r.values.iter().map(|v| v.to_string())).collect();
            let got_removed: BTreeSet<String> = delta.removed.iter().flat_map(|r| r.values.iter().map(|v| v.to_string())).collect();

            prop_assert_eq!(got_added, expect_added);
            prop_assert_eq!(got_removed, expect_removed);
        }
    }
}
