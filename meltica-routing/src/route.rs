//! Route value type (component C3).

use std::collections::BTreeSet;
use std::time::Duration;

use meltica_core::EventType;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A single subscribe/unsubscribe filter rule, normalised so equality is structural.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct FilterRule {
    /// Lower-cased field name.
    pub field: SmolStr,
    pub operator: FilterOperator,
    /// Sorted, deduplicated values. `Eq` carries exactly one; `In` carries two or more.
    pub values: Vec<SmolStr>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum FilterOperator {
    Eq,
    In,
}

impl FilterRule {
    /// Builds a normalised rule from a field name and an arbitrary, possibly-duplicated,
    /// possibly-unsorted set of values.
    pub fn new(field: impl AsRef<str>, values: impl IntoIterator<Item = impl Into<SmolStr>>) -> Self {
        let field = SmolStr::new(field.as_ref().to_lowercase());
        let mut unique: BTreeSet<SmolStr> = values.into_iter().map(Into::into).collect();
        let mut values: Vec<SmolStr> = std::mem::take(&mut unique).into_iter().collect();
        values.sort();
        let operator = if values.len() <= 1 { FilterOperator::Eq } else { FilterOperator::In };
        Self { field, operator, values }
    }
}

/// A REST polling descriptor attached to a route.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct RestPollDescriptor {
    pub endpoint: SmolStr,
    pub interval: Duration,
    pub parser_tag: SmolStr,
}

/// A subscription intent: a canonical event type, the provider that owns it, the venue topics
/// and REST pollers that satisfy it, and a set of filters narrowing which instruments match.
///
/// Always construct via [`Route::new`] so the normalisation invariant ("equality compares all
/// fields after normalisation") holds for every instance in the system.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Route {
    pub canonical_type: EventType,
    pub provider: SmolStr,
    pub topics: Vec<SmolStr>,
    pub rest_polls: Vec<RestPollDescriptor>,
    pub filters: Vec<FilterRule>,
}

impl Route {
    pub fn new(
        canonical_type: EventType,
        provider: impl Into<SmolStr>,
        topics: impl IntoIterator<Item = impl Into<SmolStr>>,
        rest_polls: Vec<RestPollDescriptor>,
        filters: Vec<FilterRule>,
    ) -> Self {
        let mut topics: Vec<SmolStr> = topics.into_iter().map(Into::into).collect::<BTreeSet<_>>().into_iter().collect();
        topics.sort();
        let mut rest_polls = rest_polls;
        rest_polls.sort();
        rest_polls.dedup();
        let mut filters = filters;
        filters.sort_by(|a, b| a.field.cmp(&b.field));

        Self { canonical_type, provider: provider.into(), topics, rest_polls, filters }
    }

    /// The key the subscription manager tracks active routes by.
    pub fn key(&self) -> RouteKey {
        RouteKey { provider: SmolStr::new(self.provider.to_lowercase()), canonical_type: self.canonical_type }
    }

    /// Whether `topics` and `rest_polls` are identical between `self` and `other` — i.e.
    /// everything except filters.
    pub fn same_non_filter_fields(&self, other: &Route) -> bool {
        self.topics == other.topics && self.rest_polls == other.rest_polls
    }
}

/// Lookup key for an active route: normalised provider name plus canonical type.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RouteKey {
    pub provider: SmolStr,
    pub canonical_type: EventType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_rule_dedups_and_sorts_and_picks_operator() {
        let single = FilterRule::new("Instrument", ["BTC"]);
        assert_eq!(single.operator, FilterOperator::Eq);
        assert_eq!(single.field.as_str(), "instrument");

        let multi = FilterRule::new("Instrument", ["ETH", "BTC", "BTC"]);
        assert_eq!(multi.operator, FilterOperator::In);
        assert_eq!(multi.values, vec![SmolStr::from("BTC"), SmolStr::from("ETH")]);
    }

    #[test]
    fn route_equality_ignores_input_ordering() {
        let a = Route::new(EventType::Trade, "binance", ["b", "a"], vec![], vec![]);
        let b = Route::new(EventType::Trade, "binance", ["a", "b"], vec![], vec![]);
        assert_eq!(a, b);
    }

    #[test]
    fn route_key_normalises_provider_case() {
        let route = Route::new(EventType::Trade, "Binance", Vec::<&str>::new(), vec![], vec![]);
        assert_eq!(route.key().provider.as_str(), "binance");
    }
}
