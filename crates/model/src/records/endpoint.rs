use crate::core::owner::OwnerMarker;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Summary of the outstanding timeouts of one logical endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    pub endpoint_name: String,
    pub nr_of_timeouts: u64,
    pub shortest_timeout: DateTime<Utc>,
    pub longest_timeout: DateTime<Utc>,
    pub destinations: BTreeSet<String>,
}

/// Folds per-timeout (or pre-grouped) rows into [`EndpointInfo`]s.
#[derive(Debug, Default)]
pub struct EndpointAggregator {
    endpoints: BTreeMap<String, EndpointInfo>,
}

impl EndpointAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `count` timeouts owned by `owner`. Migrated timeouts are ignored;
    /// hidden ones count towards the endpoint they were hidden from.
    pub fn record_owner(
        &mut self,
        owner: &OwnerMarker,
        destination: &str,
        count: u64,
        shortest: DateTime<Utc>,
        longest: DateTime<Utc>,
    ) {
        if owner.is_migrated() {
            return;
        }
        self.record(owner.endpoint(), destination, count, shortest, longest);
    }

    pub fn record(
        &mut self,
        endpoint: &str,
        destination: &str,
        count: u64,
        shortest: DateTime<Utc>,
        longest: DateTime<Utc>,
    ) {
        if count == 0 {
            return;
        }

        let info = self
            .endpoints
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointInfo {
                endpoint_name: endpoint.to_string(),
                nr_of_timeouts: 0,
                shortest_timeout: shortest,
                longest_timeout: longest,
                destinations: BTreeSet::new(),
            });

        info.nr_of_timeouts += count;
        info.shortest_timeout = info.shortest_timeout.min(shortest);
        info.longest_timeout = info.longest_timeout.max(longest);
        info.destinations.insert(destination.to_string());
    }

    /// Endpoints ordered by name.
    pub fn finish(self) -> Vec<EndpointInfo> {
        self.endpoints.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifiers::RunToken;
    use chrono::Duration;

    #[test]
    fn merges_rows_of_the_same_endpoint() {
        let now = Utc::now();
        let mut agg = EndpointAggregator::new();
        agg.record("Sales", "Sales", 2, now + Duration::days(1), now + Duration::days(3));
        agg.record("Sales", "Shipping", 1, now, now);
        agg.record("Billing", "Billing", 1, now, now);

        let endpoints = agg.finish();
        assert_eq!(endpoints.len(), 2);

        let sales = &endpoints[1];
        assert_eq!(sales.endpoint_name, "Sales");
        assert_eq!(sales.nr_of_timeouts, 3);
        assert_eq!(sales.shortest_timeout, now);
        assert_eq!(sales.longest_timeout, now + Duration::days(3));
        assert_eq!(sales.destinations.len(), 2);
    }

    #[test]
    fn migrated_owners_are_skipped_and_hidden_ones_counted() {
        let now = Utc::now();
        let mut agg = EndpointAggregator::new();

        agg.record_owner(&OwnerMarker::parse("__migrated__Billing"), "Billing", 1, now, now);
        agg.record_owner(
            &OwnerMarker::InProgress {
                token: RunToken::generate(),
                endpoint: "Sales".into(),
            },
            "Sales",
            1,
            now,
            now,
        );

        let endpoints = agg.finish();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].endpoint_name, "Sales");
        assert_eq!(endpoints[0].nr_of_timeouts, 1);
    }
}
