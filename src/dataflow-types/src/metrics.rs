// Copyright Rill contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE file at the
// root of this repository, or online at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Job metrics.
//!
//! Participants produce [`RawJobMetrics`]: a timestamped list of
//! name/value pairs. The coordinator merges the per-member batches into a
//! [`JobMetrics`] view, prefixing each name with its member of origin.
//! The merge concatenates batches, preserving their timestamps, and is
//! associative and independent of iteration order up to reordering of
//! batches.

use rill_cluster_client::MemberInfo;
use serde::{Deserialize, Serialize};

/// A batch of metrics produced by one member at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RawJobMetrics {
    /// When the batch was captured, in milliseconds since the epoch.
    pub timestamp: u64,
    /// The measurements, as (name, value) pairs.
    pub values: Vec<(String, i64)>,
}

impl RawJobMetrics {
    /// Creates a batch.
    pub fn new(timestamp: u64, values: Vec<(String, i64)>) -> Self {
        RawJobMetrics { timestamp, values }
    }

    /// Returns a copy of this batch with every metric name prefixed.
    pub fn prefix_names(&self, prefix: &str) -> RawJobMetrics {
        RawJobMetrics {
            timestamp: self.timestamp,
            values: self
                .values
                .iter()
                .map(|(name, value)| (format!("{prefix}{name}"), *value))
                .collect(),
        }
    }
}

/// The prefix applied to metric names originating from `member`.
pub fn member_prefix(member: &MemberInfo) -> String {
    format!("member={}.", member.uuid)
}

/// The merged, job-level view of all members' metrics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobMetrics {
    batches: Vec<RawJobMetrics>,
}

impl JobMetrics {
    /// The empty view.
    pub fn empty() -> Self {
        JobMetrics::default()
    }

    /// A view holding a single batch.
    pub fn of(batch: RawJobMetrics) -> Self {
        JobMetrics {
            batches: vec![batch],
        }
    }

    /// Merges two views by concatenating their batches.
    pub fn merge(mut self, other: JobMetrics) -> JobMetrics {
        self.batches.extend(other.batches);
        self
    }

    /// Reports whether the view holds no measurements.
    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(|b| b.values.is_empty())
    }

    /// The total number of measurements across all batches.
    pub fn len(&self) -> usize {
        self.batches.iter().map(|b| b.values.len()).sum()
    }

    /// Returns all (timestamp, value) measurements recorded under `name`.
    pub fn get(&self, name: &str) -> Vec<(u64, i64)> {
        self.batches
            .iter()
            .flat_map(|b| {
                b.values
                    .iter()
                    .filter(|(n, _)| n == name)
                    .map(|(_, v)| (b.timestamp, *v))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn prefixing_keeps_timestamp_and_values() {
        let raw = RawJobMetrics::new(42, vec![("in".into(), 10), ("out".into(), 9)]);
        let member = MemberInfo::new(Uuid::nil(), "10.0.0.1:5701");
        let prefixed = raw.prefix_names(&member_prefix(&member));
        assert_eq!(prefixed.timestamp, 42);
        assert_eq!(
            prefixed.values[0].0,
            "member=00000000-0000-0000-0000-000000000000.in"
        );
        assert_eq!(prefixed.values[0].1, 10);
    }

    #[test]
    fn get_finds_measurements_across_batches() {
        let metrics = JobMetrics::of(RawJobMetrics::new(1, vec![("n".into(), 1)]))
            .merge(JobMetrics::of(RawJobMetrics::new(2, vec![("n".into(), 2)])));
        assert_eq!(metrics.get("n"), vec![(1, 1), (2, 2)]);
        assert_eq!(metrics.len(), 2);
    }

    fn arb_raw() -> impl Strategy<Value = RawJobMetrics> {
        (
            0u64..1_000,
            prop::collection::vec(("[a-z]{1,6}", -100i64..100), 0..4),
        )
            .prop_map(|(ts, values)| RawJobMetrics::new(ts, values))
    }

    fn arb_metrics() -> impl Strategy<Value = JobMetrics> {
        prop::collection::vec(arb_raw(), 0..4).prop_map(|batches| {
            batches
                .into_iter()
                .fold(JobMetrics::empty(), |acc, b| acc.merge(JobMetrics::of(b)))
        })
    }

    proptest! {
        #[test]
        fn merge_is_associative(a in arb_metrics(), b in arb_metrics(), c in arb_metrics()) {
            let left = a.clone().merge(b.clone()).merge(c.clone());
            let right = a.merge(b.merge(c));
            prop_assert_eq!(left, right);
        }

        #[test]
        fn empty_is_identity(a in arb_metrics()) {
            prop_assert_eq!(a.clone().merge(JobMetrics::empty()), a.clone());
            prop_assert_eq!(JobMetrics::empty().merge(a.clone()), a);
        }

        #[test]
        fn merge_preserves_total_count(a in arb_metrics(), b in arb_metrics()) {
            let total = a.len() + b.len();
            prop_assert_eq!(a.merge(b).len(), total);
        }
    }
}
