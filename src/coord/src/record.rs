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

//! Persisted per-job records.

use serde::{Deserialize, Serialize};

use rill_dataflow_types::{JobConfig, JobId};
use rill_ore::now::EpochMillis;

/// The name prefix of maps holding exported snapshots.
pub const EXPORTED_SNAPSHOTS_PREFIX: &str = "__exported_snapshot.";

/// Returns the name of the map holding the exported snapshot named
/// `snapshot_name`.
pub fn exported_snapshot_map_name(snapshot_name: &str) -> String {
    format!("{EXPORTED_SNAPSHOTS_PREFIX}{snapshot_name}")
}

/// The stored definition of a job: what to run.
///
/// Written once at submission time and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// The job's identifier.
    pub job_id: JobId,
    /// The serialized [`rill_dataflow_types::Dag`].
    pub serialized_dag: Vec<u8>,
    /// The job's configuration.
    pub config: JobConfig,
    /// When the job was submitted.
    pub creation_time: EpochMillis,
}

/// Mutable per-job execution state, persisted across master failover.
///
/// At most one mutator at a time: every field update happens under the
/// job's master lock, and the record is written back through the job
/// store while the lock is held or as the finalizer's deferred action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    /// The minimum live-member count required to start the job.
    pub quorum_size: usize,
    /// The id of the last successful snapshot, or −1 if there is none.
    pub snapshot_id: i64,
    /// The id the next snapshot will get.
    pub ongoing_snapshot_id: i64,
    /// Which of the two alternating snapshot data maps holds the last
    /// successful snapshot.
    pub data_map_index: u32,
    /// Whether the job is suspended.
    pub suspended: bool,
    /// When an execution of this job was last started.
    pub last_execution_time: EpochMillis,
    /// How many executions of this job have been started.
    pub execution_attempts: u64,
}

impl JobExecutionRecord {
    /// Creates a fresh record for a job requiring `quorum_size` members.
    pub fn new(quorum_size: usize) -> Self {
        JobExecutionRecord {
            quorum_size,
            snapshot_id: -1,
            ongoing_snapshot_id: 0,
            data_map_index: 0,
            suspended: false,
            last_execution_time: 0,
            execution_attempts: 0,
        }
    }

    /// Reports whether a successful snapshot exists to restore from.
    pub fn has_snapshot(&self) -> bool {
        self.snapshot_id >= 0
    }

    /// Records that an execution of the job is being started.
    pub fn mark_executed(&mut self, now: EpochMillis) {
        self.last_execution_time = now;
        self.execution_attempts += 1;
    }

    /// The name of the internal map holding the data of the last
    /// successful snapshot of `job_id`.
    pub fn successful_snapshot_data_map_name(&self, job_id: JobId) -> String {
        format!("__snapshot_data.{}.{}", job_id, self.data_map_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_map_names() {
        let mut record = JobExecutionRecord::new(2);
        assert!(!record.has_snapshot());
        record.snapshot_id = 13;
        record.data_map_index = 1;
        assert!(record.has_snapshot());
        assert_eq!(
            record.successful_snapshot_data_map_name(JobId(7)),
            "__snapshot_data.0000-0000-0000-0007.1"
        );
        assert_eq!(
            exported_snapshot_map_name("daily"),
            "__exported_snapshot.daily"
        );
    }

    #[test]
    fn mark_executed_counts_attempts() {
        let mut record = JobExecutionRecord::new(1);
        record.mark_executed(100);
        record.mark_executed(200);
        assert_eq!(record.execution_attempts, 2);
        assert_eq!(record.last_execution_time, 200);
    }
}
