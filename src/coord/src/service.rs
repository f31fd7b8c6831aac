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

//! Collaborator traits consumed by the per-job controller.
//!
//! The controller is deliberately thin on dependencies: everything that
//! is cluster-wide (restart scheduling, job completion bookkeeping), per
//! job but snapshot-related (the snapshot context), or persistent (the
//! job store) sits behind one of these traits. Production wires in the
//! real services; tests wire in programmable fakes.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use rill_cluster_client::{MemberInfo, MembersView};
use rill_dataflow_types::{
    Dag, ExecutionId, ExecutionPlan, JobConfig, JobError, JobId, Vertex,
};
use rill_ore::future::Completion;
use rill_ore::now::EpochMillis;

use crate::record::JobExecutionRecord;

/// The cluster-wide job coordination service.
///
/// It owns the collection of jobs and the scheduling machinery around
/// them; the per-job controller calls back into it when a job needs to be
/// re-run or marked complete.
#[async_trait]
pub trait CoordinationService: fmt::Debug + Send + Sync {
    /// Asks the service to call `try_start_job` for this job again after
    /// a delay, e.g. because quorum is currently absent.
    fn schedule_restart(&self, job_id: JobId);

    /// Asks the service to restart this job immediately.
    fn restart_job(&self, job_id: JobId);

    /// Marks the job complete in cluster metadata.
    ///
    /// `completion_time` is the wall-clock completion time and `failure`
    /// the job's terminal outcome, `None` for success.
    async fn complete_job(
        &self,
        job_id: JobId,
        completion_time: EpochMillis,
        failure: Option<JobError>,
    ) -> Result<(), JobError>;

    /// Starts the periodic snapshot schedule for an execution of a job
    /// with a processing guarantee.
    fn schedule_snapshots(&self, job_id: JobId, execution_id: ExecutionId);
}

/// Persistent storage for per-job records.
pub trait JobStore: fmt::Debug + Send + Sync {
    /// Writes the job's execution record.
    ///
    /// With `can_create` set, a missing record is created; otherwise a
    /// missing record is an error, which implementations log.
    fn write_job_execution_record(
        &self,
        job_id: JobId,
        record: &JobExecutionRecord,
        can_create: bool,
    );
}

/// The per-job snapshot context.
///
/// Snapshot scheduling and the snapshot data path live outside the
/// execution controller; the controller only tells the context about
/// execution lifecycle events and asks it to run the terminal snapshot
/// of a graceful termination.
pub trait SnapshotContext: fmt::Debug + Send + Sync {
    /// Called when a new execution starts, under the master lock.
    fn on_execution_started(&self, execution_id: ExecutionId);

    /// Called when the execution terminates, under the master lock.
    fn on_execution_terminated(&self);

    /// Enqueues a snapshot. A terminal snapshot is flagged as such and
    /// ordered after any snapshot already in progress.
    fn enqueue_snapshot(&self, name: Option<&str>, terminal: bool);

    /// Starts the next enqueued snapshot if none is in progress. Safe to
    /// call repeatedly.
    fn try_begin_snapshot(&self);

    /// The future completed when the terminal snapshot of the current
    /// termination has finished.
    fn terminal_snapshot_future(&self) -> Completion<()>;
}

/// Validates that a snapshot is complete and usable for restore.
pub trait SnapshotValidator: fmt::Debug + Send + Sync {
    /// Validates the snapshot in `map_name`, returning the resolved
    /// snapshot id.
    ///
    /// `snapshot_id` is the expected id, or −1 when restoring an
    /// exported snapshot whose id is read from the map itself.
    fn validate(
        &self,
        snapshot_id: i64,
        map_name: &str,
        job_id_string: &str,
        snapshot_name: Option<&str>,
    ) -> Result<i64, JobError>;
}

/// Builds per-member execution plans out of a DAG, and owns the
/// master-side lifecycle of the processors it resolves.
pub trait PlanBuilder: fmt::Debug + Send + Sync {
    /// Partitions the DAG across the members of `members_view` and
    /// builds one plan per participating member.
    ///
    /// Failures are user errors: plan building runs user-provided
    /// processor suppliers.
    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        members_view: &MembersView,
        dag: &Dag,
        job_id: JobId,
        execution_id: ExecutionId,
        config: &JobConfig,
        ongoing_snapshot_id: i64,
    ) -> Result<BTreeMap<MemberInfo, ExecutionPlan>, JobError>;

    /// Releases master-side resources of a vertex when an execution
    /// finalizes. `failure` is the execution's outcome, `None` on
    /// success.
    fn complete_vertex(&self, vertex: &Vertex, failure: Option<&JobError>)
        -> Result<(), JobError>;
}
