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

//! The per-job master context.
//!
//! A [`MasterContext`] holds everything the master tracks for one job:
//! the status machine, the current execution's identifiers and plans, the
//! completion futures, and handles to the external collaborators. All
//! mutable state lives in [`MasterState`] under the job's master lock;
//! helpers that require the lock take `&mut MasterState`, so holding the
//! lock is enforced by the borrow checker rather than asserted at
//! runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, error};

use rill_cluster_client::{ClusterService, MemberInfo};
use rill_dataflow_types::{
    ExecutionId, ExecutionPlan, JobConfig, JobError, JobId, JobMetrics, JobOperation, JobResponse,
    JobStatus, ParticipantClient, RawJobMetrics, TerminationMode, Vertex,
};
use rill_ore::future::Completion;
use rill_ore::now::NowFn;
use rill_ore::task;

use crate::job::ExecutionCompletionCallback;
use crate::metrics::CoordMetrics;
use crate::record::{JobExecutionRecord, JobRecord};
use crate::service::{
    CoordinationService, JobStore, PlanBuilder, SnapshotContext, SnapshotValidator,
};

/// Handles to the external collaborators of a job's controller.
#[derive(Debug, Clone)]
pub struct Services {
    /// The cluster membership service.
    pub cluster: Arc<dyn ClusterService>,
    /// The client for invoking operations on participants.
    pub participants: Arc<dyn ParticipantClient>,
    /// The cluster-wide coordination service.
    pub coordination: Arc<dyn CoordinationService>,
    /// Persistent storage for job records.
    pub job_store: Arc<dyn JobStore>,
    /// The job's snapshot context.
    pub snapshots: Arc<dyn SnapshotContext>,
    /// The snapshot validator.
    pub snapshot_validator: Arc<dyn SnapshotValidator>,
    /// The execution plan builder.
    pub plan_builder: Arc<dyn PlanBuilder>,
}

/// The mutable per-job state, guarded by the master lock.
#[derive(Debug)]
pub(crate) struct MasterState {
    pub(crate) status: JobStatus,
    pub(crate) execution_id: ExecutionId,
    pub(crate) execution_record: JobExecutionRecord,
    pub(crate) execution_plan_map: Option<BTreeMap<MemberInfo, ExecutionPlan>>,
    /// `None` initially; assigned when a termination is requested and
    /// reset when the execution finalizes.
    pub(crate) requested_termination_mode: Option<TerminationMode>,
    pub(crate) execution_completion_callback: Option<Arc<ExecutionCompletionCallback>>,
    /// The vertex list captured at start, before the restore rewrite, so
    /// the finalizer can release vertex resources even when the start
    /// attempt dies half-way.
    pub(crate) vertices: Option<Vec<Vertex>>,
    /// (Re)created when the job is started and completed when its
    /// execution ends. Execution ending doesn't mean the job is done: it
    /// may be stopping temporarily for suspension or restart. Always
    /// completed normally, even if the execution fails.
    pub(crate) execution_completion: Completion<()>,
    pub(crate) members_with_completed_execution: BTreeSet<MemberInfo>,
    /// Metrics cached from members that already finished their share of
    /// the current execution.
    pub(crate) partial_metrics: BTreeMap<MemberInfo, RawJobMetrics>,
    pub(crate) job_metrics: JobMetrics,
    pub(crate) execution_start: Instant,
}

impl MasterState {
    /// Reports whether a forceful cancellation is in effect.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.requested_termination_mode == Some(TerminationMode::CANCEL_FORCEFUL)
    }

    /// Transitions the status machine to `new`.
    ///
    /// Illegal transitions are logged and ignored; in particular nothing
    /// ever leaves a terminal status.
    pub(crate) fn set_status(&mut self, job_id: JobId, new: JobStatus) {
        if self.status == new && new != JobStatus::NotRunning {
            return;
        }
        if !self.status.can_transition_to(new) {
            error!(
                %job_id,
                "ignoring illegal job status transition {} -> {}", self.status, new
            );
            return;
        }
        debug!(%job_id, "job status transition {} -> {}", self.status, new);
        self.status = new;
    }
}

/// The per-job master context: the status machine plus handles to
/// everything needed to drive the job's lifecycle.
///
/// The controller operations — `try_start_job`, `request_termination`,
/// `collect_metrics`, and friends — are implemented in the `job` module
/// as methods on this type.
#[derive(Debug)]
pub struct MasterContext {
    pub(crate) job_record: JobRecord,
    pub(crate) services: Services,
    pub(crate) now: NowFn,
    pub(crate) metrics: CoordMetrics,
    /// Completed when the job fully completes: not when it is suspended,
    /// not when it is going to be restarted. Completed at most once over
    /// the job's lifetime.
    pub(crate) job_completion: Completion<Result<(), JobError>>,
    pub(crate) state: Mutex<MasterState>,
}

impl MasterContext {
    /// Creates the context for a job.
    pub fn new(
        job_record: JobRecord,
        execution_record: JobExecutionRecord,
        services: Services,
        now: NowFn,
        metrics: CoordMetrics,
    ) -> Arc<MasterContext> {
        Arc::new(MasterContext {
            job_record,
            services,
            now,
            metrics,
            job_completion: Completion::new(),
            state: Mutex::new(MasterState {
                status: JobStatus::NotRunning,
                execution_id: ExecutionId::default(),
                execution_record,
                execution_plan_map: None,
                requested_termination_mode: None,
                execution_completion_callback: None,
                vertices: None,
                execution_completion: Completion::completed(()),
                members_with_completed_execution: BTreeSet::new(),
                partial_metrics: BTreeMap::new(),
                job_metrics: JobMetrics::empty(),
                execution_start: Instant::now(),
            }),
        })
    }

    /// Acquires the master lock.
    pub(crate) fn lock(&self) -> MutexGuard<'_, MasterState> {
        self.state.lock().expect("master lock poisoned")
    }

    /// The job's identifier.
    pub fn job_id(&self) -> JobId {
        self.job_record.job_id
    }

    /// The job's configuration.
    pub fn job_config(&self) -> &JobConfig {
        &self.job_record.config
    }

    /// A log-friendly description of the job.
    pub fn job_id_string(&self) -> String {
        match &self.job_record.config.name {
            Some(name) => format!("job '{}' (id {})", name, self.job_record.job_id),
            None => format!("job {}", self.job_record.job_id),
        }
    }

    /// The job's current status.
    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    /// The id of the current execution attempt, or the zero id if the
    /// job has never started.
    pub fn execution_id(&self) -> ExecutionId {
        self.lock().execution_id
    }

    /// The currently requested termination mode, if any.
    pub fn requested_termination_mode(&self) -> Option<TerminationMode> {
        self.lock().requested_termination_mode
    }

    /// The last job-level metrics assembled for this job.
    pub fn job_metrics(&self) -> JobMetrics {
        self.lock().job_metrics.clone()
    }

    /// The members that have reported completion of the current
    /// execution.
    pub fn members_with_completed_execution(&self) -> BTreeSet<MemberInfo> {
        self.lock().members_with_completed_execution.clone()
    }

    /// The future completed when the job fully completes, carrying the
    /// terminal outcome.
    pub fn job_completion_future(&self) -> Completion<Result<(), JobError>> {
        self.job_completion.clone()
    }

    /// Records a successfully completed snapshot, making it the restore
    /// point of future executions. Called by the snapshot machinery.
    pub fn record_successful_snapshot(&self, snapshot_id: i64, data_map_index: u32) {
        let mut state = self.lock();
        state.execution_record.snapshot_id = snapshot_id;
        state.execution_record.data_map_index = data_map_index;
        state.execution_record.ongoing_snapshot_id = snapshot_id + 1;
        self.services.job_store.write_job_execution_record(
            self.job_record.job_id,
            &state.execution_record,
            false,
        );
    }

    /// Marks the start or end of an externally driven snapshot export of
    /// a suspended job.
    pub fn set_exporting_snapshot(&self, exporting: bool) {
        let mut state = self.lock();
        let new = if exporting {
            JobStatus::SuspendedExportingSnapshot
        } else {
            JobStatus::Suspended
        };
        state.set_status(self.job_record.job_id, new);
    }

    /// Invokes an operation on every participant of the current
    /// execution.
    ///
    /// `op_ctor` builds the operation per member. As each reply lands,
    /// `per_response` (if any) observes it; once all replies are in,
    /// `completion` is called exactly once with the full response map.
    /// The dispatch is non-blocking: replies are collected on a spawned
    /// task.
    pub(crate) fn invoke_on_participants<O, C>(
        self: &Arc<Self>,
        op_ctor: O,
        completion: C,
        per_response: Option<Arc<ExecutionCompletionCallback>>,
    ) where
        O: Fn(&MemberInfo) -> JobOperation + Send + 'static,
        C: FnOnce(BTreeMap<MemberInfo, JobResponse>) + Send + 'static,
    {
        let participants: Vec<MemberInfo> = {
            let state = self.lock();
            state
                .execution_plan_map
                .as_ref()
                .map(|plans| plans.keys().cloned().collect())
                .unwrap_or_default()
        };
        let mc = Arc::clone(self);
        let job_id = self.job_record.job_id;
        task::spawn(
            || format!("invoke-on-participants-{job_id}"),
            async move {
                let mut replies: FuturesUnordered<_> = participants
                    .into_iter()
                    .map(|member| {
                        let client = Arc::clone(&mc.services.participants);
                        let op = op_ctor(&member);
                        async move {
                            let response = client.invoke(&member, op).await;
                            (member, response)
                        }
                    })
                    .collect();
                let mut responses = BTreeMap::new();
                while let Some((member, response)) = replies.next().await {
                    if let Some(callback) = &per_response {
                        callback.accept(&mc, &member, &response);
                    }
                    responses.insert(member, response);
                }
                completion(responses);
            },
        );
    }
}
