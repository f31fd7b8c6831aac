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

//! Execution starting and termination.
//!
//! This module implements the job lifecycle on [`MasterContext`]: the
//! two-phase start protocol, termination requests, classification of
//! per-member outcomes into one job-level outcome, finalization, and
//! metrics aggregation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use rill_cluster_client::MemberInfo;
use rill_dataflow_types::metrics::member_prefix;
use rill_dataflow_types::{
    ActionAfterTerminate, Dag, ExecutionId, JobError, JobMetrics, JobOperation, JobResponse,
    JobStatus, ProcessingGuarantee, RawJobMetrics, TerminationMode,
};
use rill_ore::future::Completion;
use rill_ore::task;

use crate::context::{MasterContext, MasterState};
use crate::record::exported_snapshot_map_name;
use crate::restore::rewrite_dag_with_snapshot_restore;

const COLLECT_METRICS_RETRY_DELAY: Duration = Duration::from_millis(100);

/// An error on the job-start path that was caused by the user's job
/// rather than by the coordinator, and is routed to the finalizer.
struct UserCaused(JobError);

/// What the finalizer does after releasing the master lock.
enum DeferredAction {
    None,
    RestartJob,
    WriteSuspendedRecord(crate::record::JobExecutionRecord),
    CompleteJob(Option<JobError>),
}

impl MasterContext {
    /// Starts the execution of the job if it is not already completed,
    /// cancelled, or failed.
    ///
    /// If the job quorum is not satisfied or the cluster is not safe to
    /// start jobs on, a delayed restart is scheduled instead. Each
    /// successful call allocates a fresh execution id from
    /// `execution_id_gen`; ids must be strictly increasing per job.
    pub fn try_start_job(self: &Arc<Self>, execution_id_gen: &dyn Fn() -> ExecutionId) {
        let dag = {
            let mut state = self.lock();
            state.execution_start = std::time::Instant::now();
            let now = self.now.now();
            state.execution_record.mark_executed(now);
            state.members_with_completed_execution.clear();
            state.partial_metrics.clear();
            match self.resolve_dag(&mut state, execution_id_gen) {
                Ok(Some(dag)) => dag,
                Ok(None) => return,
                Err(UserCaused(cause)) => {
                    drop(state);
                    self.finalize_job(Some(cause));
                    return;
                }
            }
        };
        if let Err(UserCaused(cause)) = self.start_with_dag(dag) {
            self.finalize_job(Some(cause));
        }
    }

    /// The locked half of [`MasterContext::try_start_job`]: checks the
    /// preconditions, transitions to `STARTING`, and deserializes the
    /// DAG. Returns `Ok(None)` when there is nothing to do.
    fn resolve_dag(
        self: &Arc<Self>,
        state: &mut MasterState,
        execution_id_gen: &dyn Fn() -> ExecutionId,
    ) -> Result<Option<Dag>, UserCaused> {
        let job_id = self.job_id();
        if state.is_cancelled() {
            debug!("skipping init of {}: already cancelled", self.job_id_string());
            return Err(UserCaused(JobError::Cancelled));
        }
        if state.status != JobStatus::NotRunning {
            debug!(
                "not starting {}: status is {}",
                self.job_id_string(),
                state.status
            );
            return Ok(None);
        }
        if state.execution_record.suspended {
            state.execution_record.suspended = false;
            self.services
                .job_store
                .write_job_execution_record(job_id, &state.execution_record, false);
            state.set_status(job_id, JobStatus::NotRunning);
        }
        if self.schedule_restart_if_quorum_absent(state)
            || self.schedule_restart_if_cluster_not_safe(state)
        {
            return Ok(None);
        }
        state.set_status(job_id, JobStatus::Starting);

        // ensure the execution record exists
        self.services
            .job_store
            .write_job_execution_record(job_id, &state.execution_record, true);

        if let Some(mode) = state.requested_termination_mode {
            if mode.action_after_terminate != ActionAfterTerminate::Restart {
                return Err(UserCaused(JobError::TerminateRequested(mode)));
            }
            // the requested termination is a restart; ignore it, we are
            // just starting
            state.requested_termination_mode = None;
        }
        let dag: Dag = match serde_json::from_slice(&self.job_record.serialized_dag) {
            Ok(dag) => dag,
            Err(e) => {
                warn!("DAG deserialization failed for {}: {e}", self.job_id_string());
                return Err(UserCaused(JobError::user(
                    format!("DAG deserialization failed: {e}"),
                    false,
                )));
            }
        };
        // save a copy of the vertex list because it is going to change
        state.vertices = Some(dag.vertices().cloned().collect());
        state.execution_id = execution_id_gen();
        self.services.snapshots.on_execution_started(state.execution_id);
        state.execution_completion = Completion::new();
        Ok(Some(dag))
    }

    /// The unlocked half of [`MasterContext::try_start_job`]: splices the
    /// restore vertices, builds the execution plans, and dispatches phase
    /// A of the start protocol.
    fn start_with_dag(self: &Arc<Self>, mut dag: Dag) -> Result<(), UserCaused> {
        let job_id = self.job_id();
        // must render this before the snapshot-restore rewrite
        let dot_representation = dag.to_dot();

        let (snapshot_id, ongoing_snapshot_id, execution_id, snapshot_map_name) = {
            let state = self.lock();
            let record = &state.execution_record;
            let map_name = if record.has_snapshot() {
                Some(record.successful_snapshot_data_map_name(job_id))
            } else {
                self.job_record
                    .config
                    .initial_snapshot_name
                    .as_deref()
                    .map(exported_snapshot_map_name)
            };
            (
                record.snapshot_id,
                record.ongoing_snapshot_id,
                state.execution_id,
                map_name,
            )
        };
        match snapshot_map_name {
            Some(map_name) => {
                let snapshot_name = self.job_record.config.initial_snapshot_name.as_deref();
                rewrite_dag_with_snapshot_restore(
                    &mut dag,
                    snapshot_id,
                    &map_name,
                    snapshot_name,
                    &self.job_id_string(),
                    self.services.snapshot_validator.as_ref(),
                )
                .map_err(UserCaused)?;
            }
            None => info!("didn't find any snapshot to restore for {}", self.job_id_string()),
        }

        let members_view = self.services.cluster.members_view();
        info!(
            "start executing {}, execution graph in DOT format:\n{dot_representation}",
            self.job_id_string()
        );
        debug!("building execution plans for {}", self.job_id_string());
        let plan_map = self
            .services
            .plan_builder
            .build(
                &members_view,
                &dag,
                job_id,
                execution_id,
                &self.job_record.config,
                ongoing_snapshot_id,
            )
            .map_err(UserCaused)?;
        debug!(
            "built execution plans for {} on {} members",
            self.job_id_string(),
            plan_map.len()
        );
        let participants: Vec<MemberInfo> = plan_map.keys().cloned().collect();
        let op_plans = plan_map.clone();
        self.lock().execution_plan_map = Some(plan_map);

        let members_view_version = members_view.version;
        let mc = Arc::clone(self);
        self.invoke_on_participants(
            move |member| JobOperation::InitExecution {
                job_id,
                execution_id,
                members_view_version,
                participants: participants.clone(),
                plan: op_plans
                    .get(member)
                    .cloned()
                    .expect("operations are constructed only for planned participants"),
            },
            move |responses| mc.on_init_step_completed(responses),
            None,
        );
        self.metrics.executions_started_total.inc();
        Ok(())
    }

    fn schedule_restart_if_quorum_absent(&self, state: &mut MasterState) -> bool {
        let quorum_size = state.execution_record.quorum_size;
        if self.services.cluster.is_quorum_present(quorum_size) {
            return false;
        }
        debug!(
            "rescheduling restart of {}: quorum size {quorum_size} is not met",
            self.job_id_string()
        );
        self.schedule_restart(state);
        true
    }

    fn schedule_restart_if_cluster_not_safe(&self, state: &mut MasterState) -> bool {
        if self.services.cluster.should_start_jobs() {
            return false;
        }
        debug!(
            "rescheduling restart of {}: cluster is not safe",
            self.job_id_string()
        );
        self.schedule_restart(state);
        true
    }

    /// Parks the job in `NOT_RUNNING` and asks the coordination service
    /// to call `try_start_job` again later.
    fn schedule_restart(&self, state: &mut MasterState) {
        let job_id = self.job_id();
        if !matches!(
            state.status,
            JobStatus::NotRunning | JobStatus::Starting | JobStatus::Running
        ) {
            error!(
                "restart of {} scheduled in an unexpected state: {}",
                self.job_id_string(),
                state.status
            );
            return;
        }
        state.set_status(job_id, JobStatus::NotRunning);
        self.services.coordination.schedule_restart(job_id);
        self.metrics.restarts_scheduled_total.inc();
    }

    /// Called when all phase-A (`InitExecution`) invocations are done.
    fn on_init_step_completed(self: &Arc<Self>, responses: BTreeMap<MemberInfo, JobResponse>) {
        let failures = extract_failures(&responses);
        let error = self.classify_responses("Init", &failures);
        let status = self.status();
        if error.is_none() && status == JobStatus::Starting {
            self.invoke_start_execution();
        } else {
            let execution_id = self.execution_id();
            let mc = Arc::clone(self);
            let error = error.unwrap_or_else(|| {
                JobError::IllegalState(format!(
                    "cannot execute {}: status is {status}",
                    mc.job_id_string()
                ))
            });
            self.cancel_execution_invocations(
                execution_id,
                None,
                Some(Box::new(move || mc.on_complete_execution(Some(error)))),
            );
        }
    }

    /// Phase B of the start protocol: dispatches `StartExecution` to all
    /// participants and transitions to `RUNNING`.
    ///
    /// If a participant leaves or the execution fails on a participant
    /// locally, executions are cancelled on the remaining participants
    /// and the completion callback fires once all invocations return.
    fn invoke_start_execution(self: &Arc<Self>) {
        debug!("executing {}", self.job_id_string());
        let job_id = self.job_id();
        let (execution_id, pending_termination, callback) = {
            let mut state = self.lock();
            let callback = Arc::new(ExecutionCompletionCallback::new(state.execution_id));
            state.execution_completion_callback = Some(Arc::clone(&callback));
            (
                state.execution_id,
                state.requested_termination_mode,
                callback,
            )
        };
        if let Some(mode) = pending_termination {
            self.handle_termination(mode);
        }

        let mc = Arc::clone(self);
        let completion = move |responses: BTreeMap<MemberInfo, JobResponse>| {
            if responses.values().any(JobResponse::is_failure) {
                error!(
                    "{}: some StartExecution invocations failed: {responses:?}",
                    mc.job_id_string()
                );
            } else {
                let metrics: BTreeMap<MemberInfo, Option<RawJobMetrics>> = responses
                    .iter()
                    .map(|(member, response)| {
                        let raw = match response {
                            JobResponse::Done { metrics, .. } => Some(metrics.clone()),
                            _ => None,
                        };
                        (member.clone(), raw)
                    })
                    .collect();
                if let Some(merged) = merge_member_metrics(&metrics, &BTreeMap::new()) {
                    mc.lock().job_metrics = merged;
                }
            }
            let failures = extract_failures(&responses);
            let error = mc.classify_responses("Execution", &failures);
            mc.on_complete_execution(error);
        };

        self.lock().set_status(job_id, JobStatus::Running);
        self.invoke_on_participants(
            move |_| JobOperation::StartExecution {
                job_id,
                execution_id,
            },
            completion,
            Some(callback),
        );

        if self.job_record.config.processing_guarantee != ProcessingGuarantee::None {
            self.services
                .coordination
                .schedule_snapshots(job_id, execution_id);
        }
    }

    /// Requests termination of the job in the given mode.
    ///
    /// Returns the current execution-completion future and `None` if this
    /// call initiated the termination, or a reason why it did nothing.
    ///
    /// With `allow_while_exporting_snapshot` unset, termination is
    /// rejected while the job status is `SUSPENDED_EXPORTING_SNAPSHOT`.
    pub async fn request_termination(
        self: &Arc<Self>,
        mode: TerminationMode,
        allow_while_exporting_snapshot: bool,
    ) -> (Completion<()>, Option<String>) {
        // Switch a graceful mode to forceful if the job does not take
        // snapshots, except for graceful cancellation, which is allowed
        // even without snapshotting.
        let mut mode = mode;
        if self.job_record.config.processing_guarantee == ProcessingGuarantee::None
            && mode != TerminationMode::CANCEL_GRACEFUL
        {
            mode = mode.without_terminal_snapshot();
        }

        let job_id = self.job_id();
        let local_status;
        let result = {
            let mut state = self.lock();
            local_status = state.status;
            if local_status == JobStatus::SuspendedExportingSnapshot
                && !allow_while_exporting_snapshot
            {
                return (
                    state.execution_completion.clone(),
                    Some(format!(
                        "Cannot cancel when job status is {}",
                        JobStatus::SuspendedExportingSnapshot
                    )),
                );
            }
            if local_status == JobStatus::Suspended && mode != TerminationMode::CANCEL_FORCEFUL {
                // when suspended, only cancellation has any effect
                return (
                    state.execution_completion.clone(),
                    Some(format!("Job is {}", JobStatus::Suspended)),
                );
            }
            if let Some(current) = state.requested_termination_mode {
                // don't report the cancellation of a cancelled job as an
                // error
                let message = if current == TerminationMode::CANCEL_FORCEFUL
                    && mode == TerminationMode::CANCEL_FORCEFUL
                {
                    None
                } else {
                    Some(format!("Job is already terminating in mode: {}", current.name()))
                };
                return (state.execution_completion.clone(), message);
            }
            state.requested_termination_mode = Some(mode);
            self.metrics
                .terminations_requested_total
                .with_label_values(&[mode.name().as_str()])
                .inc();
            // handle cancellation of a suspended job
            if local_status == JobStatus::Suspended
                || local_status == JobStatus::SuspendedExportingSnapshot
            {
                state.set_status(job_id, JobStatus::Failed);
                self.set_final_result(Some(JobError::Cancelled));
            }
            if mode.with_terminal_snapshot {
                self.services.snapshots.enqueue_snapshot(None, true);
            }
            (state.execution_completion.clone(), None)
        };

        if local_status == JobStatus::Suspended {
            let completion_time = self.now.now();
            if let Err(e) = self
                .services
                .coordination
                .complete_job(job_id, completion_time, Some(JobError::Cancelled))
                .await
            {
                warn!("completion of suspended {} failed: {e}", self.job_id_string());
            }
        } else if local_status == JobStatus::Running || local_status == JobStatus::Starting {
            self.handle_termination(mode);
        }

        result
    }

    /// Drives a requested termination. Idempotent: may be called multiple
    /// times for the same termination.
    fn handle_termination(self: &Arc<Self>, mode: TerminationMode) {
        if mode.with_terminal_snapshot {
            self.services.snapshots.try_begin_snapshot();
        } else {
            let callback = self.lock().execution_completion_callback.clone();
            if let Some(callback) = callback {
                callback.cancel_invocations(self, Some(mode));
            }
        }
    }

    /// Broadcasts `TerminateExecution` to all participants of
    /// `execution_id` and runs `callback` once every invocation has
    /// returned. Failed invocations are logged, not retried.
    pub(crate) fn cancel_execution_invocations(
        self: &Arc<Self>,
        execution_id: ExecutionId,
        mode: Option<TerminationMode>,
        callback: Option<Box<dyn FnOnce() + Send>>,
    ) {
        let job_id = self.job_id();
        let mc = Arc::clone(self);
        self.invoke_on_participants(
            move |_| JobOperation::TerminateExecution {
                job_id,
                execution_id,
                mode,
            },
            move |responses| {
                if responses.values().any(JobResponse::is_failure) {
                    error!(
                        "{}: some TerminateExecution invocations failed, execution might \
                         remain stuck: {responses:?}",
                        mc.job_id_string()
                    );
                }
                if let Some(callback) = callback {
                    callback();
                }
            },
            None,
        );
    }

    /// Maps a per-member response set to the job-level outcome:
    ///
    /// - `None` if there is no failure;
    /// - `Cancelled` if the job is being cancelled forcefully;
    /// - `TerminateRequested` if the execution stopped due to a requested
    ///   termination, except for graceful cancellation, which yields
    ///   `Cancelled`;
    /// - the first user failure, if there is one (restartable or not);
    /// - otherwise `TopologyChanged`: the remaining failures all say a
    ///   participant left the cluster.
    fn classify_responses(
        &self,
        op_name: &str,
        responses: &BTreeMap<MemberInfo, Option<JobError>>,
    ) -> Option<JobError> {
        let (plan_size, requested_mode, cancelled) = {
            let state = self.lock();
            (
                state.execution_plan_map.as_ref().map_or(0, BTreeMap::len),
                state.requested_termination_mode,
                state.is_cancelled(),
            )
        };
        if cancelled {
            debug!("{} to be cancelled after {op_name}", self.job_id_string());
            return Some(JobError::Cancelled);
        }

        let failures: Vec<&JobError> = responses.values().flatten().collect();
        if !failures.is_empty() {
            debug!(
                "{op_name} of {} has failures: {failures:?}",
                self.job_id_string()
            );
        }
        let successful_members_count = responses.len() - failures.len();
        if successful_members_count == plan_size {
            debug!("{op_name} of {} was successful", self.job_id_string());
            return None;
        }

        // Handle terminal-snapshot terminations. If only part of the
        // members stopped with the terminal snapshot and others completed
        // normally, the terminal snapshot will fail, but we still handle
        // it as if it were done. Any other failure takes precedence.
        if !failures.is_empty()
            && failures
                .iter()
                .all(|e| **e == JobError::TerminatedWithSnapshot)
        {
            debug_assert_eq!(op_name, "Execution");
            debug!(
                "{op_name} of {} terminated after a terminal snapshot",
                self.job_id_string()
            );
            match requested_mode {
                Some(mode) if mode.with_terminal_snapshot => {
                    return Some(if mode == TerminationMode::CANCEL_GRACEFUL {
                        JobError::Cancelled
                    } else {
                        JobError::TerminateRequested(mode)
                    });
                }
                _ => {
                    error!(
                        "{} terminated with a terminal snapshot but no termination \
                         with terminal snapshot was requested",
                        self.job_id_string()
                    );
                    return Some(JobError::IllegalState(
                        "terminal snapshot without matching termination request".into(),
                    ));
                }
            }
        }

        // If there is no user-code failure, at least one participant left
        // the cluster and the remaining ones returned topology failures.
        failures
            .iter()
            .find(|e| {
                !matches!(e, JobError::Cancelled | JobError::TerminatedWithSnapshot)
                    && !e.is_topology()
            })
            .map(|e| (*e).clone())
            .or(Some(JobError::TopologyChanged))
    }

    /// Routes a finished execution to the finalizer, waiting for the
    /// terminal snapshot first when the termination asked for one.
    fn on_complete_execution(self: &Arc<Self>, error: Option<JobError>) {
        let status = self.status();
        let mut error = error;
        if status != JobStatus::Starting && status != JobStatus::Running {
            match &error {
                Some(e) => error!(
                    "cannot properly complete failed {}: status is {status}: {e}",
                    self.job_id_string()
                ),
                None => error!(
                    "cannot properly complete {}: status is {status}",
                    self.job_id_string()
                ),
            }
            error = Some(JobError::IllegalState("job coordination failed".into()));
        }
        let awaits_terminal_snapshot = matches!(
            &error,
            Some(JobError::TerminateRequested(mode)) if mode.with_terminal_snapshot
        );
        if awaits_terminal_snapshot {
            // wait for the terminal snapshot to finish before finalizing;
            // never block the caller on it
            let terminal_snapshot = self.services.snapshots.terminal_snapshot_future();
            let mc = Arc::clone(self);
            let job_id = self.job_id();
            task::spawn(
                || format!("finalize-after-terminal-snapshot-{job_id}"),
                async move {
                    terminal_snapshot.wait().await;
                    mc.finalize_job(error);
                },
            );
            return;
        }
        self.finalize_job(error);
    }

    /// Finalizes a finished execution: releases vertex resources, decides
    /// the job's next state, and applies it.
    pub(crate) fn finalize_job(self: &Arc<Self>, failure: Option<JobError>) {
        let job_id = self.job_id();
        let execution_completion;
        let deferred = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                self.log_ignored_completion(&failure, state.status);
                return;
            }
            self.complete_vertices(&mut state, failure.as_ref());

            // reset state for the next execution
            state.members_with_completed_execution.clear();
            state.partial_metrics.clear();
            let was_cancelled = state.is_cancelled();
            state.requested_termination_mode = None;
            state.execution_completion_callback = None;
            state.execution_plan_map = None;
            let termination_action = match &failure {
                Some(JobError::TerminateRequested(mode)) => Some(mode.action_after_terminate),
                _ => None,
            };
            self.services.snapshots.on_execution_terminated();
            execution_completion = state.execution_completion.clone();

            let restartable = failure.as_ref().is_some_and(JobError::is_restartable);
            let config = &self.job_record.config;
            if termination_action == Some(ActionAfterTerminate::Restart) {
                // restart was requested: restart immediately
                state.set_status(job_id, JobStatus::NotRunning);
                DeferredAction::RestartJob
            } else if restartable && !was_cancelled && config.auto_scaling {
                // restart is due to a failure: schedule it after a delay
                self.schedule_restart(&mut state);
                DeferredAction::None
            } else if termination_action == Some(ActionAfterTerminate::Suspend)
                || (restartable
                    && !was_cancelled
                    && !config.auto_scaling
                    && config.processing_guarantee != ProcessingGuarantee::None)
            {
                state.set_status(job_id, JobStatus::Suspended);
                state.execution_record.suspended = true;
                DeferredAction::WriteSuspendedRecord(state.execution_record.clone())
            } else {
                let success = self.is_success(failure.as_ref(), state.execution_start.elapsed());
                state.set_status(
                    job_id,
                    if success {
                        JobStatus::Completed
                    } else {
                        JobStatus::Failed
                    },
                );
                self.metrics
                    .executions_finalized_total
                    .with_label_values(&[if success { "completed" } else { "failed" }])
                    .inc();
                if matches!(failure, Some(JobError::LocalMemberReset)) {
                    debug!(
                        "cancelling {} locally: member (local or remote) reset. We don't \
                         delete job metadata: job will restart on majority cluster",
                        self.job_id_string()
                    );
                    self.set_final_result(Some(JobError::Cancelled));
                    return;
                }
                DeferredAction::CompleteJob(failure.clone())
            }
        };
        execution_completion.complete(());
        match deferred {
            DeferredAction::None => {}
            DeferredAction::RestartJob => self.services.coordination.restart_job(job_id),
            DeferredAction::WriteSuspendedRecord(record) => {
                self.services
                    .job_store
                    .write_job_execution_record(job_id, &record, false);
            }
            DeferredAction::CompleteJob(failure) => {
                let mc = Arc::clone(self);
                let completion_time = self.now.now();
                task::spawn(
                    || format!("complete-job-{job_id}"),
                    async move {
                        match mc
                            .services
                            .coordination
                            .complete_job(job_id, completion_time, failure.clone())
                            .await
                        {
                            Ok(()) => mc.set_final_result(failure),
                            Err(e) => {
                                warn!("completion of {} failed: {e}", mc.job_id_string());
                            }
                        }
                    },
                );
            }
        }
    }

    /// Completes the job-completion future with the job's terminal
    /// outcome. At most the first call has any effect.
    pub(crate) fn set_final_result(&self, failure: Option<JobError>) {
        let result = match failure {
            None => Ok(()),
            Some(failure) => Err(failure),
        };
        if !self.job_completion.complete(result) {
            debug!(
                "final result of {} already set, ignoring",
                self.job_id_string()
            );
        }
    }

    fn is_success(&self, failure: Option<&JobError>, elapsed: Duration) -> bool {
        let elapsed_ms = elapsed.as_millis();
        match failure {
            None => {
                info!(
                    "execution of {} completed in {elapsed_ms} ms",
                    self.job_id_string()
                );
                true
            }
            Some(e @ (JobError::Cancelled | JobError::TerminateRequested(_))) => {
                info!(
                    "execution of {} completed in {elapsed_ms} ms, reason={e}",
                    self.job_id_string()
                );
                false
            }
            Some(e) => {
                error!(
                    "execution of {} failed after {elapsed_ms} ms: {e}",
                    self.job_id_string()
                );
                false
            }
        }
    }

    fn log_ignored_completion(&self, failure: &Option<JobError>, status: JobStatus) {
        match failure {
            Some(e) => error!(
                "ignoring failure completion of {} because status is {status}: {e}",
                self.job_id_string()
            ),
            None => error!(
                "ignoring completion of {} because status is {status}",
                self.job_id_string()
            ),
        }
    }

    /// Releases master-side vertex resources, swallowing individual
    /// errors: finalization must never fail.
    fn complete_vertices(&self, state: &mut MasterState, failure: Option<&JobError>) {
        if let Some(vertices) = &state.vertices {
            for vertex in vertices {
                if let Err(e) = self.services.plan_builder.complete_vertex(vertex, failure) {
                    error!(
                        "{} encountered an exception releasing resources of vertex '{}', \
                         ignoring it: {e}",
                        self.job_id_string(),
                        vertex.name
                    );
                }
            }
        }
    }

    /// Resumes a suspended job.
    pub fn resume_job(self: &Arc<Self>, execution_id_gen: &dyn Fn() -> ExecutionId) {
        {
            let mut state = self.lock();
            if state.status != JobStatus::Suspended {
                info!(
                    "not resuming {}: not {}, but {}",
                    self.job_id_string(),
                    JobStatus::Suspended,
                    state.status
                );
                return;
            }
            state.set_status(self.job_id(), JobStatus::NotRunning);
        }
        debug!("resuming {}", self.job_id_string());
        self.try_start_job(execution_id_gen);
    }

    fn has_participant(&self, uuid: Uuid) -> bool {
        // a member is a participant when it is the master member (that's
        // us) or when it is in the execution plan
        self.services.cluster.local_member().uuid == uuid
            || self
                .lock()
                .execution_plan_map
                .as_ref()
                .is_some_and(|plans| plans.keys().any(|m| m.uuid == uuid))
    }

    /// Called when a job participant is about to gracefully shut down.
    /// Initiates a graceful restart with a terminal snapshot and returns
    /// a future completed when the current execution has terminated; the
    /// future is already complete if the member is not a participant.
    pub async fn on_participant_graceful_shutdown(self: &Arc<Self>, uuid: Uuid) -> Completion<()> {
        if self.has_participant(uuid) {
            self.gracefully_terminate().await
        } else {
            Completion::completed(())
        }
    }

    /// Gracefully terminates the job for a restart, with a terminal
    /// snapshot.
    pub async fn gracefully_terminate(self: &Arc<Self>) -> Completion<()> {
        self.request_termination(TerminationMode::RESTART_GRACEFUL, false)
            .await
            .0
    }

    /// Checks whether the job runs on all data members and restarts it
    /// gracefully if the cluster has grown.
    ///
    /// Returns `false` if the check should be repeated later: the job is
    /// running on fewer members but the restart request did not go
    /// through. Returns `true` if the job is not running, has
    /// auto-scaling disabled, already runs on all members, or the restart
    /// was requested successfully.
    pub async fn maybe_scale_up(self: &Arc<Self>, data_members_count: usize) -> bool {
        if !self.job_record.config.auto_scaling {
            return true;
        }

        // We only compare the number of our participants and the current
        // members. If any of our participants is not among the current
        // data members, the job will be restarted anyway; if it is the
        // other way around, the sizes won't match.
        let plan_members = {
            let state = self.lock();
            state.execution_plan_map.as_ref().map(BTreeMap::len)
        };
        match plan_members {
            None => {
                debug!(
                    "not scaling up {}: not running",
                    self.job_id_string()
                );
                true
            }
            Some(count) if count == data_members_count => {
                debug!(
                    "not scaling up {}: already running on all members",
                    self.job_id_string()
                );
                true
            }
            Some(count) => {
                if self.status() == JobStatus::Running
                    && self
                        .request_termination(TerminationMode::RESTART_GRACEFUL, false)
                        .await
                        .1
                        .is_none()
                {
                    info!(
                        "requested restart of {} to make use of added member(s). Job was \
                         running on {count} members, cluster now has {data_members_count} \
                         data members with assigned partitions",
                        self.job_id_string()
                    );
                    true
                } else {
                    // status was not RUNNING or the termination request
                    // did not go through; try again later
                    false
                }
            }
        }
    }

    /// Completes `client_future` with the job's current metrics.
    ///
    /// While the job is running, fresh metrics are collected from every
    /// participant; otherwise the last known metrics are returned
    /// immediately.
    pub fn collect_metrics(
        self: &Arc<Self>,
        client_future: Completion<Result<JobMetrics, JobError>>,
    ) {
        if self.status() == JobStatus::Running {
            let job_id = self.job_id();
            let execution_id = self.execution_id();
            let mc = Arc::clone(self);
            self.invoke_on_participants(
                move |_| JobOperation::GetLocalMetrics {
                    job_id,
                    execution_id,
                },
                move |responses| mc.complete_with_merged_metrics(client_future, responses),
                None,
            );
        } else {
            client_future.complete(Ok(self.job_metrics()));
        }
    }

    fn complete_with_merged_metrics(
        self: &Arc<Self>,
        client_future: Completion<Result<JobMetrics, JobError>>,
        responses: BTreeMap<MemberInfo, JobResponse>,
    ) {
        // If any member has no such execution, retry: the master sees the
        // job as RUNNING but some members may have terminated already.
        // When retrying, either the job is no longer RUNNING and we
        // return the last known metrics, or all members that did not
        // terminate are running and we get fresh metrics.
        if responses
            .values()
            .any(|r| matches!(r, JobResponse::Failure(JobError::ExecutionNotFound)))
        {
            self.schedule_retry_collect_metrics(client_future);
            return;
        }
        let first_failure = responses.values().find_map(|r| match r {
            JobResponse::Failure(e) => Some(e.clone()),
            _ => None,
        });
        if let Some(failure) = first_failure {
            client_future.complete(Err(failure));
            return;
        }
        let by_member: BTreeMap<MemberInfo, Option<RawJobMetrics>> = responses
            .iter()
            .map(|(member, response)| {
                let raw = match response {
                    JobResponse::Metrics(raw) => Some(raw.clone()),
                    _ => None,
                };
                (member.clone(), raw)
            })
            .collect();
        let partial_metrics = self.lock().partial_metrics.clone();
        match merge_member_metrics(&by_member, &partial_metrics) {
            Some(merged) => {
                client_future.complete(Ok(merged));
            }
            // a member completed before its partial metrics were
            // recorded; the retry covers the gap
            None => self.schedule_retry_collect_metrics(client_future),
        }
    }

    fn schedule_retry_collect_metrics(
        self: &Arc<Self>,
        client_future: Completion<Result<JobMetrics, JobError>>,
    ) {
        trace!(
            "rescheduling metrics collection for {}: some members have already \
             completed the execution",
            self.job_id_string()
        );
        let mc = Arc::clone(self);
        let job_id = self.job_id();
        task::spawn(
            || format!("collect-metrics-retry-{job_id}"),
            async move {
                tokio::time::sleep(COLLECT_METRICS_RETRY_DELAY).await;
                mc.collect_metrics(client_future);
            },
        );
    }
}

/// Extracts the per-member failure view of a response map: `None` for a
/// success, `Some` for a bare failure or the failure slot of a
/// [`JobResponse::Done`].
fn extract_failures(
    responses: &BTreeMap<MemberInfo, JobResponse>,
) -> BTreeMap<MemberInfo, Option<JobError>> {
    responses
        .iter()
        .map(|(member, response)| {
            let failure = match response {
                JobResponse::Failure(e) => Some(e.clone()),
                JobResponse::Done { failure, .. } => failure.clone(),
                _ => None,
            };
            (member.clone(), failure)
        })
        .collect()
}

/// Merges per-member metric batches into the job-level view, prefixing
/// every metric name with its member of origin.
///
/// A `None` response means the member already completed the execution;
/// its batch is taken from `partial_metrics` instead. Returns `None` if
/// metrics for some member are missing from both maps.
fn merge_member_metrics(
    responses: &BTreeMap<MemberInfo, Option<RawJobMetrics>>,
    partial_metrics: &BTreeMap<MemberInfo, RawJobMetrics>,
) -> Option<JobMetrics> {
    let mut merged = JobMetrics::empty();
    for (member, response) in responses {
        let raw = match response {
            Some(raw) => raw,
            None => partial_metrics.get(member)?,
        };
        let prefixed = raw.prefix_names(&member_prefix(member));
        merged = merged.merge(JobMetrics::of(prefixed));
    }
    Some(merged)
}

/// Attached to the per-response events of `StartExecution` invocations:
/// records member completion, caches partial metrics, and cancels the
/// other invocations when a participant fails.
#[derive(Debug)]
pub(crate) struct ExecutionCompletionCallback {
    execution_id: ExecutionId,
    invocations_cancelled: AtomicBool,
}

impl ExecutionCompletionCallback {
    pub(crate) fn new(execution_id: ExecutionId) -> Self {
        ExecutionCompletionCallback {
            execution_id,
            invocations_cancelled: AtomicBool::new(false),
        }
    }

    /// Observes one participant's `StartExecution` reply.
    pub(crate) fn accept(
        &self,
        mc: &Arc<MasterContext>,
        member: &MemberInfo,
        response: &JobResponse,
    ) {
        let mut state = mc.lock();
        state.members_with_completed_execution.insert(member.clone());
        match response {
            JobResponse::Failure(e) => {
                if *e != JobError::TerminatedWithSnapshot {
                    drop(state);
                    self.cancel_invocations(mc, None);
                }
            }
            JobResponse::Done { metrics, .. } => {
                state.partial_metrics.insert(member.clone(), metrics.clone());
            }
            _ => {}
        }
    }

    /// Broadcasts `TerminateExecution` to all participants, at most once
    /// across all races between per-response failures and external
    /// termination requests.
    pub(crate) fn cancel_invocations(
        &self,
        mc: &Arc<MasterContext>,
        mode: Option<TerminationMode>,
    ) {
        if self
            .invocations_cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            mc.cancel_execution_invocations(self.execution_id, mode, None);
        }
    }
}
