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

//! The participant protocol.
//!
//! The coordinator drives each execution with four operations, dispatched
//! to every participant. Responses are heterogeneous — a success payload,
//! a classified failure, or the completed-execution sentinel — so they
//! are modeled as one tagged [`JobResponse`] enum rather than an untyped
//! value slot.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rill_cluster_client::MemberInfo;

use crate::errors::JobError;
use crate::metrics::RawJobMetrics;
use crate::plan::ExecutionPlan;
use crate::types::{ExecutionId, JobId, TerminationMode};

/// An operation sent to a participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JobOperation {
    /// Phase A of the start protocol: hands the participant its execution
    /// plan. The participant sets up the plan but does not start it.
    InitExecution {
        /// The job being started.
        job_id: JobId,
        /// The execution attempt.
        execution_id: ExecutionId,
        /// The membership version the plan was built against. A
        /// participant observing a newer view rejects the init.
        members_view_version: u64,
        /// All participants of this execution.
        participants: Vec<MemberInfo>,
        /// The participant's own plan.
        plan: ExecutionPlan,
    },
    /// Phase B of the start protocol: starts the initialized execution.
    /// The response arrives when the participant's share terminates.
    StartExecution {
        /// The job being started.
        job_id: JobId,
        /// The execution attempt.
        execution_id: ExecutionId,
    },
    /// Cooperative stop signal.
    TerminateExecution {
        /// The job being terminated.
        job_id: JobId,
        /// The execution attempt being terminated.
        execution_id: ExecutionId,
        /// The requested mode, or `None` when the coordinator is tearing
        /// down a broken execution.
        mode: Option<TerminationMode>,
    },
    /// Requests the participant's current metrics for an execution.
    GetLocalMetrics {
        /// The job being queried.
        job_id: JobId,
        /// The execution attempt being queried.
        execution_id: ExecutionId,
    },
}

impl JobOperation {
    /// The protocol name of this operation, used in logs and by the
    /// result classifier.
    pub fn name(&self) -> &'static str {
        match self {
            JobOperation::InitExecution { .. } => "Init",
            JobOperation::StartExecution { .. } => "Execution",
            JobOperation::TerminateExecution { .. } => "Terminate",
            JobOperation::GetLocalMetrics { .. } => "GetLocalMetrics",
        }
    }
}

/// A participant's reply to a [`JobOperation`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JobResponse {
    /// The operation succeeded and carries no payload. Replies to
    /// `InitExecution` and `TerminateExecution`.
    Ok,
    /// The participant's share of the execution terminated. Replies to
    /// `StartExecution`.
    Done {
        /// The participant's final metrics for the execution.
        metrics: RawJobMetrics,
        /// The local outcome: `None` on success, or the failure the
        /// execution terminated with.
        failure: Option<JobError>,
    },
    /// The participant's current metrics. Replies to `GetLocalMetrics`.
    Metrics(RawJobMetrics),
    /// The participant already completed the execution and discarded its
    /// metrics. Replies to `GetLocalMetrics`.
    ExecutionCompleted,
    /// The operation failed: either the invocation never reached a
    /// healthy participant or the participant raised an error before
    /// producing a payload.
    Failure(JobError),
}

impl JobResponse {
    /// Reports whether this response is a bare failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, JobResponse::Failure(_))
    }
}

/// A client for invoking operations on job participants.
///
/// The transport is out of scope for the coordinator: implementations
/// fold every transport-level error into [`JobResponse::Failure`], so
/// `invoke` is infallible at the type level and the classifier sees one
/// uniform response map.
#[async_trait]
pub trait ParticipantClient: fmt::Debug + Send + Sync {
    /// Invokes `op` on `member` and returns its response.
    async fn invoke(&self, member: &MemberInfo, op: JobOperation) -> JobResponse;
}
