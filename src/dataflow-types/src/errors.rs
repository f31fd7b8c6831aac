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

//! The job-level error taxonomy.
//!
//! Errors are classified, not typed: a participant failure, whatever its
//! transport-level shape, is folded into one of these variants before the
//! coordinator reasons about it. The classifier and the finalizer only
//! ever consult the variant and the predicates below.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::TerminationMode;

/// A classified, job-level error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobError {
    /// The job was cancelled by user request.
    #[error("the job was cancelled")]
    Cancelled,
    /// The current execution was stopped by a requested termination that
    /// is not a cancellation (restart, suspend, graceful restart).
    #[error("job termination was requested: {0}")]
    TerminateRequested(TerminationMode),
    /// A participant stopped after completing a terminal snapshot.
    #[error("execution terminated after a terminal snapshot")]
    TerminatedWithSnapshot,
    /// At least one participant left the cluster during execution.
    #[error("cluster topology changed during job execution")]
    TopologyChanged,
    /// A specific participant left the cluster.
    #[error("participant {uuid} left the cluster")]
    MemberLeft {
        /// The departed member.
        uuid: Uuid,
    },
    /// The participant has no execution with the requested id, typically
    /// because it already finished locally.
    #[error("execution not found on participant")]
    ExecutionNotFound,
    /// An exception raised in user DAG code, plan building, or DAG
    /// deserialization.
    #[error("failure in user code: {message}")]
    User {
        /// Description of the failure.
        message: String,
        /// Whether the failure is transient and worth retrying.
        restartable: bool,
    },
    /// The local member left the cluster; the job is cancelled locally
    /// without deleting its metadata.
    #[error("the local member was reset")]
    LocalMemberReset,
    /// An invariant violation inside the coordinator.
    #[error("illegal coordinator state: {0}")]
    IllegalState(String),
}

impl JobError {
    /// Creates a user-code error.
    pub fn user(message: impl Into<String>, restartable: bool) -> Self {
        JobError::User {
            message: message.into(),
            restartable,
        }
    }

    /// Reports whether this error signals a cluster topology change.
    pub fn is_topology(&self) -> bool {
        matches!(
            self,
            JobError::TopologyChanged | JobError::MemberLeft { .. }
        )
    }

    /// Reports whether this error is transient, i.e. the job may succeed
    /// if restarted later.
    pub fn is_restartable(&self) -> bool {
        match self {
            JobError::TopologyChanged
            | JobError::MemberLeft { .. }
            | JobError::ExecutionNotFound => true,
            JobError::User { restartable, .. } => *restartable,
            JobError::Cancelled
            | JobError::TerminateRequested(_)
            | JobError::TerminatedWithSnapshot
            | JobError::LocalMemberReset
            | JobError::IllegalState(_) => false,
        }
    }
}
