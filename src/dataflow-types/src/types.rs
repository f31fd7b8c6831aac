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

//! Job identifiers, statuses, termination modes, and configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The identifier of a job.
///
/// Stable across all executions of the job.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct JobId(pub u64);

/// The identifier of one execution attempt of a job.
///
/// A fresh, strictly greater id is allocated for every attempt, which
/// fences responses from stale attempts. The zero id never names a real
/// attempt.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ExecutionId(pub u64);

fn fmt_id(f: &mut fmt::Formatter, id: u64) -> fmt::Result {
    write!(
        f,
        "{:04x}-{:04x}-{:04x}-{:04x}",
        (id >> 48) & 0xffff,
        (id >> 32) & 0xffff,
        (id >> 16) & 0xffff,
        id & 0xffff,
    )
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_id(f, self.0)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_id(f, self.0)
    }
}

/// The lifecycle status of a job, as seen by the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// The job exists but no execution is in progress. A job waiting for
    /// a restart or for quorum is also `NotRunning`.
    NotRunning,
    /// Execution plans are being built and distributed to participants.
    Starting,
    /// All participants accepted their plans and execution is under way.
    Running,
    /// The job was suspended; its execution state is retained so it can
    /// be resumed later.
    Suspended,
    /// The job is suspended and a snapshot export is in progress. Driven
    /// externally; most terminations are blocked in this status.
    SuspendedExportingSnapshot,
    /// The job finished successfully. Terminal.
    Completed,
    /// The job finished with a failure or was cancelled. Terminal.
    Failed,
}

impl JobStatus {
    /// Reports whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Reports whether the transition from `self` to `to` is legal.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            NotRunning => matches!(to, NotRunning | Starting | Completed | Failed),
            Starting => matches!(to, Running | NotRunning | Suspended | Completed | Failed),
            Running => matches!(to, NotRunning | Suspended | Completed | Failed),
            Suspended => matches!(to, NotRunning | SuspendedExportingSnapshot | Failed),
            SuspendedExportingSnapshot => matches!(to, Suspended | Failed),
            Completed | Failed => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            JobStatus::NotRunning => "NOT_RUNNING",
            JobStatus::Starting => "STARTING",
            JobStatus::Running => "RUNNING",
            JobStatus::Suspended => "SUSPENDED",
            JobStatus::SuspendedExportingSnapshot => "SUSPENDED_EXPORTING_SNAPSHOT",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// What the job should do once the current execution has terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionAfterTerminate {
    /// Stop for good: the termination is a cancellation.
    None,
    /// Start a new execution after the current one terminates.
    Restart,
    /// Suspend the job after the current one terminates.
    Suspend,
}

/// A requested way of terminating a job's current execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminationMode {
    /// What happens after the execution has terminated.
    pub action_after_terminate: ActionAfterTerminate,
    /// Whether a terminal snapshot is taken before stopping.
    pub with_terminal_snapshot: bool,
    /// Whether participants drain in-flight data before stopping.
    pub graceful: bool,
}

impl TerminationMode {
    /// Cancel immediately, without a terminal snapshot.
    pub const CANCEL_FORCEFUL: TerminationMode = TerminationMode {
        action_after_terminate: ActionAfterTerminate::None,
        with_terminal_snapshot: false,
        graceful: false,
    };
    /// Cancel after taking a terminal snapshot.
    pub const CANCEL_GRACEFUL: TerminationMode = TerminationMode {
        action_after_terminate: ActionAfterTerminate::None,
        with_terminal_snapshot: true,
        graceful: true,
    };
    /// Restart immediately, without a terminal snapshot.
    pub const RESTART_FORCEFUL: TerminationMode = TerminationMode {
        action_after_terminate: ActionAfterTerminate::Restart,
        with_terminal_snapshot: false,
        graceful: false,
    };
    /// Restart after taking a terminal snapshot.
    pub const RESTART_GRACEFUL: TerminationMode = TerminationMode {
        action_after_terminate: ActionAfterTerminate::Restart,
        with_terminal_snapshot: true,
        graceful: true,
    };
    /// Suspend immediately, without a terminal snapshot.
    pub const SUSPEND_FORCEFUL: TerminationMode = TerminationMode {
        action_after_terminate: ActionAfterTerminate::Suspend,
        with_terminal_snapshot: false,
        graceful: false,
    };
    /// Suspend after taking a terminal snapshot.
    pub const SUSPEND_GRACEFUL: TerminationMode = TerminationMode {
        action_after_terminate: ActionAfterTerminate::Suspend,
        with_terminal_snapshot: true,
        graceful: true,
    };

    /// Returns the forceful equivalent of this mode, used when the job has
    /// no processing guarantee and a terminal snapshot would be pointless.
    pub fn without_terminal_snapshot(self) -> TerminationMode {
        TerminationMode {
            action_after_terminate: self.action_after_terminate,
            with_terminal_snapshot: false,
            graceful: false,
        }
    }

    /// The conventional name of this mode.
    pub fn name(&self) -> String {
        let action = match self.action_after_terminate {
            ActionAfterTerminate::None => "CANCEL",
            ActionAfterTerminate::Restart => "RESTART",
            ActionAfterTerminate::Suspend => "SUSPEND",
        };
        let manner = if self.graceful { "GRACEFUL" } else { "FORCEFUL" };
        format!("{action}_{manner}")
    }
}

impl fmt::Display for TerminationMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// The state-consistency guarantee a job's snapshots provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProcessingGuarantee {
    /// No snapshots are taken; on restart the job starts from scratch.
    #[default]
    None,
    /// Snapshots are taken; items may be reprocessed after a restart.
    AtLeastOnce,
    /// Snapshots are taken; state reflects each item exactly once.
    ExactlyOnce,
}

/// Per-job configuration stored with the job definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// A human-readable name for the job.
    pub name: Option<String>,
    /// The processing guarantee for the job's snapshots.
    pub processing_guarantee: ProcessingGuarantee,
    /// The interval between periodic snapshots, when the guarantee is not
    /// [`ProcessingGuarantee::None`].
    pub snapshot_interval: Duration,
    /// Whether the job restarts itself to make use of added members and
    /// to survive losing members.
    pub auto_scaling: bool,
    /// The name of an exported snapshot to restore the initial job state
    /// from, if any.
    pub initial_snapshot_name: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            name: None,
            processing_guarantee: ProcessingGuarantee::None,
            snapshot_interval: Duration::from_secs(10),
            auto_scaling: true,
            initial_snapshot_name: None,
        }
    }
}
