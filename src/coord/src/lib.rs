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

//! Coordination of distributed job execution.
//!
//! Exactly one node of a Rill cluster, the master, drives each job's
//! lifecycle. This crate implements the master-side per-job controller:
//! it translates a stored job definition into per-member execution plans,
//! orchestrates the two-phase start protocol across participants, reacts
//! to termination requests, classifies heterogeneous failure sets into a
//! single job-level outcome, decides the job's next state (retry,
//! suspend, restart, complete, fail), and aggregates per-member metrics
//! into a job-level view.
//!
//! The controller is a set of callback-driven state transitions guarded
//! by a per-job master lock; there is no owning thread per job. Cluster
//! membership, the RPC transport, the job store, snapshot scheduling, and
//! the plan builder are external collaborators, consumed through the
//! traits in [`service`] and the client traits of the sibling crates.

pub mod context;
pub mod metrics;
pub mod record;
pub mod restore;
pub mod service;

mod job;

pub use context::{MasterContext, Services};
pub use metrics::CoordMetrics;
pub use record::{JobExecutionRecord, JobRecord, EXPORTED_SNAPSHOTS_PREFIX};
pub use restore::{SNAPSHOT_RESTORE_EDGE_PRIORITY, SNAPSHOT_VERTEX_PREFIX};
