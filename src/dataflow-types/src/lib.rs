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

//! Shared types for the Rill dataflow layer.
//!
//! This crate holds the model that the coordinator, the participants, and
//! the stored job definitions agree on: the structural DAG, job statuses
//! and termination modes, execution plans, job metrics, the job-level
//! error taxonomy, and the participant protocol.

pub mod client;
pub mod dag;
pub mod errors;
pub mod metrics;
pub mod plan;
pub mod types;

pub use client::{JobOperation, JobResponse, ParticipantClient};
pub use dag::{Dag, DagError, Edge, PartitionKey, ProcessorSpec, Routing, Vertex};
pub use errors::JobError;
pub use metrics::{JobMetrics, RawJobMetrics};
pub use plan::ExecutionPlan;
pub use types::{
    ActionAfterTerminate, ExecutionId, JobConfig, JobId, JobStatus, ProcessingGuarantee,
    TerminationMode,
};
