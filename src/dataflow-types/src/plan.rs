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

//! Execution plans.

use serde::{Deserialize, Serialize};

/// The per-member share of a job's execution, produced by the plan
/// builder and shipped to the member with the init operation.
///
/// The coordinator never looks inside a plan; it only addresses plans by
/// participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExecutionPlan {
    payload: Vec<u8>,
}

impl ExecutionPlan {
    /// Wraps an already-serialized plan payload.
    pub fn from_bytes(payload: Vec<u8>) -> Self {
        ExecutionPlan { payload }
    }

    /// The serialized plan payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }
}
