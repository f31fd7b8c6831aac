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

//! Prometheus metrics for the coordinator itself.
//!
//! These describe the coordinator's behavior, not the jobs' dataflow;
//! job-level metrics are collected from participants and exposed through
//! `MasterContext::collect_metrics`.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Coordinator metrics, registered once per process and shared by all
/// per-job contexts.
#[derive(Debug, Clone)]
pub struct CoordMetrics {
    pub(crate) executions_started_total: IntCounter,
    pub(crate) executions_finalized_total: IntCounterVec,
    pub(crate) terminations_requested_total: IntCounterVec,
    pub(crate) restarts_scheduled_total: IntCounter,
}

impl CoordMetrics {
    /// Creates the metrics and registers them with `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let executions_started_total = IntCounter::new(
            "rill_coord_executions_started_total",
            "The total number of job executions this coordinator has started.",
        )?;
        let executions_finalized_total = IntCounterVec::new(
            Opts::new(
                "rill_coord_executions_finalized_total",
                "The total number of job executions finalized, by outcome.",
            ),
            &["outcome"],
        )?;
        let terminations_requested_total = IntCounterVec::new(
            Opts::new(
                "rill_coord_terminations_requested_total",
                "The total number of accepted job termination requests, by mode.",
            ),
            &["mode"],
        )?;
        let restarts_scheduled_total = IntCounter::new(
            "rill_coord_restarts_scheduled_total",
            "The total number of delayed job restarts scheduled.",
        )?;
        registry.register(Box::new(executions_started_total.clone()))?;
        registry.register(Box::new(executions_finalized_total.clone()))?;
        registry.register(Box::new(terminations_requested_total.clone()))?;
        registry.register(Box::new(restarts_scheduled_total.clone()))?;
        Ok(CoordMetrics {
            executions_started_total,
            executions_finalized_total,
            terminations_requested_total,
            restarts_scheduled_total,
        })
    }
}
