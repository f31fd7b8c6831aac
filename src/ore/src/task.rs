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

//! Task spawning helpers.
//!
//! Every task spawned through this module carries a name, surfaced via a
//! `tracing` span so that log lines emitted by the task can be attributed
//! to it.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::Instrument;

/// Spawns a named task onto the current tokio runtime.
///
/// The name closure is only invoked when the task is actually spawned,
/// so callers can format names without paying for it on hot paths that
/// never spawn.
pub fn spawn<N, S, F>(name: N, future: F) -> JoinHandle<F::Output>
where
    N: FnOnce() -> S,
    S: AsRef<str>,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let name = name();
    let span = tracing::debug_span!("task", name = name.as_ref());
    tokio::spawn(future.instrument(span))
}
