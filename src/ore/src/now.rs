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

//! Now utilities.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A type representing the number of milliseconds since the Unix epoch.
pub type EpochMillis = u64;

/// A function that returns the current time as [`EpochMillis`].
///
/// Handed around as a value so that tests can substitute a deterministic
/// clock for the system clock.
#[derive(Clone)]
pub struct NowFn(Arc<dyn Fn() -> EpochMillis + Send + Sync>);

impl NowFn {
    /// Returns the current time.
    pub fn now(&self) -> EpochMillis {
        (self.0)()
    }
}

impl fmt::Debug for NowFn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("<now_fn>")
    }
}

impl<F> From<F> for NowFn
where
    F: Fn() -> EpochMillis + Send + Sync + 'static,
{
    fn from(f: F) -> NowFn {
        NowFn(Arc::new(f))
    }
}

fn system_time() -> EpochMillis {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("failed to get millis since epoch");
    u64::try_from(dur.as_millis()).expect("current epoch milliseconds to fit in u64")
}

/// A [`NowFn`] that reads the system clock.
pub fn system_time_now() -> NowFn {
    NowFn::from(system_time)
}

/// A [`NowFn`] that always returns zero, for tests that do not care about
/// wall-clock time.
pub fn now_zero() -> NowFn {
    NowFn::from(|| 0)
}
