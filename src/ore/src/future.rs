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

//! Future utilities.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// A shared, settable future.
///
/// A `Completion` starts out pending and can be completed with a value at
/// most once; later completion attempts are ignored. Any number of clones
/// can await the value concurrently, before or after it is set. This is
/// the closest Rust analogue to a `CompletableFuture` handed out to
/// multiple observers.
pub struct Completion<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Completion {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Completion")
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Completion<T> {
    /// Creates a new, pending `Completion`.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Completion { tx: Arc::new(tx) }
    }

    /// Creates a `Completion` that is already complete with `value`.
    pub fn completed(value: T) -> Self {
        let (tx, _rx) = watch::channel(Some(value));
        Completion { tx: Arc::new(tx) }
    }

    /// Completes the future with `value`.
    ///
    /// Returns `true` if this call completed the future, `false` if it was
    /// already complete (in which case `value` is dropped).
    pub fn complete(&self, value: T) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = value.take();
                true
            } else {
                false
            }
        })
    }

    /// Reports whether the future has been completed.
    pub fn is_complete(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl<T: Clone> Completion<T> {
    /// Returns the value if the future is complete.
    pub fn try_get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Waits for the future to complete and returns a clone of its value.
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        let value = rx
            .wait_for(|slot| slot.is_some())
            .await
            .expect("sender is held by self");
        value.clone().expect("checked by wait_for")
    }
}
