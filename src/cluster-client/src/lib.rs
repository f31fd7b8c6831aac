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

//! Types for interacting with the Rill cluster membership service.
//!
//! The membership service itself lives outside this repository; the
//! coordinator consumes it through the [`ClusterService`] trait and pins
//! participant identity for an execution with a [`MembersView`].

#![warn(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a cluster member.
///
/// The UUID is stable for the lifetime of the member process; the address
/// is informational and may be reused by a later incarnation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberInfo {
    /// The member's stable unique identifier.
    pub uuid: Uuid,
    /// The member's network address, as `host:port`.
    pub address: String,
}

impl MemberInfo {
    /// Creates a new member identity.
    pub fn new(uuid: Uuid, address: impl Into<String>) -> Self {
        MemberInfo {
            uuid,
            address: address.into(),
        }
    }
}

impl fmt::Display for MemberInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}]", self.address, self.uuid)
    }
}

/// A consistent snapshot of the cluster membership.
///
/// The version increases monotonically with every membership change, so
/// two views can be ordered and a view can be used to fence operations
/// against concurrent topology changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembersView {
    /// The version of this view.
    pub version: u64,
    /// The members of the cluster at this version.
    pub members: Vec<MemberInfo>,
}

impl MembersView {
    /// Creates a view at `version` containing `members`.
    pub fn new(version: u64, members: Vec<MemberInfo>) -> Self {
        MembersView { version, members }
    }

    /// Returns the number of members in the view.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Reports whether the view contains no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Reports whether the view contains a member with the given UUID.
    pub fn contains(&self, uuid: Uuid) -> bool {
        self.members.iter().any(|m| m.uuid == uuid)
    }
}

/// A handle to the cluster membership service.
///
/// All methods are cheap, local reads of the service's current knowledge;
/// none of them block on the network.
pub trait ClusterService: fmt::Debug + Send + Sync {
    /// Returns a snapshot of the current cluster membership.
    fn members_view(&self) -> MembersView;

    /// Reports whether at least `quorum_size` members are live.
    fn is_quorum_present(&self, quorum_size: usize) -> bool;

    /// Reports whether the cluster is in a state in which new jobs should
    /// be started, i.e. partition migrations have settled.
    fn should_start_jobs(&self) -> bool;

    /// Returns the identity of the local member.
    fn local_member(&self) -> MemberInfo;
}
