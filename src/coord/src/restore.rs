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

//! Splicing snapshot-restore vertices into a DAG.
//!
//! When a job resumes from a snapshot, the coordinator prepends a restore
//! sub-graph to the user's DAG: a vertex that reads the snapshot map and a
//! vertex that explodes the snapshot entries into keyed entries addressed
//! at the original vertices. Restore edges have the lowest possible
//! priority, so every vertex drains its restored state before consuming
//! any regular input.

use std::collections::BTreeMap;

use tracing::info;

use rill_dataflow_types::{Dag, DagError, Edge, JobError, PartitionKey, ProcessorSpec, Vertex};

use crate::service::SnapshotValidator;

/// The name prefix of the spliced restore vertices.
pub const SNAPSHOT_VERTEX_PREFIX: &str = "__snapshot_";

/// The priority of restore edges. Lower priorities drain first, so
/// restore traffic precedes all regular input.
pub const SNAPSHOT_RESTORE_EDGE_PRIORITY: i32 = i32::MIN;

/// Rewrites `dag` to restore its state from the snapshot in `map_name`.
///
/// The snapshot is validated first; a validation failure aborts the start
/// attempt as a user error.
pub(crate) fn rewrite_dag_with_snapshot_restore(
    dag: &mut Dag,
    snapshot_id: i64,
    map_name: &str,
    snapshot_name: Option<&str>,
    job_id_string: &str,
    validator: &dyn SnapshotValidator,
) -> Result<(), JobError> {
    let resolved_snapshot_id =
        validator.validate(snapshot_id, map_name, job_id_string, snapshot_name)?;
    info!(
        "about to restore the state of {job_id_string} from snapshot \
         {resolved_snapshot_id}, map name = {map_name}"
    );

    let original_vertices: Vec<String> = dag.vertices().map(|v| v.name.clone()).collect();
    let vertex_ordinals: BTreeMap<String, u32> = original_vertices
        .iter()
        .enumerate()
        .map(|(index, name)| (name.clone(), index as u32))
        .collect();

    let read_vertex = format!("{SNAPSHOT_VERTEX_PREFIX}read");
    let explode_vertex = format!("{SNAPSHOT_VERTEX_PREFIX}explode");
    dag.vertex(Vertex::new(
        &read_vertex,
        ProcessorSpec::ReadMap {
            map_name: map_name.to_string(),
        },
    ))
    .map_err(dag_error)?;
    dag.vertex(Vertex::new(
        &explode_vertex,
        ProcessorSpec::ExplodeSnapshot {
            snapshot_id: resolved_snapshot_id,
            vertex_ordinals,
        },
    ))
    .map_err(dag_error)?;
    dag.edge(Edge::between(&read_vertex, &explode_vertex).isolated())
        .map_err(dag_error)?;

    for (index, vertex) in original_vertices.iter().enumerate() {
        let dest_ordinal = dag.next_free_inbound_ordinal(vertex);
        dag.edge(snapshot_restore_edge(
            &explode_vertex,
            index as u32,
            vertex,
            dest_ordinal,
        ))
        .map_err(dag_error)?;
    }
    Ok(())
}

/// The edge carrying restored state from the explode vertex into an
/// original vertex: distributed, partitioned by entry key, drained before
/// any regular input.
fn snapshot_restore_edge(
    source: &str,
    source_ordinal: u32,
    destination: &str,
    dest_ordinal: u32,
) -> Edge {
    Edge::new(source, source_ordinal, destination, dest_ordinal)
        .distributed()
        .partitioned(PartitionKey::EntryKey)
        .priority(SNAPSHOT_RESTORE_EDGE_PRIORITY)
}

fn dag_error(e: DagError) -> JobError {
    JobError::user(format!("snapshot restore rewrite failed: {e}"), false)
}
