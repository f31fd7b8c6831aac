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

//! The structural DAG describing a job.
//!
//! A job is a directed acyclic graph of named processing vertices
//! connected by edges. The coordinator treats the DAG structurally: it
//! deserializes it from the job store, splices restore vertices into it,
//! and hands it to the plan builder. What a vertex computes is opaque
//! here, described only by its [`ProcessorSpec`].

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors arising while building or rewriting a DAG.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DagError {
    /// A vertex with the given name already exists.
    #[error("vertex already exists: {0}")]
    DuplicateVertex(String),
    /// An edge references a vertex that does not exist.
    #[error("unknown vertex: {0}")]
    UnknownVertex(String),
    /// An edge ordinal is already taken at the given vertex.
    #[error("ordinal {ordinal} is already occupied at vertex {vertex}")]
    OrdinalTaken {
        /// The vertex at which the collision occurred.
        vertex: String,
        /// The colliding ordinal.
        ordinal: u32,
    },
}

/// A description of the processing a vertex performs, resolved to an
/// actual processor by the plan builder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessorSpec {
    /// A user-supplied processor, identified by an opaque descriptor.
    Custom(String),
    /// A source that reads all entries of the named internal map.
    ReadMap {
        /// The map to read.
        map_name: String,
    },
    /// A processor that explodes snapshot entries into keyed entries
    /// addressed at the original vertices, by vertex ordinal.
    ExplodeSnapshot {
        /// The snapshot being restored.
        snapshot_id: i64,
        /// Vertex name to outbound-ordinal assignment.
        vertex_ordinals: BTreeMap<String, u32>,
    },
}

/// A named vertex of the DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    /// The vertex name, unique within the DAG.
    pub name: String,
    /// What the vertex computes.
    pub processor: ProcessorSpec,
    /// Per-member parallelism override; `None` uses the engine default.
    pub local_parallelism: Option<u32>,
}

impl Vertex {
    /// Creates a vertex with default parallelism.
    pub fn new(name: impl Into<String>, processor: ProcessorSpec) -> Self {
        Vertex {
            name: name.into(),
            processor,
            local_parallelism: None,
        }
    }

    /// Sets the per-member parallelism.
    pub fn local_parallelism(mut self, parallelism: u32) -> Self {
        self.local_parallelism = Some(parallelism);
        self
    }
}

/// How items travel along an edge between processor instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Routing {
    /// Each item goes to exactly one, arbitrarily chosen, downstream
    /// processor instance.
    #[default]
    Unicast,
    /// Instance `n` upstream is wired 1:1 to instance `n` downstream,
    /// with no routing in between.
    Isolated,
    /// Each item goes to every downstream processor instance.
    Broadcast,
    /// Items are routed by a key so that equal keys always meet at the
    /// same downstream instance.
    Partitioned(PartitionKey),
}

/// The key by which a partitioned edge routes items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionKey {
    /// Route map-entry-shaped items by their key component.
    EntryKey,
}

/// A directed edge between two vertices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// The source vertex name.
    pub source: String,
    /// The ordinal of this edge among the source's outbound edges.
    pub source_ordinal: u32,
    /// The destination vertex name.
    pub destination: String,
    /// The ordinal of this edge among the destination's inbound edges.
    pub dest_ordinal: u32,
    /// How items are routed along this edge.
    pub routing: Routing,
    /// Whether the edge crosses member boundaries.
    pub distributed: bool,
    /// Edge priority: all input on a lower-priority edge is drained
    /// before any input on a higher-priority edge is consumed.
    pub priority: i32,
}

impl Edge {
    /// Creates an edge with explicit ordinals on both endpoints.
    pub fn new(
        source: impl Into<String>,
        source_ordinal: u32,
        destination: impl Into<String>,
        dest_ordinal: u32,
    ) -> Self {
        Edge {
            source: source.into(),
            source_ordinal,
            destination: destination.into(),
            dest_ordinal,
            routing: Routing::Unicast,
            distributed: false,
            priority: 0,
        }
    }

    /// Creates an edge between ordinal 0 of `source` and ordinal 0 of
    /// `destination`.
    pub fn between(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Edge::new(source, 0, destination, 0)
    }

    /// Makes the edge isolated.
    pub fn isolated(mut self) -> Self {
        self.routing = Routing::Isolated;
        self
    }

    /// Partitions the edge by `key`.
    pub fn partitioned(mut self, key: PartitionKey) -> Self {
        self.routing = Routing::Partitioned(key);
        self
    }

    /// Makes the edge cross member boundaries.
    pub fn distributed(mut self) -> Self {
        self.distributed = true;
        self
    }

    /// Sets the edge priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A directed acyclic graph of vertices and edges.
///
/// Vertices keep their insertion order, which is also the iteration
/// order; the restore weaver and the plan builder both rely on it being
/// stable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Dag {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
}

impl Dag {
    /// Creates an empty DAG.
    pub fn new() -> Self {
        Dag::default()
    }

    /// Adds a vertex to the DAG.
    pub fn vertex(&mut self, vertex: Vertex) -> Result<(), DagError> {
        if self.vertices.iter().any(|v| v.name == vertex.name) {
            return Err(DagError::DuplicateVertex(vertex.name));
        }
        self.vertices.push(vertex);
        Ok(())
    }

    /// Adds an edge to the DAG.
    ///
    /// Both endpoints must exist and the ordinals must be free on their
    /// respective sides.
    pub fn edge(&mut self, edge: Edge) -> Result<(), DagError> {
        for endpoint in [&edge.source, &edge.destination] {
            if !self.vertices.iter().any(|v| &v.name == endpoint) {
                return Err(DagError::UnknownVertex(endpoint.clone()));
            }
        }
        if self
            .edges
            .iter()
            .any(|e| e.source == edge.source && e.source_ordinal == edge.source_ordinal)
        {
            return Err(DagError::OrdinalTaken {
                vertex: edge.source,
                ordinal: edge.source_ordinal,
            });
        }
        if self
            .edges
            .iter()
            .any(|e| e.destination == edge.destination && e.dest_ordinal == edge.dest_ordinal)
        {
            return Err(DagError::OrdinalTaken {
                vertex: edge.destination,
                ordinal: edge.dest_ordinal,
            });
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Iterates over the vertices in insertion order.
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.iter()
    }

    /// Iterates over the edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Returns the vertex with the given name, if any.
    pub fn vertex_named(&self, name: &str) -> Option<&Vertex> {
        self.vertices.iter().find(|v| v.name == name)
    }

    /// Returns the inbound edges of the named vertex.
    pub fn inbound_edges(&self, name: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.destination == name).collect()
    }

    /// Returns the lowest unoccupied inbound ordinal at the named vertex.
    pub fn next_free_inbound_ordinal(&self, name: &str) -> u32 {
        u32::try_from(self.inbound_edges(name).len()).unwrap_or(u32::MAX)
    }

    /// Renders the DAG in GraphViz DOT format, for logging.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph DAG {\n");
        for v in &self.vertices {
            let _ = writeln!(out, "    \"{}\";", v.name);
        }
        for e in &self.edges {
            let label = match e.routing {
                Routing::Unicast => "",
                Routing::Isolated => " [label=\"isolated\"]",
                Routing::Broadcast => " [label=\"broadcast\"]",
                Routing::Partitioned(_) => " [label=\"partitioned\"]",
            };
            let _ = writeln!(out, "    \"{}\" -> \"{}\"{};", e.source, e.destination, label);
        }
        out.push('}');
        out
    }
}
