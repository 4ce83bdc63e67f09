//! Topology descriptions handed to the simulator.
//!
//! The topology-inference stage writes its graph as a node-link JSON document:
//!
//! ```json
//! {
//!   "nodes": [{ "id": "R1", "role": "router" }, { "id": "SW1", "role": "switch" }],
//!   "links": [{ "source": "R1", "target": "SW1", "mtu_a": 1500, "mtu_b": 1500 }]
//! }
//! ```
//!
//! Only the node ids and the edge endpoints matter for message routing. The
//! remaining attributes are carried along so drivers can display them.

use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::message::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("failed reading topology from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed topology document: {0}")]
    Json(#[from] serde_json::Error),
}

/// A node entry of the topology document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: NodeId,
    /// Role inferred upstream (`router`, `switch`, `endpoint`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Descriptive attributes of an edge. Never consulted for delivery decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeAttributes {
    /// Interface names on the `(source, target)` sides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ifaces: Option<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu_a: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu_b: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bw_a: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bw_b: Option<u64>,
}

/// An undirected edge between two nodes of the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(flatten)]
    pub attributes: EdgeAttributes,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            attributes: EdgeAttributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: EdgeAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// The node-id set and edge set a [`Simulator`](crate::simulation::Simulator)
/// is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDescription {
    pub nodes: Vec<TopologyNode>,
    #[serde(alias = "edges")]
    pub links: Vec<Edge>,
}

impl TopologyDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, id: impl Into<NodeId>) -> Self {
        self.nodes.push(TopologyNode {
            id: id.into(),
            role: None,
        });
        self
    }

    pub fn with_edge(mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        self.links.push(Edge::new(source, target));
        self
    }

    /// Reads a node-link JSON document.
    pub fn from_node_link_json(reader: impl std::io::Read) -> Result<Self, TopologyError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Loads a node-link JSON document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TopologyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let topology = Self::from_node_link_json(BufReader::new(file))?;
        tracing::debug!(
            path = %path.display(),
            nodes = topology.nodes.len(),
            links = topology.links.len(),
            "Loaded topology"
        );
        Ok(topology)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter().map(|n| &n.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORKX_DUMP: &str = r#"{
        "directed": false,
        "multigraph": false,
        "graph": {},
        "nodes": [
            {"role": "router", "data": {"name": "R1", "interfaces": []}, "id": "R1"},
            {"role": "switch", "id": "SW1"},
            {"id": "R2"}
        ],
        "links": [
            {"ifaces": ["Gi0/0", "Gi0/1"], "mtu_a": 1500, "mtu_b": 1400,
             "bw_a": null, "bw_b": 100000, "source": "R1", "target": "SW1"},
            {"source": "SW1", "target": "R2"}
        ]
    }"#;

    #[test]
    fn parses_networkx_node_link_output() {
        let topology = TopologyDescription::from_node_link_json(NETWORKX_DUMP.as_bytes()).unwrap();
        let ids: Vec<_> = topology.node_ids().map(NodeId::as_str).collect();
        assert_eq!(ids, ["R1", "SW1", "R2"]);
        assert_eq!(topology.nodes[0].role.as_deref(), Some("router"));
        assert_eq!(topology.nodes[2].role, None);

        let first = &topology.links[0];
        assert_eq!(first.source.as_str(), "R1");
        assert_eq!(first.target.as_str(), "SW1");
        assert_eq!(
            first.attributes.ifaces,
            Some(("Gi0/0".to_owned(), "Gi0/1".to_owned()))
        );
        assert_eq!(first.attributes.mtu_b, Some(1400));
        assert_eq!(first.attributes.bw_a, None);
        assert_eq!(topology.links[1].attributes, EdgeAttributes::default());
    }

    #[test]
    fn accepts_edges_key() {
        let doc = r#"{"nodes": [{"id": "A"}, {"id": "B"}], "edges": [{"source": "A", "target": "B"}]}"#;
        let topology = TopologyDescription::from_node_link_json(doc.as_bytes()).unwrap();
        assert_eq!(topology.links, vec![Edge::new("A", "B")]);
    }

    #[test]
    fn reports_malformed_documents() {
        let err = TopologyDescription::from_node_link_json("{\"nodes\": 3}".as_bytes()).unwrap_err();
        assert!(matches!(err, TopologyError::Json(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = TopologyDescription::load("/definitely/not/here/topology.json").unwrap_err();
        assert!(matches!(err, TopologyError::Io { .. }));
        assert!(err.to_string().contains("topology.json"));
    }

    #[test]
    fn builder_collects_nodes_and_edges() {
        let topology = TopologyDescription::new()
            .with_node("R1")
            .with_node("SW1")
            .with_edge("R1", "SW1");
        assert_eq!(topology.nodes.len(), 2);
        assert_eq!(topology.links, vec![Edge::new("R1", "SW1")]);
    }
}
