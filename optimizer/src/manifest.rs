// manifest.rs — JSON graph descriptions
//
// A manifest lists nodes (operator name plus optional declared metadata),
// explicit edges, feedback edges and an optional `chain` flag connecting
// nodes in list order. Missing metadata is filled from the operator catalog.
// Nodes built from a manifest get identity transforms: the optimizer only
// reads declared metadata.
//
// Preconditions: none.
// Postconditions: `build` returns a graph whose adjacency invariants hold;
//                 `from_graph` followed by `build` reproduces the graph's
//                 fingerprint.
// Failure modes: unreadable file, malformed JSON, unknown operator without
//                full metadata, edges to undeclared nodes → `ManifestError`.
// Side effects: `load` reads one file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::{OperatorCatalog, OperatorCategory, OperatorKind};
use crate::effect::EffectTag;
use crate::error::ManifestError;
use crate::graph::{NodeId, NodeSpec, StreamGraph};
use crate::multiplicity::Multiplicity;
use crate::stream::Stream;

// ── Data types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphManifest {
    pub nodes: Vec<NodeManifest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<EdgeManifest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<EdgeManifest>,
    /// Connect every node to the next one in list order.
    #[serde(default, skip_serializing_if = "is_false")]
    pub chain: bool,
}

/// One node; unset metadata falls back to the catalog entry for `operator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeManifest {
    pub id: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound: Option<Multiplicity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<EffectTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<OperatorCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeManifest {
    pub from: String,
    pub to: String,
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ── Loading ─────────────────────────────────────────────────────────────────

impl GraphManifest {
    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Build the described graph, resolving operators through `catalog`.
    pub fn build(&self, catalog: &OperatorCatalog) -> Result<StreamGraph, ManifestError> {
        let mut graph = StreamGraph::new();
        for node in &self.nodes {
            graph.add_node(resolve_node(node, catalog)?)?;
        }

        if self.chain {
            for pair in self.nodes.windows(2) {
                graph.connect(&NodeId::new(&pair[0].id), &NodeId::new(&pair[1].id))?;
            }
        }
        for edge in &self.edges {
            let (from, to) = endpoints(&graph, edge)?;
            graph.connect(&from, &to)?;
        }
        for edge in &self.feedback {
            let (from, to) = endpoints(&graph, edge)?;
            graph.mark_feedback(&from, &to)?;
        }
        Ok(graph)
    }

    /// Describe `graph` with every node's metadata spelled out.
    pub fn from_graph(graph: &StreamGraph) -> Self {
        let nodes = graph
            .nodes()
            .map(|node| NodeManifest {
                id: node.id.to_string(),
                operator: node.operator.name.clone(),
                bound: Some(node.bound()),
                effect: Some(node.effect()),
                category: Some(node.operator.category),
            })
            .collect();
        let (feedback, edges): (Vec<_>, Vec<_>) = graph
            .edges()
            .into_iter()
            .partition(|(from, to)| graph.is_feedback_edge(from, to));
        let to_manifest = |(from, to): (NodeId, NodeId)| EdgeManifest {
            from: from.0,
            to: to.0,
        };
        GraphManifest {
            nodes,
            edges: edges.into_iter().map(to_manifest).collect(),
            feedback: feedback.into_iter().map(to_manifest).collect(),
            chain: false,
        }
    }
}

fn resolve_node(node: &NodeManifest, catalog: &OperatorCatalog) -> Result<NodeSpec, ManifestError> {
    let (bound, effect, category) = match catalog.get(&node.operator) {
        Some(meta) => (
            node.bound.unwrap_or(meta.bound),
            node.effect.unwrap_or(meta.effect),
            node.category.unwrap_or(meta.category),
        ),
        None => match (node.bound, node.effect, node.category) {
            (Some(bound), Some(effect), Some(category)) => (bound, effect, category),
            _ => {
                return Err(ManifestError::UnknownOperator {
                    node: node.id.clone(),
                    operator: node.operator.clone(),
                })
            }
        },
    };
    Ok(NodeSpec::new(
        node.id.as_str(),
        Stream::opaque(bound, effect),
        OperatorKind::new(node.operator.clone(), category),
    ))
}

fn endpoints(graph: &StreamGraph, edge: &EdgeManifest) -> Result<(NodeId, NodeId), ManifestError> {
    let from = NodeId::new(&edge.from);
    let to = NodeId::new(&edge.to);
    if !graph.contains(&from) || !graph.contains(&to) {
        return Err(ManifestError::DanglingEdge {
            from: edge.from.clone(),
            to: edge.to.clone(),
        });
    }
    Ok((from, to))
}

// ── Tests ───────────────────────────────────────────────────────────────────
