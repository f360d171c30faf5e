// error.rs — Error types for graph construction and fusion
//
// Safety refusals are not errors; they are recorded on `FusionEdge` as a
// `Refusal`. The types here cover structural failures only.

use std::path::PathBuf;

use crate::graph::NodeId;

/// Errors raised while building or rewriting a stream graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A node with the same id already exists.
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),

    /// An edge or lookup references a node that does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// The requested edge is not present in the graph.
    #[error("edge not found: {from} -> {to}")]
    EdgeNotFound { from: NodeId, to: NodeId },

    /// A node cannot be merged with itself.
    #[error("cannot fuse node {0} with itself")]
    SelfFusion(NodeId),

    /// One side of an edge is missing from the other node's adjacency list.
    #[error("adjacency mismatch: {from} -> {to} is not mirrored")]
    InconsistentAdjacency { from: NodeId, to: NodeId },
}

/// Errors that abort a single optimize call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FusionError {
    /// Topological sort met a cycle that SCC bookkeeping failed to exclude.
    #[error("unexpected cycle during topological sort through: {}", join_ids(.0))]
    UnexpectedCycle(Vec<NodeId>),

    /// Forced fusion requested without the unsafe-mode flag.
    #[error("unsafe fusion not allowed: {from} -> {to} (enable allow_unsafe to force it)")]
    UnsafeFusionNotAllowed { from: NodeId, to: NodeId },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors from the operator catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate operator: {0}")]
    DuplicateOperator(String),
}

/// Errors loading a graph manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("{}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Json(#[from] serde_json::Error),

    /// The operator is not in the catalog and the node does not declare
    /// bound, effect and category itself.
    #[error("unknown operator '{operator}' on node {node}")]
    UnknownOperator { node: String, operator: String },

    /// An edge or feedback entry names a node the manifest does not declare.
    #[error("edge {from} -> {to} references an undeclared node")]
    DanglingEdge { from: String, to: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors loading an optimizer configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_fusion_message() {
        let err = FusionError::UnsafeFusionNotAllowed {
            from: NodeId::new("a"),
            to: NodeId::new("b"),
        };
        assert!(err.to_string().starts_with("unsafe fusion not allowed"));
    }

    #[test]
    fn unexpected_cycle_lists_path() {
        let err = FusionError::UnexpectedCycle(vec![NodeId::new("x"), NodeId::new("y")]);
        assert_eq!(
            err.to_string(),
            "unexpected cycle during topological sort through: x -> y"
        );
    }

    #[test]
    fn graph_errors_are_transparent() {
        let err: FusionError = GraphError::NodeNotFound(NodeId::new("ghost")).into();
        assert_eq!(err.to_string(), "node not found: ghost");
    }
}
