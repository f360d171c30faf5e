// graph.rs — Stream graph model
//
// Nodes carry an opaque stream (declared bound, effect, transform), an
// operator kind, and mutually consistent upstream/downstream id lists. The
// graph keeps node insertion order (the "node sequence") and an explicit set
// of feedback edges that close cycles.
//
// Preconditions: nodes are supplied by callers; ids are unique.
// Postconditions: adjacency is mirrored (A→B downstream iff B→A upstream) and
//                 no edge references a missing node, before and after `merge`.
// Failure modes: duplicate ids, unknown endpoints, merging a node with
//                itself → `GraphError`.
// Side effects: none.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::OperatorKind;
use crate::effect::EffectTag;
use crate::error::GraphError;
use crate::multiplicity::Multiplicity;
use crate::stream::Stream;

// ── Identifiers ─────────────────────────────────────────────────────────────

/// Unique identifier of a node within a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

// ── Construction inputs ─────────────────────────────────────────────────────

/// `{id, stream, operator}` as handed over by the operator layer.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub stream: Stream,
    pub operator: OperatorKind,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, stream: Stream, operator: OperatorKind) -> Self {
        NodeSpec {
            id: id.into(),
            stream,
            operator,
        }
    }
}

/// An edge explicitly marked as closing a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedbackEdge {
    pub from: NodeId,
    pub to: NodeId,
}

impl FeedbackEdge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        FeedbackEdge {
            from: from.into(),
            to: to.into(),
        }
    }
}

// ── Nodes ───────────────────────────────────────────────────────────────────

/// A node in the stream graph.
#[derive(Debug, Clone)]
pub struct StreamNode {
    pub id: NodeId,
    pub stream: Stream,
    pub operator: OperatorKind,
    pub upstream: Vec<NodeId>,
    pub downstream: Vec<NodeId>,
    /// Set when a feedback edge leaves this node.
    pub feedback: bool,
    /// Ids of the originally supplied nodes this node summarizes.
    pub constituents: Vec<NodeId>,
}

impl StreamNode {
    fn from_spec(spec: NodeSpec) -> Self {
        StreamNode {
            constituents: vec![spec.id.clone()],
            id: spec.id,
            stream: spec.stream,
            operator: spec.operator,
            upstream: Vec::new(),
            downstream: Vec::new(),
            feedback: false,
        }
    }

    pub fn bound(&self) -> Multiplicity {
        self.stream.usage_bound()
    }

    pub fn effect(&self) -> EffectTag {
        self.stream.effect_tag()
    }

    pub fn is_split(&self) -> bool {
        self.downstream.len() > 1
    }

    pub fn is_join(&self) -> bool {
        self.upstream.len() > 1
    }

    pub fn has_self_loop(&self) -> bool {
        self.downstream.contains(&self.id)
    }
}

// ── Graph ───────────────────────────────────────────────────────────────────

/// Node map plus the explicit feedback-edge set.
///
/// The node sequence is a slot vector: a merge vacates the absorbed node's
/// slot instead of shifting the tail, and slots are compacted once vacancies
/// outnumber live nodes.
#[derive(Debug, Clone, Default)]
pub struct StreamGraph {
    nodes: HashMap<NodeId, StreamNode>,
    order: Vec<Option<NodeId>>,
    slots: HashMap<NodeId, usize>,
    vacant: usize,
    feedback: BTreeSet<(NodeId, NodeId)>,
}

impl StreamGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain `specs` in order: each node feeds the next.
    pub fn linear<I>(specs: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = NodeSpec>,
    {
        let mut graph = StreamGraph::new();
        let mut prev: Option<NodeId> = None;
        for spec in specs {
            let id = spec.id.clone();
            graph.add_node(spec)?;
            if let Some(p) = prev {
                graph.connect(&p, &id)?;
            }
            prev = Some(id);
        }
        Ok(graph)
    }

    /// One source fanning out into `branches`, optionally merged again.
    ///
    /// An empty branch connects the source straight to the merge node.
    pub fn branching(
        source: NodeSpec,
        branches: Vec<Vec<NodeSpec>>,
        merge: Option<NodeSpec>,
    ) -> Result<Self, GraphError> {
        let mut graph = StreamGraph::new();
        let source_id = source.id.clone();
        graph.add_node(source)?;

        let mut tails = Vec::with_capacity(branches.len());
        for branch in branches {
            let mut prev = source_id.clone();
            for spec in branch {
                let id = spec.id.clone();
                graph.add_node(spec)?;
                graph.connect(&prev, &id)?;
                prev = id;
            }
            tails.push(prev);
        }

        if let Some(merge) = merge {
            let merge_id = merge.id.clone();
            graph.add_node(merge)?;
            for tail in &tails {
                graph.connect(tail, &merge_id)?;
            }
        }
        Ok(graph)
    }

    /// A chain of `specs` plus one feedback edge closing a loop.
    pub fn with_feedback<I>(specs: I, feedback: FeedbackEdge) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = NodeSpec>,
    {
        let mut graph = StreamGraph::linear(specs)?;
        graph.mark_feedback(&feedback.from, &feedback.to)?;
        Ok(graph)
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> Result<(), GraphError> {
        if self.nodes.contains_key(&spec.id) {
            return Err(GraphError::DuplicateNode(spec.id));
        }
        self.slots.insert(spec.id.clone(), self.order.len());
        self.order.push(Some(spec.id.clone()));
        self.nodes.insert(spec.id.clone(), StreamNode::from_spec(spec));
        Ok(())
    }

    /// Add the edge `from → to`. Adding an existing edge is a no-op.
    pub fn connect(&mut self, from: &NodeId, to: &NodeId) -> Result<(), GraphError> {
        self.require(from)?;
        self.require(to)?;
        if let Some(node) = self.nodes.get_mut(from) {
            push_unique(&mut node.downstream, to.clone());
        }
        if let Some(node) = self.nodes.get_mut(to) {
            push_unique(&mut node.upstream, from.clone());
        }
        Ok(())
    }

    /// Add `from → to` (if missing) and mark it as a feedback edge.
    pub fn mark_feedback(&mut self, from: &NodeId, to: &NodeId) -> Result<(), GraphError> {
        self.connect(from, to)?;
        self.feedback.insert((from.clone(), to.clone()));
        if let Some(node) = self.nodes.get_mut(from) {
            node.feedback = true;
        }
        Ok(())
    }

    fn require(&self, id: &NodeId) -> Result<(), GraphError> {
        if self.nodes.contains_key(id) {
            Ok(())
        } else {
            Err(GraphError::NodeNotFound(id.clone()))
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn node(&self, id: &NodeId) -> Option<&StreamNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in sequence order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.order.iter().flatten()
    }

    /// Nodes in sequence order.
    pub fn nodes(&self) -> impl Iterator<Item = &StreamNode> {
        self.node_ids().filter_map(|id| self.nodes.get(id))
    }

    /// The node after `id` in the sequence.
    pub fn next_in_sequence(&self, id: &NodeId) -> Option<&NodeId> {
        let slot = *self.slots.get(id)?;
        self.order.get(slot + 1..)?.iter().flatten().next()
    }

    /// Every directed edge, grouped by source in sequence order.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.nodes()
            .flat_map(|node| {
                node.downstream
                    .iter()
                    .map(move |to| (node.id.clone(), to.clone()))
            })
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes().map(|n| n.downstream.len()).sum()
    }

    pub fn has_edge(&self, from: &NodeId, to: &NodeId) -> bool {
        self.nodes
            .get(from)
            .is_some_and(|n| n.downstream.contains(to))
    }

    pub fn is_feedback_edge(&self, from: &NodeId, to: &NodeId) -> bool {
        self.feedback.contains(&(from.clone(), to.clone()))
    }

    /// True when `to` is reachable from `from` without using the direct edge.
    ///
    /// Merging such a pair would close a cycle through the other path.
    pub fn has_indirect_path(&self, from: &NodeId, to: &NodeId) -> bool {
        let Some(start) = self.nodes.get(from) else {
            return false;
        };
        // Any other path has to enter `to` through a different producer.
        if self
            .nodes
            .get(to)
            .is_some_and(|target| target.upstream.iter().all(|n| n == from))
        {
            return false;
        }
        let mut seen: HashSet<&NodeId> = HashSet::new();
        seen.insert(from);
        let mut stack: Vec<&NodeId> = start.downstream.iter().filter(|n| *n != to).collect();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.downstream.iter());
            }
        }
        false
    }

    // ── Rewriting ───────────────────────────────────────────────────────

    /// Replace `from` and `to` (joined by an edge) with one node.
    ///
    /// The replacement composes `to`'s transform after `from`'s, declares the
    /// given bound and effect, inherits the union of both nodes' external
    /// edges and takes `from`'s place in the node sequence. Any other edge
    /// between the pair becomes a self-loop. Siblings that shared `from` as
    /// their producer are fed by the replacement afterwards.
    ///
    /// The new id joins the first and last original node it summarizes
    /// (`a+b`, then `a+c` after absorbing `c`), so ids stay short however many
    /// nodes a chain collapses; `constituents` keeps the full list. Cost is
    /// proportional to the degree of the pair, not to the graph.
    pub fn merge(
        &mut self,
        from: &NodeId,
        to: &NodeId,
        bound: Multiplicity,
        effect: EffectTag,
    ) -> Result<NodeId, GraphError> {
        if from == to {
            return Err(GraphError::SelfFusion(from.clone()));
        }
        self.require(from)?;
        self.require(to)?;
        if !self.has_edge(from, to) {
            return Err(GraphError::EdgeNotFound {
                from: from.clone(),
                to: to.clone(),
            });
        }

        let first = self
            .nodes
            .remove(from)
            .ok_or_else(|| GraphError::NodeNotFound(from.clone()))?;
        let second = self
            .nodes
            .remove(to)
            .ok_or_else(|| GraphError::NodeNotFound(to.clone()))?;
        let head = first.constituents.first().unwrap_or(&first.id);
        let tail = second.constituents.last().unwrap_or(&second.id);
        let id = self.fresh_id(format!("{head}+{tail}"));
        let rename = |n: &NodeId| {
            if *n == first.id || *n == second.id {
                id.clone()
            } else {
                n.clone()
            }
        };

        let upstream = unique(
            first
                .upstream
                .iter()
                .chain(second.upstream.iter().filter(|n| **n != first.id))
                .map(rename),
        );
        let downstream = unique(
            first
                .downstream
                .iter()
                .filter(|n| **n != second.id)
                .chain(second.downstream.iter())
                .map(rename),
        );

        // Neighbours now point at the replacement.
        let neighbours: Vec<NodeId> = upstream
            .iter()
            .chain(downstream.iter())
            .filter(|n| **n != id)
            .cloned()
            .collect();
        for n in &neighbours {
            if let Some(node) = self.nodes.get_mut(n) {
                rename_all(&mut node.upstream, &first.id, &second.id, &id);
                rename_all(&mut node.downstream, &first.id, &second.id, &id);
            }
        }

        if self
            .feedback
            .iter()
            .any(|(a, b)| [a, b].iter().any(|n| **n == first.id || **n == second.id))
        {
            let fused_edge = (first.id.clone(), second.id.clone());
            self.feedback = std::mem::take(&mut self.feedback)
                .into_iter()
                .filter(|edge| *edge != fused_edge)
                .map(|(a, b)| (rename(&a), rename(&b)))
                .collect();
        }
        let feedback = self.feedback.iter().any(|(a, _)| *a == id);

        if let Some(slot) = self.slots.remove(&first.id) {
            self.order[slot] = Some(id.clone());
            self.slots.insert(id.clone(), slot);
        }
        if let Some(slot) = self.slots.remove(&second.id) {
            self.order[slot] = None;
            self.vacant += 1;
        }

        let mut constituents = first.constituents;
        constituents.extend(second.constituents);

        let node = StreamNode {
            id: id.clone(),
            stream: Stream::new(
                bound,
                effect,
                first.stream.transform.then(&second.stream.transform),
            ),
            operator: OperatorKind::fused(first.operator, &second.operator),
            upstream,
            downstream,
            feedback,
            constituents,
        };
        self.nodes.insert(id.clone(), node);
        self.compact_if_sparse();
        Ok(id)
    }

    fn compact_if_sparse(&mut self) {
        if self.vacant <= self.nodes.len() {
            return;
        }
        self.order.retain(Option::is_some);
        self.slots.clear();
        for (slot, id) in self.order.iter().enumerate() {
            if let Some(id) = id {
                self.slots.insert(id.clone(), slot);
            }
        }
        self.vacant = 0;
    }

    /// `base`, or `base#2`, `base#3`, ... whichever is free.
    fn fresh_id(&self, base: String) -> NodeId {
        if !self.nodes.contains_key(base.as_str()) {
            return NodeId(base);
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}#{n}");
            if !self.nodes.contains_key(candidate.as_str()) {
                return NodeId(candidate);
            }
            n += 1;
        }
    }

    // ── Invariants ──────────────────────────────────────────────────────

    /// Verify mirrored adjacency and that every edge endpoint exists.
    pub fn check_consistency(&self) -> Result<(), GraphError> {
        for (slot, id) in self.order.iter().enumerate() {
            if let Some(id) = id {
                self.require(id)?;
                if self.slots.get(id) != Some(&slot) {
                    return Err(GraphError::NodeNotFound(id.clone()));
                }
            }
        }
        if let Some(missing) = self.nodes.keys().find(|id| !self.slots.contains_key(*id)) {
            return Err(GraphError::NodeNotFound(missing.clone()));
        }
        for node in self.nodes() {
            for to in &node.downstream {
                let target = self
                    .nodes
                    .get(to)
                    .ok_or_else(|| GraphError::NodeNotFound(to.clone()))?;
                if !target.upstream.contains(&node.id) {
                    return Err(GraphError::InconsistentAdjacency {
                        from: node.id.clone(),
                        to: to.clone(),
                    });
                }
            }
            for from in &node.upstream {
                let source = self
                    .nodes
                    .get(from)
                    .ok_or_else(|| GraphError::NodeNotFound(from.clone()))?;
                if !source.downstream.contains(&node.id) {
                    return Err(GraphError::InconsistentAdjacency {
                        from: from.clone(),
                        to: node.id.clone(),
                    });
                }
            }
        }
        for (from, to) in &self.feedback {
            if !self.has_edge(from, to) {
                return Err(GraphError::EdgeNotFound {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }
        Ok(())
    }

    // ── Fingerprint ─────────────────────────────────────────────────────

    /// Canonical text form: nodes sorted by id, then the feedback set.
    pub fn canonical_text(&self) -> String {
        use std::fmt::Write;

        let mut ids: Vec<&NodeId> = self.nodes.keys().collect();
        ids.sort();
        let mut out = String::new();
        for id in ids {
            let node = &self.nodes[id];
            let mut targets: Vec<&str> = node.downstream.iter().map(NodeId::as_str).collect();
            targets.sort_unstable();
            let _ = writeln!(
                out,
                "node {} op={} cat={} bound={} effect={} -> [{}]",
                id,
                node.operator.name,
                node.operator.category,
                node.bound(),
                node.effect(),
                targets.join(",")
            );
        }
        for (from, to) in &self.feedback {
            let _ = writeln!(out, "feedback {from} -> {to}");
        }
        out
    }

    /// SHA-256 of the canonical text form.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_text().as_bytes());
        let digest = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        hash
    }

    /// Hex string of the fingerprint (64 characters).
    pub fn fingerprint_hex(&self) -> String {
        use std::fmt::Write;

        let mut s = String::with_capacity(64);
        for b in self.fingerprint() {
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn push_unique(list: &mut Vec<NodeId>, id: NodeId) {
    if !list.contains(&id) {
        list.push(id);
    }
}

/// First occurrence of each id, in order.
fn unique(ids: impl Iterator<Item = NodeId>) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}

/// Replace every occurrence of `a` or `b` with `with`, keeping entries unique.
fn rename_all(list: &mut Vec<NodeId>, a: &NodeId, b: &NodeId, with: &NodeId) {
    if !list.iter().any(|n| n == a || n == b) {
        return;
    }
    let renamed = unique(
        list.drain(..)
            .map(|n| if n == *a || n == *b { with.clone() } else { n }),
    );
    *list = renamed;
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, bound: Multiplicity, effect: EffectTag) -> NodeSpec {
        NodeSpec::new(id, Stream::opaque(bound, effect), OperatorKind::stateless("map"))
    }

    fn pure(id: &str) -> NodeSpec {
        spec(id, Multiplicity::ONE, EffectTag::Pure)
    }

    fn ids(list: &[NodeId]) -> Vec<&str> {
        list.iter().map(NodeId::as_str).collect()
    }

    // ── Construction ────────────────────────────────────────────────────

    #[test]
    fn linear_chain() {
        let g = StreamGraph::linear([pure("a"), pure("b"), pure("c")]).unwrap();
        assert_eq!(g.len(), 3);
        assert_eq!(g.edge_count(), 2);
        assert!(g.has_edge(&"a".into(), &"b".into()));
        assert!(g.has_edge(&"b".into(), &"c".into()));
        assert!(!g.has_edge(&"a".into(), &"c".into()));
        g.check_consistency().unwrap();
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = StreamGraph::linear([pure("a"), pure("a")]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("a".into()));
    }

    #[test]
    fn connect_unknown_node() {
        let mut g = StreamGraph::linear([pure("a")]).unwrap();
        let err = g.connect(&"a".into(), &"zzz".into()).unwrap_err();
        assert_eq!(err, GraphError::NodeNotFound("zzz".into()));
    }

    #[test]
    fn branching_split_and_merge() {
        let g = StreamGraph::branching(
            pure("src"),
            vec![vec![pure("l1"), pure("l2")], vec![pure("r1")], vec![]],
            Some(pure("join")),
        )
        .unwrap();
        let src = g.node(&"src".into()).unwrap();
        assert!(src.is_split());
        assert_eq!(ids(&src.downstream), vec!["l1", "r1", "join"]);
        let join = g.node(&"join".into()).unwrap();
        assert!(join.is_join());
        assert_eq!(ids(&join.upstream), vec!["l2", "r1", "src"]);
        g.check_consistency().unwrap();
    }

    #[test]
    fn feedback_edge_is_marked() {
        let g = StreamGraph::with_feedback(
            [pure("a"), pure("b"), pure("c")],
            FeedbackEdge::new("c", "a"),
        )
        .unwrap();
        assert!(g.is_feedback_edge(&"c".into(), &"a".into()));
        assert!(g.node(&"c".into()).unwrap().feedback);
        assert!(!g.node(&"a".into()).unwrap().feedback);
        assert_eq!(g.edge_count(), 3);
        g.check_consistency().unwrap();
    }

    // ── Merge ───────────────────────────────────────────────────────────

    #[test]
    fn merge_replaces_pair_and_rewires_neighbours() {
        let mut g = StreamGraph::linear([pure("a"), pure("b"), pure("c"), pure("d")]).unwrap();
        let id = g
            .merge(&"b".into(), &"c".into(), Multiplicity::ONE, EffectTag::Pure)
            .unwrap();
        assert_eq!(id.as_str(), "b+c");
        assert_eq!(
            g.node_ids().map(NodeId::as_str).collect::<Vec<_>>(),
            vec!["a", "b+c", "d"]
        );

        let fused = g.node(&id).unwrap();
        assert_eq!(ids(&fused.upstream), vec!["a"]);
        assert_eq!(ids(&fused.downstream), vec!["d"]);
        assert_eq!(ids(&fused.constituents), vec!["b", "c"]);
        assert_eq!(fused.operator.name, "map+map");
        assert_eq!(ids(&g.node(&"a".into()).unwrap().downstream), vec!["b+c"]);
        assert_eq!(ids(&g.node(&"d".into()).unwrap().upstream), vec!["b+c"]);
        g.check_consistency().unwrap();
    }

    #[test]
    fn merge_keeps_union_of_external_edges() {
        // x → a → b → y, z → b, a → w
        let mut g = StreamGraph::linear([pure("x"), pure("a"), pure("b"), pure("y")]).unwrap();
        g.add_node(pure("z")).unwrap();
        g.add_node(pure("w")).unwrap();
        g.connect(&"z".into(), &"b".into()).unwrap();
        g.connect(&"a".into(), &"w".into()).unwrap();

        let id = g
            .merge(&"a".into(), &"b".into(), Multiplicity::ONE, EffectTag::Pure)
            .unwrap();
        let fused = g.node(&id).unwrap();
        assert_eq!(ids(&fused.upstream), vec!["x", "z"]);
        assert_eq!(ids(&fused.downstream), vec!["w", "y"]);
        g.check_consistency().unwrap();
    }

    #[test]
    fn merge_turns_back_edge_into_self_loop() {
        let mut g =
            StreamGraph::with_feedback([pure("a"), pure("b")], FeedbackEdge::new("b", "a")).unwrap();
        let id = g
            .merge(&"a".into(), &"b".into(), Multiplicity::ONE, EffectTag::Pure)
            .unwrap();
        let fused = g.node(&id).unwrap();
        assert!(fused.has_self_loop());
        assert!(fused.feedback);
        assert!(g.is_feedback_edge(&id, &id));
        g.check_consistency().unwrap();
    }

    #[test]
    fn merge_rejects_missing_edge_and_self() {
        let mut g = StreamGraph::linear([pure("a"), pure("b"), pure("c")]).unwrap();
        assert_eq!(
            g.merge(&"a".into(), &"c".into(), Multiplicity::ONE, EffectTag::Pure),
            Err(GraphError::EdgeNotFound {
                from: "a".into(),
                to: "c".into()
            })
        );
        assert_eq!(
            g.merge(&"a".into(), &"a".into(), Multiplicity::ONE, EffectTag::Pure),
            Err(GraphError::SelfFusion("a".into()))
        );
        assert_eq!(g.len(), 3);
    }

    #[test]
    fn merge_avoids_id_collisions() {
        let mut g = StreamGraph::linear([pure("a"), pure("b")]).unwrap();
        g.add_node(pure("a+b")).unwrap();
        let id = g
            .merge(&"a".into(), &"b".into(), Multiplicity::ONE, EffectTag::Pure)
            .unwrap();
        assert_eq!(id.as_str(), "a+b#2");
    }

    #[test]
    fn merge_uses_declared_metadata() {
        let mut g = StreamGraph::linear([
            spec("a", Multiplicity::Finite(1), EffectTag::Pure),
            spec("b", Multiplicity::Finite(3), EffectTag::DeterministicEffect),
        ])
        .unwrap();
        let id = g
            .merge(
                &"a".into(),
                &"b".into(),
                Multiplicity::Finite(3),
                EffectTag::DeterministicEffect,
            )
            .unwrap();
        let fused = g.node(&id).unwrap();
        assert_eq!(fused.bound(), Multiplicity::Finite(3));
        assert_eq!(fused.effect(), EffectTag::DeterministicEffect);
    }

    #[test]
    fn merge_reroutes_split_siblings() {
        // src → x, src → y: after src absorbs x, the replacement feeds y.
        let mut g =
            StreamGraph::branching(pure("src"), vec![vec![pure("x")], vec![pure("y")]], None)
                .unwrap();
        let id = g
            .merge(&"src".into(), &"x".into(), Multiplicity::ONE, EffectTag::Pure)
            .unwrap();
        assert_eq!(ids(&g.node(&id).unwrap().downstream), vec!["y"]);
        assert_eq!(ids(&g.node(&"y".into()).unwrap().upstream), vec!["src+x"]);
        g.check_consistency().unwrap();
    }

    #[test]
    fn merged_ids_stay_short_along_a_chain() {
        let n = 1000;
        let mut g = StreamGraph::linear((0..n).map(|i| pure(&format!("n{i}")))).unwrap();
        let mut current = NodeId::new("n0");
        for i in 1..n {
            current = g
                .merge(&current, &NodeId::new(format!("n{i}")), Multiplicity::ONE, EffectTag::Pure)
                .unwrap();
            assert_eq!(current.as_str(), format!("n0+n{i}"));
        }
        assert_eq!(g.len(), 1);
        let fused = g.node(&current).unwrap();
        assert_eq!(fused.constituents.len(), n);
        assert_eq!(fused.constituents.last().unwrap().as_str(), "n999");
        assert_eq!(g.node_ids().collect::<Vec<_>>(), vec![&current]);
        g.check_consistency().unwrap();
    }

    #[test]
    fn sequence_order_survives_compaction() {
        let mut g = StreamGraph::linear(["a", "b", "c", "d", "e", "f"].map(pure)).unwrap();
        let one = Multiplicity::ONE;
        let bc = g.merge(&"b".into(), &"c".into(), one, EffectTag::Pure).unwrap();
        let de = g.merge(&"d".into(), &"e".into(), one, EffectTag::Pure).unwrap();
        assert_eq!(g.next_in_sequence(&"a".into()), Some(&bc));
        assert_eq!(g.next_in_sequence(&bc), Some(&de));

        let ac = g.merge(&"a".into(), &bc, one, EffectTag::Pure).unwrap();
        let ae = g.merge(&ac, &de, one, EffectTag::Pure).unwrap();
        assert_eq!(ae.as_str(), "a+e");
        assert_eq!(
            g.node_ids().map(NodeId::as_str).collect::<Vec<_>>(),
            vec!["a+e", "f"]
        );
        assert_eq!(g.next_in_sequence(&ae), Some(&NodeId::new("f")));
        assert_eq!(g.next_in_sequence(&"f".into()), None);
        assert_eq!(g.next_in_sequence(&"b".into()), None);
        g.check_consistency().unwrap();
    }

    // ── Paths and fingerprints ──────────────────────────────────────────

    #[test]
    fn indirect_path_detection() {
        // a → b → c and a → c
        let mut g = StreamGraph::linear([pure("a"), pure("b"), pure("c")]).unwrap();
        g.connect(&"a".into(), &"c".into()).unwrap();
        assert!(g.has_indirect_path(&"a".into(), &"c".into()));
        assert!(!g.has_indirect_path(&"a".into(), &"b".into()));
        assert!(!g.has_indirect_path(&"b".into(), &"c".into()));
    }

    #[test]
    fn sole_producer_has_no_indirect_path() {
        // a → b, a → c, c → d
        let g = StreamGraph::branching(
            pure("a"),
            vec![vec![pure("b")], vec![pure("c"), pure("d")]],
            None,
        )
        .unwrap();
        assert!(!g.has_indirect_path(&"a".into(), &"b".into()));
        assert!(!g.has_indirect_path(&"a".into(), &"c".into()));
        assert!(!g.has_indirect_path(&"c".into(), &"d".into()));
    }

    #[test]
    fn fingerprint_tracks_structure() {
        let g1 = StreamGraph::linear([pure("a"), pure("b")]).unwrap();
        let g2 = StreamGraph::linear([pure("a"), pure("b")]).unwrap();
        assert_eq!(g1.fingerprint(), g2.fingerprint());
        assert_eq!(g1.fingerprint_hex().len(), 64);

        let g3 = StreamGraph::linear([pure("a"), spec("b", Multiplicity::Unbounded, EffectTag::Pure)])
            .unwrap();
        assert_ne!(g1.fingerprint(), g3.fingerprint());
    }
}
