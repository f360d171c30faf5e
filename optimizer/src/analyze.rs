// analyze.rs — Feedback-loop detection and topological ordering
//
// Finds feedback loops as strongly connected components (Tarjan) and judges
// each loop with the whole-cycle fusion rule, then orders the acyclic
// remainder depth-first. Both walks use explicit work stacks so graph depth
// is not limited by the call stack.
//
// Preconditions: `graph` satisfies the adjacency invariants.
// Postconditions: every node on a cycle (including self-loops) belongs to
//                 exactly one reported component; the topological order
//                 lists every non-excluded node once, producers first.
// Failure modes: a cycle among non-excluded nodes → `FusionError::UnexpectedCycle`.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::{FusionError, GraphError};
use crate::graph::{NodeId, StreamGraph, StreamNode};
use crate::safety::cycle_refusal;

// ── Public types ────────────────────────────────────────────────────────────

/// A feedback loop: members in discovery order plus the fusion verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StronglyConnectedComponent {
    pub nodes: Vec<NodeId>,
    pub can_fuse: bool,
    pub reason: Option<String>,
}

impl StronglyConnectedComponent {
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Cycle components and the order of everything outside them.
#[derive(Debug, Clone)]
pub struct GraphAnalysis {
    pub components: Vec<StronglyConnectedComponent>,
    pub cyclic: HashSet<NodeId>,
    pub order: Vec<NodeId>,
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Detect feedback loops, then topologically sort the remaining nodes.
pub fn analyze_graph(graph: &StreamGraph) -> Result<GraphAnalysis, FusionError> {
    let components = strongly_connected_components(graph);
    let cyclic = cyclic_members(&components);
    let order = topological_order(graph, &cyclic)?;
    Ok(GraphAnalysis {
        components,
        cyclic,
        order,
    })
}

/// Every node that belongs to some component.
pub fn cyclic_members(components: &[StronglyConnectedComponent]) -> HashSet<NodeId> {
    components
        .iter()
        .flat_map(|c| c.nodes.iter().cloned())
        .collect()
}

/// Feedback loops of `graph`: components with more than one node, or a
/// single node with an edge to itself. Ordered by discovery.
pub fn strongly_connected_components(graph: &StreamGraph) -> Vec<StronglyConnectedComponent> {
    let ids: Vec<&NodeId> = graph.node_ids().collect();
    let position: HashMap<&NodeId, usize> =
        ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let adjacency: Vec<Vec<usize>> = ids
        .iter()
        .map(|id| {
            graph
                .node(id)
                .map(|node| {
                    node.downstream
                        .iter()
                        .filter_map(|d| position.get(d).copied())
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect();

    let mut tarjan = Tarjan::new(&adjacency);
    for v in 0..adjacency.len() {
        if tarjan.index[v] == UNVISITED {
            tarjan.run_from(v);
        }
    }

    let mut found: Vec<(usize, Vec<usize>)> = tarjan
        .components
        .into_iter()
        .filter(|c| c.len() > 1 || c.iter().any(|&v| adjacency[v].contains(&v)))
        .map(|c| (c.first().map_or(0, |&v| tarjan.index[v]), c))
        .collect();
    found.sort_by_key(|(discovered, _)| *discovered);

    found
        .into_iter()
        .map(|(_, members)| {
            let nodes: Vec<NodeId> = members.iter().map(|&v| ids[v].clone()).collect();
            let member_nodes: Vec<&StreamNode> =
                nodes.iter().filter_map(|id| graph.node(id)).collect();
            let reason = cycle_refusal(&member_nodes);
            StronglyConnectedComponent {
                nodes,
                can_fuse: reason.is_none(),
                reason,
            }
        })
        .collect()
}

/// Depth-first topological order of all nodes not in `excluded`.
///
/// Edges into or out of excluded nodes are ignored. Meeting a cycle means the
/// caller failed to exclude a component; that is reported, not repaired.
pub fn topological_order(
    graph: &StreamGraph,
    excluded: &HashSet<NodeId>,
) -> Result<Vec<NodeId>, FusionError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Active,
        Done,
    }

    let mut marks: HashMap<&NodeId, Mark> = HashMap::new();
    let mut postorder: Vec<NodeId> = Vec::with_capacity(graph.len());

    for root in graph.node_ids() {
        if excluded.contains(root) || marks.contains_key(root) {
            continue;
        }
        marks.insert(root, Mark::Active);
        let mut frames: Vec<(&NodeId, usize)> = vec![(root, 0)];

        while let Some(frame) = frames.last_mut() {
            let (id, next) = *frame;
            let node = graph
                .node(id)
                .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;

            let Some(child) = node.downstream.get(next) else {
                frames.pop();
                marks.insert(id, Mark::Done);
                postorder.push(id.clone());
                continue;
            };
            frame.1 += 1;
            if excluded.contains(child) {
                continue;
            }
            match marks.get(child) {
                None => {
                    marks.insert(child, Mark::Active);
                    frames.push((child, 0));
                }
                Some(Mark::Active) => {
                    let start = frames.iter().position(|(n, _)| *n == child).unwrap_or(0);
                    let cycle = frames[start..].iter().map(|(n, _)| (*n).clone()).collect();
                    return Err(FusionError::UnexpectedCycle(cycle));
                }
                Some(Mark::Done) => {}
            }
        }
    }

    postorder.reverse();
    Ok(postorder)
}

// ── Tarjan ──────────────────────────────────────────────────────────────────

const UNVISITED: usize = usize::MAX;

struct Tarjan<'a> {
    adjacency: &'a [Vec<usize>],
    next_index: usize,
    index: Vec<usize>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    /// Components in completion order, members sorted by discovery.
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn new(adjacency: &'a [Vec<usize>]) -> Self {
        let n = adjacency.len();
        Tarjan {
            adjacency,
            next_index: 0,
            index: vec![UNVISITED; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            components: Vec::new(),
        }
    }

    fn visit(&mut self, v: usize) {
        self.index[v] = self.next_index;
        self.lowlink[v] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v] = true;
    }

    fn run_from(&mut self, root: usize) {
        let adjacency = self.adjacency;
        self.visit(root);
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(frame) = frames.last_mut() {
            let v = frame.0;
            if let Some(&w) = adjacency[v].get(frame.1) {
                frame.1 += 1;
                if self.index[w] == UNVISITED {
                    self.visit(w);
                    frames.push((w, 0));
                } else if self.on_stack[w] {
                    self.lowlink[v] = self.lowlink[v].min(self.index[w]);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                self.lowlink[parent] = self.lowlink[parent].min(self.lowlink[v]);
            }
            if self.lowlink[v] == self.index[v] {
                self.pop_component(v);
            }
        }
    }

    fn pop_component(&mut self, root: usize) {
        let mut component = Vec::new();
        while let Some(w) = self.stack.pop() {
            self.on_stack[w] = false;
            component.push(w);
            if w == root {
                break;
            }
        }
        component.sort_unstable_by_key(|&w| self.index[w]);
        self.components.push(component);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OperatorKind;
    use crate::effect::EffectTag;
    use crate::graph::{FeedbackEdge, NodeSpec};
    use crate::multiplicity::Multiplicity;
    use crate::stream::Stream;

    fn node(id: &str, bound: Multiplicity) -> NodeSpec {
        NodeSpec::new(
            id,
            Stream::opaque(bound, EffectTag::Pure),
            OperatorKind::stateless("map"),
        )
    }

    fn pure(id: &str) -> NodeSpec {
        node(id, Multiplicity::ONE)
    }

    fn names(ids: &[NodeId]) -> Vec<&str> {
        ids.iter().map(NodeId::as_str).collect()
    }

    fn position(order: &[NodeId], id: &str) -> usize {
        order.iter().position(|n| n.as_str() == id).unwrap()
    }

    // ── Components ──────────────────────────────────────────────────────

    #[test]
    fn linear_chain_has_no_components() {
        let g = StreamGraph::linear([pure("a"), pure("b"), pure("c")]).unwrap();
        assert!(strongly_connected_components(&g).is_empty());
    }

    #[test]
    fn three_node_cycle() {
        let g = StreamGraph::with_feedback(
            [pure("a"), pure("b"), pure("c")],
            FeedbackEdge::new("c", "a"),
        )
        .unwrap();
        let sccs = strongly_connected_components(&g);
        assert_eq!(sccs.len(), 1);
        assert_eq!(names(&sccs[0].nodes), vec!["a", "b", "c"]);
        assert!(sccs[0].can_fuse);
        assert_eq!(sccs[0].reason, None);
    }

    #[test]
    fn unbounded_member_blocks_cycle() {
        let g = StreamGraph::with_feedback(
            [pure("a"), node("b", Multiplicity::Unbounded), pure("c")],
            FeedbackEdge::new("c", "a"),
        )
        .unwrap();
        let sccs = strongly_connected_components(&g);
        assert_eq!(sccs.len(), 1);
        assert!(!sccs[0].can_fuse);
        assert!(sccs[0]
            .reason
            .as_deref()
            .unwrap()
            .contains("infinite bound in cycle"));
    }

    #[test]
    fn cycle_inside_larger_graph() {
        // src → a → b → c → sink, with c → b feedback
        let mut g = StreamGraph::linear([pure("src"), pure("a"), pure("b"), pure("c"), pure("sink")])
            .unwrap();
        g.mark_feedback(&"c".into(), &"b".into()).unwrap();
        let analysis = analyze_graph(&g).unwrap();
        assert_eq!(analysis.components.len(), 1);
        assert_eq!(names(&analysis.components[0].nodes), vec!["b", "c"]);
        assert_eq!(names(&analysis.order), vec!["src", "a", "sink"]);
    }

    #[test]
    fn disjoint_cycles_reported_in_discovery_order() {
        let mut g =
            StreamGraph::linear([pure("a"), pure("b"), pure("c"), pure("d"), pure("e")]).unwrap();
        g.mark_feedback(&"b".into(), &"a".into()).unwrap();
        g.mark_feedback(&"e".into(), &"d".into()).unwrap();
        let sccs = strongly_connected_components(&g);
        assert_eq!(sccs.len(), 2);
        assert_eq!(names(&sccs[0].nodes), vec!["a", "b"]);
        assert_eq!(names(&sccs[1].nodes), vec!["d", "e"]);
    }

    #[test]
    fn self_loop_is_a_component() {
        let mut g = StreamGraph::linear([pure("a"), pure("b")]).unwrap();
        g.mark_feedback(&"b".into(), &"b".into()).unwrap();
        let sccs = strongly_connected_components(&g);
        assert_eq!(sccs.len(), 1);
        assert_eq!(names(&sccs[0].nodes), vec!["b"]);
        assert!(sccs[0].can_fuse);
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        let n = 20_000;
        let specs: Vec<NodeSpec> = (0..n).map(|i| pure(&format!("n{i}"))).collect();
        let mut g = StreamGraph::linear(specs).unwrap();
        g.mark_feedback(&format!("n{}", n - 1).into(), &"n0".into())
            .unwrap();
        let sccs = strongly_connected_components(&g);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), n);

        let open = StreamGraph::linear((0..n).map(|i| pure(&format!("m{i}")))).unwrap();
        let order = topological_order(&open, &HashSet::new()).unwrap();
        assert_eq!(order.len(), n);
        assert_eq!(order[0].as_str(), "m0");
    }

    // ── Topological order ───────────────────────────────────────────────

    #[test]
    fn diamond_respects_every_edge() {
        let g = StreamGraph::branching(
            pure("src"),
            vec![vec![pure("l")], vec![pure("r")]],
            Some(pure("join")),
        )
        .unwrap();
        let order = topological_order(&g, &HashSet::new()).unwrap();
        assert_eq!(order.len(), 4);
        for (from, to) in g.edges() {
            assert!(
                position(&order, from.as_str()) < position(&order, to.as_str()),
                "{from} must precede {to}"
            );
        }
    }

    #[test]
    fn unexpected_cycle_is_a_structural_error() {
        let g = StreamGraph::with_feedback(
            [pure("a"), pure("b"), pure("c")],
            FeedbackEdge::new("c", "a"),
        )
        .unwrap();
        let err = topological_order(&g, &HashSet::new()).unwrap_err();
        match err {
            FusionError::UnexpectedCycle(path) => {
                assert_eq!(names(&path), vec!["a", "b", "c"]);
            }
            other => panic!("expected UnexpectedCycle, got {other:?}"),
        }
    }

    #[test]
    fn excluded_nodes_are_skipped() {
        let g = StreamGraph::with_feedback(
            [pure("a"), pure("b"), pure("c")],
            FeedbackEdge::new("c", "b"),
        )
        .unwrap();
        let excluded: HashSet<NodeId> = ["b".into(), "c".into()].into_iter().collect();
        let order = topological_order(&g, &excluded).unwrap();
        assert_eq!(names(&order), vec!["a"]);
    }
}
