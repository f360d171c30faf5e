// optimize.rs — Fusion optimizer
//
// Two variants over the same rules:
//   - `optimize`: graph-aware. Each round re-analyzes the graph, fuses the
//     internal eligible edges of every fusible feedback loop (discovery
//     order), then walks the topological order of the acyclic remainder
//     letting each node absorb its first eligible successor. Rounds repeat
//     until one performs no fusion.
//   - `optimize_linear`: sliding two-node window over the node sequence,
//     repeated to a fixed point or the configured iteration cap. Members of
//     feedback loops are left as they are.
//
// Preconditions: `graph` satisfies the adjacency invariants.
// Postconditions: every performed fusion was eligible when it was applied;
//                 no fusion crosses a feedback-loop boundary or closes a new
//                 cycle; the returned graph satisfies the adjacency
//                 invariants.
// Failure modes: cycle outside the detected components →
//                `FusionError::UnexpectedCycle`; `force_fuse` without
//                `allow_unsafe` → `FusionError::UnsafeFusionNotAllowed`.
// Side effects: `tracing` events; nothing else.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::analyze::{
    analyze_graph, cyclic_members, strongly_connected_components, GraphAnalysis,
    StronglyConnectedComponent,
};
use crate::config::FusionConfig;
use crate::edges::{analyze_edge, analyze_edges, FusionEdge};
use crate::error::{FusionError, GraphError};
use crate::graph::{NodeId, StreamGraph};
use crate::report::{DebugLog, FusionPhase, FusionRecord, FusionReport, FusionStats, OptimizeMode};
use crate::safety;

// ── Public types ────────────────────────────────────────────────────────────

/// Result of one optimize call: the rewritten graph and its report.
#[derive(Debug, Clone)]
pub struct Optimized {
    pub graph: StreamGraph,
    pub report: FusionReport,
}

/// Holds only its configuration; every call is independent.
#[derive(Debug, Clone, Default)]
pub struct FusionOptimizer {
    config: FusionConfig,
}

impl FusionOptimizer {
    pub fn new(config: FusionConfig) -> Self {
        FusionOptimizer { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Graph-aware optimization: feedback loops first, then the acyclic rest.
    pub fn optimize(&self, graph: StreamGraph) -> Result<Optimized, FusionError> {
        let span = tracing::debug_span!("optimize", mode = "graph", nodes = graph.len());
        let _enter = span.enter();

        let initial = analyze_graph(&graph)?;
        let edges = analyze_edges(&graph);
        let mut pass = FusionPass::new(graph, &self.config);

        loop {
            pass.iterations += 1;
            let before = pass.fusions.len();

            let analysis = analyze_graph(&pass.graph)?;
            pass.fuse_cycles(&analysis)?;
            let analysis = if pass.fusions.len() > before {
                analyze_graph(&pass.graph)?
            } else {
                analysis
            };
            pass.fuse_dag(&analysis)?;

            if pass.fusions.len() == before {
                break;
            }
        }

        debug!(
            fusions = pass.fusions.len(),
            rounds = pass.iterations,
            "graph optimization finished"
        );
        Ok(pass.finish(OptimizeMode::Graph, edges, initial.components))
    }

    /// Sliding-window optimization for graphs known to be free of feedback.
    ///
    /// Each pass visits adjacent pairs of the node sequence left to right and
    /// fuses a pair when it is joined by an eligible edge. Stops after a pass
    /// without fusion or after `max_linear_iterations` passes. A pair with a
    /// feedback-loop member is never fused here; `optimize` handles loops.
    pub fn optimize_linear(&self, graph: StreamGraph) -> Result<Optimized, FusionError> {
        let span = tracing::debug_span!("optimize", mode = "linear", nodes = graph.len());
        let _enter = span.enter();

        let components = strongly_connected_components(&graph);
        let cyclic = cyclic_members(&components);
        let edges = analyze_edges(&graph);
        let mut pass = FusionPass::new(graph, &self.config);

        let mut converged = false;
        while pass.iterations < self.config.max_linear_iterations {
            pass.iterations += 1;
            if !pass.slide_window(&cyclic)? {
                converged = true;
                break;
            }
        }
        if !converged && pass.iterations > 0 {
            debug!(cap = pass.iterations, "sliding window stopped at iteration cap");
            pass.log.record(format_args!(
                "stopped at iteration cap {} with fusions still possible",
                pass.iterations
            ));
        }

        Ok(pass.finish(OptimizeMode::Linear, edges, components))
    }

    /// Merge `from → to` regardless of the safety rules.
    ///
    /// Refused unless the configuration sets `allow_unsafe`. The replacement
    /// still gets the product bound and joined effect.
    pub fn force_fuse(
        &self,
        graph: &mut StreamGraph,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<NodeId, FusionError> {
        if !self.config.allow_unsafe {
            return Err(FusionError::UnsafeFusionNotAllowed {
                from: from.clone(),
                to: to.clone(),
            });
        }
        let edge = analyze_edge(graph, from, to).ok_or_else(|| GraphError::EdgeNotFound {
            from: from.clone(),
            to: to.clone(),
        })?;
        if let Some(reason) = edge.reason() {
            warn!(%from, %to, reason, "forcing unsafe fusion");
        }
        let id = fuse_nodes(graph, &edge)?;
        debug!(%from, %to, fused = %id, phase = FusionPhase::Forced.as_str(), "fused");
        Ok(id)
    }
}

/// Replace the endpoints of `edge` with one node.
///
/// Uses the edge's precomputed fused bound and effect when present; for a
/// refused edge they are computed from the two nodes.
pub fn fuse_nodes(graph: &mut StreamGraph, edge: &FusionEdge) -> Result<NodeId, FusionError> {
    let (bound, effect) = match (edge.fused_bound, edge.fused_effect) {
        (Some(bound), Some(effect)) => (bound, effect),
        _ => {
            let f = graph
                .node(&edge.from)
                .ok_or_else(|| GraphError::NodeNotFound(edge.from.clone()))?;
            let g = graph
                .node(&edge.to)
                .ok_or_else(|| GraphError::NodeNotFound(edge.to.clone()))?;
            (
                safety::fused_bound(f.bound(), g.bound()),
                safety::fused_effect(f.effect(), g.effect()),
            )
        }
    };
    Ok(graph.merge(&edge.from, &edge.to, bound, effect)?)
}

// ── Pass state ──────────────────────────────────────────────────────────────

/// Mutable state of one optimize call.
struct FusionPass {
    graph: StreamGraph,
    input_fingerprint: String,
    fusions: Vec<FusionRecord>,
    iterations: usize,
    log: DebugLog,
}

impl FusionPass {
    fn new(graph: StreamGraph, config: &FusionConfig) -> Self {
        FusionPass {
            input_fingerprint: graph.fingerprint_hex(),
            graph,
            fusions: Vec::new(),
            iterations: 0,
            log: DebugLog::new(config.debug),
        }
    }

    /// Phase 1: fuse inside every fusible feedback loop until no internal
    /// eligible edge remains. Self edges never fuse.
    ///
    /// Members are swept in discovery order; each visited member keeps
    /// absorbing eligible successors inside the loop, and a replacement takes
    /// the place of the member it grew from.
    fn fuse_cycles(&mut self, analysis: &GraphAnalysis) -> Result<(), FusionError> {
        for component in &analysis.components {
            if !component.can_fuse {
                if let Some(reason) = &component.reason {
                    self.log.record(format_args!(
                        "cycle [{}] left intact: {reason}",
                        join(&component.nodes)
                    ));
                }
                continue;
            }
            let mut members: Vec<Option<NodeId>> =
                component.nodes.iter().cloned().map(Some).collect();
            let mut slots: HashMap<NodeId, usize> = component
                .nodes
                .iter()
                .enumerate()
                .map(|(i, id)| (id.clone(), i))
                .collect();

            let mut changed = true;
            while changed {
                changed = false;
                for i in 0..members.len() {
                    let Some(mut current) = members[i].clone() else {
                        continue;
                    };
                    while let Some(edge) = self.next_cycle_edge(&current, &slots) {
                        let fused = self.fuse(&edge, FusionPhase::Cycle)?;
                        if let Some(slot) = slots.remove(&edge.to) {
                            members[slot] = None;
                        }
                        if let Some(slot) = slots.remove(&edge.from) {
                            members[slot] = Some(fused.clone());
                            slots.insert(fused.clone(), slot);
                        }
                        current = fused;
                        changed = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// First eligible edge from `from` to another member of the same loop.
    fn next_cycle_edge(
        &self,
        from: &NodeId,
        members: &HashMap<NodeId, usize>,
    ) -> Option<FusionEdge> {
        let node = self.graph.node(from)?;
        node.downstream
            .iter()
            .filter(|to| *to != from && members.contains_key(*to))
            .filter_map(|to| analyze_edge(&self.graph, from, to))
            .find(|edge| edge.eligible)
    }

    /// Phase 2: one pass over the topological order; each visited node keeps
    /// absorbing its first eligible successor outside every feedback loop.
    fn fuse_dag(&mut self, analysis: &GraphAnalysis) -> Result<(), FusionError> {
        for id in &analysis.order {
            let mut current = id.clone();
            while let Some(edge) = self.next_dag_edge(&current, &analysis.cyclic) {
                current = self.fuse(&edge, FusionPhase::Dag)?;
            }
        }
        Ok(())
    }

    fn next_dag_edge(&mut self, from: &NodeId, cyclic: &HashSet<NodeId>) -> Option<FusionEdge> {
        let node = self.graph.node(from)?;
        for to in &node.downstream {
            if to == from || cyclic.contains(to) {
                continue;
            }
            let Some(edge) = analyze_edge(&self.graph, from, to) else {
                continue;
            };
            if let Some(reason) = edge.reason() {
                self.log.record(format_args!("skip {from} -> {to}: {reason}"));
                continue;
            }
            if self.graph.has_indirect_path(from, to) {
                self.log.record(format_args!(
                    "skip {from} -> {to}: another path would close a cycle"
                ));
                continue;
            }
            return Some(edge);
        }
        None
    }

    /// One left-to-right window pass. Returns whether anything fused.
    ///
    /// After a fusion the window moves past the replacement, so a node is
    /// fused at most once per pass.
    fn slide_window(&mut self, cyclic: &HashSet<NodeId>) -> Result<bool, FusionError> {
        let mut changed = false;
        let mut left = self.graph.node_ids().next().cloned();
        while let Some(from) = left {
            let Some(to) = self.graph.next_in_sequence(&from).cloned() else {
                break;
            };
            left = Some(to.clone());
            let Some(edge) = analyze_edge(&self.graph, &from, &to) else {
                continue;
            };
            if cyclic.contains(&from) || cyclic.contains(&to) {
                self.log
                    .record(format_args!("skip {from} -> {to}: feedback loop member"));
            } else if let Some(reason) = edge.reason() {
                self.log.record(format_args!("skip {from} -> {to}: {reason}"));
            } else if self.graph.has_indirect_path(&from, &to) {
                self.log.record(format_args!(
                    "skip {from} -> {to}: another path would close a cycle"
                ));
            } else {
                let fused = self.fuse(&edge, FusionPhase::Linear)?;
                left = self.graph.next_in_sequence(&fused).cloned();
                changed = true;
            }
        }
        Ok(changed)
    }

    fn fuse(&mut self, edge: &FusionEdge, phase: FusionPhase) -> Result<NodeId, FusionError> {
        let fused = fuse_nodes(&mut self.graph, edge)?;
        debug_assert!(
            self.graph.check_consistency().is_ok(),
            "adjacency broken after fusing {} -> {}",
            edge.from,
            edge.to
        );

        let (bound, effect) = match self.graph.node(&fused) {
            Some(node) => (node.bound(), node.effect()),
            None => return Err(GraphError::NodeNotFound(fused).into()),
        };
        debug!(from = %edge.from, to = %edge.to, fused = %fused, phase = phase.as_str(), "fused");
        self.log.record(format_args!(
            "fuse {} -> {} as {fused} ({}; bound {bound}, {effect})",
            edge.from,
            edge.to,
            phase.as_str()
        ));
        self.fusions.push(FusionRecord {
            from: edge.from.clone(),
            to: edge.to.clone(),
            fused: fused.clone(),
            bound,
            effect,
            phase,
        });
        Ok(fused)
    }

    fn finish(
        self,
        mode: OptimizeMode,
        edges: Vec<FusionEdge>,
        components: Vec<StronglyConnectedComponent>,
    ) -> Optimized {
        let mut stats = FusionStats::from_analysis(&edges, &components);
        stats.fused_edges = self.fusions.len();
        let report = FusionReport {
            mode,
            edges,
            components,
            fusions: self.fusions,
            stats,
            iterations: self.iterations,
            input_fingerprint: self.input_fingerprint,
            output_fingerprint: self.graph.fingerprint_hex(),
            debug_log: self.log.into_lines(),
        };
        Optimized {
            graph: self.graph,
            report,
        }
    }
}

fn join(ids: &[NodeId]) -> String {
    ids.iter().map(NodeId::as_str).collect::<Vec<_>>().join(", ")
}

// ── Tests ───────────────────────────────────────────────────────────────────
