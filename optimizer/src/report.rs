// report.rs — Fusion report, counters and debug log
//
// Collects what one optimize call analyzed and did: the edges and feedback
// loops of the input graph, aggregate counters, each fusion performed, and
// the optional debug decision log. `Display` renders the multi-section text
// report; it is presentation only.
//
// Preconditions: none.
// Postconditions: counters are derived from the edge and component lists of
//                 the input graph plus the number of recorded fusions.
// Failure modes: none.
// Side effects: `DebugLog` with the tracing sink emits `tracing` events.

use std::fmt;

use serde::Serialize;

use crate::analyze::StronglyConnectedComponent;
use crate::config::{DebugConfig, DebugSink};
use crate::edges::FusionEdge;
use crate::effect::EffectTag;
use crate::graph::NodeId;
use crate::multiplicity::Multiplicity;

// ── Public types ────────────────────────────────────────────────────────────

/// Which optimizer produced the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeMode {
    Graph,
    Linear,
}

impl OptimizeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizeMode::Graph => "graph",
            OptimizeMode::Linear => "linear",
        }
    }
}

/// The step that performed a fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionPhase {
    /// Inside a fusible feedback loop.
    Cycle,
    /// Along the topological order of the acyclic remainder.
    Dag,
    /// Sliding window over the node sequence.
    Linear,
    /// Explicit unsafe-mode request.
    Forced,
}

impl FusionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            FusionPhase::Cycle => "cycle",
            FusionPhase::Dag => "dag",
            FusionPhase::Linear => "linear",
            FusionPhase::Forced => "forced",
        }
    }
}

/// One performed fusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FusionRecord {
    pub from: NodeId,
    pub to: NodeId,
    pub fused: NodeId,
    pub bound: Multiplicity,
    pub effect: EffectTag,
    pub phase: FusionPhase,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FusionStats {
    pub total_edges: usize,
    pub eligible_edges: usize,
    pub fused_edges: usize,
    /// Edges refused by the safety analysis.
    pub skipped_edges: usize,
    pub multiplicity_violations: usize,
    pub effect_violations: usize,
    pub feedback_cycles: usize,
}

impl FusionStats {
    /// Counters of an input graph's analysis; `fused_edges` is filled in later.
    pub fn from_analysis(edges: &[FusionEdge], components: &[StronglyConnectedComponent]) -> Self {
        let eligible_edges = edges.iter().filter(|e| e.eligible).count();
        FusionStats {
            total_edges: edges.len(),
            eligible_edges,
            fused_edges: 0,
            skipped_edges: edges.len() - eligible_edges,
            multiplicity_violations: edges.iter().filter(|e| !e.multiplicity_safe).count(),
            effect_violations: edges.iter().filter(|e| !e.effect_safe).count(),
            feedback_cycles: components.len(),
        }
    }
}

/// Everything one optimize call analyzed and did.
#[derive(Debug, Clone, Serialize)]
pub struct FusionReport {
    pub mode: OptimizeMode,
    pub edges: Vec<FusionEdge>,
    pub components: Vec<StronglyConnectedComponent>,
    pub fusions: Vec<FusionRecord>,
    pub stats: FusionStats,
    /// Rounds (graph mode) or window passes (linear mode), the final
    /// unchanged one included.
    pub iterations: usize,
    pub input_fingerprint: String,
    pub output_fingerprint: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub debug_log: Vec<String>,
}

impl FusionReport {
    pub fn fused_count(&self) -> usize {
        self.fusions.len()
    }

    /// True when the optimize call left the graph unchanged.
    pub fn is_unchanged(&self) -> bool {
        self.fusions.is_empty()
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&FusionEdge> {
        self.edges
            .iter()
            .find(|e| e.from.as_str() == from && e.to.as_str() == to)
    }
}

// ── Debug log ───────────────────────────────────────────────────────────────

/// Per-call sink for human-readable decision lines.
#[derive(Debug, Clone)]
pub struct DebugLog {
    config: DebugConfig,
    lines: Vec<String>,
}

impl DebugLog {
    pub fn new(config: DebugConfig) -> Self {
        DebugLog {
            config,
            lines: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn record(&mut self, line: fmt::Arguments<'_>) {
        if !self.config.enabled {
            return;
        }
        match self.config.sink {
            DebugSink::Tracing => tracing::debug!(target: "streamfuse::decisions", "{}", line),
            DebugSink::Buffer => self.lines.push(line.to_string()),
        }
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for FusionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "FusionReport ({} mode, {} fusions)",
            self.mode.as_str(),
            self.fused_count()
        )?;

        let s = &self.stats;
        writeln!(f, "  statistics:")?;
        writeln!(f, "    total edges: {}", s.total_edges)?;
        writeln!(f, "    eligible edges: {}", s.eligible_edges)?;
        writeln!(f, "    fused edges: {}", s.fused_edges)?;
        writeln!(f, "    skipped edges: {}", s.skipped_edges)?;
        writeln!(f, "    multiplicity violations: {}", s.multiplicity_violations)?;
        writeln!(f, "    effect violations: {}", s.effect_violations)?;
        writeln!(f, "    feedback cycles: {}", s.feedback_cycles)?;
        writeln!(f, "    iterations: {}", self.iterations)?;

        if !self.components.is_empty() {
            writeln!(f, "  components:")?;
            for (i, c) in self.components.iter().enumerate() {
                let members: Vec<&str> = c.nodes.iter().map(NodeId::as_str).collect();
                match &c.reason {
                    None => writeln!(f, "    {i}: [{}] fusible", members.join(", "))?,
                    Some(reason) => {
                        writeln!(f, "    {i}: [{}] not fusible: {reason}", members.join(", "))?
                    }
                }
            }
        }

        if !self.edges.is_empty() {
            writeln!(f, "  edges:")?;
            for e in &self.edges {
                let marker = if e.feedback { " [feedback]" } else { "" };
                match (e.fused_bound, e.fused_effect, e.reason()) {
                    (Some(bound), Some(effect), _) => writeln!(
                        f,
                        "    {} -> {}{marker}: eligible (bound {bound}, {effect})",
                        e.from, e.to
                    )?,
                    (_, _, reason) => writeln!(
                        f,
                        "    {} -> {}{marker}: refused ({})",
                        e.from,
                        e.to,
                        reason.unwrap_or("unknown")
                    )?,
                }
            }
        }

        if !self.fusions.is_empty() {
            writeln!(f, "  fusions:")?;
            for r in &self.fusions {
                writeln!(
                    f,
                    "    [{}] {} + {} => {} (bound {}, {})",
                    r.phase.as_str(),
                    r.from,
                    r.to,
                    r.fused,
                    r.bound,
                    r.effect
                )?;
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
