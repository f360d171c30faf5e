// safety.rs — Fusion safety rules
//
// Pure predicates over declared metadata deciding whether two stages may be
// merged: the pairwise effect and multiplicity rules, the join rule for
// many-producer consumers, and the whole-loop rule for feedback cycles.
//
// Preconditions: none (metadata only, transforms are never inspected).
// Postconditions: a refusal is always reported as a `Refusal` value or a
//                 reason string, never as an error.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::effect::EffectTag;
use crate::graph::StreamNode;
use crate::multiplicity::Multiplicity;

// ── Refusal reasons ─────────────────────────────────────────────────────────

/// Why an edge was judged not eligible for fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Refusal {
    /// One side is non-deterministic or external.
    Effect,
    /// The fused stage would repeat more than the downstream stage declares.
    Multiplicity,
    EffectAndMultiplicity,
    /// A producer feeding the same join is non-deterministic or external.
    JoinEffect,
    /// The producers feeding the join may emit more than one element in total.
    JoinMultiplicity,
    /// The edge is a self-loop; a node never fuses with itself.
    SelfLoop,
}

impl Refusal {
    pub fn as_str(self) -> &'static str {
        match self {
            Refusal::Effect => "effect-safety violation",
            Refusal::Multiplicity => "multiplicity violation",
            Refusal::EffectAndMultiplicity => "effect-safety and multiplicity violation",
            Refusal::JoinEffect => "effect-safety violation at join",
            Refusal::JoinMultiplicity => "multiplicity violation at join",
            Refusal::SelfLoop => "self-loop",
        }
    }

    pub fn is_effect(self) -> bool {
        matches!(
            self,
            Refusal::Effect | Refusal::EffectAndMultiplicity | Refusal::JoinEffect
        )
    }

    pub fn is_multiplicity(self) -> bool {
        matches!(
            self,
            Refusal::Multiplicity | Refusal::EffectAndMultiplicity | Refusal::JoinMultiplicity
        )
    }
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Pairwise rules ──────────────────────────────────────────────────────────

/// Both tags must be pure or deterministic; either stronger tag forbids fusion.
pub fn is_effect_fusion_safe(a: EffectTag, b: EffectTag) -> bool {
    a.is_fusible() && b.is_fusible()
}

pub fn fused_effect(a: EffectTag, b: EffectTag) -> EffectTag {
    a.join(b)
}

/// Bound of `upstream` followed by `downstream`: the saturating product.
pub fn fused_bound(upstream: Multiplicity, downstream: Multiplicity) -> Multiplicity {
    upstream.saturating_mul(downstream)
}

/// Would running `upstream` before `downstream` exceed what `downstream`
/// alone declares per input?
///
/// A zero-bound downstream stage still refuses any upstream that repeats
/// (`upstream > 1`), even though the product is zero.
pub fn would_increase_multiplicity(upstream: Multiplicity, downstream: Multiplicity) -> bool {
    if downstream == Multiplicity::ZERO {
        return !upstream.at_most_one();
    }
    fused_bound(upstream, downstream) > downstream
}

/// Multiplicity rule for the stage pair `f → g`.
pub fn can_fuse(f: &StreamNode, g: &StreamNode) -> bool {
    !would_increase_multiplicity(f.bound(), g.bound())
}

/// Combined pairwise verdict, `None` when both rules pass.
pub fn pair_refusal(f: &StreamNode, g: &StreamNode) -> Option<Refusal> {
    let effect_safe = is_effect_fusion_safe(f.effect(), g.effect());
    let multiplicity_safe = can_fuse(f, g);
    match (effect_safe, multiplicity_safe) {
        (true, true) => None,
        (false, true) => Some(Refusal::Effect),
        (true, false) => Some(Refusal::Multiplicity),
        (false, false) => Some(Refusal::EffectAndMultiplicity),
    }
}

// ── Join rule ───────────────────────────────────────────────────────────────

/// Join (many producers, one consumer): no producer may be non-deterministic
/// or external, and the producers' bounds may sum to at most one.
pub fn join_refusal(producers: &[&StreamNode]) -> Option<Refusal> {
    if producers.iter().any(|p| !p.effect().is_fusible()) {
        return Some(Refusal::JoinEffect);
    }
    let total = Multiplicity::sum(producers.iter().map(|p| p.bound()));
    if total > Multiplicity::ONE {
        return Some(Refusal::JoinMultiplicity);
    }
    None
}

// ── Cycle rule ──────────────────────────────────────────────────────────────

/// Decide whether a feedback loop may be fused as a whole.
///
/// Every member needs a finite bound and a pure or deterministic effect; if
/// any member is deterministic-effectful, no member may repeat (bound > 1).
/// Returns the reason for the first violated condition.
pub fn cycle_refusal(members: &[&StreamNode]) -> Option<String> {
    if let Some(node) = members.iter().find(|n| n.bound().is_unbounded()) {
        return Some(format!(
            "infinite bound in cycle: node {} is unbounded",
            node.id
        ));
    }
    if let Some(node) = members.iter().find(|n| !n.effect().is_fusible()) {
        return Some(format!(
            "{} effect in cycle at node {}",
            node.effect(),
            node.id
        ));
    }
    let effectful = members
        .iter()
        .find(|n| n.effect() == EffectTag::DeterministicEffect);
    if let Some(effectful) = effectful {
        if let Some(node) = members.iter().find(|n| !n.bound().at_most_one()) {
            return Some(format!(
                "deterministic effect at node {} with node {} repeating {} times per iteration",
                effectful.id,
                node.id,
                node.bound()
            ));
        }
    }
    None
}

// ── Tests ───────────────────────────────────────────────────────────────────
