// edges.rs — Per-edge fusion eligibility
//
// For every directed edge u → v, combines the pairwise effect and
// multiplicity rules with the join rule (when v has several producers) and
// precomputes the fused bound and effect for eligible edges.
//
// Preconditions: `graph` satisfies the adjacency invariants.
// Postconditions: `eligible` ⇔ `refusal.is_none()`; fused metadata is
//                 present exactly when the edge is eligible.
// Failure modes: none (a missing edge yields `None`).
// Side effects: none.

use serde::Serialize;

use crate::effect::EffectTag;
use crate::graph::{NodeId, StreamGraph, StreamNode};
use crate::multiplicity::Multiplicity;
use crate::safety::{self, Refusal};

/// Analysis of one directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FusionEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub effect_safe: bool,
    pub multiplicity_safe: bool,
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fused_bound: Option<Multiplicity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fused_effect: Option<EffectTag>,
    /// The edge is marked as closing a feedback loop.
    pub feedback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<Refusal>,
}

impl FusionEdge {
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }

    pub fn reason(&self) -> Option<&'static str> {
        self.refusal.map(Refusal::as_str)
    }
}

/// Analyze `from → to`. Returns `None` when the edge does not exist.
pub fn analyze_edge(graph: &StreamGraph, from: &NodeId, to: &NodeId) -> Option<FusionEdge> {
    if !graph.has_edge(from, to) {
        return None;
    }
    let f = graph.node(from)?;
    let g = graph.node(to)?;

    let pair = safety::pair_refusal(f, g);
    let join = join_producers(graph, g).and_then(|producers| safety::join_refusal(&producers));

    let effect_safe = !pair.is_some_and(Refusal::is_effect) && !join.is_some_and(Refusal::is_effect);
    let multiplicity_safe =
        !pair.is_some_and(Refusal::is_multiplicity) && !join.is_some_and(Refusal::is_multiplicity);

    let refusal = if from == to {
        Some(Refusal::SelfLoop)
    } else {
        pair.or(join)
    };
    let eligible = refusal.is_none();

    Some(FusionEdge {
        from: from.clone(),
        to: to.clone(),
        effect_safe,
        multiplicity_safe,
        eligible,
        fused_bound: eligible.then(|| safety::fused_bound(f.bound(), g.bound())),
        fused_effect: eligible.then(|| safety::fused_effect(f.effect(), g.effect())),
        feedback: graph.is_feedback_edge(from, to),
        refusal,
    })
}

/// Analyze every edge of `graph`, grouped by source in sequence order.
pub fn analyze_edges(graph: &StreamGraph) -> Vec<FusionEdge> {
    graph
        .edges()
        .iter()
        .filter_map(|(from, to)| analyze_edge(graph, from, to))
        .collect()
}

/// Producers feeding `consumer` when it is a join; a self-loop is not a producer.
fn join_producers<'g>(graph: &'g StreamGraph, consumer: &StreamNode) -> Option<Vec<&'g StreamNode>> {
    let producers: Vec<&StreamNode> = consumer
        .upstream
        .iter()
        .filter(|id| **id != consumer.id)
        .filter_map(|id| graph.node(id))
        .collect();
    (producers.len() > 1).then_some(producers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OperatorKind;
    use crate::graph::{FeedbackEdge, NodeSpec};
    use crate::stream::Stream;

    fn node(id: &str, bound: Multiplicity, effect: EffectTag) -> NodeSpec {
        NodeSpec::new(id, Stream::opaque(bound, effect), OperatorKind::stateless("op"))
    }

    fn pure(id: &str) -> NodeSpec {
        node(id, Multiplicity::ONE, EffectTag::Pure)
    }

    fn edge(g: &StreamGraph, from: &str, to: &str) -> FusionEdge {
        analyze_edge(g, &from.into(), &to.into()).unwrap()
    }

    #[test]
    fn eligible_edge_carries_fused_metadata() {
        let g = StreamGraph::linear([
            pure("a"),
            node("b", Multiplicity::Finite(4), EffectTag::DeterministicEffect),
        ])
        .unwrap();
        let e = edge(&g, "a", "b");
        assert!(e.eligible && e.effect_safe && e.multiplicity_safe);
        assert_eq!(e.fused_bound, Some(Multiplicity::Finite(4)));
        assert_eq!(e.fused_effect, Some(EffectTag::DeterministicEffect));
        assert_eq!(e.reason(), None);
    }

    #[test]
    fn refused_edge_has_no_fused_metadata() {
        let g = StreamGraph::linear([
            pure("map"),
            node("flat", Multiplicity::Unbounded, EffectTag::NonDeterministicEffect),
        ])
        .unwrap();
        let e = edge(&g, "map", "flat");
        assert!(!e.eligible);
        assert!(!e.effect_safe);
        assert!(e.multiplicity_safe);
        assert_eq!(e.refusal, Some(Refusal::Effect));
        assert_eq!(e.fused_bound, None);
        assert_eq!(e.fused_effect, None);
    }

    #[test]
    fn missing_edge_is_none() {
        let g = StreamGraph::linear([pure("a"), pure("b"), pure("c")]).unwrap();
        assert!(analyze_edge(&g, &"a".into(), &"c".into()).is_none());
    }

    #[test]
    fn split_branches_are_independent() {
        let g = StreamGraph::branching(
            pure("src"),
            vec![
                vec![pure("ok")],
                vec![node("ext", Multiplicity::ONE, EffectTag::ExternalEffect)],
            ],
            None,
        )
        .unwrap();
        assert!(edge(&g, "src", "ok").eligible);
        assert_eq!(edge(&g, "src", "ext").refusal, Some(Refusal::Effect));
    }

    #[test]
    fn join_rule_applies_to_every_producer() {
        let g = StreamGraph::branching(
            pure("src"),
            vec![vec![pure("l")], vec![pure("r")]],
            Some(pure("join")),
        )
        .unwrap();
        let e = edge(&g, "l", "join");
        assert_eq!(e.refusal, Some(Refusal::JoinMultiplicity));
        assert!(e.effect_safe);
        assert!(!e.multiplicity_safe);
        assert_eq!(edge(&g, "r", "join").refusal, Some(Refusal::JoinMultiplicity));
    }

    #[test]
    fn join_of_silent_producers_is_fine() {
        let g = StreamGraph::branching(
            pure("src"),
            vec![
                vec![node("l", Multiplicity::ZERO, EffectTag::Pure)],
                vec![pure("r")],
            ],
            Some(pure("join")),
        )
        .unwrap();
        assert!(edge(&g, "r", "join").eligible);
    }

    #[test]
    fn self_loop_and_feedback_flags() {
        let mut g =
            StreamGraph::with_feedback([pure("a"), pure("b")], FeedbackEdge::new("b", "a")).unwrap();
        g.mark_feedback(&"b".into(), &"b".into()).unwrap();

        let back = edge(&g, "b", "a");
        assert!(back.feedback);
        assert!(back.eligible);

        let own = edge(&g, "b", "b");
        assert!(own.is_self_loop());
        assert!(!own.eligible);
        assert_eq!(own.refusal, Some(Refusal::SelfLoop));

        let all = analyze_edges(&g);
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().filter(|e| e.eligible).count(), 2);
    }
}
