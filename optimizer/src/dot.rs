// dot.rs — Graphviz DOT output for stream graphs
//
// Renders a StreamGraph for `dot`/`neato`. Node shading follows the effect
// tag, fused nodes are drawn with a double border, and feedback edges are
// dashed.
//
// Preconditions: none.
// Postconditions: returns a valid DOT string; node order follows the graph's
//                 node sequence so output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::HashMap;
use std::fmt::Write;

use crate::effect::EffectTag;
use crate::graph::{NodeId, StreamGraph, StreamNode};

/// Emit the graph as a Graphviz DOT string.
pub fn emit_dot(graph: &StreamGraph) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "digraph streamfuse {{");
    let _ = writeln!(buf, "    rankdir=LR;");
    let _ = writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];");
    let _ = writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];");

    // Positional DOT ids; node ids like "a+b" are not valid identifiers.
    let dot_ids: HashMap<&NodeId, String> = graph
        .node_ids()
        .enumerate()
        .map(|(i, id)| (id, format!("n{i}")))
        .collect();

    let _ = writeln!(buf);
    for node in graph.nodes() {
        let _ = writeln!(buf, "    {} [{}];", dot_ids[&node.id], node_attrs(node));
    }

    let _ = writeln!(buf);
    for (from, to) in graph.edges() {
        let (Some(src), Some(tgt)) = (dot_ids.get(&from), dot_ids.get(&to)) else {
            continue;
        };
        if graph.is_feedback_edge(&from, &to) {
            let _ = writeln!(buf, "    {src} -> {tgt} [style=dashed, color=red];");
        } else {
            let _ = writeln!(buf, "    {src} -> {tgt};");
        }
    }

    let _ = writeln!(buf, "}}");
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn node_attrs(node: &StreamNode) -> String {
    let color = match node.effect() {
        EffectTag::Pure => "lightblue",
        EffectTag::DeterministicEffect => "lightyellow",
        EffectTag::NonDeterministicEffect => "lightsalmon",
        EffectTag::ExternalEffect => "lightgray",
    };
    let peripheries = if node.constituents.len() > 1 { 2 } else { 1 };
    let label = format!(
        "{}\\n{}\\nbound={} {}",
        escape(node.id.as_str()),
        escape(&node.operator.name),
        node.bound(),
        node.effect()
    );
    format!(
        "shape=box, style=filled, fillcolor={color}, peripheries={peripheries}, label=\"{label}\""
    )
}

/// Escape a string for use inside a quoted DOT label.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OperatorKind;
    use crate::graph::{FeedbackEdge, NodeSpec};
    use crate::multiplicity::Multiplicity;
    use crate::stream::Stream;

    fn pure(id: &str) -> NodeSpec {
        NodeSpec::new(
            id,
            Stream::opaque(Multiplicity::ONE, EffectTag::Pure),
            OperatorKind::stateless("map"),
        )
    }

    #[test]
    fn renders_nodes_and_edges() {
        let g = StreamGraph::linear([pure("a"), pure("b")]).unwrap();
        let dot = emit_dot(&g);
        assert!(dot.starts_with("digraph streamfuse {"));
        assert!(dot.contains("n0 [shape=box"));
        assert!(dot.contains("label=\"a\\nmap\\nbound=1 pure\""));
        assert!(dot.contains("    n0 -> n1;"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn feedback_edges_are_dashed() {
        let g = StreamGraph::with_feedback([pure("a"), pure("b")], FeedbackEdge::new("b", "a"))
            .unwrap();
        let dot = emit_dot(&g);
        assert!(dot.contains("n1 -> n0 [style=dashed, color=red];"));
        assert!(dot.contains("n0 -> n1;"));
    }

    #[test]
    fn fused_nodes_get_double_border() {
        let mut g = StreamGraph::linear([pure("a"), pure("b")]).unwrap();
        g.merge(&"a".into(), &"b".into(), Multiplicity::ONE, EffectTag::Pure)
            .unwrap();
        let dot = emit_dot(&g);
        assert!(dot.contains("peripheries=2"));
        assert!(dot.contains("label=\"a+b\\nmap+map"));
    }

    #[test]
    fn labels_are_escaped() {
        assert_eq!(escape(r#"say "hi""#), r#"say \"hi\""#);
    }
}
