//! Read-only projections of a finished [`SpanTree`].
//!
//! Both are computed on demand and never stored by the core.

use std::fmt::Write as _;

use serde::Serialize;

use super::{FlowExporter, Outcome, SpanId, SpanTree};

/// Ordered list of spans with start offset and duration, relative to the root.
#[derive(Clone, Debug, Serialize)]
pub struct Waterfall {
    pub rows: Vec<WaterfallRow>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WaterfallRow {
    pub id: SpanId,
    pub parent: Option<SpanId>,
    pub label: String,
    pub level: usize,
    pub offset_us: u64,
    pub duration_us: u64,
    pub outcome: Option<Outcome>,
}

impl Waterfall {
    pub fn from_tree(tree: &SpanTree) -> Self {
        let Some(origin) = tree.root().map(|r| r.start()) else {
            return Self { rows: Vec::new() };
        };
        let rows = tree.spans().iter()
            .map(|span| {
                let offset = span.start().saturating_duration_since(origin);
                let duration = span.end()
                    .map(|end| end.saturating_duration_since(span.start()))
                    .unwrap_or_default();
                WaterfallRow {
                    id: span.id(),
                    parent: span.parent(),
                    label: span.label().to_owned(),
                    level: tree.level(span.id()),
                    offset_us: offset.as_micros() as u64,
                    duration_us: duration.as_micros() as u64,
                    outcome: span.outcome().cloned(),
                }
            })
            .collect();
        Self { rows }
    }

    /// Indented text rendering, one span per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let _ = writeln!(
                out,
                "{:indent$}{} +{}us {}us",
                "",
                row.label,
                row.offset_us,
                row.duration_us,
                indent = row.level * 2,
            );
        }
        out
    }
}

/// Directed graph of parent → child edges.
#[derive(Clone, Debug, Serialize)]
pub struct Diagram {
    pub nodes: Vec<DiagramNode>,
    pub edges: Vec<(SpanId, SpanId)>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DiagramNode {
    pub id: SpanId,
    pub label: String,
}

impl Diagram {
    pub fn from_tree(tree: &SpanTree) -> Self {
        let nodes = tree.spans().iter()
            .map(|s| DiagramNode { id: s.id(), label: s.label().to_owned() })
            .collect();
        let edges = tree.spans().iter()
            .filter_map(|s| s.parent().map(|p| (p, s.id())))
            .collect();
        Self { nodes, edges }
    }

    /// Mermaid `graph TD` source.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        for node in &self.nodes {
            let label = node.label.replace('"', "'");
            let _ = writeln!(out, "    s{}[\"{}\"]", node.id.index(), label);
        }
        for (from, to) in &self.edges {
            let _ = writeln!(out, "    s{} --> s{}", from.index(), to.index());
        }
        out
    }
}

/// Logs each finished request's waterfall at `debug`.
pub struct LogExporter;

impl FlowExporter for LogExporter {
    fn export(&self, tree: &SpanTree) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(flow = %Waterfall::from_tree(tree).render(), "request flow");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowTracker;

    fn sample() -> SpanTree {
        let tracker = FlowTracker::new();
        let root = tracker.start_span(None, "GET /users/:id");
        let auth = tracker.start_span(Some(root), "auth");
        let handler = tracker.start_span(Some(auth), "handler");
        tracker.end_span(handler, Outcome::Ok);
        tracker.end_span(auth, Outcome::Ok);
        tracker.end_span(root, Outcome::Ok);
        tracker.finish()
    }

    #[test]
    fn waterfall_rows_follow_start_order() {
        let waterfall = Waterfall::from_tree(&sample());
        let labels: Vec<_> = waterfall.rows.iter().map(|r| (r.label.as_str(), r.level)).collect();
        assert_eq!(labels, [("GET /users/:id", 0), ("auth", 1), ("handler", 2)]);
        assert_eq!(waterfall.rows[0].offset_us, 0);
        assert!(waterfall.render().contains("    handler +"));
    }

    #[test]
    fn diagram_has_one_edge_per_child() {
        let diagram = Diagram::from_tree(&sample());
        assert_eq!(diagram.nodes.len(), 3);
        assert_eq!(diagram.edges.len(), 2);
        let mermaid = diagram.to_mermaid();
        assert!(mermaid.starts_with("graph TD\n"));
        assert!(mermaid.contains("s1 --> s2"));
    }

    #[test]
    fn serialises_as_json() {
        let json = serde_json::to_value(Diagram::from_tree(&sample())).unwrap();
        assert_eq!(json["edges"][0], serde_json::json!([0, 1]));
    }
}
