//! Per-request flow tracking.
//!
//! The chain driver opens a [`Span`] as each middleware or handler stage is
//! entered and closes it when the stage returns, success or failure. Each span
//! records the enclosing stage as its parent, so the finished [`SpanTree`]
//! has exactly the shape of the onion: one root for the request, one level
//! per nested stage, siblings in execution order.
//!
//! A tracker belongs to one request. Its lock is only ever taken by that
//! request's chain, which runs stages strictly one after another.

pub mod export;

use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Identifies a span within one [`FlowTracker`]. Ids are assigned in start order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct SpanId(u32);

impl SpanId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a stage ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    /// Failed with the given error code.
    Failed(String),
    Cancelled,
}

impl Outcome {
    pub(crate) fn of<T>(result: &Result<T, crate::Error>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(crate::Error::Cancelled) => Self::Cancelled,
            Err(e) => Self::Failed(e.code().to_owned()),
        }
    }
}

/// One traced stage.
#[derive(Clone, Debug)]
pub struct Span {
    id: SpanId,
    parent: Option<SpanId>,
    label: String,
    start: Instant,
    end: Option<Instant>,
    outcome: Option<Outcome>,
    tags: Vec<(String, String)>,
}

impl Span {
    pub fn id(&self) -> SpanId { self.id }
    pub fn parent(&self) -> Option<SpanId> { self.parent }
    pub fn label(&self) -> &str { &self.label }
    pub fn start(&self) -> Instant { self.start }
    pub fn end(&self) -> Option<Instant> { self.end }
    pub fn outcome(&self) -> Option<&Outcome> { self.outcome.as_ref() }
    pub fn tags(&self) -> &[(String, String)] { &self.tags }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }
}

/// Records spans for one request.
#[derive(Default)]
pub struct FlowTracker {
    spans: Mutex<Vec<Span>>,
}

impl FlowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_span(&self, parent: Option<SpanId>, label: impl Into<String>) -> SpanId {
        let mut spans = self.spans.lock();
        let id = SpanId(spans.len() as u32);
        spans.push(Span {
            id,
            parent,
            label: label.into(),
            start: Instant::now(),
            end: None,
            outcome: None,
            tags: Vec::new(),
        });
        id
    }

    /// Adds a tag to an open span. Closed spans are immutable; the tag is dropped.
    pub fn tag(&self, id: SpanId, key: impl Into<String>, value: impl Into<String>) {
        let mut spans = self.spans.lock();
        if let Some(span) = spans.get_mut(id.index()).filter(|s| !s.is_closed()) {
            span.tags.push((key.into(), value.into()));
        }
    }

    /// Closes a span. Closing twice keeps the first outcome.
    pub fn end_span(&self, id: SpanId, outcome: Outcome) {
        let mut spans = self.spans.lock();
        if let Some(span) = spans.get_mut(id.index()).filter(|s| !s.is_closed()) {
            span.end = Some(Instant::now());
            span.outcome = Some(outcome);
        }
    }

    /// Closes every open span except `keep` with `outcome`. Used when a panic
    /// unwinds past stages that never got to close their own span.
    pub fn end_open(&self, keep: SpanId, outcome: Outcome) {
        let mut spans = self.spans.lock();
        let now = Instant::now();
        for span in spans.iter_mut().filter(|s| s.id != keep && !s.is_closed()) {
            span.end = Some(now);
            span.outcome = Some(outcome.clone());
        }
    }

    /// Freezes the tracker. Spans still open are closed as cancelled.
    pub fn finish(self) -> SpanTree {
        let mut spans = self.spans.into_inner();
        let now = Instant::now();
        for span in spans.iter_mut().filter(|s| !s.is_closed()) {
            span.end = Some(now);
            span.outcome = Some(Outcome::Cancelled);
        }
        SpanTree { spans }
    }
}

/// A completed, read-only span tree for one request.
#[derive(Clone, Debug, Default)]
pub struct SpanTree {
    spans: Vec<Span>,
}

impl SpanTree {
    /// All spans in start order.
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn get(&self, id: SpanId) -> Option<&Span> {
        self.spans.get(id.index())
    }

    /// The request span.
    pub fn root(&self) -> Option<&Span> {
        self.spans.iter().find(|s| s.parent.is_none())
    }

    /// Direct children of `id`, in execution order.
    pub fn children(&self, id: SpanId) -> impl Iterator<Item = &Span> {
        self.spans.iter().filter(move |s| s.parent == Some(id))
    }

    /// Nesting level of a span: the root is 0, its stages 1, and so on.
    pub fn level(&self, id: SpanId) -> usize {
        let mut level = 0;
        let mut cursor = self.get(id).and_then(Span::parent);
        while let Some(parent) = cursor {
            level += 1;
            cursor = self.get(parent).and_then(Span::parent);
        }
        level
    }

    /// Stage depth: the deepest nesting of stage spans below the request root.
    ///
    /// A chain `[A, B, C]` around handler `H` that runs to completion has depth 4.
    pub fn depth(&self) -> usize {
        self.spans.iter().map(|s| self.level(s.id)).max().unwrap_or(0)
    }

    /// Stage labels in entry order, root excluded.
    pub fn stages(&self) -> Vec<&str> {
        self.spans.iter().skip(1).map(Span::label).collect()
    }
}

/// Receives every completed tree. Exporters are read-only consumers.
pub trait FlowExporter: Send + Sync + 'static {
    fn export(&self, tree: &SpanTree);
}
