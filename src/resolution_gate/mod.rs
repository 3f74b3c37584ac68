//! Deferral of search queries until a store's fuzzy index is ready.
//!
//! Queries that arrive before the index has been built are parked in a
//! set (which also deduplicates them) and replayed exactly once when the
//! index arrives. The state only moves forward: once ready, a gate never
//! goes back to deferring.

use crate::pipeline::FuzzyIndex;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// A free-text search request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub fulltext: String,
}

impl SearchQuery {
    pub fn new(fulltext: impl Into<String>) -> Self {
        SearchQuery {
            fulltext: fulltext.into(),
        }
    }
}

enum GateState {
    Uninitialized,
    Initializing,
    Ready(Arc<dyn FuzzyIndex>),
}

struct Inner {
    state: GateState,
    waiting: HashSet<SearchQuery>,
}

/// What to do with a submitted query.
pub enum Submission {
    /// The index is not ready yet; the query is parked and will be
    /// replayed by [`ResolutionGate::mark_ready`].
    Deferred,
    /// The index is ready; resolve against it now.
    Resolve(Arc<dyn FuzzyIndex>),
}

pub struct ResolutionGate {
    inner: Mutex<Inner>,
}

impl ResolutionGate {
    pub fn new() -> Self {
        ResolutionGate {
            inner: Mutex::new(Inner {
                state: GateState::Uninitialized,
                waiting: HashSet::new(),
            }),
        }
    }

    /// Route a query: hand back the index when ready, park the query
    /// otherwise. Parking an already parked query is a no-op.
    pub fn submit(&self, query: SearchQuery) -> Submission {
        let mut inner = self.inner.lock().unwrap();
        match &inner.state {
            GateState::Ready(index) => Submission::Resolve(index.clone()),
            GateState::Uninitialized | GateState::Initializing => {
                debug!("Deferring query {:?} until the index is ready", query.fulltext);
                inner.waiting.insert(query);
                Submission::Deferred
            }
        }
    }

    /// Note that an index build has started. Purely informational; queries
    /// keep being deferred.
    pub fn mark_initializing(&self) {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state, GateState::Uninitialized) {
            inner.state = GateState::Initializing;
        }
    }

    /// Install the ready index and drain every parked query for replay.
    /// Each parked query comes back exactly once.
    pub fn mark_ready(&self, index: Arc<dyn FuzzyIndex>) -> Vec<SearchQuery> {
        let mut inner = self.inner.lock().unwrap();
        inner.state = GateState::Ready(index);
        let drained: Vec<SearchQuery> = inner.waiting.drain().collect();
        if !drained.is_empty() {
            info!("Replaying {} deferred query(ies)", drained.len());
        }
        drained
    }

    /// Drain any queries still parked after the gate became ready. A query
    /// that raced its enqueue against [`ResolutionGate::mark_ready`] can be
    /// left behind by the drain there; removal here is the dedup point, so
    /// concurrent drains hand each query to exactly one caller.
    pub fn drain_if_ready(&self) -> Vec<SearchQuery> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            GateState::Ready(_) => inner.waiting.drain().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, GateState::Ready(_))
    }

    pub fn is_initializing(&self) -> bool {
        !self.is_ready()
    }
}
