//! Shared connectivity engine.
//!
//! Owns the authoritative graph for one document. Readers get an immutable
//! snapshot of the last resolved graph; writers run passes on a private copy
//! and commit it only if no edit arrived in the meantime.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::core::{ConnectivityOptions, SheetNetError};
use crate::graph::{ConnectivityGraph, GraphState, GraphSummary};
use crate::schema::{ItemId, Schematic};

/// Events emitted by the engine
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// An edit arrived; the published graph no longer matches the document
    Stale { generation: u64 },
    /// A pass was committed
    Resolved { generation: u64, summary: GraphSummary },
    /// A pass finished after a newer edit and was thrown away
    Discarded { generation: u64, latest: u64 },
}

/// A recomputation in flight, computed against a private copy of the graph
#[derive(Debug)]
pub struct Pass {
    generation: u64,
    dirty: Vec<ItemId>,
    graph: ConnectivityGraph,
}

impl Pass {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dirty(&self) -> &[ItemId] {
        &self.dirty
    }

    /// Full pass on a graph that has never resolved, incremental otherwise.
    pub fn run(&mut self, schematic: &Schematic) -> Result<(), SheetNetError> {
        match self.graph.state() {
            GraphState::Uninitialized => self.graph.full_recompute(schematic),
            GraphState::Resolved | GraphState::Stale => self.graph.incremental_recompute(&self.dirty, schematic),
        }
    }

    pub fn graph(&self) -> &ConnectivityGraph {
        &self.graph
    }
}

pub struct ConnectivityEngine {
    current: RwLock<Arc<ConnectivityGraph>>,
    pending: Mutex<BTreeSet<ItemId>>,
    generation: AtomicU64,
    event_tx: broadcast::Sender<GraphEvent>,
}

impl ConnectivityEngine {
    pub fn new(options: ConnectivityOptions) -> Result<Self, SheetNetError> {
        Ok(Self::with_graph(ConnectivityGraph::new(options)?))
    }

    pub fn with_graph(graph: ConnectivityGraph) -> Self {
        let (tx, _) = broadcast::channel(100);
        Self {
            current: RwLock::new(Arc::new(graph)),
            pending: Mutex::new(BTreeSet::new()),
            generation: AtomicU64::new(0),
            event_tx: tx,
        }
    }

    /// Subscribe to stale / resolved notifications
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.event_tx.subscribe()
    }

    /// Last committed graph. Never half-updated.
    pub fn snapshot(&self) -> Arc<ConnectivityGraph> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// True while edits are waiting for a pass or nothing has resolved yet.
    pub fn is_stale(&self) -> bool {
        !self.lock_pending().is_empty() || self.snapshot().state() != GraphState::Resolved
    }

    fn lock_pending(&self) -> MutexGuard<'_, BTreeSet<ItemId>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record edited items. Any pass started before this call will be
    /// discarded on commit.
    pub fn notify_edit(&self, items: &[ItemId]) -> u64 {
        let mut pending = self.lock_pending();
        pending.extend(items.iter().copied());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop(pending);
        self.send(GraphEvent::Stale { generation });
        generation
    }

    /// Snapshot the graph and the pending edits for a new pass.
    pub fn begin_pass(&self) -> Pass {
        let pending = self.lock_pending();
        let generation = self.generation.load(Ordering::SeqCst);
        let dirty: Vec<ItemId> = pending.iter().copied().collect();
        drop(pending);

        let mut graph = (*self.snapshot()).clone();
        graph.mark_dirty(&dirty);
        Pass {
            generation,
            dirty,
            graph,
        }
    }

    /// Publish a finished pass unless a newer edit superseded it. A
    /// discarded pass leaves the pending edits in place for the next one.
    pub fn commit(&self, pass: Pass) -> Result<Arc<ConnectivityGraph>, SheetNetError> {
        let mut pending = self.lock_pending();
        let latest = self.generation.load(Ordering::SeqCst);
        if latest != pass.generation {
            drop(pending);
            warn!(
                "Discarding connectivity pass for generation {} (latest is {})",
                pass.generation, latest
            );
            self.send(GraphEvent::Discarded {
                generation: pass.generation,
                latest,
            });
            return Err(SheetNetError::Cancelled {
                generation: pass.generation,
                latest,
            });
        }
        if pass.graph.state() != GraphState::Resolved {
            return Err(SheetNetError::CorruptState(format!(
                "pass for generation {} was committed before it resolved",
                pass.generation
            )));
        }

        for item in &pass.dirty {
            pending.remove(item);
        }
        let graph = Arc::new(pass.graph);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&graph),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&graph),
        }
        drop(pending);

        let summary = graph.summary();
        info!(
            "Committed connectivity generation {}: {} nets, {} buses",
            pass.generation, summary.nets, summary.buses
        );
        self.send(GraphEvent::Resolved {
            generation: pass.generation,
            summary,
        });
        Ok(graph)
    }

    /// Begin, run and commit passes until one commits. An edit notified
    /// while a pass runs discards it and a new pass picks it up, so
    /// `schematic` must already hold every notified edit.
    pub fn recompute(&self, schematic: &Schematic) -> Result<Arc<ConnectivityGraph>, SheetNetError> {
        loop {
            let mut pass = self.begin_pass();
            if let Err(e) = pass.run(schematic) {
                error!("Connectivity pass for generation {} failed: {}", pass.generation, e);
                return Err(e);
            }
            match self.commit(pass) {
                Err(SheetNetError::Cancelled { latest, .. }) => {
                    info!("Rescheduling connectivity pass for generation {}", latest);
                }
                result => return result,
            }
        }
    }

    /// Run [`ConnectivityEngine::recompute`] on the blocking pool.
    pub async fn recompute_in_background(
        self: Arc<Self>,
        schematic: Arc<Schematic>,
    ) -> Result<Arc<ConnectivityGraph>, SheetNetError> {
        tokio::task::spawn_blocking(move || self.recompute(&schematic))
            .await
            .map_err(|e| SheetNetError::CorruptState(format!("recompute task failed: {}", e)))?
    }

    fn send(&self, event: GraphEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

impl Default for ConnectivityEngine {
    fn default() -> Self {
        Self::with_graph(ConnectivityGraph::default())
    }
}
