//! Connectivity Graph
//!
//! Hierarchy-wide owner of every subgraph. A pass runs in two phases:
//!
//! 1. per sheet instance: build subgraphs and pick their drivers (parallel)
//! 2. whole document: propagate identities across sheet pins, same-named
//!    labels and bus slots, then name every net and hand out net codes
//!
//! Phase 2 always covers the whole document, so an incremental pass only
//! differs from a full one in which subgraphs it rebuilds.
//!
//! Net codes are kept stable across passes: a net whose driver and member
//! items are unchanged keeps its code, a net that keeps its name keeps its
//! code, and everything else takes the next never-used code.

use chrono::{DateTime, Utc};
use petgraph::unionfind::UnionFind;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use crate::advisory::{Advisory, AdvisoryKind};
use crate::builder::{build_sheet, SheetBuild, Subgraph, SubgraphId};
use crate::bus::align;
use crate::connection::{ConnectionState, ItemRef, NetInfo, NetKind, NO_NET};
use crate::core::{ConnectivityOptions, SheetNetError};
use crate::driver::{Candidate, DriverClass, DriverResolver, NameQuality, PatternNameQuality, PortKind};
use crate::hierarchy::Hierarchy;
use crate::schema::{ItemId, PageId, Schematic, SheetPath};
use crate::unfold::scoped_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    Uninitialized,
    Resolved,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Full,
    Incremental,
}

/// Identity used to carry a net code from one pass to the next
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NetSignature {
    pub driver: Option<ItemRef>,
    /// Hash of the sorted member items
    pub members: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Net {
    pub code: u32,
    pub name: String,
    pub kind: NetKind,
    /// Member names of a bus net, empty for scalar nets
    pub members: Vec<String>,
    pub driver: Option<ItemRef>,
    /// Every item of the net, ascending
    pub items: Vec<ItemRef>,
    #[serde(skip)]
    pub signature: NetSignature,
}

impl Net {
    pub fn is_bus(&self) -> bool {
        self.kind == NetKind::Bus
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub state: GraphState,
    pub last_pass: Option<PassKind>,
    pub sheet_instances: usize,
    pub subgraphs: usize,
    pub nets: usize,
    pub buses: usize,
    pub advisories: usize,
    /// Subgraphs built by the last pass
    pub rebuilt_subgraphs: usize,
    pub computed_at: Option<DateTime<Utc>>,
}

/// One sheet instance to (re)build
#[derive(Debug, Clone)]
pub(crate) struct BuildJob {
    pub path: SheetPath,
    pub page: PageId,
    pub filter: Option<HashSet<ItemId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Node {
    Subgraph(SubgraphId),
    Slot(SubgraphId, usize),
}

/// Namespaces in which equal names join
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NameKey {
    Net(Option<SheetPath>, String),
    Bus(Option<SheetPath>, String),
}

/// A subgraph taken out of the arena, with the states of its items
pub(crate) struct Removed {
    id: SubgraphId,
    subgraph: Arc<Subgraph>,
    states: Vec<(ItemRef, ConnectionState)>,
}

/// Arena state a full pass replaced wholesale
pub(crate) struct Snapshot {
    subgraphs: Vec<Option<Arc<Subgraph>>>,
    free: Vec<SubgraphId>,
    by_path: BTreeMap<SheetPath, Vec<SubgraphId>>,
    item_subgraph: HashMap<ItemRef, SubgraphId>,
    item_paths: HashMap<ItemId, BTreeSet<SheetPath>>,
    tapped_by: HashMap<SubgraphId, Vec<SubgraphId>>,
    states: HashMap<ItemRef, ConnectionState>,
    instances: BTreeMap<SheetPath, PageId>,
    hierarchy: Hierarchy,
    rebuilt: usize,
}

/// What an incremental pass changed in the arena
pub(crate) struct DeltaUndo {
    pub removed: Vec<Removed>,
    pub inserted: Vec<SubgraphId>,
    /// `by_path` entries of every touched sheet path before the merge
    pub paths: Vec<(SheetPath, Option<Vec<SubgraphId>>)>,
    pub arena_len: usize,
    pub free: Vec<SubgraphId>,
    pub instances: BTreeMap<SheetPath, PageId>,
    pub hierarchy: Hierarchy,
    pub rebuilt: usize,
}

/// Enough to put the arena back when phase 2 fails
pub(crate) enum Undo {
    Full(Box<Snapshot>),
    Delta(Box<DeltaUndo>),
}

struct RawNet {
    name: String,
    kind: NetKind,
    members: Vec<String>,
    driver: Option<ItemRef>,
    items: Vec<ItemRef>,
    signature: NetSignature,
}

#[derive(Debug, Clone)]
pub struct ConnectivityGraph {
    pub(crate) options: ConnectivityOptions,
    pub(crate) resolver: DriverResolver,
    pool: Option<Arc<rayon::ThreadPool>>,
    pub(crate) state: GraphState,
    pub(crate) hierarchy: Hierarchy,
    pub(crate) instances: BTreeMap<SheetPath, PageId>,
    pub(crate) subgraphs: Vec<Option<Arc<Subgraph>>>,
    /// Arena slots left empty by removed subgraphs, reused first
    pub(crate) free: Vec<SubgraphId>,
    pub(crate) by_path: BTreeMap<SheetPath, Vec<SubgraphId>>,
    pub(crate) item_subgraph: HashMap<ItemRef, SubgraphId>,
    /// Sheet paths each item currently has a subgraph on
    pub(crate) item_paths: HashMap<ItemId, BTreeSet<SheetPath>>,
    /// Scalar subgraphs tapping each bus subgraph
    pub(crate) tapped_by: HashMap<SubgraphId, Vec<SubgraphId>>,
    pub(crate) states: HashMap<ItemRef, ConnectionState>,
    pub(crate) pending: BTreeSet<ItemId>,
    nets: Vec<Net>,
    net_index: HashMap<ItemRef, usize>,
    name_codes: HashMap<String, u32>,
    last_codes: HashMap<NetSignature, u32>,
    next_code: u32,
    advisories: Vec<Advisory>,
    last_pass: Option<PassKind>,
    pub(crate) rebuilt: usize,
    computed_at: Option<DateTime<Utc>>,
}

impl Default for ConnectivityGraph {
    fn default() -> Self {
        Self::with_parts(ConnectivityOptions::default(), DriverResolver::default(), None)
    }
}

impl ConnectivityGraph {
    pub fn new(options: ConnectivityOptions) -> Result<Self, SheetNetError> {
        options.validate()?;
        let quality = PatternNameQuality::new(&options.auto_name_patterns)?;
        let pool = match (options.parallel, options.threads) {
            (true, Some(threads)) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("sheetnet-{}", i))
                    .build()
                    .map_err(|e| SheetNetError::InvalidOptions(format!("worker pool: {}", e)))?,
            )),
            _ => None,
        };
        Ok(Self::with_parts(
            options,
            DriverResolver::new(Arc::new(quality)),
            pool,
        ))
    }

    /// Swap the name-quality predicate. Takes effect on the next pass.
    pub fn with_name_quality(mut self, quality: Arc<dyn NameQuality>) -> Self {
        self.resolver = DriverResolver::new(quality);
        self
    }

    fn with_parts(options: ConnectivityOptions, resolver: DriverResolver, pool: Option<Arc<rayon::ThreadPool>>) -> Self {
        Self {
            options,
            resolver,
            pool,
            state: GraphState::Uninitialized,
            hierarchy: Hierarchy::default(),
            instances: BTreeMap::new(),
            subgraphs: Vec::new(),
            free: Vec::new(),
            by_path: BTreeMap::new(),
            item_subgraph: HashMap::new(),
            item_paths: HashMap::new(),
            tapped_by: HashMap::new(),
            states: HashMap::new(),
            pending: BTreeSet::new(),
            nets: Vec::new(),
            net_index: HashMap::new(),
            name_codes: HashMap::new(),
            last_codes: HashMap::new(),
            next_code: 1,
            advisories: Vec::new(),
            last_pass: None,
            rebuilt: 0,
            computed_at: None,
        }
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    /// Rebuild every sheet instance from scratch. Net codes from earlier
    /// passes are reused where the stability rules allow.
    pub fn full_recompute(&mut self, schematic: &Schematic) -> Result<(), SheetNetError> {
        self.run_pass(PassKind::Full, |next| next.run_full(schematic))
    }

    /// Rebuild only what `dirty` can have affected. Falls back to a full
    /// pass on a graph that has never been resolved.
    pub fn incremental_recompute(&mut self, dirty: &[ItemId], schematic: &Schematic) -> Result<(), SheetNetError> {
        if self.state == GraphState::Uninitialized {
            return self.full_recompute(schematic);
        }
        self.run_pass(PassKind::Incremental, |next| next.run_incremental(dirty, schematic))
    }

    /// Phase 1 computes everything fallible before touching the arena and
    /// returns an undo record. Phase 2 fails before publishing anything, so
    /// undoing the arena merge restores the previous graph.
    fn run_pass(
        &mut self,
        kind: PassKind,
        pass: impl FnOnce(&mut ConnectivityGraph) -> Result<Undo, SheetNetError>,
    ) -> Result<(), SheetNetError> {
        let started = Instant::now();
        let undo = match pass(self) {
            Ok(undo) => undo,
            Err(e) => {
                tracing::error!("{:?} connectivity pass failed, keeping previous graph: {}", kind, e);
                return Err(e);
            }
        };
        if let Err(e) = self.resolve(kind) {
            self.rollback(undo);
            tracing::error!("{:?} connectivity pass failed, keeping previous graph: {}", kind, e);
            return Err(e);
        }
        tracing::info!(
            "{:?} connectivity pass: {} nets over {} subgraphs ({} rebuilt) in {:?}",
            kind,
            self.nets.len(),
            self.by_path.values().map(Vec::len).sum::<usize>(),
            self.rebuilt,
            started.elapsed()
        );
        Ok(())
    }

    fn run_full(&mut self, schematic: &Schematic) -> Result<Undo, SheetNetError> {
        let hierarchy = Hierarchy::walk(schematic);
        let jobs: Vec<BuildJob> = hierarchy
            .instances
            .iter()
            .map(|i| BuildJob {
                path: i.path.clone(),
                page: i.page.clone(),
                filter: None,
            })
            .collect();
        let builds = self.build_jobs(schematic, &jobs, self.options.parallel)?;

        let instances = hierarchy.instances.iter().map(|i| (i.path.clone(), i.page.clone())).collect();
        let snapshot = Snapshot {
            subgraphs: mem::take(&mut self.subgraphs),
            free: mem::take(&mut self.free),
            by_path: mem::take(&mut self.by_path),
            item_subgraph: mem::take(&mut self.item_subgraph),
            item_paths: mem::take(&mut self.item_paths),
            tapped_by: mem::take(&mut self.tapped_by),
            states: mem::take(&mut self.states),
            instances: mem::replace(&mut self.instances, instances),
            hierarchy: mem::replace(&mut self.hierarchy, hierarchy),
            rebuilt: mem::replace(&mut self.rebuilt, 0),
        };
        for build in builds {
            self.insert_build(build);
        }
        Ok(Undo::Full(Box::new(snapshot)))
    }

    pub(crate) fn rollback(&mut self, undo: Undo) {
        match undo {
            Undo::Full(snapshot) => {
                let snapshot = *snapshot;
                self.subgraphs = snapshot.subgraphs;
                self.free = snapshot.free;
                self.by_path = snapshot.by_path;
                self.item_subgraph = snapshot.item_subgraph;
                self.item_paths = snapshot.item_paths;
                self.tapped_by = snapshot.tapped_by;
                self.states = snapshot.states;
                self.instances = snapshot.instances;
                self.hierarchy = snapshot.hierarchy;
                self.rebuilt = snapshot.rebuilt;
            }
            Undo::Delta(delta) => {
                let delta = *delta;
                for id in delta.inserted.iter().rev() {
                    self.remove_subgraph(*id);
                }
                for removed in delta.removed.into_iter().rev() {
                    self.states.extend(removed.states);
                    self.place(removed.id, removed.subgraph);
                }
                self.subgraphs.truncate(delta.arena_len);
                self.free = delta.free;
                for (path, ids) in delta.paths {
                    match ids {
                        Some(ids) => {
                            self.by_path.insert(path, ids);
                        }
                        None => {
                            self.by_path.remove(&path);
                        }
                    }
                }
                self.instances = delta.instances;
                self.hierarchy = delta.hierarchy;
                self.rebuilt = delta.rebuilt;
            }
        }
    }

    pub(crate) fn build_jobs(
        &self,
        schematic: &Schematic,
        jobs: &[BuildJob],
        parallel: bool,
    ) -> Result<Vec<SheetBuild>, SheetNetError> {
        let resolver = &self.resolver;
        let run = |job: &BuildJob| {
            let page = schematic.page(&job.page).ok_or_else(|| {
                SheetNetError::CorruptState(format!("page '{}' vanished during the pass", job.page.0))
            })?;
            build_sheet(page, &job.path, job.filter.as_ref(), resolver)
        };

        if !parallel || jobs.len() < 2 {
            return jobs.iter().map(run).collect();
        }
        match &self.pool {
            Some(pool) => pool.install(|| jobs.par_iter().map(run).collect()),
            None => jobs.par_iter().map(run).collect(),
        }
    }

    /// Next arena slot, reusing freed ones first.
    fn allocate(&mut self) -> SubgraphId {
        match self.free.pop() {
            Some(id) => id,
            None => {
                self.subgraphs.push(None);
                SubgraphId(self.subgraphs.len() as u32 - 1)
            }
        }
    }

    /// Put a subgraph into its slot and index its items and taps.
    fn place(&mut self, id: SubgraphId, subgraph: Arc<Subgraph>) {
        let idx = id.0 as usize;
        if idx >= self.subgraphs.len() {
            self.subgraphs.resize(idx + 1, None);
        }
        for item in &subgraph.items {
            self.item_subgraph.insert(ItemRef::new(*item, &subgraph.path), id);
            self.item_paths.entry(*item).or_default().insert(subgraph.path.clone());
        }
        for tap in &subgraph.taps {
            self.tapped_by.entry(tap.bus).or_default().push(id);
        }
        self.subgraphs[idx] = Some(subgraph);
    }

    pub(crate) fn insert_build(&mut self, build: SheetBuild) -> Vec<SubgraphId> {
        let ids: Vec<SubgraphId> = build.subgraphs.iter().map(|_| self.allocate()).collect();
        for (mut subgraph, &id) in build.subgraphs.into_iter().zip(&ids) {
            for tap in &mut subgraph.taps {
                tap.bus = ids[tap.bus.0 as usize];
            }
            for item in &subgraph.items {
                self.states.insert(ItemRef::new(*item, &subgraph.path), ConnectionState::pending());
            }
            self.place(id, Arc::new(subgraph));
            self.rebuilt += 1;
        }
        self.by_path.entry(build.path).or_default().extend(ids.iter().copied());
        ids
    }

    /// Take a subgraph out of the arena and free its slot.
    pub(crate) fn remove_subgraph(&mut self, id: SubgraphId) -> Option<Removed> {
        let subgraph = self.subgraphs.get_mut(id.0 as usize).and_then(Option::take)?;
        let mut states = Vec::with_capacity(subgraph.items.len());
        for item in &subgraph.items {
            let r = ItemRef::new(*item, &subgraph.path);
            if self.item_subgraph.get(&r) == Some(&id) {
                self.item_subgraph.remove(&r);
            }
            if let Some(paths) = self.item_paths.get_mut(item) {
                paths.remove(&subgraph.path);
                if paths.is_empty() {
                    self.item_paths.remove(item);
                }
            }
            if let Some(state) = self.states.remove(&r) {
                states.push((r, state));
            }
        }
        for tap in &subgraph.taps {
            if let Some(tappers) = self.tapped_by.get_mut(&tap.bus) {
                tappers.retain(|other| *other != id);
                if tappers.is_empty() {
                    self.tapped_by.remove(&tap.bus);
                }
            }
        }
        self.tapped_by.remove(&id);
        if let Some(ids) = self.by_path.get_mut(&subgraph.path) {
            ids.retain(|other| *other != id);
        }
        self.free.push(id);
        Some(Removed { id, subgraph, states })
    }

    pub fn subgraph(&self, id: SubgraphId) -> Option<&Subgraph> {
        self.subgraphs.get(id.0 as usize).and_then(Option::as_deref)
    }

    fn live(&self, id: SubgraphId) -> Result<&Subgraph, SheetNetError> {
        self.subgraph(id)
            .ok_or_else(|| SheetNetError::CorruptState(format!("subgraph {} is referenced but gone", id)))
    }

    /// Phase 2: propagation, naming and code assignment over the whole graph.
    fn resolve(&mut self, kind: PassKind) -> Result<(), SheetNetError> {
        let live: Vec<SubgraphId> = self.by_path.values().flatten().copied().collect();

        let mut nodes: Vec<Node> = Vec::new();
        let mut node_of: HashMap<Node, usize> = HashMap::new();
        for &id in &live {
            let subgraph = self.live(id)?;
            node_of.insert(Node::Subgraph(id), nodes.len());
            nodes.push(Node::Subgraph(id));
            if let Some(layout) = &subgraph.layout {
                for slot in 0..layout.width() {
                    node_of.insert(Node::Slot(id, slot), nodes.len());
                    nodes.push(Node::Slot(id, slot));
                }
            }
        }

        let mut uf = UnionFind::<usize>::new(nodes.len());
        let mut keyed: HashMap<NameKey, usize> = HashMap::new();
        let mut join_key = |uf: &mut UnionFind<usize>, key: NameKey, node: usize| match keyed.get(&key) {
            Some(&first) => {
                uf.union(first, node);
            }
            None => {
                keyed.insert(key, node);
            }
        };
        let mut advisories = Vec::new();

        for &id in &live {
            let subgraph = self.live(id)?;
            let node = node_of[&Node::Subgraph(id)];

            for candidate in subgraph.effective_candidates() {
                let Some(scope) = name_scope(candidate) else {
                    continue;
                };
                let key = match &candidate.bus {
                    Some(bus) => NameKey::Bus(scope, bus.text.clone()),
                    None => NameKey::Net(scope, candidate.text.clone()),
                };
                join_key(&mut uf, key, node);
            }

            if let Some(layout) = &subgraph.layout {
                for alias in &layout.aliases {
                    let scope = match alias.scope {
                        crate::unfold::AliasScope::SheetPin => continue,
                        crate::unfold::AliasScope::Global => None,
                        crate::unfold::AliasScope::Local => Some(subgraph.path.clone()),
                    };
                    for (member, slot) in alias.bus.members.iter().zip(&alias.slots) {
                        if let Some(slot) = slot {
                            let key = NameKey::Net(scope.clone(), member.name.clone());
                            join_key(&mut uf, key, node_of[&Node::Slot(id, *slot)]);
                        }
                    }
                }
            }

            for tap in &subgraph.taps {
                if let Some(slot) = tap.slot {
                    if let Some(&slot_node) = node_of.get(&Node::Slot(tap.bus, slot)) {
                        uf.union(node, slot_node);
                    }
                }
            }
        }

        for link in &self.hierarchy.links {
            let pin_ref = ItemRef::new(link.pin, &link.parent);
            let Some(&parent_id) = self.item_subgraph.get(&pin_ref) else {
                continue;
            };
            let parent = self.live(parent_id)?;
            let Some(pin) = parent.candidates.iter().find(|c| c.item == link.pin) else {
                continue;
            };

            let mut matched = false;
            for &child_id in self.by_path.get(&link.child).into_iter().flatten() {
                let child = self.live(child_id)?;
                let labels = child
                    .candidates
                    .iter()
                    .filter(|c| c.port == Some(PortKind::HierLabel) && c.text == link.name);
                for label in labels {
                    matched = true;
                    if pin.is_bus() != label.is_bus() {
                        advisories.push(
                            Advisory::new(
                                AdvisoryKind::HierarchyKindMismatch,
                                &link.parent,
                                format!(
                                    "sheet pin '{}' and hierarchical label in {} disagree on bus/scalar kind",
                                    link.name, link.child
                                ),
                            )
                            .with_item(link.pin)
                            .with_item(label.item),
                        );
                        continue;
                    }
                    if parent.is_bus != pin.is_bus() || child.is_bus != label.is_bus() {
                        continue;
                    }
                    uf.union(node_of[&Node::Subgraph(parent_id)], node_of[&Node::Subgraph(child_id)]);

                    let aliases = parent
                        .layout
                        .as_ref()
                        .and_then(|l| l.alias(pin.item))
                        .zip(child.layout.as_ref().and_then(|l| l.alias(label.item)));
                    if let Some((outer, inner)) = aliases {
                        let alignment = align(&outer.bus, &inner.bus);
                        for (i, j) in alignment.pairs {
                            if let (Some(a), Some(b)) = (outer.slots[i], inner.slots[j]) {
                                uf.union(node_of[&Node::Slot(parent_id, a)], node_of[&Node::Slot(child_id, b)]);
                            }
                        }
                        if alignment.mismatch {
                            advisories.push(
                                Advisory::new(
                                    AdvisoryKind::BusWidthMismatch,
                                    &link.parent,
                                    format!(
                                        "sheet pin '{}' ({} members) and its label in {} ({} members) differ",
                                        outer.bus.text,
                                        outer.bus.width(),
                                        link.child,
                                        inner.bus.width()
                                    ),
                                )
                                .with_item(link.pin)
                                .with_item(label.item),
                            );
                        }
                    }
                }
            }
            if !matched {
                advisories.push(
                    Advisory::new(
                        AdvisoryKind::UnmatchedSheetPin,
                        &link.parent,
                        format!("sheet pin '{}' has no hierarchical label in {}", link.name, link.child),
                    )
                    .with_item(link.pin),
                );
            }
        }

        let labels = uf.into_labeling();
        let mut groups: HashMap<usize, Vec<Node>> = HashMap::new();
        for (idx, label) in labels.into_iter().enumerate() {
            groups.entry(label).or_default().push(nodes[idx]);
        }

        let mut raw = Vec::new();
        let mut quiet: Vec<ItemRef> = Vec::new();
        for group in groups.into_values() {
            match self.name_group(&group)? {
                GroupOutcome::Net(net) => raw.push(net),
                GroupOutcome::NoConnect(items) => quiet.extend(items),
                GroupOutcome::Empty => {}
            }
        }

        self.dedupe_names(&mut raw, &mut advisories);

        let mut all = self.hierarchy.advisories.clone();
        for &id in &live {
            all.extend(self.live(id)?.advisories.iter().cloned());
        }
        all.extend(advisories);
        all.sort_by(|a, b| {
            (&a.sheet_path, a.kind, &a.items, &a.message).cmp(&(&b.sheet_path, b.kind, &b.items, &b.message))
        });
        for advisory in &all {
            tracing::debug!("{}", advisory);
        }

        // Nothing below can fail
        self.publish(raw, quiet);
        self.advisories = all;

        self.state = GraphState::Resolved;
        self.pending.clear();
        self.last_pass = Some(kind);
        self.computed_at = Some(Utc::now());
        Ok(())
    }

    fn name_group(&self, group: &[Node]) -> Result<GroupOutcome, SheetNetError> {
        let mut drivers: Vec<(Candidate, SubgraphId)> = Vec::new();
        let mut items = BTreeSet::new();
        let mut has_subgraph = false;
        let mut is_bus = false;
        let mut only_no_connect = true;

        for node in group {
            match *node {
                Node::Subgraph(id) => {
                    let subgraph = self.live(id)?;
                    has_subgraph = true;
                    is_bus = subgraph.is_bus;
                    only_no_connect &= subgraph.is_no_connect_only();
                    items.extend(subgraph.items.iter().map(|i| ItemRef::new(*i, &subgraph.path)));
                    if let Some(driver) = &subgraph.driver {
                        drivers.push((driver.clone(), id));
                    }
                }
                Node::Slot(id, slot) => {
                    let subgraph = self.live(id)?;
                    let (Some(driver), Some(layout)) = (&subgraph.driver, &subgraph.layout) else {
                        continue;
                    };
                    let Some(member) = layout.driver.members.get(slot) else {
                        continue;
                    };
                    let candidate = Candidate {
                        item: driver.item,
                        path: subgraph.path.clone(),
                        class: DriverClass::BusMember,
                        text: member.name.clone(),
                        name: scoped_name(layout.driver_scope, &subgraph.path, &member.name),
                        bus: None,
                        port: driver.port,
                    };
                    drivers.push((candidate, id));
                }
            }
        }

        if !has_subgraph {
            return Ok(GroupOutcome::Empty);
        }
        let items: Vec<ItemRef> = items.into_iter().collect();
        if only_no_connect {
            return Ok(GroupOutcome::NoConnect(items));
        }

        let candidates: Vec<Candidate> = drivers.iter().map(|(c, _)| c.clone()).collect();
        let chosen = self.resolver.choose_across_sheets(&candidates)?;

        let (name, driver, members) = match chosen {
            Some(i) => {
                let (candidate, origin) = &drivers[i];
                let members = if is_bus {
                    let subgraph = self.live(*origin)?;
                    subgraph
                        .layout
                        .as_ref()
                        .map(|l| l.member_names(&subgraph.path))
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                (
                    candidate.name.clone(),
                    Some(ItemRef::new(candidate.item, &candidate.path)),
                    members,
                )
            }
            None => {
                let first = &items[0];
                (format!("unconnected-({}{})", first.path, first.item), None, Vec::new())
            }
        };

        let mut hasher = DefaultHasher::new();
        items.hash(&mut hasher);
        let signature = NetSignature {
            driver: driver.clone(),
            members: hasher.finish(),
        };

        Ok(GroupOutcome::Net(RawNet {
            name,
            kind: if is_bus { NetKind::Bus } else { NetKind::Scalar },
            members,
            driver,
            items,
            signature,
        }))
    }

    fn dedupe_names(&self, raw: &mut [RawNet], advisories: &mut Vec<Advisory>) {
        raw.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.signature.driver.cmp(&b.signature.driver))
                .then_with(|| a.signature.members.cmp(&b.signature.members))
                .then_with(|| a.items.cmp(&b.items))
        });
        let originals: Vec<String> = raw.iter().map(|n| n.name.clone()).collect();
        let mut used: HashSet<String> = originals.iter().cloned().collect();
        for i in 1..raw.len() {
            if originals[i] != originals[i - 1] {
                continue;
            }
            let base = originals[i].clone();
            let mut n = 1;
            let mut renamed = format!("{}_{}", base, n);
            while used.contains(&renamed) {
                n += 1;
                renamed = format!("{}_{}", base, n);
            }
            used.insert(renamed.clone());
            let path = raw[i].items[0].path.clone();
            let mut advisory = Advisory::new(
                AdvisoryKind::DuplicateNetName,
                &path,
                format!("unrelated nets both resolve to '{}', renamed to '{}'", base, renamed),
            );
            if let Some(driver) = &raw[i].driver {
                advisory = advisory.with_item(driver.item);
            }
            advisories.push(advisory);
            raw[i].name = renamed;
        }
    }

    fn publish(&mut self, raw: Vec<RawNet>, quiet: Vec<ItemRef>) {
        let mut codes: Vec<Option<u32>> = vec![None; raw.len()];
        let mut taken: HashSet<u32> = HashSet::new();

        for (i, net) in raw.iter().enumerate() {
            if let Some(&code) = self.last_codes.get(&net.signature) {
                if taken.insert(code) {
                    codes[i] = Some(code);
                }
            }
        }
        for (i, net) in raw.iter().enumerate() {
            if codes[i].is_none() {
                if let Some(&code) = self.name_codes.get(&net.name) {
                    if taken.insert(code) {
                        codes[i] = Some(code);
                    }
                }
            }
        }

        let mut nets = Vec::with_capacity(raw.len());
        for (net, code) in raw.into_iter().zip(codes) {
            let code = code.unwrap_or_else(|| {
                let code = self.next_code;
                self.next_code += 1;
                code
            });
            nets.push(Net {
                code,
                name: net.name,
                kind: net.kind,
                members: net.members,
                driver: net.driver,
                items: net.items,
                signature: net.signature,
            });
        }
        nets.sort_by_key(|n| n.code);

        self.net_index.clear();
        for (idx, net) in nets.iter().enumerate() {
            for r in &net.items {
                let no_connect = self
                    .item_subgraph
                    .get(r)
                    .and_then(|id| self.subgraph(*id))
                    .is_some_and(|sg| sg.no_connects.contains(&r.item));
                self.states.insert(
                    r.clone(),
                    ConnectionState {
                        name: net.name.clone(),
                        kind: net.kind,
                        members: net.members.clone(),
                        net_code: if no_connect { NO_NET } else { net.code },
                        dirty: false,
                    },
                );
                self.net_index.insert(r.clone(), idx);
            }
        }
        for r in quiet {
            self.states.insert(
                r,
                ConnectionState {
                    dirty: false,
                    ..ConnectionState::pending()
                },
            );
        }

        self.last_codes = nets.iter().map(|n| (n.signature.clone(), n.code)).collect();
        self.name_codes = nets.iter().map(|n| (n.name.clone(), n.code)).collect();
        self.nets = nets;
    }

    /// Flag items as edited. The graph goes stale until the next pass.
    pub fn mark_dirty(&mut self, items: &[ItemId]) {
        let flagged: HashSet<ItemId> = items.iter().copied().collect();
        self.pending.extend(flagged.iter().copied());
        for (r, state) in self.states.iter_mut() {
            if flagged.contains(&r.item) {
                state.dirty = true;
            }
        }
        if self.state == GraphState::Resolved && !flagged.is_empty() {
            self.state = GraphState::Stale;
        }
    }

    pub fn pending_edits(&self) -> Vec<ItemId> {
        self.pending.iter().copied().collect()
    }

    pub fn connection_state(&self, item: ItemId, path: &SheetPath) -> Option<&ConnectionState> {
        self.states.get(&ItemRef::new(item, path))
    }

    pub fn query(&self, item: ItemId, path: &SheetPath) -> Option<NetInfo> {
        self.connection_state(item, path).map(NetInfo::from)
    }

    /// Every item electrically joined to `item` on `path`, itself included.
    pub fn connected_items(&self, item: ItemId, path: &SheetPath) -> BTreeSet<ItemRef> {
        let r = ItemRef::new(item, path);
        if let Some(&idx) = self.net_index.get(&r) {
            return self.nets[idx].items.iter().cloned().collect();
        }
        match self.item_subgraph.get(&r).and_then(|id| self.subgraph(*id)) {
            Some(subgraph) => subgraph.items.iter().map(|i| ItemRef::new(*i, path)).collect(),
            None => BTreeSet::new(),
        }
    }

    /// Resolved nets, ordered by code.
    pub fn nets(&self) -> &[Net] {
        &self.nets
    }

    pub fn net(&self, code: u32) -> Option<&Net> {
        self.nets
            .binary_search_by_key(&code, |n| n.code)
            .ok()
            .map(|i| &self.nets[i])
    }

    pub fn net_by_name(&self, name: &str) -> Option<&Net> {
        self.name_codes.get(name).and_then(|code| self.net(*code))
    }

    pub fn net_items(&self, code: u32) -> Option<&[ItemRef]> {
        self.net(code).map(|n| n.items.as_slice())
    }

    pub fn advisories(&self) -> &[Advisory] {
        &self.advisories
    }

    pub fn sheet_paths(&self) -> impl Iterator<Item = &SheetPath> {
        self.instances.keys()
    }

    /// Look a sheet path up by its display form (`/`, `/Power/`).
    pub fn find_path(&self, display: &str) -> Option<SheetPath> {
        let wanted = if display.ends_with('/') {
            display.to_string()
        } else {
            format!("{}/", display)
        };
        self.sheet_paths().find(|p| p.to_string() == wanted).cloned()
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            state: self.state,
            last_pass: self.last_pass,
            sheet_instances: self.instances.len(),
            subgraphs: self.by_path.values().map(Vec::len).sum(),
            nets: self.nets.iter().filter(|n| !n.is_bus()).count(),
            buses: self.nets.iter().filter(|n| n.is_bus()).count(),
            advisories: self.advisories.len(),
            rebuilt_subgraphs: self.rebuilt,
            computed_at: self.computed_at,
        }
    }
}

enum GroupOutcome {
    Net(RawNet),
    NoConnect(Vec<ItemRef>),
    Empty,
}

/// Scope in which a candidate's name joins other subgraphs: `None` for
/// global names, the sheet path for local ones. Pins and sheet pins never
/// join by name.
fn name_scope(candidate: &Candidate) -> Option<Option<SheetPath>> {
    if candidate.port == Some(PortKind::SheetPin) {
        return None;
    }
    match candidate.class {
        DriverClass::Pin | DriverClass::BusMember | DriverClass::SheetInput => None,
        DriverClass::GlobalLabel | DriverClass::GlobalPower => Some(None),
        DriverClass::LocalLabel | DriverClass::Hierarchical | DriverClass::LocalPower => {
            Some(Some(candidate.path.clone()))
        }
    }
}
