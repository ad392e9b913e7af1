//! Incremental recomputation.
//!
//! An edit touches a set of items. The affected closure grows that set
//! until no rebuilt subgraph can depend on anything outside it:
//!
//! - old subgraph membership (what used to be connected)
//! - bus entry taps in either direction, old and new
//! - shared points in the new geometry, wire interiors and bus taps included
//! - sheet pin / hierarchical label pairs
//!
//! Subgraphs touching the closure are replaced by a filtered rebuild; every
//! other subgraph is kept as is. The delta is computed first and merged in
//! one step; the merge returns what it replaced so a failed phase 2 can undo
//! it. Freed arena slots are reused by the rebuilt subgraphs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::mem;

use crate::builder::{SheetBuild, SubgraphId, TouchIndex};
use crate::connection::ItemRef;
use crate::core::SheetNetError;
use crate::graph::{BuildJob, ConnectivityGraph, DeltaUndo, Undo};
use crate::hierarchy::Hierarchy;
use crate::schema::{ItemId, ItemKind, PageId, Schematic, SheetPath};

/// Items an edit can have affected, per sheet instance
#[derive(Debug, Default)]
pub struct AffectedClosure {
    pub items: BTreeMap<SheetPath, HashSet<ItemId>>,
    /// Old subgraphs the rebuild replaces
    pub subgraphs: Vec<SubgraphId>,
    /// Instances that appeared or now place a different page
    pub fresh: Vec<SheetPath>,
    /// Instances that disappeared or now place a different page
    pub dropped: Vec<SheetPath>,
}

impl AffectedClosure {
    pub fn len(&self) -> usize {
        self.items.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.fresh.is_empty() && self.dropped.is_empty()
    }
}

/// Everything an incremental pass changes, ready to be merged
pub(crate) struct Delta {
    hierarchy: Hierarchy,
    removed: Vec<SubgraphId>,
    dropped: Vec<SheetPath>,
    builds: Vec<SheetBuild>,
}

impl ConnectivityGraph {
    pub(crate) fn run_incremental(&mut self, dirty: &[ItemId], schematic: &Schematic) -> Result<Undo, SheetNetError> {
        let hierarchy = Hierarchy::walk(schematic);
        let mut seeds: BTreeSet<ItemId> = dirty.iter().copied().collect();
        seeds.extend(self.pending.iter().copied());
        // A dirty state is rebuilt even when nobody reported its item
        seeds.extend(self.states.iter().filter(|(_, s)| s.dirty).map(|(r, _)| r.item));
        let seeds: Vec<ItemId> = seeds.into_iter().collect();
        let closure = self.affected_closure(&seeds, schematic, &hierarchy);
        tracing::debug!(
            "incremental closure: {} items, {} new instances, {} dropped instances",
            closure.len(),
            closure.fresh.len(),
            closure.dropped.len()
        );
        let delta = self.compute_delta(closure, schematic, hierarchy)?;
        Ok(self.apply_delta(delta))
    }

    /// Items that have to be rebuilt after `seeds` were edited.
    pub fn affected_closure(&self, seeds: &[ItemId], schematic: &Schematic, hierarchy: &Hierarchy) -> AffectedClosure {
        let pages = hierarchy.pages();
        let mut closure = AffectedClosure::default();
        for (path, page) in &pages {
            if self.instances.get(path) != Some(page) {
                closure.fresh.push(path.clone());
            }
        }
        for (path, page) in &self.instances {
            if pages.get(path) != Some(page) {
                closure.dropped.push(path.clone());
            }
        }
        closure.fresh.sort();
        let skip: HashSet<&SheetPath> = closure.fresh.iter().chain(&closure.dropped).collect();

        let mut queue: VecDeque<ItemRef> = VecDeque::new();
        for &id in seeds {
            for instance in &hierarchy.instances {
                let drawn = schematic.page(&instance.page).is_some_and(|p| p.item(id).is_some());
                if drawn {
                    queue.push_back(ItemRef::new(id, &instance.path));
                }
            }
            for path in self.item_paths.get(&id).into_iter().flatten() {
                queue.push_back(ItemRef::new(id, path));
            }
        }

        let mut touch: HashMap<PageId, TouchIndex> = HashMap::new();
        let mut expanded: HashSet<SubgraphId> = HashSet::new();
        let mut seen: HashSet<ItemRef> = HashSet::new();

        while let Some(r) = queue.pop_front() {
            if skip.contains(&r.path) || !seen.insert(r.clone()) {
                continue;
            }

            if let Some(&start) = self.item_subgraph.get(&r) {
                let mut stack = vec![start];
                while let Some(id) = stack.pop() {
                    if !expanded.insert(id) {
                        continue;
                    }
                    let Some(subgraph) = self.subgraph(id) else {
                        continue;
                    };
                    queue.extend(subgraph.items.iter().map(|i| ItemRef::new(*i, &subgraph.path)));
                    stack.extend(subgraph.taps.iter().map(|t| t.bus));
                    stack.extend(self.tapped_by.get(&id).into_iter().flatten().copied());
                }
            }

            let Some(page_id) = pages.get(&r.path) else {
                continue;
            };
            let Some(page) = schematic.page(page_id) else {
                continue;
            };
            let Some(item) = page.item(r.item) else {
                continue;
            };
            closure.items.entry(r.path.clone()).or_default().insert(r.item);

            let index = touch.entry(page_id.clone()).or_insert_with(|| TouchIndex::new(page));
            queue.extend(index.neighbours(r.item).map(|n| ItemRef::new(n, &r.path)));

            match &item.kind {
                ItemKind::SheetPin { .. } => {
                    for link in hierarchy.links.iter().filter(|l| l.parent == r.path && l.pin == r.item) {
                        let Some(child_page) = pages.get(&link.child).and_then(|p| schematic.page(p)) else {
                            continue;
                        };
                        queue.extend(
                            child_page
                                .items
                                .iter()
                                .filter(|i| matches!(&i.kind, ItemKind::HierLabel { text, .. } if *text == link.name))
                                .map(|i| ItemRef::new(i.id, &link.child)),
                        );
                    }
                }
                ItemKind::HierLabel { text, .. } => {
                    for link in hierarchy.links.iter().filter(|l| l.child == r.path && &l.name == text) {
                        queue.push_back(ItemRef::new(link.pin, &link.parent));
                    }
                }
                _ => {}
            }
        }

        closure.subgraphs = expanded.into_iter().collect();
        closure.subgraphs.sort();
        closure
    }

    fn compute_delta(
        &self,
        closure: AffectedClosure,
        schematic: &Schematic,
        hierarchy: Hierarchy,
    ) -> Result<Delta, SheetNetError> {
        let mut removed = closure.subgraphs.clone();
        for path in &closure.dropped {
            removed.extend(self.by_path.get(path).into_iter().flatten().copied());
        }
        removed.sort();
        removed.dedup();

        let pages = hierarchy.pages();
        let mut jobs: Vec<BuildJob> = Vec::new();
        for path in &closure.fresh {
            if let Some(page) = pages.get(path) {
                jobs.push(BuildJob {
                    path: path.clone(),
                    page: page.clone(),
                    filter: None,
                });
            }
        }
        for (path, items) in closure.items {
            if let Some(page) = pages.get(&path) {
                jobs.push(BuildJob {
                    path,
                    page: page.clone(),
                    filter: Some(items),
                });
            }
        }

        let parallel = self.options.parallel && jobs.len() >= self.options.parallel_threshold;
        let builds = self.build_jobs(schematic, &jobs, parallel)?;

        Ok(Delta {
            hierarchy,
            removed,
            dropped: closure.dropped,
            builds,
        })
    }

    fn apply_delta(&mut self, delta: Delta) -> Undo {
        let mut touched: BTreeSet<SheetPath> = delta.dropped.iter().cloned().collect();
        touched.extend(delta.builds.iter().map(|b| b.path.clone()));
        touched.extend(delta.removed.iter().filter_map(|id| self.subgraph(*id)).map(|s| s.path.clone()));
        let paths: Vec<(SheetPath, Option<Vec<SubgraphId>>)> = touched
            .into_iter()
            .map(|path| {
                let ids = self.by_path.get(&path).cloned();
                (path, ids)
            })
            .collect();
        let arena_len = self.subgraphs.len();
        let free = self.free.clone();

        let removed = delta.removed.iter().filter_map(|id| self.remove_subgraph(*id)).collect();
        for path in &delta.dropped {
            self.by_path.remove(path);
        }
        let rebuilt = mem::replace(&mut self.rebuilt, 0);
        let mut inserted = Vec::new();
        for build in delta.builds {
            inserted.extend(self.insert_build(build));
        }
        let instances = delta
            .hierarchy
            .instances
            .iter()
            .map(|i| (i.path.clone(), i.page.clone()))
            .collect();

        Undo::Delta(Box::new(DeltaUndo {
            removed,
            inserted,
            paths,
            arena_len,
            free,
            instances: mem::replace(&mut self.instances, instances),
            hierarchy: mem::replace(&mut self.hierarchy, delta.hierarchy),
            rebuilt,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConnectivityOptions;
    use crate::schema::{Item, Page};

    fn two_nets() -> Schematic {
        Schematic::new(Page::new("top").with_items([
            Item::wire(1, (0, 0), (10, 0)),
            Item::local_label(2, (0, 0), "A"),
            Item::wire(3, (0, 50), (10, 50)),
            Item::local_label(4, (0, 50), "B"),
        ]))
    }

    fn rename(schematic: &mut Schematic, id: u32, to: &str) {
        if let Some(ItemKind::LocalLabel { text, .. }) = schematic.pages[0]
            .items
            .iter_mut()
            .find(|i| i.id == ItemId(id))
            .map(|i| &mut i.kind)
        {
            *text = to.to_string();
        }
    }

    fn tapped_bus() -> Schematic {
        Schematic::new(Page::new("top").with_items([
            Item::bus(1, (0, 0), (100, 0)),
            Item::local_label(2, (0, 0), "D[0..3]"),
            Item::bus_entry(3, (30, 0), (40, 10)),
            Item::wire(4, (40, 10), (40, 50)),
            Item::local_label(5, (40, 50), "D2"),
            Item::wire(6, (0, 90), (10, 90)),
            Item::local_label(7, (0, 90), "OTHER"),
        ]))
    }

    #[test]
    fn test_closure_stays_local() {
        let schematic = two_nets();
        let mut graph = ConnectivityGraph::new(ConnectivityOptions::sequential()).unwrap();
        graph.full_recompute(&schematic).unwrap();

        let hierarchy = Hierarchy::walk(&schematic);
        let closure = graph.affected_closure(&[ItemId(2)], &schematic, &hierarchy);
        let root = closure.items.get(&SheetPath::root()).unwrap();
        assert!(root.contains(&ItemId(1)));
        assert!(!root.contains(&ItemId(3)));
        assert!(closure.fresh.is_empty());
    }

    #[test]
    fn test_closure_follows_old_membership_of_deleted_item() {
        let mut schematic = two_nets();
        let mut graph = ConnectivityGraph::new(ConnectivityOptions::sequential()).unwrap();
        graph.full_recompute(&schematic).unwrap();

        schematic.pages[0].items.retain(|i| i.id != ItemId(1));
        let hierarchy = Hierarchy::walk(&schematic);
        let closure = graph.affected_closure(&[ItemId(1)], &schematic, &hierarchy);
        let root = closure.items.get(&SheetPath::root()).unwrap();
        assert!(root.contains(&ItemId(2)));
        assert!(!root.contains(&ItemId(1)));
    }

    #[test]
    fn test_incremental_rebuilds_only_touched_subgraphs() {
        let mut schematic = two_nets();
        let mut graph = ConnectivityGraph::new(ConnectivityOptions::sequential()).unwrap();
        graph.full_recompute(&schematic).unwrap();
        let b_code = graph.net_by_name("/B").unwrap().code;

        if let Some(ItemKind::LocalLabel { text, .. }) = schematic.pages[0]
            .items
            .iter_mut()
            .find(|i| i.id == ItemId(2))
            .map(|i| &mut i.kind)
        {
            *text = "C".to_string();
        }
        graph.incremental_recompute(&[ItemId(2)], &schematic).unwrap();

        assert_eq!(graph.summary().rebuilt_subgraphs, 1);
        assert!(graph.net_by_name("/A").is_none());
        assert!(graph.net_by_name("/C").is_some());
        assert_eq!(graph.net_by_name("/B").unwrap().code, b_code);
    }

    #[test]
    fn test_repeated_edits_reuse_arena_slots() {
        let mut schematic = two_nets();
        let mut graph = ConnectivityGraph::new(ConnectivityOptions::sequential()).unwrap();
        graph.full_recompute(&schematic).unwrap();

        for n in 0..60 {
            let name = format!("N{}", n);
            rename(&mut schematic, 2, &name);
            graph.incremental_recompute(&[ItemId(2)], &schematic).unwrap();
            assert!(graph.net_by_name(&format!("/{}", name)).is_some());
        }
        assert_eq!(graph.subgraphs.len(), graph.summary().subgraphs);
        assert!(graph.free.is_empty());
    }

    #[test]
    fn test_indexes_follow_bus_taps() {
        let schematic = tapped_bus();
        let mut graph = ConnectivityGraph::new(ConnectivityOptions::sequential()).unwrap();
        graph.full_recompute(&schematic).unwrap();

        let root = SheetPath::root();
        let bus = graph.item_subgraph[&ItemRef::new(ItemId(1), &root)];
        let scalar = graph.item_subgraph[&ItemRef::new(ItemId(4), &root)];
        assert_eq!(graph.tapped_by[&bus], vec![scalar]);
        assert!(graph.item_paths[&ItemId(5)].contains(&root));

        let hierarchy = Hierarchy::walk(&schematic);
        let closure = graph.affected_closure(&[ItemId(2)], &schematic, &hierarchy);
        let items = &closure.items[&root];
        assert!(items.contains(&ItemId(5)));
        assert!(!items.contains(&ItemId(7)));
    }

    #[test]
    fn test_rollback_restores_arena() {
        let mut schematic = tapped_bus();
        let mut graph = ConnectivityGraph::new(ConnectivityOptions::sequential()).unwrap();
        graph.full_recompute(&schematic).unwrap();

        let states = graph.states.clone();
        let item_subgraph = graph.item_subgraph.clone();
        let item_paths = graph.item_paths.clone();
        let tapped_by = graph.tapped_by.clone();
        let by_path = graph.by_path.clone();
        let arena_len = graph.subgraphs.len();

        rename(&mut schematic, 2, "E[0..3]");
        let undo = graph.run_incremental(&[ItemId(2)], &schematic).unwrap();
        assert!(graph.states[&ItemRef::new(ItemId(2), &SheetPath::root())].dirty);

        graph.rollback(undo);
        assert_eq!(graph.states, states);
        assert_eq!(graph.item_subgraph, item_subgraph);
        assert_eq!(graph.item_paths, item_paths);
        assert_eq!(graph.tapped_by, tapped_by);
        assert_eq!(graph.by_path, by_path);
        assert_eq!(graph.subgraphs.len(), arena_len);
        assert!(graph.free.is_empty());
    }

    #[test]
    fn test_failed_resolution_keeps_previous_graph() {
        let mut schematic = two_nets();
        let mut graph = ConnectivityGraph::new(ConnectivityOptions::sequential()).unwrap();
        graph.full_recompute(&schematic).unwrap();
        graph
            .by_path
            .get_mut(&SheetPath::root())
            .unwrap()
            .push(SubgraphId(999));
        let nets = graph.nets().to_vec();
        let states = graph.states.clone();

        rename(&mut schematic, 2, "C");
        let err = graph.incremental_recompute(&[ItemId(2)], &schematic).unwrap_err();
        assert!(matches!(err, SheetNetError::CorruptState(_)));
        assert_eq!(graph.nets(), nets.as_slice());
        assert_eq!(graph.states, states);
        assert!(graph.net_by_name("/A").is_some());
        assert_eq!(graph.pending_edits(), Vec::<ItemId>::new());
    }

    #[test]
    fn test_dirty_state_seeds_next_pass() {
        let mut schematic = two_nets();
        let mut graph = ConnectivityGraph::new(ConnectivityOptions::sequential()).unwrap();
        graph.full_recompute(&schematic).unwrap();

        rename(&mut schematic, 2, "C");
        let label = ItemRef::new(ItemId(2), &SheetPath::root());
        if let Some(state) = graph.states.get_mut(&label) {
            state.dirty = true;
        }
        graph.incremental_recompute(&[], &schematic).unwrap();

        assert!(graph.net_by_name("/C").is_some());
        assert_eq!(graph.summary().rebuilt_subgraphs, 1);
        assert!(!graph.connection_state(ItemId(2), &SheetPath::root()).unwrap().dirty);
    }
}
