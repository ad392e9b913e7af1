//! Subgraph Builder
//!
//! Groups the connectable items of one sheet instance into maximal connected
//! subgraphs with a union-find over connection points, then resolves each
//! subgraph's driver and, for buses, its member layout.
//!
//! Connection rules:
//! - items join when they share a connection point on the same layer
//! - point-like items (labels, pins, junctions, no-connects, bus entry wire
//!   ends) also join a wire or bus segment whose interior they sit on
//! - a wire endpoint on another wire's interior needs a junction there
//! - layer-neutral items join the bus layer when a bus is present at the
//!   point, otherwise the net layer
//! - a bus entry's bus end taps a bus segment without merging the two

use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::advisory::{Advisory, AdvisoryKind};
use crate::core::SheetNetError;
use crate::driver::{candidate_for, Candidate, DriverClass, DriverResolver, PortKind};
use crate::schema::{Item, ItemId, Layer, Page, Point, SheetPath};
use crate::unfold::BusLayout;

/// Arena index of a subgraph inside a connectivity graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubgraphId(pub u32);

impl fmt::Display for SubgraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sg{}", self.0)
    }
}

/// A bus entry feeding a scalar subgraph into a bus subgraph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusTap {
    pub entry: ItemId,
    pub bus: SubgraphId,
    /// Bus slot the scalar net's name matches, if any
    pub slot: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subgraph {
    pub path: SheetPath,
    /// Member items, ascending
    pub items: Vec<ItemId>,
    /// Every well-formed candidate, including ones of the wrong kind
    pub candidates: Vec<Candidate>,
    pub driver: Option<Candidate>,
    pub is_bus: bool,
    pub layout: Option<BusLayout>,
    pub taps: Vec<BusTap>,
    pub no_connects: Vec<ItemId>,
    pub advisories: Vec<Advisory>,
}

impl Subgraph {
    pub fn name(&self) -> Option<&str> {
        self.driver.as_ref().map(|d| d.name.as_str())
    }

    pub fn is_anonymous(&self) -> bool {
        self.driver.is_none()
    }

    /// Nothing but no-connect flags
    pub fn is_no_connect_only(&self) -> bool {
        self.no_connects.len() == self.items.len()
    }

    /// Candidates whose kind matches the subgraph's kind.
    pub fn effective_candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(move |c| c.is_bus() == self.is_bus)
    }
}

/// Subgraphs of one sheet instance. Taps refer to subgraphs by their index
/// in `subgraphs`.
#[derive(Debug, Clone)]
pub struct SheetBuild {
    pub path: SheetPath,
    pub subgraphs: Vec<Subgraph>,
}

/// Build the subgraphs of one sheet instance.
///
/// With `filter`, only the listed items take part; the set has to be closed
/// under point adjacency for the result to match a full build.
pub fn build_sheet(
    page: &Page,
    path: &SheetPath,
    filter: Option<&HashSet<ItemId>>,
    resolver: &DriverResolver,
) -> Result<SheetBuild, SheetNetError> {
    let items: Vec<&Item> = page
        .items
        .iter()
        .filter(|i| filter.map_or(true, |f| f.contains(&i.id)))
        .filter(|i| !i.connection_points().is_empty())
        .collect();

    let mut by_point: HashMap<Point, Vec<usize>> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        for point in item.connection_points() {
            by_point.entry(point).or_default().push(idx);
        }
    }
    let segments: Vec<(usize, Point, Point)> = items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| item.segment().map(|(a, b)| (idx, a, b)))
        .collect();

    let mut uf = UnionFind::<usize>::new(items.len());
    for (point, at) in &by_point {
        let mut members = at.clone();
        if at.iter().any(|&i| items[i].segment().is_none()) {
            members.extend(
                segments
                    .iter()
                    .filter(|(_, a, b)| point.is_inside_segment(*a, *b))
                    .map(|(idx, _, _)| *idx),
            );
        }
        join_at_point(&items, &members, &mut uf);
    }

    let mut taps = Vec::new();
    let mut unattached = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let Some(tap) = item.bus_tap() else {
            continue;
        };
        let hit = segments.iter().find(|(s, a, b)| {
            items[*s].is_bus_wire() && (tap == *a || tap == *b || tap.is_inside_segment(*a, *b))
        });
        match hit {
            Some((bus_idx, _, _)) => taps.push((idx, *bus_idx)),
            None => unattached.push(idx),
        }
    }

    let labels = uf.into_labeling();
    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for (idx, label) in labels.iter().enumerate() {
        groups.entry(*label).or_default().push(idx);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
    for group in &mut groups {
        group.sort_by_key(|&i| items[i].id);
    }
    groups.sort_by_key(|g| items[g[0]].id);

    let mut group_of = vec![0usize; items.len()];
    for (g, group) in groups.iter().enumerate() {
        for &i in group {
            group_of[i] = g;
        }
    }

    let mut subgraphs = groups
        .iter()
        .map(|group| {
            let members: Vec<&Item> = group.iter().map(|&i| items[i]).collect();
            make_subgraph(path, &members, resolver)
        })
        .collect::<Result<Vec<_>, _>>()?;

    for idx in unattached {
        let entry = items[idx];
        subgraphs[group_of[idx]].advisories.push(
            Advisory::new(
                AdvisoryKind::BusEntryUnattached,
                path,
                format!("bus entry {} does not touch a bus", entry.id),
            )
            .with_item(entry.id)
            .with_location(entry.anchor()),
        );
    }

    let mut seen = HashSet::new();
    for (entry_idx, bus_idx) in taps {
        let (scalar, bus) = (group_of[entry_idx], group_of[bus_idx]);
        if !seen.insert((scalar, bus, items[entry_idx].id)) {
            continue;
        }
        let entry = items[entry_idx];
        let names: Vec<String> = subgraphs[scalar]
            .effective_candidates()
            .filter(|c| c.class != DriverClass::Pin)
            .map(|c| c.text.clone())
            .collect();
        let (slot, not_member) = match &subgraphs[bus].layout {
            Some(layout) if !names.is_empty() => {
                let slot = names.iter().find_map(|n| layout.slot_for_member(n));
                let message = slot.is_none().then(|| {
                    format!(
                        "net '{}' enters bus '{}' but is not one of its members",
                        names.join("', '"),
                        layout.driver.text
                    )
                });
                (slot, message)
            }
            _ => (None, None),
        };
        if let Some(message) = not_member {
            subgraphs[scalar].advisories.push(
                Advisory::new(AdvisoryKind::BusEntryNotMember, path, message)
                    .with_item(entry.id)
                    .with_location(entry.anchor()),
            );
        }
        subgraphs[scalar].taps.push(BusTap {
            entry: entry.id,
            bus: SubgraphId(bus as u32),
            slot,
        });
    }

    Ok(SheetBuild {
        path: path.clone(),
        subgraphs,
    })
}

fn join_at_point(items: &[&Item], members: &[usize], uf: &mut UnionFind<usize>) {
    let first = |layer: Layer| members.iter().copied().find(|&i| items[i].layer() == layer);
    let net = first(Layer::Net);
    let bus = first(Layer::Bus);
    let mut neutral_home = bus.or(net);

    for &i in members {
        let home = match items[i].layer() {
            Layer::Net => net,
            Layer::Bus => bus,
            Layer::Either => match neutral_home {
                Some(home) => Some(home),
                None => {
                    neutral_home = Some(i);
                    None
                }
            },
        };
        if let Some(home) = home {
            uf.union(home, i);
        }
    }
}

fn make_subgraph(path: &SheetPath, members: &[&Item], resolver: &DriverResolver) -> Result<Subgraph, SheetNetError> {
    let mut advisories = Vec::new();
    let mut candidates = Vec::new();
    for item in members {
        match candidate_for(item, path) {
            Some(Ok(candidate)) => candidates.push(candidate),
            Some(Err(e)) => advisories.push(
                Advisory::new(AdvisoryKind::MalformedBusName, path, e.to_string())
                    .with_item(item.id)
                    .with_location(item.anchor()),
            ),
            None => {}
        }
    }

    let has_bus_wire = members.iter().any(|i| i.is_bus_wire());
    let has_net_item = members.iter().any(|i| i.layer() == Layer::Net);
    let is_bus = has_bus_wire || (!has_net_item && candidates.iter().any(Candidate::is_bus));

    for c in candidates.iter().filter(|c| c.is_bus() != is_bus) {
        let (kind, message) = if is_bus {
            (AdvisoryKind::ScalarLabelOnBus, format!("scalar name '{}' on a bus", c.text))
        } else {
            (AdvisoryKind::BusLabelOnWire, format!("bus name '{}' on a wire", c.text))
        };
        advisories.push(Advisory::new(kind, path, message).with_item(c.item));
    }

    let effective: Vec<Candidate> = candidates.iter().filter(|c| c.is_bus() == is_bus).cloned().collect();
    let driver = resolver.choose(&effective)?.map(|i| effective[i].clone());

    let label_names: HashSet<&str> = effective
        .iter()
        .filter(|c| {
            matches!(
                c.class,
                DriverClass::LocalLabel | DriverClass::GlobalLabel | DriverClass::Hierarchical
            ) && c.port != Some(PortKind::SheetPin)
        })
        .map(|c| c.name.as_str())
        .collect();
    if label_names.len() > 1 {
        let mut names: Vec<&str> = label_names.into_iter().collect();
        names.sort_unstable();
        advisories.push(Advisory::new(
            AdvisoryKind::MultipleNames,
            path,
            format!("one connection carries several names: {}", names.join(", ")),
        ));
    }

    let layout = match (&driver, is_bus) {
        (Some(d), true) => BusLayout::new(path, d, &effective).map(|(layout, mismatches)| {
            advisories.extend(mismatches);
            layout
        }),
        _ => None,
    };

    Ok(Subgraph {
        path: path.clone(),
        items: members.iter().map(|i| i.id).collect(),
        candidates,
        driver,
        is_bus,
        layout,
        taps: Vec::new(),
        no_connects: members.iter().filter(|i| i.is_no_connect()).map(|i| i.id).collect(),
        advisories,
    })
}

/// Conservative adjacency of a page's items: two items are neighbours when
/// they touch the same point in any way (endpoint, interior, bus tap),
/// regardless of layer. Used to close the set of items an edit affects.
#[derive(Debug, Default)]
pub struct TouchIndex {
    groups: Vec<Vec<ItemId>>,
    member_of: HashMap<ItemId, Vec<usize>>,
}

impl TouchIndex {
    pub fn new(page: &Page) -> Self {
        let mut by_point: BTreeMap<Point, Vec<ItemId>> = BTreeMap::new();
        for item in &page.items {
            for point in item.connection_points().into_iter().chain(item.bus_tap()) {
                by_point.entry(point).or_default().push(item.id);
            }
        }
        for item in &page.items {
            if let Some((a, b)) = item.segment() {
                for (point, ids) in by_point.iter_mut() {
                    if point.is_inside_segment(a, b) {
                        ids.push(item.id);
                    }
                }
            }
        }

        let mut index = TouchIndex::default();
        for ids in by_point.into_values() {
            let g = index.groups.len();
            for id in &ids {
                index.member_of.entry(*id).or_default().push(g);
            }
            index.groups.push(ids);
        }
        index
    }

    pub fn neighbours(&self, id: ItemId) -> impl Iterator<Item = ItemId> + '_ {
        self.member_of
            .get(&id)
            .into_iter()
            .flatten()
            .flat_map(move |g| self.groups[*g].iter().copied())
    }
}
