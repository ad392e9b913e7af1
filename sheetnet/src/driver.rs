//! Driver Resolver
//!
//! Picks the single item that names a subgraph. Candidates are ranked by:
//!
//! 1. bus superset preference (`BUS[1..4]` eliminates `BUS[1..3]`)
//! 2. power pins (global, then local) above everything else
//! 3. structural class: global label, hierarchical label / output sheet pin,
//!    local label, other sheet pins, bus member names, plain pins
//! 4. name quality: hand-written names above auto-generated ones
//! 5. alphabetical order of the resolved name
//!
//! Name quality is a pluggable [`NameQuality`] predicate.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::bus::{looks_like_bus, BusName, BusSyntaxError};
use crate::core::{ConnectivityOptions, SheetNetError};
use crate::schema::{Item, ItemId, ItemKind, PinShape, PowerScope, SheetPath};

/// Driver classes, weakest first. The derived order is the class ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverClass {
    /// Ordinary symbol pin
    Pin,
    /// Name inherited from a bus member slot
    BusMember,
    /// Sheet pin shaped as anything but an output
    SheetInput,
    LocalLabel,
    /// Hierarchical label or output-shaped sheet pin
    Hierarchical,
    GlobalLabel,
    LocalPower,
    GlobalPower,
}

impl DriverClass {
    /// Class of an item kind, `None` for items that never drive.
    pub fn of(kind: &ItemKind) -> Option<Self> {
        match kind {
            ItemKind::GlobalLabel { .. } => Some(DriverClass::GlobalLabel),
            ItemKind::LocalLabel { .. } => Some(DriverClass::LocalLabel),
            ItemKind::HierLabel { .. } => Some(DriverClass::Hierarchical),
            ItemKind::SheetPin { shape, .. } => Some(if *shape == PinShape::Output {
                DriverClass::Hierarchical
            } else {
                DriverClass::SheetInput
            }),
            ItemKind::SymbolPin { power, .. } => Some(match power.as_ref().map(|p| p.scope) {
                Some(PowerScope::Global) => DriverClass::GlobalPower,
                Some(PowerScope::Local) => DriverClass::LocalPower,
                None => DriverClass::Pin,
            }),
            ItemKind::Wire { .. }
            | ItemKind::BusWire { .. }
            | ItemKind::Junction { .. }
            | ItemKind::NoConnect { .. }
            | ItemKind::BusEntry { .. }
            | ItemKind::DirectiveLabel { .. } => None,
        }
    }

    /// Names of this class are shared by every sheet.
    pub fn is_global(&self) -> bool {
        matches!(self, DriverClass::GlobalLabel | DriverClass::GlobalPower)
    }
}

/// Items that carry a net across a sheet boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    HierLabel,
    SheetPin,
}

/// A potential naming authority for a subgraph or net
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub item: ItemId,
    pub path: SheetPath,
    pub class: DriverClass,
    /// Text as declared on the item
    pub text: String,
    /// Resolved net or bus name (path-qualified unless global)
    pub name: String,
    pub bus: Option<BusName>,
    pub port: Option<PortKind>,
}

impl Candidate {
    pub fn is_bus(&self) -> bool {
        self.bus.is_some()
    }

    pub fn depth(&self) -> usize {
        self.path.depth()
    }

    pub fn is_port(&self) -> bool {
        self.port.is_some()
    }
}

/// Auto-generated name for a pin-only net.
pub fn pin_net_name(path: &SheetPath, reference: &str, number: &str) -> String {
    if path.is_root() {
        format!("Net-({}-Pad{})", reference, number)
    } else {
        format!("Net-({}{}-Pad{})", path, reference, number)
    }
}

/// Build the candidate an item contributes, if any.
///
/// `Some(Err(_))` means the item declares a bus name that does not parse; it
/// loses candidacy but the rest of its subgraph still resolves.
pub fn candidate_for(item: &Item, path: &SheetPath) -> Option<Result<Candidate, BusSyntaxError>> {
    let class = DriverClass::of(&item.kind)?;

    let (text, name, port) = match &item.kind {
        ItemKind::GlobalLabel { text, .. } => (text.clone(), text.clone(), None),
        ItemKind::LocalLabel { text, .. } => (text.clone(), path.qualify(text), None),
        ItemKind::HierLabel { text, .. } => (text.clone(), path.qualify(text), Some(PortKind::HierLabel)),
        ItemKind::SheetPin { text, .. } => (text.clone(), path.qualify(text), Some(PortKind::SheetPin)),
        ItemKind::SymbolPin {
            reference,
            number,
            power,
            ..
        } => match power {
            Some(p) if p.scope == PowerScope::Global => (p.net.clone(), p.net.clone(), None),
            Some(p) => (p.net.clone(), path.qualify(&p.net), None),
            None => {
                let name = pin_net_name(path, reference, number);
                (name.clone(), name, None)
            }
        },
        _ => return None,
    };

    let bus = if item.text().is_some() && looks_like_bus(&text) {
        match BusName::parse(&text) {
            Ok(bus) => Some(bus),
            Err(e) => return Some(Err(e)),
        }
    } else {
        None
    };

    Some(Ok(Candidate {
        item: item.id,
        path: path.clone(),
        class,
        text,
        name,
        bus,
        port,
    }))
}

/// Recognises auto-generated names (`Net-(R1-Pad1)`, `unconnected-…`).
pub trait NameQuality: Send + Sync + fmt::Debug {
    fn is_auto_generated(&self, name: &str) -> bool;
}

/// [`NameQuality`] driven by a list of regular expressions
#[derive(Debug, Clone)]
pub struct PatternNameQuality {
    patterns: Vec<Regex>,
}

impl PatternNameQuality {
    pub fn new(patterns: &[String]) -> Result<Self, SheetNetError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    SheetNetError::InvalidOptions(format!("bad auto-name pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }
}

impl Default for PatternNameQuality {
    fn default() -> Self {
        let patterns = ConnectivityOptions::default()
            .auto_name_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self { patterns }
    }
}

impl NameQuality for PatternNameQuality {
    fn is_auto_generated(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }
}

#[derive(Debug, Clone)]
pub struct DriverResolver {
    quality: Arc<dyn NameQuality>,
}

impl Default for DriverResolver {
    fn default() -> Self {
        Self::new(Arc::new(PatternNameQuality::default()))
    }
}

impl DriverResolver {
    pub fn new(quality: Arc<dyn NameQuality>) -> Self {
        Self { quality }
    }

    pub fn is_auto_generated(&self, name: &str) -> bool {
        self.quality.is_auto_generated(name)
    }

    fn human(&self, c: &Candidate) -> bool {
        !self.quality.is_auto_generated(&c.text)
    }

    /// Ranking within one subgraph. `Greater` means `a` wins.
    pub fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        a.class
            .cmp(&b.class)
            .then_with(|| self.human(a).cmp(&self.human(b)))
            .then_with(|| b.name.cmp(&a.name))
    }

    /// Ranking between subgraph drivers merged into one net. Ports lose to
    /// anything else, and between equals the shallower sheet names the net.
    pub fn compare_across_sheets(&self, a: &Candidate, b: &Candidate) -> Ordering {
        a.port
            .is_none()
            .cmp(&b.port.is_none())
            .then_with(|| a.class.cmp(&b.class))
            .then_with(|| b.depth().cmp(&a.depth()))
            .then_with(|| self.human(a).cmp(&self.human(b)))
            .then_with(|| b.name.cmp(&a.name))
    }

    /// Choose the driver among one subgraph's candidates.
    pub fn choose(&self, candidates: &[Candidate]) -> Result<Option<usize>, SheetNetError> {
        let eliminated: Vec<bool> = candidates
            .iter()
            .map(|c| match &c.bus {
                Some(mine) => candidates.iter().any(|other| {
                    other
                        .bus
                        .as_ref()
                        .is_some_and(|theirs| theirs.is_strict_superset_of(mine))
                }),
                None => false,
            })
            .collect();

        let remaining = candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| !eliminated[*i])
            .map(|(i, _)| i);
        Self::pick(candidates, remaining, |a, b| self.compare(a, b))
    }

    /// Choose the name-giving driver among the drivers of merged subgraphs.
    pub fn choose_across_sheets(&self, candidates: &[Candidate]) -> Result<Option<usize>, SheetNetError> {
        Self::pick(candidates, 0..candidates.len(), |a, b| {
            self.compare_across_sheets(a, b)
        })
    }

    fn pick(
        candidates: &[Candidate],
        indices: impl Iterator<Item = usize>,
        compare: impl Fn(&Candidate, &Candidate) -> Ordering,
    ) -> Result<Option<usize>, SheetNetError> {
        let mut best: Option<usize> = None;
        for i in indices {
            let Some(b) = best else {
                best = Some(i);
                continue;
            };
            let (challenger, current) = (&candidates[i], &candidates[b]);
            match compare(challenger, current) {
                Ordering::Greater => best = Some(i),
                Ordering::Less => {}
                Ordering::Equal => {
                    if challenger.name != current.name {
                        return Err(SheetNetError::AmbiguousDriver {
                            path: current.path.clone(),
                            first: current.name.clone(),
                            first_item: current.item,
                            second: challenger.name.clone(),
                            second_item: challenger.item,
                        });
                    }
                    if (&challenger.path, challenger.item) < (&current.path, current.item) {
                        best = Some(i);
                    }
                }
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Item;

    fn candidates(items: &[Item], path: &SheetPath) -> Vec<Candidate> {
        items
            .iter()
            .filter_map(|i| candidate_for(i, path))
            .filter_map(Result::ok)
            .collect()
    }

    fn winner(items: &[Item]) -> Candidate {
        let path = SheetPath::root();
        let cands = candidates(items, &path);
        let resolver = DriverResolver::default();
        let idx = resolver.choose(&cands).unwrap().expect("a driver");
        cands[idx].clone()
    }

    #[test]
    fn test_bus_superset_wins() {
        for d in 4..8 {
            let wide = format!("NAME[1..{}]", d);
            let items = vec![
                Item::local_label(1, (0, 0), "NAME[1..3]"),
                Item::local_label(2, (5, 0), &wide),
            ];
            assert_eq!(winner(&items).text, wide);
        }
    }

    #[test]
    fn test_superset_beats_higher_class_subset() {
        let items = vec![
            Item::global_label(1, (0, 0), "BUS[1..3]"),
            Item::local_label(2, (5, 0), "BUS[1..4]"),
        ];
        assert_eq!(winner(&items).text, "BUS[1..4]");
    }

    #[test]
    fn test_power_precedence_is_monotonic() {
        let regular = Item::pin(1, (0, 0), "U1", "3");
        let local = Item::power_pin(2, (0, 0), "#PWR01", "VLOCAL", PowerScope::Local);
        let global = Item::power_pin(3, (0, 0), "#PWR02", "VCC", PowerScope::Global);
        let label = Item::global_label(4, (0, 0), "AAA");

        let all = vec![regular.clone(), local.clone(), global.clone(), label.clone()];
        assert_eq!(winner(&all).item, ItemId(3));

        let no_global = vec![regular.clone(), local.clone(), label.clone()];
        assert_eq!(winner(&no_global).item, ItemId(2));
        assert_eq!(winner(&no_global).name, "/VLOCAL");

        let only_regular = vec![regular];
        assert_eq!(winner(&only_regular).name, "Net-(U1-Pad3)");
    }

    #[test]
    fn test_structural_class_order() {
        let items = vec![
            Item::local_label(1, (0, 0), "LOCAL"),
            Item::hier_label(2, (0, 0), "HIER", PinShape::Input),
            Item::global_label(3, (0, 0), "GLOBAL"),
        ];
        assert_eq!(winner(&items).item, ItemId(3));
        assert_eq!(winner(&items[..2]).item, ItemId(2));
        let with_input_pin = vec![
            Item::local_label(1, (0, 0), "LOCAL"),
            Item::sheet_pin(2, (0, 0), "PIN", PinShape::Input, "s1"),
        ];
        assert_eq!(winner(&with_input_pin).item, ItemId(1));
    }

    #[test]
    fn test_human_name_beats_generated() {
        let items = vec![
            Item::global_label(1, (0, 0), "Net-Pad1"),
            Item::global_label(2, (0, 0), "VCC"),
        ];
        assert_eq!(winner(&items).name, "VCC");
    }

    #[test]
    fn test_alphabetical_tiebreak() {
        let items = vec![
            Item::local_label(1, (0, 0), "BBB"),
            Item::local_label(2, (0, 0), "AAA"),
        ];
        let w = winner(&items);
        assert_eq!(w.text, "AAA");
        assert_eq!(w.name, "/AAA");
    }

    #[test]
    fn test_output_sheet_pin_biased() {
        let items = vec![
            Item::sheet_pin(1, (0, 0), "IN", PinShape::Input, "s1"),
            Item::sheet_pin(2, (0, 0), "OUT", PinShape::Output, "s2"),
        ];
        assert_eq!(winner(&items).text, "OUT");
    }

    #[test]
    fn test_malformed_bus_label_loses_candidacy() {
        let path = SheetPath::root();
        let bad = Item::local_label(1, (0, 0), "DATA[3..");
        assert!(matches!(candidate_for(&bad, &path), Some(Err(_))));
        let items = vec![bad, Item::local_label(2, (0, 0), "ZED")];
        assert_eq!(winner(&items).text, "ZED");
    }

    #[test]
    fn test_non_drivers_have_no_candidate() {
        let path = SheetPath::root();
        assert!(candidate_for(&Item::wire(1, (0, 0), (1, 0)), &path).is_none());
        assert!(candidate_for(&Item::directive(2, (0, 0), "CLASS"), &path).is_none());
        assert!(candidate_for(&Item::junction(3, (0, 0)), &path).is_none());
    }

    #[test]
    fn test_pin_names_are_sheet_qualified() {
        let sub = SheetPath::root().child("s1".into(), "Sub");
        assert_eq!(pin_net_name(&SheetPath::root(), "R1", "2"), "Net-(R1-Pad2)");
        assert_eq!(pin_net_name(&sub, "R1", "2"), "Net-(/Sub/R1-Pad2)");
    }

    #[test]
    fn test_across_sheets_prefers_non_port_then_shallow() {
        let resolver = DriverResolver::default();
        let root = SheetPath::root();
        let sub = root.child("s1".into(), "Sub");
        let parent = candidate_for(&Item::local_label(1, (0, 0), "BUS0"), &root).unwrap().unwrap();
        let child_port = candidate_for(&Item::hier_label(2, (0, 0), "X", PinShape::Output), &sub)
            .unwrap()
            .unwrap();
        let child_local = candidate_for(&Item::local_label(3, (0, 0), "OUT_0"), &sub).unwrap().unwrap();

        let all = vec![child_port, child_local, parent];
        assert_eq!(resolver.choose_across_sheets(&all).unwrap(), Some(2));
    }

    #[test]
    fn test_custom_name_quality() {
        let quality = PatternNameQuality::new(&["^tmp_".to_string()]).unwrap();
        let resolver = DriverResolver::new(Arc::new(quality));
        let path = SheetPath::root();
        let cands = candidates(
            &[
                Item::local_label(1, (0, 0), "tmp_a"),
                Item::local_label(2, (0, 0), "zzz"),
            ],
            &path,
        );
        let idx = resolver.choose(&cands).unwrap().unwrap();
        assert_eq!(cands[idx].text, "zzz");
    }
}
