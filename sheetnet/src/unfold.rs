//! Bus unfolding inside one subgraph.
//!
//! Every bus-named candidate on a bus subgraph is an alias for the same
//! member slots. The chosen driver fixes the slot order; each alias is lined
//! up against it so that `BUS0` and `SUB_BUS0` on a wire carrying both
//! `BUS[0..1]` and `SUB_BUS[0..1]` resolve to slot 0.

use serde::Serialize;

use crate::advisory::{Advisory, AdvisoryKind};
use crate::bus::{align, BusName};
use crate::driver::{Candidate, DriverClass, PortKind};
use crate::schema::{ItemId, SheetPath};

/// Namespace a bus alias declares its member names in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasScope {
    /// Local and hierarchical labels: names visible in this sheet instance
    Local,
    Global,
    /// Sheet pins name nothing on their own sheet; they only feed a link
    SheetPin,
}

impl AliasScope {
    pub fn of(candidate: &Candidate) -> Self {
        if candidate.port == Some(PortKind::SheetPin) {
            AliasScope::SheetPin
        } else if candidate.class == DriverClass::GlobalLabel {
            AliasScope::Global
        } else {
            AliasScope::Local
        }
    }
}

/// One bus-named candidate and where its members land in the driver's slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliasMap {
    pub item: ItemId,
    pub scope: AliasScope,
    pub bus: BusName,
    /// Driver slot for each of this alias's members, `None` when unmatched
    pub slots: Vec<Option<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusLayout {
    pub driver: BusName,
    pub driver_item: ItemId,
    pub driver_scope: AliasScope,
    pub aliases: Vec<AliasMap>,
}

impl BusLayout {
    /// Lay out the slots of a bus subgraph from its driver and its bus-named
    /// candidates (the driver included). Width disagreements are reported
    /// and the common members are still linked.
    pub fn new(path: &SheetPath, driver: &Candidate, candidates: &[Candidate]) -> Option<(Self, Vec<Advisory>)> {
        let driver_bus = driver.bus.as_ref()?;
        let mut advisories = Vec::new();
        let mut aliases = Vec::new();

        for candidate in candidates {
            let Some(bus) = &candidate.bus else {
                continue;
            };
            let alignment = align(bus, driver_bus);
            let mut slots = vec![None; bus.width()];
            for (mine, theirs) in &alignment.pairs {
                slots[*mine] = Some(*theirs);
            }
            if alignment.mismatch {
                advisories.push(
                    Advisory::new(
                        AdvisoryKind::BusWidthMismatch,
                        path,
                        format!(
                            "bus '{}' ({} members) does not line up with '{}' ({} members)",
                            bus.text,
                            bus.width(),
                            driver_bus.text,
                            driver_bus.width()
                        ),
                    )
                    .with_item(candidate.item)
                    .with_item(driver.item),
                );
            }
            aliases.push(AliasMap {
                item: candidate.item,
                scope: AliasScope::of(candidate),
                bus: bus.clone(),
                slots,
            });
        }

        let layout = BusLayout {
            driver: driver_bus.clone(),
            driver_item: driver.item,
            driver_scope: AliasScope::of(driver),
            aliases,
        };
        Some((layout, advisories))
    }

    pub fn width(&self) -> usize {
        self.driver.width()
    }

    /// Net names of the driver's members as seen from `path`.
    pub fn member_names(&self, path: &SheetPath) -> Vec<String> {
        self.driver
            .members
            .iter()
            .map(|m| scoped_name(self.driver_scope, path, &m.name))
            .collect()
    }

    pub fn alias(&self, item: ItemId) -> Option<&AliasMap> {
        self.aliases.iter().find(|a| a.item == item)
    }

    /// Slot a scalar signal joins when it is tapped off this bus, matched
    /// against the members of every alias.
    pub fn slot_for_member(&self, name: &str) -> Option<usize> {
        self.aliases.iter().find_map(|alias| {
            alias
                .bus
                .members
                .iter()
                .position(|m| m.name == name)
                .and_then(|i| alias.slots[i])
        })
    }
}

/// Net name of a bus member declared in `scope` on `path`.
pub fn scoped_name(scope: AliasScope, path: &SheetPath, member: &str) -> String {
    match scope {
        AliasScope::Global => member.to_string(),
        AliasScope::Local | AliasScope::SheetPin => path.qualify(member),
    }
}
