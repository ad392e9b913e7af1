//! Non-fatal connectivity diagnostics.
//!
//! Advisories are attached to the graph after each pass and handed to
//! rule-checking collaborators. They never stop net resolution.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::{ItemId, Point, SheetPath};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    /// Label text looks like a bus but does not parse
    MalformedBusName,
    /// Bus-named label on a scalar wire
    BusLabelOnWire,
    /// Scalar label on a bus wire
    ScalarLabelOnBus,
    /// Bus entry whose bus end touches no bus wire
    BusEntryUnattached,
    /// Net reached through a bus entry is not a member of that bus
    BusEntryNotMember,
    /// Two linked bus declarations disagree on width or member names
    BusWidthMismatch,
    /// Sheet pin and hierarchical label disagree on bus/scalar kind
    HierarchyKindMismatch,
    /// Sheet pin without a matching hierarchical label in the child sheet
    UnmatchedSheetPin,
    /// Page placed inside itself
    SheetRecursion,
    /// Several distinct label names on one subgraph
    MultipleNames,
    /// Two unrelated nets resolved to the same name
    DuplicateNetName,
}

impl AdvisoryKind {
    pub fn id(&self) -> &'static str {
        match self {
            AdvisoryKind::MalformedBusName => "malformed_bus_name",
            AdvisoryKind::BusLabelOnWire => "bus_label_on_wire",
            AdvisoryKind::ScalarLabelOnBus => "scalar_label_on_bus",
            AdvisoryKind::BusEntryUnattached => "bus_entry_unattached",
            AdvisoryKind::BusEntryNotMember => "bus_entry_not_member",
            AdvisoryKind::BusWidthMismatch => "bus_width_mismatch",
            AdvisoryKind::HierarchyKindMismatch => "hierarchy_kind_mismatch",
            AdvisoryKind::UnmatchedSheetPin => "unmatched_sheet_pin",
            AdvisoryKind::SheetRecursion => "sheet_recursion",
            AdvisoryKind::MultipleNames => "multiple_names",
            AdvisoryKind::DuplicateNetName => "duplicate_net_name",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AdvisoryKind::MultipleNames | AdvisoryKind::DuplicateNetName => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for AdvisoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Advisory {
    pub kind: AdvisoryKind,
    pub severity: Severity,
    pub sheet_path: SheetPath,
    pub items: Vec<ItemId>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Point>,
}

impl Advisory {
    pub fn new(kind: AdvisoryKind, sheet_path: &SheetPath, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            sheet_path: sheet_path.clone(),
            items: Vec::new(),
            message: message.into(),
            location: None,
        }
    }

    pub fn with_item(mut self, item: ItemId) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_location(mut self, location: Point) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.sheet_path, self.message)
    }
}
