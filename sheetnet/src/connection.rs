//! Per-item connection state.
//!
//! One [`ConnectionState`] exists for every connectable item in every sheet
//! instance it appears in. The graph updates these in place on each pass;
//! the dirty flag marks items whose state is waiting for re-evaluation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::{ItemId, SheetPath};

/// Code reserved for "no net" (no-connect flags, unresolved items)
pub const NO_NET: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetKind {
    Scalar,
    Bus,
}

/// An item as seen from one sheet instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemRef {
    pub path: SheetPath,
    pub item: ItemId,
}

impl ItemRef {
    pub fn new(item: ItemId, path: &SheetPath) -> Self {
        Self {
            path: path.clone(),
            item,
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.path, self.item)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub name: String,
    pub kind: NetKind,
    /// Fully qualified member names when `kind` is `Bus`
    pub members: Vec<String>,
    pub net_code: u32,
    /// Set by an edit or a rebuild, cleared when a pass publishes the item.
    /// Every dirty item seeds the next incremental pass.
    pub dirty: bool,
}

impl ConnectionState {
    /// State of an item that has been seen but not resolved yet.
    pub fn pending() -> Self {
        Self {
            name: String::new(),
            kind: NetKind::Scalar,
            members: Vec::new(),
            net_code: NO_NET,
            dirty: true,
        }
    }

    pub fn is_bus(&self) -> bool {
        self.kind == NetKind::Bus
    }
}

/// Answer to a connectivity query for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetInfo {
    pub net_name: String,
    pub net_code: u32,
    pub is_bus: bool,
    pub bus_members: Vec<String>,
}

impl From<&ConnectionState> for NetInfo {
    fn from(state: &ConnectionState) -> Self {
        Self {
            net_name: state.name.clone(),
            net_code: state.net_code,
            is_bus: state.is_bus(),
            bus_members: state.members.clone(),
        }
    }
}
