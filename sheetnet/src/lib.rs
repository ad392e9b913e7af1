//! SheetNet - connectivity analysis for hierarchical schematics
//!
//! Works out which drawn items of a multi-sheet schematic are electrically
//! joined, what each resulting net is called, and which net code it carries.
//! Names propagate through sheet pins and hierarchical labels, bus names
//! unfold into their members, and small edits are recomputed incrementally
//! while unchanged nets keep their codes.
//!
//! # Quick Start
//!
//! ```no_run
//! use sheetnet::{ConnectivityGraph, ConnectivityOptions, Schematic, SheetPath, ItemId};
//! use std::path::Path;
//!
//! let schematic = Schematic::from_json_file(Path::new("design.json")).unwrap();
//! let mut graph = ConnectivityGraph::new(ConnectivityOptions::default()).unwrap();
//! graph.full_recompute(&schematic).unwrap();
//!
//! for net in graph.nets() {
//!     println!("{:>4} {}", net.code, net.name);
//! }
//!
//! if let Some(info) = graph.query(ItemId(12), &SheetPath::root()) {
//!     println!("item #12 is on {} (code {})", info.net_name, info.net_code);
//! }
//! ```
//!
//! # Features
//!
//! - **Subgraph building**: union-find over exact connection points
//! - **Driver resolution**: deterministic naming policy with a pluggable
//!   name-quality heuristic
//! - **Buses**: vector and group bus names, aliases, bus entries, links
//!   across sheets by member position or name
//! - **Incremental passes**: affected-closure rebuilds with stable net codes
//! - **Engine**: shared snapshots, cancellation, broadcast events

pub mod advisory;
pub mod builder;
pub mod bus;
pub mod connection;
pub mod core;
pub mod driver;
pub mod engine;
pub mod graph;
pub mod hierarchy;
pub mod incremental;
pub mod schema;
pub mod unfold;

// Re-export main types
pub use advisory::{Advisory, AdvisoryKind, Severity};
pub use bus::{BusName, BusSyntaxError};
pub use connection::{ConnectionState, ItemRef, NetInfo, NetKind, NO_NET};
pub use core::{ConnectivityOptions, SheetNetError};
pub use driver::{DriverClass, DriverResolver, NameQuality, PatternNameQuality};
pub use engine::{ConnectivityEngine, GraphEvent};
pub use graph::{ConnectivityGraph, GraphState, GraphSummary, Net, PassKind};
pub use schema::{Item, ItemId, ItemKind, Page, PinShape, Point, PowerScope, Schematic, SheetPath};

/// Load a document and run a full pass over it (convenience wrapper).
pub fn analyze_file(
    path: &std::path::Path,
    options: ConnectivityOptions,
) -> Result<ConnectivityGraph, SheetNetError> {
    let schematic = Schematic::from_json_file(path)?;
    let mut graph = ConnectivityGraph::new(options)?;
    graph.full_recompute(&schematic)?;
    Ok(graph)
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Advisory, ConnectivityEngine, ConnectivityGraph, ConnectivityOptions, ItemId, ItemRef, NetInfo,
        Schematic, SheetNetError, SheetPath,
    };
}
