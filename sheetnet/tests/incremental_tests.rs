//! Incremental passes must land on the same result as a full pass

use sheetnet::prelude::*;
use sheetnet::{Item, ItemKind, Page, PassKind};
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn resolved(schematic: &Schematic) -> ConnectivityGraph {
    let mut graph = ConnectivityGraph::new(ConnectivityOptions::sequential()).unwrap();
    graph.full_recompute(schematic).unwrap();
    graph
}

fn page_mut<'a>(schematic: &'a mut Schematic, id: &str) -> &'a mut Page {
    schematic.pages.iter_mut().find(|p| p.id.0 == id).unwrap()
}

/// Run the edit both ways from the same starting graph and compare.
fn assert_equivalent(before: &ConnectivityGraph, edited: &Schematic, dirty: &[ItemId]) -> ConnectivityGraph {
    let mut incremental = before.clone();
    incremental.incremental_recompute(dirty, edited).unwrap();

    let mut full = before.clone();
    full.full_recompute(edited).unwrap();

    assert_eq!(incremental.nets(), full.nets());
    assert_eq!(incremental.advisories(), full.advisories());
    assert_eq!(incremental.summary().last_pass, Some(PassKind::Incremental));
    incremental
}

#[test]
fn test_removing_power_symbol_renames_through_bus() {
    let mut schematic = Schematic::from_json_file(&fixture_path("bus_hierarchy.json")).unwrap();
    let before = resolved(&schematic);
    let vcc_code = before.net_by_name("VCC").unwrap().code;

    page_mut(&mut schematic, "child").items.retain(|i| i.id != ItemId(115));
    let graph = assert_equivalent(&before, &schematic, &[ItemId(115)]);

    assert_eq!(graph.query(ItemId(9), &SheetPath::root()).unwrap().net_name, "/BUS1");
    assert!(graph.net_by_name("GND").is_none());
    assert_eq!(graph.net_by_name("VCC").unwrap().code, vcc_code);
}

#[test]
fn test_relabel_keeps_unrelated_codes() {
    let mut schematic = Schematic::from_json_file(&fixture_path("shared_channels.json")).unwrap();
    let before = resolved(&schematic);
    let gnd = before.net_by_name("GND").unwrap().code;
    let right = before.net_by_name("AUDIO_R").unwrap().code;

    for item in &mut page_mut(&mut schematic, "top").items {
        if let ItemKind::GlobalLabel { text, .. } = &mut item.kind {
            if text == "AUDIO_L" {
                *text = "LINE_L".to_string();
            }
        }
    }
    let graph = assert_equivalent(&before, &schematic, &[ItemId(2)]);

    let left = graph.find_path("/Left/").unwrap();
    assert_eq!(graph.query(ItemId(203), &left).unwrap().net_name, "LINE_L");
    assert_eq!(graph.net_by_name("GND").unwrap().code, gnd);
    assert_eq!(graph.net_by_name("AUDIO_R").unwrap().code, right);
}

#[test]
fn test_removing_sheet_symbol_prunes_instance() {
    let mut schematic = Schematic::from_json_file(&fixture_path("bus_hierarchy.json")).unwrap();
    let before = resolved(&schematic);
    assert!(before.find_path("/Sub/").is_some());

    page_mut(&mut schematic, "top").sheets.clear();
    let graph = assert_equivalent(&before, &schematic, &[ItemId(3)]);

    assert!(graph.find_path("/Sub/").is_none());
    assert_eq!(graph.summary().sheet_instances, 1);
    assert!(graph.net_by_name("VCC").is_none());
    assert_eq!(graph.query(ItemId(9), &SheetPath::root()).unwrap().net_name, "/BUS1");
}

#[test]
fn test_adding_wire_merges_nets() {
    let mut schematic = Schematic::new(Page::new("top").with_items([
        Item::wire(1, (0, 0), (10, 0)),
        Item::local_label(2, (0, 0), "A"),
        Item::wire(3, (20, 0), (30, 0)),
        Item::local_label(4, (30, 0), "B"),
    ]));
    let before = resolved(&schematic);
    assert_ne!(
        before.query(ItemId(1), &SheetPath::root()).unwrap().net_code,
        before.query(ItemId(3), &SheetPath::root()).unwrap().net_code
    );

    page_mut(&mut schematic, "top").items.push(Item::wire(5, (10, 0), (20, 0)));
    let graph = assert_equivalent(&before, &schematic, &[ItemId(5)]);

    let a = graph.query(ItemId(1), &SheetPath::root()).unwrap();
    let b = graph.query(ItemId(3), &SheetPath::root()).unwrap();
    assert_eq!(a.net_code, b.net_code);
    assert_eq!(a.net_name, "/A");
    assert!(graph
        .advisories()
        .iter()
        .any(|adv| adv.kind == sheetnet::AdvisoryKind::MultipleNames));
}

#[test]
fn test_deleting_only_wire_leaves_no_stale_state() {
    let mut schematic = Schematic::new(Page::new("top").with_items([
        Item::wire(1, (0, 0), (10, 0)),
        Item::pin(2, (0, 0), "R1", "1"),
        Item::pin(3, (10, 0), "R2", "1"),
    ]));
    let before = resolved(&schematic);

    page_mut(&mut schematic, "top").items.retain(|i| i.id != ItemId(1));
    let graph = assert_equivalent(&before, &schematic, &[ItemId(1)]);

    assert!(graph.query(ItemId(1), &SheetPath::root()).is_none());
    assert_ne!(
        graph.query(ItemId(2), &SheetPath::root()).unwrap().net_code,
        graph.query(ItemId(3), &SheetPath::root()).unwrap().net_code
    );
}

#[test]
fn test_unchanged_document_keeps_every_code() {
    let schematic = Schematic::from_json_file(&fixture_path("shared_channels.json")).unwrap();
    let before = resolved(&schematic);
    let graph = assert_equivalent(&before, &schematic, &[ItemId(206)]);
    assert_eq!(graph.nets(), before.nets());
}
