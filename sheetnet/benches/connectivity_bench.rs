use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sheetnet::prelude::*;
use sheetnet::{Item, Page, PowerScope};
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Grid of resistor ladders: `rows` labelled nets, each tied to GND through
/// a wire run, drawn on one page placed `sheets` times.
fn generated(rows: i64, sheets: usize) -> Schematic {
    let mut items = Vec::new();
    let mut id = 1;
    let mut next = || {
        id += 1;
        id
    };
    for row in 0..rows {
        let y = row * 100;
        items.push(Item::wire(next(), (0, y), (50, y)));
        items.push(Item::local_label(next(), (0, y), &format!("SIG{}", row)));
        items.push(Item::pin(next(), (50, y), &format!("R{}", row), "1"));
        items.push(Item::pin(next(), (60, y), &format!("R{}", row), "2"));
        items.push(Item::wire(next(), (60, y), (90, y)));
        items.push(Item::power_pin(next(), (90, y), &format!("#PWR{}", row), "GND", PowerScope::Global));
    }

    let mut top = Page::new("top");
    for i in 0..sheets {
        top = top.with_sheet(&format!("s{}", i), &format!("Block{}", i), "block");
    }
    Schematic::new(top).with_page(Page::new("block").with_items(items))
}

fn bench_full_recompute_fixture(c: &mut Criterion) {
    let schematic = Schematic::from_json_file(&fixture_path("bus_hierarchy.json")).unwrap();

    c.bench_function("full_recompute_fixture", |b| {
        b.iter(|| {
            let mut graph = ConnectivityGraph::new(ConnectivityOptions::sequential()).unwrap();
            graph.full_recompute(black_box(&schematic)).unwrap();
            graph
        });
    });
}

fn bench_full_recompute_generated(c: &mut Criterion) {
    let schematic = generated(200, 8);

    c.bench_function("full_recompute_generated", |b| {
        b.iter(|| {
            let mut graph = ConnectivityGraph::new(ConnectivityOptions::default()).unwrap();
            graph.full_recompute(black_box(&schematic)).unwrap();
            graph
        });
    });
}

fn bench_incremental_recompute(c: &mut Criterion) {
    let schematic = generated(200, 8);
    let mut base = ConnectivityGraph::new(ConnectivityOptions::default()).unwrap();
    base.full_recompute(&schematic).unwrap();

    c.bench_function("incremental_recompute_one_label", |b| {
        b.iter(|| {
            let mut graph = base.clone();
            graph
                .incremental_recompute(black_box(&[ItemId(3)]), black_box(&schematic))
                .unwrap();
            graph
        });
    });
}

criterion_group!(
    benches,
    bench_full_recompute_fixture,
    bench_full_recompute_generated,
    bench_incremental_recompute
);
criterion_main!(benches);
