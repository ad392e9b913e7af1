use sheetnet::prelude::*;
use sheetnet::{GraphEvent, GraphState, Item, ItemKind, NameQuality, Page};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn channels() -> Schematic {
    Schematic::from_json_file(&fixture_path("shared_channels.json")).unwrap()
}

#[test]
fn test_readers_see_committed_snapshots_only() {
    let engine = Arc::new(ConnectivityEngine::new(ConnectivityOptions::default()).unwrap());
    let schematic = Arc::new(channels());
    engine.recompute(&schematic).unwrap();
    let expected = engine.snapshot().nets().to_vec();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..50 {
                    let graph = engine.snapshot();
                    assert_eq!(graph.state(), GraphState::Resolved);
                    assert!(graph.net_by_name("GND").is_some());
                }
            })
        })
        .collect();

    for _ in 0..5 {
        engine.notify_edit(&[ItemId(206)]);
        engine.recompute(&schematic).unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(engine.snapshot().nets(), expected.as_slice());
}

#[test]
fn test_superseded_pass_is_discarded() {
    let engine = ConnectivityEngine::new(ConnectivityOptions::sequential()).unwrap();
    let mut schematic = channels();
    engine.recompute(&schematic).unwrap();

    engine.notify_edit(&[ItemId(206)]);
    let mut stale = engine.begin_pass();
    stale.run(&schematic).unwrap();

    for item in &mut schematic.pages[1].items {
        if let ItemKind::LocalLabel { text, .. } = &mut item.kind {
            *text = "SMOOTHED".to_string();
        }
    }
    engine.notify_edit(&[ItemId(206)]);

    assert!(matches!(engine.commit(stale), Err(SheetNetError::Cancelled { .. })));
    assert!(engine.snapshot().net_by_name("/Left/FILTERED").is_some());

    let graph = engine.recompute(&schematic).unwrap();
    assert!(graph.net_by_name("/Left/SMOOTHED").is_some());
    assert!(graph.net_by_name("/Left/FILTERED").is_none());
    assert!(!engine.is_stale());
}

#[tokio::test]
async fn test_background_recompute_reports_events() {
    let engine = Arc::new(ConnectivityEngine::new(ConnectivityOptions::default()).unwrap());
    let mut events = engine.subscribe();
    let schematic = Arc::new(channels());

    let graph = Arc::clone(&engine)
        .recompute_in_background(Arc::clone(&schematic))
        .await
        .unwrap();
    assert!(graph.net_by_name("AUDIO_L").is_some());

    match events.recv().await.unwrap() {
        GraphEvent::Resolved { generation, summary } => {
            assert_eq!(generation, 0);
            assert_eq!(summary.sheet_instances, 3);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

/// Reports an edit to the engine the first time a pass ranks two names
#[derive(Debug, Default)]
struct EditDuringPass {
    engine: OnceLock<Weak<ConnectivityEngine>>,
    fired: AtomicBool,
}

impl NameQuality for EditDuringPass {
    fn is_auto_generated(&self, _name: &str) -> bool {
        if !self.fired.swap(true, Ordering::SeqCst) {
            if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
                engine.notify_edit(&[ItemId(2)]);
            }
        }
        false
    }
}

#[tokio::test]
async fn test_superseded_recompute_reruns() {
    let quality = Arc::new(EditDuringPass::default());
    let graph = ConnectivityGraph::new(ConnectivityOptions::sequential())
        .unwrap()
        .with_name_quality(quality.clone());
    let engine = Arc::new(ConnectivityEngine::with_graph(graph));
    quality.engine.set(Arc::downgrade(&engine)).unwrap();
    let mut events = engine.subscribe();

    let schematic = Schematic::new(Page::new("top").with_items([
        Item::wire(1, (0, 0), (10, 0)),
        Item::local_label(2, (0, 0), "LEFT"),
        Item::local_label(3, (10, 0), "RIGHT"),
    ]));
    let graph = engine.recompute(&schematic).unwrap();

    assert!(quality.fired.load(Ordering::SeqCst));
    assert_eq!(engine.generation(), 1);
    assert!(!engine.is_stale());
    assert!(Arc::ptr_eq(&graph, &engine.snapshot()));
    assert_eq!(graph.nets()[0].name, "/LEFT");

    assert!(matches!(events.recv().await.unwrap(), GraphEvent::Stale { generation: 1 }));
    assert!(matches!(
        events.recv().await.unwrap(),
        GraphEvent::Discarded { generation: 0, latest: 1 }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        GraphEvent::Resolved { generation: 1, .. }
    ));
}
