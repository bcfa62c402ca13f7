//! Sync session behaviour under virtual time.
//!
//! Every test runs with a paused tokio clock, so debounce windows and save
//! latencies are exact and the tests take no wall-clock time.

mod common;

use common::*;

use assert_matches::assert_matches;
use graphsync_core::change::{ChangeEvent, Connection};
use graphsync_core::graph::{GraphSnapshot, Node, Position};
use graphsync_core::save_state::SaveState;
use graphsync_core::types::Config;
use graphsync_engine::{SessionError, SyncConfig, SyncSession};
use graphsync_events::SyncEventKind;
use serde_json::json;
use tokio::time::{sleep, Instant};

fn drag(id: &str, dragging: bool, x: f64, y: f64) -> ChangeEvent {
    ChangeEvent::PositionDrag {
        id: id.into(),
        dragging,
        position: Some(Position::new(x, y)),
    }
}

fn select(id: &str, selected: bool) -> ChangeEvent {
    ChangeEvent::Select {
        id: id.into(),
        selected,
    }
}

// ---------------------------------------------------------------------------
// Debounce
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn edits_in_one_window_coalesce_into_one_save() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    let t0 = Instant::now();
    handle.update_node_data("a", patch("name", json!("first"))).unwrap();
    sleep(ms(50)).await;
    handle.update_node_data("a", patch("name", json!("second"))).unwrap();
    sleep(ms(500)).await;

    let saves = gateway.saves();
    assert_eq!(saves.len(), 1);
    let elapsed = saves[0].at - t0;
    assert!(elapsed >= ms(150) && elapsed <= ms(151), "saved after {elapsed:?}");

    let node = saves[0].payload.nodes.iter().find(|n| n.id == "a").unwrap();
    assert_eq!(node.config["name"], "second");
}

#[tokio::test(start_paused = true)]
async fn select_only_batches_never_save() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    for _ in 0..10 {
        handle.on_nodes_change(vec![select("a", true), select("b", true)]).unwrap();
        sleep(ms(30)).await;
        handle.on_nodes_change(vec![select("a", false)]).unwrap();
    }
    sleep(ms(1_000)).await;

    assert_eq!(gateway.save_count(), 0);
    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.save_state, SaveState::Idle);
    assert_eq!(view.selected, vec!["b".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn drag_back_to_origin_never_saves() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    handle.on_nodes_change(vec![drag("a", true, 15.0, 25.0)]).unwrap();
    sleep(ms(16)).await;
    handle.on_nodes_change(vec![drag("a", true, 80.0, 90.0)]).unwrap();
    sleep(ms(200)).await;
    handle.on_nodes_change(vec![drag("a", true, 11.0, 20.0)]).unwrap();
    handle.on_nodes_change(vec![drag("a", false, 10.0, 20.0)]).unwrap();
    sleep(ms(1_000)).await;

    assert_eq!(gateway.save_count(), 0);
    assert_eq!(handle.snapshot().await.unwrap().save_state, SaveState::Idle);
}

#[tokio::test(start_paused = true)]
async fn drag_with_delta_saves_exactly_once() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    for step in 1..=30 {
        handle
            .on_nodes_change(vec![drag("a", true, 10.0 + step as f64, 20.0)])
            .unwrap();
        sleep(ms(16)).await;
    }
    handle.on_nodes_change(vec![drag("a", false, 40.0, 20.0)]).unwrap();
    sleep(ms(1_000)).await;

    let saves = gateway.saves();
    assert_eq!(saves.len(), 1);
    let node = saves[0].payload.nodes.iter().find(|n| n.id == "a").unwrap();
    assert_eq!(node.position, Position::new(40.0, 20.0));
}

#[tokio::test(start_paused = true)]
async fn connect_and_disconnect_are_saved() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    handle.on_connect(Connection::new("a", "b")).unwrap();
    sleep(ms(200)).await;
    assert_eq!(gateway.current().await.edges.len(), 1);

    handle
        .on_edges_change(vec![ChangeEvent::Disconnect { id: "e-a-b".into() }])
        .unwrap();
    sleep(ms(200)).await;

    let stored = gateway.current().await;
    assert!(stored.edges.is_empty());
    assert_eq!(stored.version, 3);
    assert_eq!(gateway.save_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn save_during_open_drag_keeps_node_at_origin() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    handle.update_node_data("b", patch("name", json!("build"))).unwrap();
    sleep(ms(10)).await;
    handle.on_nodes_change(vec![drag("a", true, 500.0, 500.0)]).unwrap();
    // Debounce for the edit on `b` fires while `a` is still being dragged.
    sleep(ms(300)).await;

    let saves = gateway.saves();
    assert_eq!(saves.len(), 1);
    let dragged = saves[0].payload.nodes.iter().find(|n| n.id == "a").unwrap();
    assert_eq!(dragged.position, Position::new(10.0, 20.0));

    handle.on_nodes_change(vec![drag("a", false, 10.0, 20.0)]).unwrap();
    sleep(ms(1_000)).await;

    assert_eq!(gateway.save_count(), 1);
    let stored = gateway.current().await;
    assert_eq!(stored.nodes[0].position, Position::new(10.0, 20.0));
    assert_eq!(stored.nodes[1].config["name"], "build");

    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.node("a").unwrap().position, Position::new(10.0, 20.0));
    assert_eq!(view.save_state, SaveState::Saved);
}

#[tokio::test(start_paused = true)]
async fn drag_ending_elsewhere_after_mid_drag_save_is_persisted() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    handle.update_node_data("b", patch("name", json!("build"))).unwrap();
    sleep(ms(10)).await;
    handle.on_nodes_change(vec![drag("a", true, 500.0, 500.0)]).unwrap();
    sleep(ms(300)).await;
    handle.on_nodes_change(vec![drag("a", false, 600.0, 600.0)]).unwrap();
    sleep(ms(1_000)).await;

    assert_eq!(gateway.save_count(), 2);
    let stored = gateway.current().await;
    assert_eq!(stored.version, 3);
    assert_eq!(stored.nodes[0].position, Position::new(600.0, 600.0));
}

// ---------------------------------------------------------------------------
// Save outcomes
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn successful_save_adopts_server_version() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    handle.update_node_data("a", patch("name", json!("build"))).unwrap();
    sleep(ms(200)).await;

    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.save_state, SaveState::Saved);
    assert_eq!(view.version, 2);
    assert_eq!(gateway.saves()[0].payload.version, 1);
    assert_eq!(gateway.current().await.version, 2);
}

#[tokio::test(start_paused = true)]
async fn stale_save_surfaces_conflict_and_keeps_local_edits() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    let server_version = gateway
        .commit_external(|graph| {
            graph.nodes[0].config.insert("name".into(), json!("theirs"));
        })
        .await;
    assert_eq!(server_version, 2);

    handle.update_node_data("a", patch("name", json!("mine"))).unwrap();
    sleep(ms(200)).await;

    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.save_state, SaveState::Conflict);
    assert_eq!(view.version, 1);
    assert_eq!(view.node("a").unwrap().config["name"], "mine");
    let conflict = view.conflict.expect("conflict should be recorded");
    assert_eq!(conflict.current_server_snapshot.version, 2);
    assert_eq!(gateway.saves()[0].payload.version, 1);

    handle.refresh_from_conflict().unwrap();
    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.save_state, SaveState::Idle);
    assert_eq!(view.version, 2);
    assert_eq!(view.node("a").unwrap().config["name"], "theirs");
    assert!(view.conflict.is_none());

    sleep(ms(1_000)).await;
    assert_eq!(gateway.save_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn edit_after_conflict_conflicts_again() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;
    gateway.commit_external(|_| {}).await;

    handle.update_node_data("a", patch("name", json!("one"))).unwrap();
    sleep(ms(200)).await;
    handle.update_node_data("a", patch("name", json!("two"))).unwrap();
    assert_eq!(handle.snapshot().await.unwrap().save_state, SaveState::Dirty);
    sleep(ms(200)).await;

    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.save_state, SaveState::Conflict);
    assert_eq!(gateway.save_count(), 2);
    assert_eq!(gateway.current().await.version, 2);
}

#[tokio::test(start_paused = true)]
async fn transport_error_keeps_edits_until_retry() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;
    gateway.fail_next_saves(1);

    handle.update_node_data("a", patch("name", json!("build"))).unwrap();
    sleep(ms(200)).await;

    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.save_state, SaveState::Error);
    assert!(view.last_error.as_deref().unwrap().contains("503"));
    assert_eq!(view.node("a").unwrap().config["name"], "build");
    assert_eq!(view.version, 1);

    handle.retry().unwrap();
    sleep(ms(200)).await;

    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.save_state, SaveState::Saved);
    assert_eq!(view.version, 2);
    assert!(view.last_error.is_none());
    assert_eq!(gateway.save_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn next_edit_after_error_also_retries() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;
    gateway.fail_next_saves(1);

    handle.update_node_data("a", patch("name", json!("one"))).unwrap();
    sleep(ms(200)).await;
    handle.update_node_data("a", patch("name", json!("two"))).unwrap();
    sleep(ms(200)).await;

    let stored = gateway.current().await;
    assert_eq!(stored.version, 2);
    assert_eq!(stored.nodes[0].config["name"], "two");
}

// ---------------------------------------------------------------------------
// In-flight deferral
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn flush_due_during_flight_runs_when_it_settles() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    gateway.set_save_latency(ms(300));
    let handle = start(&gateway, ms(100)).await;

    let t0 = Instant::now();
    handle.update_node_data("a", patch("name", json!("first"))).unwrap();
    sleep(ms(150)).await;
    handle.update_node_data("a", patch("name", json!("second"))).unwrap();
    assert_eq!(handle.snapshot().await.unwrap().save_state, SaveState::Saving);
    sleep(ms(1_000)).await;

    let saves = gateway.saves();
    assert_eq!(saves.len(), 2);
    let second_at = saves[1].at - t0;
    assert!(second_at >= ms(400) && second_at <= ms(401), "second save after {second_at:?}");
    assert_eq!(saves[1].payload.version, 2);
    assert_eq!(saves[1].payload.nodes[0].config["name"], "second");

    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.save_state, SaveState::Saved);
    assert_eq!(view.version, 3);
}

#[tokio::test(start_paused = true)]
async fn deferred_flush_is_skipped_when_nothing_changed() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    gateway.set_save_latency(ms(300));
    let handle = start(&gateway, ms(100)).await;

    handle.update_node_data("a", patch("name", json!("first"))).unwrap();
    sleep(ms(150)).await;
    // Structural verdict, but the event cannot apply.
    handle
        .on_nodes_change(vec![ChangeEvent::Remove { id: "ghost".into() }])
        .unwrap();
    sleep(ms(1_000)).await;

    assert_eq!(gateway.save_count(), 1);
    assert_eq!(handle.snapshot().await.unwrap().save_state, SaveState::Saved);
}

#[tokio::test(start_paused = true)]
async fn cosmetic_edits_during_flight_settle_as_saved() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    gateway.set_save_latency(ms(300));
    let handle = start(&gateway, ms(100)).await;

    handle.update_node_data("a", patch("name", json!("build"))).unwrap();
    sleep(ms(150)).await;
    handle.on_nodes_change(vec![drag("a", true, 50.0, 50.0)]).unwrap();
    handle.on_nodes_change(vec![drag("a", false, 10.0, 20.0)]).unwrap();
    handle.on_nodes_change(vec![select("b", true)]).unwrap();
    sleep(ms(5_000)).await;

    assert_eq!(gateway.save_count(), 1);
    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.save_state, SaveState::Saved);
    assert_eq!(view.version, 2);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dispose_waits_for_in_flight_save() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    gateway.set_save_latency(ms(300));
    let handle = start(&gateway, ms(100)).await;

    handle.update_node_data("a", patch("name", json!("build"))).unwrap();
    sleep(ms(150)).await;

    let view = handle.dispose().await.unwrap();
    assert_eq!(view.save_state, SaveState::Saved);
    assert_eq!(view.version, 2);
    assert_eq!(gateway.current().await.version, 2);
}

#[tokio::test(start_paused = true)]
async fn dispose_cancels_pending_save() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;
    let observer = handle.clone();

    handle.update_node_data("a", patch("name", json!("build"))).unwrap();
    let view = handle.dispose().await.unwrap();
    assert_eq!(view.save_state, SaveState::Dirty);

    sleep(ms(1_000)).await;
    assert_eq!(gateway.save_count(), 0);
    assert_matches!(observer.snapshot().await, Err(SessionError::Closed));
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_stops_the_session() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    handle.update_node_data("a", patch("name", json!("build"))).unwrap();
    drop(handle);
    sleep(ms(1_000)).await;

    assert_eq!(gateway.save_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn commands_sent_before_load_are_applied_after_it() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let config = SyncConfig::default().with_debounce(ms(100));
    let handle = SyncSession::start(gateway.clone(), config);

    handle.update_node_data("a", patch("name", json!("early"))).unwrap();
    let view = handle.snapshot().await.unwrap();
    assert!(!view.loading);
    assert_eq!(view.version, 1);
    assert_eq!(view.node("a").unwrap().config["name"], "early");

    sleep(ms(200)).await;
    let saves = gateway.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].payload.version, 1);
    assert_eq!(saves[0].payload.nodes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_graph_starts_empty_and_first_save_creates_it() {
    let gateway = ScriptedGateway::new();
    let handle = start(&gateway, ms(100)).await;

    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.version, 0);
    assert!(view.nodes.is_empty());

    let first = handle.add_node("shell").unwrap();
    let second = handle.add_node("shell").unwrap();
    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.node(&first).unwrap().position, Position::new(0.0, 0.0));
    assert_eq!(view.node(&second).unwrap().position, Position::new(250.0, 0.0));

    sleep(ms(200)).await;
    assert_eq!(gateway.saves()[0].payload.version, 0);
    let stored = gateway.current().await;
    assert_eq!(stored.version, 1);
    assert_eq!(stored.nodes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn dispose_during_initial_load_waits_for_it() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    gateway.set_load_latency(ms(300));
    let config = SyncConfig::default().with_debounce(ms(100));
    let handle = SyncSession::start(gateway.clone(), config);

    let t0 = Instant::now();
    let view = handle.dispose().await.unwrap();

    assert!(Instant::now() - t0 >= ms(300));
    assert!(!view.loading);
    assert_eq!(view.version, 1);
    assert_eq!(view.nodes.len(), 2);
    assert_eq!(gateway.load_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn dispose_during_refresh_applies_the_loaded_copy() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;
    gateway
        .commit_external(|graph| graph.nodes.push(Node::new("c", "shell", Position::default())))
        .await;
    gateway.set_load_latency(ms(300));

    handle.refresh().unwrap();
    sleep(ms(10)).await;
    let view = handle.dispose().await.unwrap();

    assert_eq!(view.version, 2);
    assert_eq!(view.nodes.len(), 3);
    assert_eq!(gateway.save_count(), 0);
}

// ---------------------------------------------------------------------------
// Hydration
// ---------------------------------------------------------------------------

fn env_graph(packages: serde_json::Value) -> GraphSnapshot {
    let mut config = Config::new();
    config.insert("packages".into(), packages);
    config.insert("label".into(), json!("dev"));

    let mut snapshot = GraphSnapshot::empty(GRAPH);
    snapshot.version = 1;
    snapshot.nodes = vec![Node::new("env", "nix-shell", Position::default()).with_config(config)];
    snapshot
}

fn pkg(name: &str, version: &str) -> serde_json::Value {
    json!({ "name": name, "version": version })
}

#[tokio::test(start_paused = true)]
async fn refresh_keeps_local_package_superset() {
    let gateway = ScriptedGateway::seeded(env_graph(json!([pkg("htop", "1.2.3")]))).await;
    let handle = start(&gateway, ms(100)).await;

    let local = json!([pkg("htop", "1.2.3"), pkg("git", "1.0.0")]);
    handle.update_node_data("env", patch("packages", local.clone())).unwrap();
    gateway
        .commit_external(|graph| {
            graph.nodes[0].config.insert("label".into(), json!("server"));
        })
        .await;

    handle.refresh().unwrap();
    sleep(ms(10)).await;

    let view = handle.snapshot().await.unwrap();
    let env = view.node("env").unwrap();
    assert_eq!(view.version, 2);
    assert_eq!(env.config["packages"], local);
    assert_eq!(env.config["label"], "server");
    assert_eq!(view.save_state, SaveState::Dirty);

    sleep(ms(200)).await;
    let stored = gateway.current().await;
    assert_eq!(stored.version, 3);
    assert_eq!(stored.nodes[0].config["packages"], local);
    assert_eq!(stored.nodes[0].config["label"], "server");
}

#[tokio::test(start_paused = true)]
async fn stale_snapshot_is_discarded() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    gateway.serve_next_load(GraphSnapshot::empty(GRAPH));
    handle.refresh().unwrap();
    sleep(ms(10)).await;

    let view = handle.snapshot().await.unwrap();
    assert_eq!(gateway.load_count(), 2);
    assert_eq!(view.version, 1);
    assert_eq!(view.nodes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn same_version_refresh_does_not_clobber_pending_edits() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    handle.on_nodes_change(vec![drag("a", true, 50.0, 50.0)]).unwrap();
    handle.on_nodes_change(vec![drag("a", false, 50.0, 50.0)]).unwrap();
    handle.refresh().unwrap();
    sleep(ms(10)).await;

    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.node("a").unwrap().position, Position::new(50.0, 50.0));
    assert_eq!(view.save_state, SaveState::Dirty);
}

#[tokio::test(start_paused = true)]
async fn clean_refresh_hydrates_newer_server_copy() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    gateway
        .commit_external(|graph| graph.nodes.push(Node::new("c", "shell", Position::default())))
        .await;
    handle.refresh().unwrap();
    sleep(ms(10)).await;

    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.version, 2);
    assert_eq!(view.nodes.len(), 3);
    assert_eq!(view.save_state, SaveState::Idle);

    sleep(ms(1_000)).await;
    assert_eq!(gateway.save_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn clean_session_accepts_same_version_refresh() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;

    let mut rewritten = two_nodes();
    rewritten.nodes[0].config.insert("name".into(), json!("server"));
    gateway.serve_next_load(rewritten);
    handle.refresh().unwrap();
    sleep(ms(10)).await;

    let view = handle.snapshot().await.unwrap();
    assert_eq!(view.version, 1);
    assert_eq!(view.node("a").unwrap().config["name"], "server");
    assert_eq!(view.save_state, SaveState::Idle);

    sleep(ms(1_000)).await;
    assert_eq!(gateway.save_count(), 0);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn save_lifecycle_is_published() {
    let gateway = ScriptedGateway::seeded(two_nodes()).await;
    let handle = start(&gateway, ms(100)).await;
    let mut events = handle.subscribe();

    handle.update_node_data("a", patch("name", json!("build"))).unwrap();
    sleep(ms(200)).await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.graph, GRAPH);
        kinds.push(event.kind);
    }

    assert_eq!(
        kinds,
        vec![
            SyncEventKind::SaveStateChanged {
                from: SaveState::Idle,
                to: SaveState::Dirty
            },
            SyncEventKind::SaveStateChanged {
                from: SaveState::Dirty,
                to: SaveState::Saving
            },
            SyncEventKind::Saved { version: 2 },
            SyncEventKind::SaveStateChanged {
                from: SaveState::Saving,
                to: SaveState::Saved
            },
        ]
    );
}
