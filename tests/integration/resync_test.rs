//! Resynchronization through the engine: debounce, backoff and give-up

use std::time::Duration;

use pretty_assertions::assert_eq;
use xfcollab::client::{EngineError, TransportError};
use xfcollab::shared::diagram::{Cell, UpdateVector};
use xfcollab::shared::message::{OutboundMessage, ResyncMethod};
use xfcollab::shared::SyncConfig;

use crate::assert_err;
use crate::common::*;

#[tokio::test(start_paused = true)]
async fn test_correction_burst_runs_one_resync() {
    let h = Harness::new();
    h.server.set_snapshot(12, vec![Cell::new("n1", "process"), Cell::new("n2", "edge")]);

    h.engine.handle_message(state_correction(10)).await;
    h.engine.handle_message(state_correction(11)).await;
    h.engine.handle_message(state_correction(12)).await;

    assert!(!h.engine.sync_state().is_synced);
    assert_eq!(h.engine.store().conflict_count(), 3);

    settle(Duration::from_millis(1500)).await;
    assert_eq!(h.server.fetch_count(), 1);
    assert_eq!(h.surface.replacement_count(), 1);
    assert_eq!(h.surface.cell_ids(), vec!["n1".to_string(), "n2".to_string()]);

    let state = h.engine.sync_state();
    assert!(state.is_synced);
    assert!(!state.is_resyncing);
    assert_eq!(h.engine.store().local_update_vector(), UpdateVector(12));
    assert_eq!(h.engine.store().conflict_count(), 0);

    // Caught up: the same vector again is not a conflict
    h.engine.handle_message(state_correction(12)).await;
    assert!(!h.engine.resync().is_pending());
    settle(Duration::from_secs(3)).await;
    assert_eq!(h.server.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resync_replaces_cells_without_broadcasting() {
    let h = Harness::new();
    h.server.set_snapshot(3, Vec::new());

    h.engine.handle_message(state_correction(3)).await;
    settle(Duration::from_millis(1500)).await;

    assert_eq!(h.surface.replacement_count(), 1);
    assert!(h.surface.cell_ids().is_empty());
    assert_eq!(h.realtime.sent_count(), 0);
    assert!(h.engine.operation_state().should_broadcast());
}

#[tokio::test(start_paused = true)]
async fn test_resync_retries_with_backoff() {
    let h = Harness::new();
    h.server.set_snapshot(5, Vec::new());
    h.server.fail_fetches([
        TransportError::Network("connection reset".to_string()),
        TransportError::Timeout,
    ]);

    h.engine.handle_message(state_correction(5)).await;

    // Fetches at 1s, 2s and 4s
    settle(Duration::from_millis(3500)).await;
    assert_eq!(h.server.fetch_count(), 2);
    assert!(h.engine.resync().is_in_flight());
    assert!(h.engine.sync_state().is_resyncing);
    assert!(!h.engine.can_edit());

    settle(Duration::from_millis(600)).await;
    assert_eq!(h.server.fetch_count(), 3);
    assert!(h.engine.sync_state().is_synced);
    assert!(h.engine.can_edit());

    let metrics = h.engine.metrics();
    assert_eq!(metrics.resync_attempts, 1);
    assert_eq!(metrics.successful_resyncs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_resync_gives_up_after_retries() {
    let h = Harness::new();
    let (results, _sub) = collect(h.engine.resync().results());
    h.server.fail_fetches((0..4).map(|_| TransportError::Closed));

    h.engine.handle_message(state_correction(5)).await;
    settle(Duration::from_secs(10)).await;

    assert_eq!(h.server.fetch_count(), 4);
    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].attempts, 4);

    let state = h.engine.sync_state();
    assert!(!state.is_synced);
    assert!(!state.is_resyncing);
    assert!(h.engine.can_edit());
    assert!(!h.engine.rejections().is_tripped());
    assert_eq!(h.engine.metrics().failed_resyncs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_is_not_retried() {
    let h = Harness::new();
    h.server.fail_fetches([TransportError::Unauthorized]);

    h.engine.handle_message(state_correction(2)).await;
    settle(Duration::from_secs(10)).await;

    assert_eq!(h.server.fetch_count(), 1);
    assert!(!h.engine.sync_state().is_resyncing);
}

#[tokio::test(start_paused = true)]
async fn test_failed_apply_requests_resync() {
    let h = Harness::new();
    h.surface.fail_apply(true);

    h.engine.handle_message(remote_operation("r-1", "u2", "c1")).await;
    assert!(h.surface.applied_ids().is_empty());
    assert_eq!(h.engine.sync_state().pending_operations, 0);
    assert!(h.engine.resync().is_pending());

    settle(Duration::from_millis(1500)).await;
    assert_eq!(h.server.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rollback_during_resync_keeps_edits_blocked() {
    let h = Harness::new();
    h.server.set_snapshot(5, Vec::new());
    h.server.fail_fetches([TransportError::Timeout]);

    h.engine.handle_message(state_correction(5)).await;
    settle(Duration::from_millis(1100)).await;
    assert_eq!(h.server.fetch_count(), 1);
    assert!(h.engine.sync_state().is_resyncing);
    assert!(!h.engine.can_edit());

    h.engine.handle_message(rejection("op-1", "conflict_detected")).await;
    assert_eq!(h.engine.metrics().rollbacks, 1);
    assert!(h.engine.sync_state().is_resyncing);
    assert!(!h.engine.can_edit());
    assert_err!(
        h.engine.submit_local_operation(local_patch("local-a")).await,
        EngineError::EditsBlocked
    );

    settle(Duration::from_millis(1000)).await;
    assert_eq!(h.server.fetch_count(), 2);
    assert!(h.engine.sync_state().is_synced);
    assert!(h.engine.can_edit());
}

#[tokio::test(start_paused = true)]
async fn test_websocket_resync_completes_on_matching_diagram_state() {
    let config = SyncConfig::builder()
        .resync_method(ResyncMethod::Websocket)
        .build()
        .unwrap();
    let h = Harness::with_config(config);

    h.engine.handle_message(state_correction(9)).await;
    settle(Duration::from_millis(1100)).await;

    assert_eq!(h.server.fetch_count(), 0);
    assert_eq!(
        *h.realtime.sent.lock().unwrap(),
        vec![OutboundMessage::resync_request(ResyncMethod::Websocket)]
    );
    assert!(h.engine.sync_state().is_resyncing);

    h.engine.handle_message(diagram_state(8, &["stale"])).await;
    settle(Duration::from_millis(10)).await;
    assert!(h.engine.sync_state().is_resyncing);
    assert_eq!(h.surface.replacement_count(), 0);

    h.engine.handle_message(diagram_state(9, &["n1"])).await;
    settle(Duration::from_millis(10)).await;

    assert!(h.engine.sync_state().is_synced);
    assert_eq!(h.surface.cell_ids(), vec!["n1".to_string()]);
    assert_eq!(h.engine.store().local_update_vector(), UpdateVector(9));
    assert!(h.engine.can_edit());
    assert!(!h.engine.resync().is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_websocket_resync_resends_after_timeout() {
    let config = SyncConfig::builder()
        .resync_method(ResyncMethod::Websocket)
        .resync_response_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let h = Harness::with_config(config);

    h.engine.handle_message(state_correction(4)).await;
    // Request at 1s, times out at 3s, retried after 1s of backoff
    settle(Duration::from_millis(4100)).await;
    assert_eq!(h.realtime.sent_count(), 2);

    h.engine.handle_message(diagram_state(4, &[])).await;
    settle(Duration::from_millis(10)).await;
    assert!(h.engine.sync_state().is_synced);
    assert_eq!(h.engine.metrics().successful_resyncs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_stops_running_resync() {
    let h = Harness::new();
    h.server.fail_fetches([TransportError::Timeout]);

    h.engine.handle_message(state_correction(5)).await;
    settle(Duration::from_millis(1100)).await;
    assert!(h.engine.resync().is_in_flight());

    h.engine.dispose();
    settle(Duration::from_secs(10)).await;

    assert_eq!(h.server.fetch_count(), 1);
    assert_eq!(h.surface.replacement_count(), 0);
    assert!(!h.engine.resync().is_in_flight());
}
