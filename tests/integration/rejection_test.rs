//! Rejection, rollback and circuit breaker behaviour through the engine

use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use xfcollab::client::recovery::{Severity, UserNotice};
use xfcollab::client::{HistoryError, UndoOutcome};

use crate::common::assertions::dedup_runs;
use crate::common::*;

#[tokio::test(start_paused = true)]
async fn test_rollback_releases_block_without_resync() {
    let h = Harness::new();
    h.history.set_undo_result(Ok(UndoOutcome {
        success: true,
        undo_count: 2,
    }));
    let (snapshots, _sub) = collect(h.engine.store().transitions());

    h.engine.handle_message(rejection("op-1", "conflict_detected")).await;

    let blocked: Vec<bool> = snapshots
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.operations_blocked)
        .collect();
    assert_eq!(dedup_runs(&blocked), vec![true, false]);
    assert_eq!(*h.history.undo_calls.lock().unwrap(), vec!["op-1".to_string()]);
    assert_eq!(h.engine.metrics().rollbacks, 1);
    assert!(h.engine.can_edit());

    settle(Duration::from_secs(5)).await;
    assert_eq!(h.server.fetch_count(), 0);
    assert_eq!(h.history.clear_count(), 0);
    assert!(!h.engine.resync().is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_missing_history_forces_single_resync() {
    let h = Harness::new();
    h.history.forget("op-2");

    h.engine.handle_message(rejection("op-2", "validation_failed")).await;

    assert!(!h.engine.store().are_operations_blocked());
    assert!(h.engine.resync().is_pending());
    assert_eq!(h.history.undo_count(), 0);
    assert_eq!(h.history.clear_count(), 1);
    assert_eq!(h.engine.metrics().forced_resyncs, 1);

    settle(Duration::from_millis(1500)).await;
    assert_eq!(h.server.fetch_count(), 1);
    assert_eq!(h.surface.cell_ids(), vec!["server-cell".to_string()]);
    assert!(h.engine.sync_state().is_synced);
    assert!(h.engine.can_edit());

    settle(Duration::from_secs(5)).await;
    assert_eq!(h.server.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_undo_forces_resync() {
    let h = Harness::new();
    h.history
        .set_undo_result(Err(HistoryError::UndoFailed("history diverged".to_string())));

    h.engine.handle_message(rejection("op-3", "conflict_detected")).await;

    assert_eq!(h.engine.metrics().failed_rollbacks, 1);
    assert_eq!(h.history.clear_count(), 1);
    assert!(!h.engine.rejections().is_rolling_back());

    settle(Duration::from_millis(1500)).await;
    assert_eq!(h.server.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_undo_reporting_failure_forces_resync() {
    let h = Harness::new();
    h.history.set_undo_result(Ok(UndoOutcome {
        success: false,
        undo_count: 0,
    }));

    h.engine.handle_message(rejection("op-4", "conflict_detected")).await;

    settle(Duration::from_millis(1500)).await;
    assert_eq!(h.engine.metrics().failed_rollbacks, 1);
    assert_eq!(h.server.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_rejection_does_not_double_undo() {
    let h = Harness::new();

    h.engine.handle_message(rejection("op-1", "conflict_detected")).await;
    h.engine.handle_message(rejection("op-1", "conflict_detected")).await;

    assert_eq!(h.history.undo_count(), 1);
    assert_eq!(h.engine.metrics().rejections_handled, 1);
    assert_eq!(h.engine.rejections().recent_rejections(), 1);
    assert!(h.engine.can_edit());
}

#[tokio::test(start_paused = true)]
async fn test_sixth_rejection_trips_breaker_once() {
    let h = Harness::new();
    let (notices, _sub) = collect(h.engine.rejections().notices());

    for i in 1..=5 {
        h.engine.handle_message(rejection(&format!("op-{}", i), "conflict_detected")).await;
    }
    assert!(!h.engine.rejections().is_tripped());
    assert_eq!(h.server.end_count(), 0);

    h.engine.handle_message(rejection("op-6", "conflict_detected")).await;
    assert!(h.engine.rejections().is_tripped());
    assert_eq!(h.server.end_count(), 1);
    assert!(!h.engine.can_edit());
    assert_eq!(h.history.undo_count(), 5);

    h.engine.handle_message(rejection("op-7", "conflict_detected")).await;
    assert_eq!(h.server.end_count(), 1);
    assert_eq!(h.engine.metrics().breaker_trips, 1);

    let ended = notices
        .lock()
        .unwrap()
        .iter()
        .filter(|n| matches!(n, UserNotice::CollaborationEnded { .. }))
        .count();
    assert_eq!(ended, 1);

    h.engine.handle_message(remote_operation("r-1", "u2", "c1")).await;
    assert!(h.surface.applied_ids().is_empty());
    assert_eq!(h.engine.sync_state().pending_operations, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejections_age_out_of_window() {
    let h = Harness::new();

    for i in 1..=5 {
        h.engine.handle_message(rejection(&format!("early-{}", i), "conflict_detected")).await;
    }
    settle(Duration::from_secs(61)).await;
    h.engine.handle_message(rejection("late-1", "conflict_detected")).await;

    assert!(!h.engine.rejections().is_tripped());
    assert_eq!(h.engine.rejections().recent_rejections(), 1);
    assert_eq!(h.server.end_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fourth_forced_resync_trips_breaker() {
    let h = Harness::new();
    for i in 1..=4 {
        h.history.forget(&format!("op-{}", i));
    }

    for i in 1..=3 {
        h.engine.handle_message(rejection(&format!("op-{}", i), "validation_failed")).await;
    }
    assert!(!h.engine.rejections().is_tripped());
    assert_eq!(h.engine.rejections().recent_resyncs(), 3);

    h.engine.handle_message(rejection("op-4", "validation_failed")).await;
    assert!(h.engine.rejections().is_tripped());
    assert_eq!(h.server.end_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_end_collaboration_is_not_retried() {
    let h = Harness::new();
    h.server.fail_end_collaboration(xfcollab::client::TransportError::Closed);

    for i in 1..=6 {
        h.engine.handle_message(rejection(&format!("op-{}", i), "conflict_detected")).await;
    }
    settle(Duration::from_secs(10)).await;

    assert!(h.engine.rejections().is_tripped());
    assert_eq!(h.server.end_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_burst_produces_one_batched_notice() {
    let h = Harness::new();
    let (notices, _sub) = collect(h.engine.rejections().notices());

    h.engine.handle_message(rejection("op-1", "permission_denied")).await;
    settle(Duration::from_millis(500)).await;
    h.engine.handle_message(rejection("op-2", "conflict_detected")).await;
    settle(Duration::from_millis(500)).await;
    h.engine
        .handle_message(rejection_requiring_resync("op-3", "validation_failed"))
        .await;

    settle(Duration::from_millis(1900)).await;
    assert!(notices.lock().unwrap().is_empty());

    settle(Duration::from_millis(200)).await;
    let notices = notices.lock().unwrap();
    assert_eq!(notices.len(), 1);
    let notice = assert_matches!(&notices[0], UserNotice::Rejections(notice) => notice);
    assert_eq!(notice.count, 3);
    assert_eq!(notice.severity, Severity::Error);
    assert_eq!(notice.title, "Permission Denied");
    assert!(notice.offer_resync);
    assert_eq!(
        notice.operation_ids,
        vec!["op-1".to_string(), "op-2".to_string(), "op-3".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_inbound_operations_buffered_during_rollback_are_discarded() {
    let h = Harness::new();
    h.history.set_undo_delay(Duration::from_millis(500));
    let (sender, receiver) = mpsc::channel(16);
    assert!(h.engine.spawn_inbound(receiver));

    sender.send(rejection("op-1", "conflict_detected")).await.unwrap();
    sender.send(remote_operation("r-1", "u2", "c1")).await.unwrap();
    sender.send(remote_operation("r-2", "u2", "c2")).await.unwrap();
    settle(Duration::from_millis(10)).await;

    assert!(h.engine.rejections().is_rolling_back());
    assert!(!h.engine.can_edit());
    assert_eq!(h.engine.rejections().buffered_count(), 2);
    assert!(h.surface.applied_ids().is_empty());
    assert_eq!(h.engine.sync_state().pending_operations, 0);

    settle(Duration::from_millis(500)).await;
    assert!(!h.engine.rejections().is_rolling_back());
    assert_eq!(h.engine.rejections().buffered_count(), 0);
    assert!(h.surface.applied_ids().is_empty());
    assert_eq!(h.engine.metrics().remote_operations_buffered, 2);
    assert_eq!(h.engine.metrics().rollbacks, 1);
    assert!(h.engine.can_edit());

    // A discard is always followed by authoritative state
    assert!(h.engine.resync().is_pending());
    settle(Duration::from_millis(1500)).await;
    assert_eq!(h.server.fetch_count(), 1);

    sender.send(remote_operation("r-3", "u2", "c3")).await.unwrap();
    settle(Duration::from_millis(10)).await;
    assert_eq!(h.surface.applied_ids(), vec!["r-3".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_rollbacks_hold_gate_until_last_finishes() {
    let h = Harness::new();
    h.history.set_undo_delay(Duration::from_millis(300));
    let (sender, receiver) = mpsc::channel(16);
    assert!(h.engine.spawn_inbound(receiver));

    sender.send(rejection("op-1", "conflict_detected")).await.unwrap();
    settle(Duration::from_millis(100)).await;
    sender.send(rejection("op-2", "conflict_detected")).await.unwrap();

    // op-1 finishes at 300ms, op-2 at 400ms
    settle(Duration::from_millis(250)).await;
    assert_eq!(h.history.undo_count(), 2);
    assert!(h.engine.rejections().is_rolling_back());
    assert!(!h.engine.can_edit());

    settle(Duration::from_millis(100)).await;
    assert!(!h.engine.rejections().is_rolling_back());
    assert!(h.engine.can_edit());
    assert_eq!(h.engine.metrics().rollbacks, 2);
}
