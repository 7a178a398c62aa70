//! Engine facade: remote operations, local saves, drags and teardown

use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use xfcollab::client::{DragType, EngineError, SaveOutcome, SuppressionKind, TransportError};

use crate::common::*;
use crate::{assert_err, assert_in_range, assert_ok};

#[tokio::test(start_paused = true)]
async fn test_remote_operation_applied_once() {
    let h = Harness::new();

    h.engine.handle_message(remote_operation("r-1", "u2", "c1")).await;
    h.engine.handle_message(remote_operation("r-1", "u2", "c1")).await;

    assert_eq!(h.surface.applied_ids(), vec!["r-1".to_string()]);
    assert_eq!(h.engine.sync_state().pending_operations, 0);
    assert!(h.engine.store().is_recorded("r-1"));
    assert_eq!(h.engine.metrics().remote_operations_applied, 1);
    assert_eq!(h.realtime.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_raw_json_frames_are_handled() {
    let h = Harness::new();
    let raw = json!({
        "message_type": "diagram_operation_event",
        "operation_id": "r-7",
        "initiating_user": {"user_id": "u2"},
        "operation": {"type": "patch", "cells": [{"id": "c1", "operation": "remove"}]}
    });

    h.engine.handle_json(&raw.to_string()).await;
    h.engine.handle_json("{ not json").await;
    h.engine
        .handle_json(r#"{"message_type":"diagram_operation","operation_id":"r-8"}"#)
        .await;

    assert_eq!(h.surface.applied_ids(), vec!["r-7".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_save_goes_over_realtime() {
    let h = Harness::new();

    let outcome = assert_ok!(h.engine.submit_local_operation(local_patch("local-a")).await);

    assert_matches!(outcome, SaveOutcome::Realtime { .. });
    assert_eq!(h.realtime.sent_count(), 1);
    assert_eq!(h.server.save_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_save_falls_back_to_rest_after_timeout() {
    let h = Harness::new();
    h.realtime.set_behaviour(SendBehaviour::Hang);

    let started = tokio::time::Instant::now();
    let outcome = assert_ok!(h.engine.submit_local_operation(local_patch("local-a")).await);

    assert_in_range!(started.elapsed(), Duration::from_secs(15), Duration::from_millis(15_100));
    assert_eq!(
        outcome,
        SaveOutcome::RestFallback {
            cell_count: 2,
            cause: TransportError::Timeout,
        }
    );
    let saves = h.server.saves.lock().unwrap();
    let ids: Vec<&str> = saves[0].iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["local-a", "local-b"]);
}

#[tokio::test(start_paused = true)]
async fn test_save_permission_failure_propagates() {
    let h = Harness::new();
    h.realtime.set_behaviour(SendBehaviour::Fail(TransportError::Forbidden));

    let result = h.engine.submit_local_operation(local_patch("local-a")).await;

    assert_err!(result, EngineError::Transport(TransportError::Forbidden));
    assert_eq!(h.server.save_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_local_edits_refused_while_blocked_or_suppressed() {
    let h = Harness::new();

    h.engine.store().set_block_operations(true);
    assert!(!h.engine.can_edit());
    assert_err!(
        h.engine.submit_local_operation(local_patch("local-a")).await,
        EngineError::EditsBlocked
    );
    h.engine.store().set_block_operations(false);

    {
        let _remote = h.engine.operation_state().suppress(SuppressionKind::Remote);
        assert_err!(
            h.engine.submit_local_operation(local_patch("local-a")).await,
            EngineError::Suppressed
        );
    }

    assert_ok!(h.engine.submit_local_operation(local_patch("local-a")).await);
    assert_eq!(h.realtime.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drag_emits_single_completion_after_quiet_period() {
    let h = Harness::new();
    let (completions, _sub) = collect(h.engine.operation_state().completions());
    let drags = h.engine.operation_state();

    drags.start_drag("n1", DragType::Move, json!({"x": 0, "y": 0}));
    for step in 1..=3 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(drags.update_drag("n1", json!({"x": step * 10, "y": 0})));
    }
    settle(Duration::from_millis(140)).await;
    assert!(completions.lock().unwrap().is_empty());

    settle(Duration::from_millis(20)).await;
    let completions = completions.lock().unwrap();
    assert_eq!(completions.len(), 1);
    let completion = &completions[0];
    assert_eq!(completion.cell_id, "n1");
    assert_eq!(completion.drag_type, DragType::Move);
    assert_eq!(completion.initial_state, json!({"x": 0, "y": 0}));
    assert_eq!(completion.final_state, json!({"x": 30, "y": 0}));
    assert!(completion.duration >= Duration::from_millis(450));
    assert!(!drags.is_dragging("n1"));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_drag_emits_nothing() {
    let h = Harness::new();
    let (completions, _sub) = collect(h.engine.operation_state().completions());
    let drags = h.engine.operation_state();

    drags.start_drag("n1", DragType::Resize, json!({"w": 10}));
    drags.update_drag("n1", json!({"w": 20}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(drags.cancel_drag("n1"));

    settle(Duration::from_secs(1)).await;
    assert!(completions.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_channel_drives_engine() {
    let h = Harness::new();
    let (sender, receiver) = mpsc::channel(16);
    assert!(h.engine.spawn_inbound(receiver));

    sender.send(remote_operation("r-1", "u2", "c1")).await.unwrap();
    sender.send(remote_operation("r-2", "u3", "c2")).await.unwrap();
    settle(Duration::from_millis(10)).await;

    assert_eq!(h.surface.applied_ids(), vec!["r-1".to_string(), "r-2".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_cancels_pending_work() {
    let h = Harness::new();
    h.history.forget("op-1");
    h.engine.handle_message(rejection("op-1", "validation_failed")).await;
    assert!(h.engine.resync().is_pending());

    h.engine.dispose();
    h.engine.dispose();
    settle(Duration::from_secs(5)).await;

    assert!(h.engine.is_disposed());
    assert_eq!(h.server.fetch_count(), 0);
    assert!(!h.engine.can_edit());
    assert_err!(
        h.engine.submit_local_operation(local_patch("local-a")).await,
        EngineError::Disposed
    );

    h.engine.handle_message(remote_operation("r-1", "u2", "c1")).await;
    assert!(h.surface.applied_ids().is_empty());

    let (_sender, receiver) = mpsc::channel(1);
    assert!(!h.engine.spawn_inbound(receiver));
}

#[tokio::test(start_paused = true)]
async fn test_leave_ends_collaboration_and_disposes() {
    let h = Harness::new();

    assert_ok!(h.engine.leave().await);

    assert_eq!(h.server.end_count(), 1);
    assert!(h.engine.is_disposed());
}
