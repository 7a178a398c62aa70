/**
 * XFCollab Replay Tool
 *
 * Feeds a JSON-lines capture of transport messages through the message
 * adapter and the sync state store, logging every domain event and every
 * store transition. Resync requests are logged instead of executed.
 *
 * Usage: xfcollab-replay <capture.jsonl>
 */
use std::sync::Arc;

use xfcollab::client::adapter::MessageAdapter;
use xfcollab::client::sync::{ResyncCoordinator, SyncStateStore};

struct LoggingCoordinator;

impl ResyncCoordinator for LoggingCoordinator {
    fn trigger_resync(&self, reason: &str) {
        tracing::warn!(reason, "[Replay] Store requested a resync");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: xfcollab-replay <capture.jsonl>");
        std::process::exit(2);
    };
    let capture = std::fs::read_to_string(&path)?;

    let adapter = MessageAdapter::new();
    let store = SyncStateStore::new();
    let coordinator = Arc::new(LoggingCoordinator);
    store.attach_coordinator(&coordinator);

    let _events = adapter.subscribe(|event| {
        tracing::info!(kind = event.kind(), "[Replay] Domain event");
    });
    let _notices = adapter.subscribe_notices(|notice| {
        tracing::info!(notice = %notice.text(), "[Replay] Session notice");
    });
    let _transitions = store.subscribe(|snapshot| {
        tracing::info!(
            synced = snapshot.state.is_synced,
            pending = snapshot.state.pending_operations,
            conflicts = snapshot.conflict_count,
            blocked = snapshot.operations_blocked,
            local_vector = %snapshot.local_update_vector,
            "[Replay] Store transition"
        );
    });

    let mut handled = 0usize;
    for (index, line) in capture.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match adapter.handle_json(line) {
            Some(event) => {
                store.process_domain_event(&event);
                if let xfcollab::shared::DomainEvent::RemoteOperation(operation) = &event {
                    store.record_applied_operation(operation);
                }
                handled += 1;
            }
            None => tracing::debug!(line = index + 1, "[Replay] Line produced no event"),
        }
    }

    let state = store.state();
    tracing::info!(
        handled,
        synced = state.is_synced,
        pending = state.pending_operations,
        conflicts = store.conflict_count(),
        "[Replay] Done"
    );
    Ok(())
}
