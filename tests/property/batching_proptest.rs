//! Property-based tests for rejection notice batching

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use xfcollab::client::recovery::{NotificationBatcher, UserNotice};
use xfcollab::shared::event::{RejectionEvent, RejectionReason, Topic};

use crate::common::collect;

const WINDOW: Duration = Duration::from_millis(2_000);

fn reason() -> impl Strategy<Value = RejectionReason> {
    prop_oneof![
        Just(RejectionReason::ConflictDetected),
        Just(RejectionReason::ValidationFailed),
        Just(RejectionReason::PermissionDenied),
        Just(RejectionReason::NoStateChange),
        "[a-z_]{3,12}".prop_map(|r| RejectionReason::from_wire(&r)),
    ]
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn test_burst_yields_one_notice_led_by_first_reason(
        burst in prop::collection::vec((reason(), 0..1_999u64), 1..12)
    ) {
        let runtime = paused_runtime();
        let (notices, expected_title) = runtime.block_on(async {
            let topic: Arc<Topic<UserNotice>> = Arc::new(Topic::new());
            let (notices, _sub) = collect(&topic);
            let batcher = NotificationBatcher::new(WINDOW, Arc::clone(&topic));

            for (index, (reason, gap_ms)) in burst.iter().enumerate() {
                if index > 0 {
                    tokio::time::sleep(Duration::from_millis(*gap_ms)).await;
                }
                batcher.enqueue(RejectionEvent::new(format!("op-{}", index), reason.clone()));
            }
            tokio::time::sleep(WINDOW + Duration::from_millis(50)).await;

            let seen = notices.lock().unwrap().clone();
            (seen, burst[0].0.presentation())
        });

        prop_assert_eq!(notices.len(), 1);
        match &notices[0] {
            UserNotice::Rejections(notice) => {
                prop_assert_eq!(notice.count, burst.len());
                prop_assert_eq!((notice.severity, notice.title), expected_title);
            }
            other => prop_assert!(false, "unexpected notice {:?}", other),
        }
    }
}
