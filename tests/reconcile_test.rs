//! Status Reconciliation Tests
//!
//! Bounded polling against a scripted platform, the single terminal write,
//! and cancellation through the scheduler.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use stream_ingestr::config::ReconcileConfig;
use stream_ingestr::reconcile::{
    ReconcileJob, ReconcileOutcome, ReconcileScheduler, Reconciler,
};
use stream_ingestr::store::{RecordPatch, RecordStore, VideoRecord, VideoStatus};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn reconcile_config(max_attempts: u32, poll_interval_ms: u64) -> ReconcileConfig {
    ReconcileConfig {
        poll_interval_ms,
        max_attempts,
    }
}

async fn seeded_store() -> Arc<CountingStore> {
    let store = Arc::new(CountingStore::new());
    store
        .insert(VideoRecord::provisional(
            uid(),
            "videos",
            format!("{}/{}", PLAYBACK, UID),
        ))
        .await
        .unwrap();
    store
}

fn reconciler(platform: &PlatformMock, store: &Arc<CountingStore>, config: ReconcileConfig) -> Reconciler {
    Reconciler::new(platform.client(), store.clone(), config)
}

#[tokio::test]
async fn test_processing_then_ready_writes_once() {
    let platform = PlatformMock::start().await;
    let sequence = platform
        .mount_status_sequence(&["queued", "inprogress", "ready"])
        .await;
    let store = seeded_store().await;

    let outcome = reconciler(&platform, &store, reconcile_config(5, 10))
        .run(&ReconcileJob::new(uid()), CancellationToken::new())
        .await;

    assert_eq!(
        outcome,
        ReconcileOutcome::Completed {
            status: VideoStatus::Ready,
            attempts: 3
        }
    );
    assert_eq!(sequence.served(), 3, "no poll after the terminal state");
    assert_eq!(store.update_count(), 1);

    let record = store.get(&uid()).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Ready);
    assert_eq!(record.size_bytes, Some(4096));
    assert_eq!(record.duration_seconds, Some(12.5));
    assert!(record.thumbnail_url.unwrap().ends_with("thumbnail.jpg"));
    assert_eq!(record.download_url, None);
}

#[tokio::test]
async fn test_remote_error_writes_reason_only() {
    let platform = PlatformMock::start().await;
    Mock::given(method("GET"))
        .and(path(platform.video_path(UID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!({
            "uid": UID,
            "status": {
                "state": "error",
                "errorReasonCode": "ERR_DURATION_EXCEED_CONSTRAINT",
                "errorReasonText": "The video duration exceeds the maximum duration allowed."
            },
            "duration": -1,
            "size": 99,
        }))))
        .mount(&platform.server)
        .await;
    let store = seeded_store().await;

    let outcome = reconciler(&platform, &store, reconcile_config(5, 10))
        .run(&ReconcileJob::new(uid()), CancellationToken::new())
        .await;

    assert_eq!(outcome.status(), Some(VideoStatus::Error));
    let record = store.get(&uid()).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Error);
    assert_eq!(
        record.error_reason.as_deref(),
        Some("The video duration exceeds the maximum duration allowed.")
    );
    assert_eq!(record.size_bytes, None);
    assert_eq!(record.duration_seconds, None);
}

#[tokio::test]
async fn test_budget_exhaustion_leaves_record_processing() {
    let platform = PlatformMock::start().await;
    let sequence = platform.mount_status_sequence(&["inprogress"]).await;
    let store = seeded_store().await;

    let outcome = reconciler(&platform, &store, reconcile_config(3, 10))
        .run(&ReconcileJob::new(uid()), CancellationToken::new())
        .await;

    assert_eq!(outcome, ReconcileOutcome::GaveUp { attempts: 3 });
    assert_eq!(sequence.served(), 3);
    assert_eq!(store.update_count(), 0);
    assert_eq!(
        store.get(&uid()).await.unwrap().unwrap().status,
        VideoStatus::Processing
    );
}

#[tokio::test]
async fn test_default_budget_gives_up_after_twelve_polls() {
    let defaults = ReconcileConfig::default();
    assert_eq!(defaults.poll_interval_ms, 5000);
    assert_eq!(defaults.max_attempts, 12);

    let platform = PlatformMock::start().await;
    let sequence = platform.mount_status_sequence(&["inprogress"]).await;
    let store = seeded_store().await;
    let config = ReconcileConfig {
        poll_interval_ms: 5,
        ..Default::default()
    };

    let outcome = reconciler(&platform, &store, config)
        .run(&ReconcileJob::new(uid()), CancellationToken::new())
        .await;

    assert_eq!(outcome, ReconcileOutcome::GaveUp { attempts: 12 });
    assert_eq!(sequence.served(), 12);
    assert_eq!(store.update_count(), 0);
}

#[tokio::test]
async fn test_failed_queries_consume_attempts() {
    let platform = PlatformMock::start().await;
    Mock::given(method("GET"))
        .and(path(platform.video_path(UID)))
        .respond_with(ResponseTemplate::new(503))
        .mount(&platform.server)
        .await;
    let store = seeded_store().await;

    let outcome = reconciler(&platform, &store, reconcile_config(2, 10))
        .run(&ReconcileJob::new(uid()), CancellationToken::new())
        .await;

    assert_eq!(outcome, ReconcileOutcome::GaveUp { attempts: 2 });
    assert_eq!(platform.count("GET", &platform.video_path(UID)).await, 2);
}

#[tokio::test]
async fn test_cancellation_before_first_tick_makes_no_request() {
    let platform = PlatformMock::start().await;
    let sequence = platform.mount_status_sequence(&["ready"]).await;
    let store = seeded_store().await;
    let reconciler = reconciler(&platform, &store, reconcile_config(5, 1_000));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let outcome = reconciler.run(&ReconcileJob::new(uid()), cancel).await;

    assert_eq!(outcome, ReconcileOutcome::Cancelled { attempts: 0 });
    assert_eq!(sequence.served(), 0);
    assert_eq!(store.update_count(), 0);
}

#[tokio::test]
async fn test_removed_record_is_abandoned_without_write() {
    let platform = PlatformMock::start().await;
    platform.mount_status_sequence(&["inprogress", "ready"]).await;
    let store = seeded_store().await;
    store.remove(&uid()).await.unwrap();

    let outcome = reconciler(&platform, &store, reconcile_config(5, 10))
        .run(&ReconcileJob::new(uid()), CancellationToken::new())
        .await;

    assert!(matches!(outcome, ReconcileOutcome::Abandoned { .. }));
    assert_eq!(store.update_count(), 0);
    assert!(store.get(&uid()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_terminal_record_is_never_overwritten() {
    let platform = PlatformMock::start().await;
    platform.mount_status_sequence(&["error"]).await;
    let store = seeded_store().await;
    store
        .update(&uid(), RecordPatch::status(VideoStatus::Ready))
        .await
        .unwrap();

    let outcome = reconciler(&platform, &store, reconcile_config(5, 10))
        .run(&ReconcileJob::new(uid()), CancellationToken::new())
        .await;

    assert!(matches!(outcome, ReconcileOutcome::Abandoned { .. }));
    assert_eq!(store.update_count(), 1);
    assert_eq!(
        store.get(&uid()).await.unwrap().unwrap().status,
        VideoStatus::Ready
    );
}

#[tokio::test]
async fn test_failed_write_is_retried_on_next_tick() {
    let platform = PlatformMock::start().await;
    platform.mount_status_sequence(&["ready"]).await;
    let store = seeded_store().await;
    store.fail_next_updates(1);

    let outcome = reconciler(&platform, &store, reconcile_config(5, 10))
        .run(&ReconcileJob::new(uid()), CancellationToken::new())
        .await;

    assert_eq!(
        outcome,
        ReconcileOutcome::Completed {
            status: VideoStatus::Ready,
            attempts: 2
        }
    );
    assert_eq!(store.update_count(), 1);
}

#[tokio::test]
async fn test_ready_with_downloads_records_download_url() {
    let platform = PlatformMock::start().await;
    platform.mount_status_sequence(&["ready"]).await;
    let downloads = format!("{}/downloads", platform.video_path(UID));
    Mock::given(method("POST"))
        .and(path(downloads.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!({
            "default": { "status": "inprogress", "url": "", "percentComplete": 10.0 }
        }))))
        .expect(1)
        .mount(&platform.server)
        .await;
    Mock::given(method("GET"))
        .and(path(downloads.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!({
            "default": {
                "status": "ready",
                "url": "https://videodelivery.example.com/downloads/default.mp4",
                "percentComplete": 100.0
            }
        }))))
        .mount(&platform.server)
        .await;
    let store = seeded_store().await;

    let outcome = reconciler(&platform, &store, reconcile_config(5, 10))
        .run(
            &ReconcileJob::new(uid()).with_downloads(true),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.status(), Some(VideoStatus::Ready));
    assert_eq!(store.update_count(), 1);
    let record = store.get(&uid()).await.unwrap().unwrap();
    assert_eq!(
        record.download_url.as_deref(),
        Some("https://videodelivery.example.com/downloads/default.mp4")
    );
}

#[tokio::test]
async fn test_download_failure_still_writes_status() {
    let platform = PlatformMock::start().await;
    platform.mount_status_sequence(&["ready"]).await;
    Mock::given(method("POST"))
        .and(path(format!("{}/downloads", platform.video_path(UID))))
        .respond_with(ResponseTemplate::new(500))
        .mount(&platform.server)
        .await;
    let store = seeded_store().await;

    let outcome = reconciler(&platform, &store, reconcile_config(5, 10))
        .run(
            &ReconcileJob::new(uid()).with_downloads(true),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.status(), Some(VideoStatus::Ready));
    let record = store.get(&uid()).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Ready);
    assert_eq!(record.download_url, None);
}

#[tokio::test]
async fn test_scheduler_cancel_stops_task() {
    let platform = PlatformMock::start().await;
    platform.mount_status_sequence(&["inprogress"]).await;
    let store = seeded_store().await;
    let scheduler = ReconcileScheduler::new(Arc::new(reconciler(
        &platform,
        &store,
        reconcile_config(100, 10),
    )));

    let ticket = scheduler.schedule(ReconcileJob::new(uid()));
    assert!(scheduler.is_active(&uid()));
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(scheduler.cancel(&uid()));
    assert!(matches!(ticket.outcome().await, ReconcileOutcome::Cancelled { .. }));
    assert!(!scheduler.is_active(&uid()));
    assert_eq!(store.update_count(), 0);
}

#[tokio::test]
async fn test_rescheduling_replaces_existing_task() {
    let platform = PlatformMock::start().await;
    platform.mount_status_sequence(&["inprogress"]).await;
    let store = seeded_store().await;
    let scheduler = ReconcileScheduler::new(Arc::new(reconciler(
        &platform,
        &store,
        reconcile_config(100, 10),
    )));

    let first = scheduler.schedule(ReconcileJob::new(uid()));
    let second = scheduler.schedule(ReconcileJob::new(uid()));

    assert!(matches!(first.outcome().await, ReconcileOutcome::Cancelled { .. }));
    assert!(scheduler.is_active(&uid()));
    assert_eq!(scheduler.active_count(), 1);

    scheduler.shutdown().await;
    assert!(matches!(second.outcome().await, ReconcileOutcome::Cancelled { .. }));
    assert_eq!(scheduler.active_count(), 0);
}

#[tokio::test]
async fn test_schedule_after_shutdown_is_cancelled() {
    let platform = PlatformMock::start().await;
    let sequence = platform.mount_status_sequence(&["ready"]).await;
    let store = seeded_store().await;
    let scheduler = ReconcileScheduler::new(Arc::new(reconciler(
        &platform,
        &store,
        reconcile_config(5, 10),
    )));

    scheduler.shutdown().await;
    assert!(scheduler.is_shut_down());

    let ticket = scheduler.schedule(ReconcileJob::new(uid()));
    assert_eq!(ticket.outcome().await, ReconcileOutcome::Cancelled { attempts: 0 });
    assert_eq!(sequence.served(), 0);
}
