
use std::sync::Arc;
use std::time::Duration;

use docflow::ports::JobRepository;
use docflow::scheduler::{
    CancelOutcome, FileId, JobId, JobMetadata, JobStatus, Priority, StageType,
};
use docflow::worker::HandlerRegistry;
use docflow::DocflowError;

use test_harness::{
    assert_eventually, registry_with, test_config, FailingHandler, FlakyRepository, GatedHandler,
    InstantHandler, PanickingHandler, ProgressHandler, TestEngine, UpdateKind,
};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn add(engine: &TestEngine, priority: Priority) -> JobId {
    let file_id = engine.add_file("text/plain").await;
    engine
        .scheduler
        .add_job(
            file_id,
            StageType::TextExtraction,
            priority,
            JobMetadata::new(),
            "tester",
        )
        .await
        .unwrap()
}

// =============================================================================
// Concurrency bound
// =============================================================================

#[tokio::test]
async fn test_never_exceeds_max_concurrency() {
    let handler = GatedHandler::new();
    let engine = TestEngine::start(test_config(2), registry_with(handler.clone()));

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(add(&engine, Priority::Medium).await);
    }

    assert_eventually(
        || async { handler.started().len() == 2 },
        TIMEOUT,
        "two jobs should start",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.started().len(), 2);

    let processing = engine
        .repository
        .list_by_status(JobStatus::Processing)
        .await
        .unwrap();
    assert_eq!(processing.len(), 2);

    assert_eventually(
        || async {
            let status = engine.scheduler.get_queue_status();
            status.queue_length == 3 && status.active_jobs == 2
        },
        TIMEOUT,
        "queue status should show 3 pending and 2 active",
    )
    .await;

    // Freeing one slot admits exactly one more job.
    handler.release(1);
    assert_eventually(
        || async { handler.started().len() == 3 },
        TIMEOUT,
        "third job should start after a slot frees",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.started().len(), 3);

    handler.release(5);
    for id in &ids {
        engine.wait_for_status(*id, JobStatus::Completed).await;
    }
    assert_eq!(handler.peak(), 2);
}

#[tokio::test]
async fn test_zero_concurrency_is_raised_to_one() {
    let handler = GatedHandler::new();
    let engine = TestEngine::start(test_config(0), registry_with(handler.clone()));

    let first = add(&engine, Priority::Low).await;
    let second = add(&engine, Priority::Low).await;

    engine.wait_for_status(first, JobStatus::Processing).await;
    assert_eq!(engine.scheduler.get_queue_status().max_concurrency, 1);
    assert_eq!(engine.status(second).await, JobStatus::Pending);

    handler.release(2);
    engine.wait_for_status(second, JobStatus::Completed).await;
    assert_eq!(handler.peak(), 1);
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_priority_order_then_fifo() {
    let handler = GatedHandler::new();
    let engine = TestEngine::start(test_config(1), registry_with(handler.clone()));

    let blocker = add(&engine, Priority::Low).await;
    engine.wait_for_status(blocker, JobStatus::Processing).await;

    let low_a = add(&engine, Priority::Low).await;
    let low_b = add(&engine, Priority::Low).await;
    let medium = add(&engine, Priority::Medium).await;
    let urgent = add(&engine, Priority::Urgent).await;
    let high = add(&engine, Priority::High).await;

    handler.release(6);
    for id in [low_a, low_b, medium, urgent, high] {
        engine.wait_for_status(id, JobStatus::Completed).await;
    }

    assert_eq!(
        handler.started(),
        vec![blocker, urgent, high, medium, low_a, low_b]
    );
}

#[tokio::test]
async fn test_late_urgent_job_overtakes_waiting_jobs() {
    let handler = GatedHandler::new();
    let engine = TestEngine::start(test_config(1), registry_with(handler.clone()));

    let blocker = add(&engine, Priority::Low).await;
    engine.wait_for_status(blocker, JobStatus::Processing).await;
    let medium = add(&engine, Priority::Medium).await;

    // Let the blocker finish; the medium job starts and waits.
    handler.release(1);
    engine.wait_for_status(medium, JobStatus::Processing).await;

    let low = add(&engine, Priority::Low).await;
    let urgent = add(&engine, Priority::Urgent).await;

    handler.release(3);
    engine.wait_for_status(low, JobStatus::Completed).await;
    assert_eq!(handler.started(), vec![blocker, medium, urgent, low]);
}

// =============================================================================
// Job creation
// =============================================================================

#[tokio::test]
async fn test_process_file_uses_required_stages() {
    let engine = TestEngine::start(test_config(3), registry_with(Arc::new(InstantHandler)));

    let image = engine.add_file("image/jpeg").await;
    let ids = engine
        .scheduler
        .process_file(image, "uploader", None)
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);

    let scan = engine.job(ids[0]).await;
    let thumb = engine.job(ids[1]).await;
    assert_eq!(scan.stage, StageType::MalwareScan);
    assert_eq!(scan.priority, Priority::Urgent);
    assert_eq!(thumb.stage, StageType::ThumbnailGeneration);
    assert_eq!(thumb.priority, Priority::High);
    assert_eq!(scan.created_by, "uploader");

    let pdf = engine.add_file("application/pdf").await;
    let ids = engine.scheduler.process_file(pdf, "uploader", None).await.unwrap();
    let mut stages = Vec::new();
    for id in &ids {
        stages.push(engine.job(*id).await.stage);
    }
    assert_eq!(
        stages,
        vec![
            StageType::MalwareScan,
            StageType::DocumentConversion,
            StageType::MetadataExtraction,
            StageType::TextExtraction,
        ]
    );

    for id in ids {
        engine.wait_for_status(id, JobStatus::Completed).await;
    }
}

#[tokio::test]
async fn test_unknown_content_type_only_scans() {
    let engine = TestEngine::start(test_config(3), registry_with(Arc::new(InstantHandler)));

    let file = engine.add_file("application/x-unknown").await;
    let ids = engine.scheduler.process_file(file, "u", None).await.unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(engine.job(ids[0]).await.stage, StageType::MalwareScan);
}

#[tokio::test]
async fn test_process_file_with_explicit_stages() {
    let engine = TestEngine::start(test_config(3), registry_with(Arc::new(InstantHandler)));

    let file = engine.add_file("image/png").await;
    let ids = engine
        .scheduler
        .process_file(file, "u", Some(vec![StageType::TextExtraction]))
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    let job = engine.job(ids[0]).await;
    assert_eq!(job.stage, StageType::TextExtraction);
    assert_eq!(job.priority, Priority::Low);
}

#[tokio::test]
async fn test_duplicate_add_creates_distinct_jobs() {
    let engine = TestEngine::start(test_config(2), registry_with(Arc::new(InstantHandler)));
    let file = engine.add_file("image/png").await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        ids.push(
            engine
                .scheduler
                .add_job(
                    file,
                    StageType::ThumbnailGeneration,
                    Priority::High,
                    JobMetadata::new(),
                    "u",
                )
                .await
                .unwrap(),
        );
    }
    assert_ne!(ids[0], ids[1]);
    for id in &ids {
        engine.wait_for_status(*id, JobStatus::Completed).await;
    }
}

#[tokio::test]
async fn test_unknown_file_is_rejected() {
    let engine = TestEngine::start(test_config(1), registry_with(Arc::new(InstantHandler)));
    let missing = FileId::new();

    let err = engine
        .scheduler
        .add_job(
            missing,
            StageType::MalwareScan,
            Priority::Urgent,
            JobMetadata::new(),
            "u",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::Validation(ref m) if m.contains("unknown file id")));

    let err = engine
        .scheduler
        .process_file(missing, "u", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::Validation(_)));
    assert!(engine.repository.is_empty().await);
}

#[tokio::test]
async fn test_unsupported_stage_is_rejected() {
    let registry =
        HandlerRegistry::new().with_handler(StageType::MalwareScan, Arc::new(InstantHandler));
    let engine = TestEngine::start(test_config(1), registry);
    let file = engine.add_file("application/pdf").await;

    let err = engine
        .scheduler
        .add_job(
            file,
            StageType::TextExtraction,
            Priority::Low,
            JobMetadata::new(),
            "u",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::Validation(ref m) if m.contains("unsupported stage type")));

    // A PDF needs conversion stages nobody serves; nothing is created.
    let err = engine
        .scheduler
        .process_file(file, "u", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::Validation(_)));
    assert!(engine.scheduler.get_file_jobs(file).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_enabled_stages_filter_required_jobs() {
    let config = test_config(3).with_enabled_stages([
        StageType::MalwareScan,
        StageType::DocumentConversion,
        StageType::MetadataExtraction,
    ]);
    let engine = TestEngine::start(config, registry_with(Arc::new(InstantHandler)));

    let file = engine.add_file("text/plain").await;
    let ids = engine.scheduler.process_file(file, "u", None).await.unwrap();
    let mut stages = Vec::new();
    for id in &ids {
        stages.push(engine.job(*id).await.stage);
    }
    assert_eq!(
        stages,
        vec![
            StageType::MalwareScan,
            StageType::DocumentConversion,
            StageType::MetadataExtraction,
        ]
    );

    let config = test_config(3).with_enabled_stages([StageType::TextExtraction]);
    let engine = TestEngine::start(config, registry_with(Arc::new(InstantHandler)));

    let file = engine.add_file("application/pdf").await;
    let ids = engine.scheduler.process_file(file, "u", None).await.unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(engine.job(ids[0]).await.stage, StageType::TextExtraction);
    engine.wait_for_status(ids[0], JobStatus::Completed).await;
}

#[tokio::test]
async fn test_disabled_stage_is_rejected() {
    let config = test_config(1).with_enabled_stages([StageType::MalwareScan]);
    let engine = TestEngine::start(config, registry_with(Arc::new(InstantHandler)));
    let file = engine.add_file("text/plain").await;

    let err = engine
        .scheduler
        .add_job(
            file,
            StageType::TextExtraction,
            Priority::Low,
            JobMetadata::new(),
            "u",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::Validation(ref m) if m.contains("disabled")));

    let err = engine
        .scheduler
        .process_file(
            file,
            "u",
            Some(vec![StageType::MalwareScan, StageType::DocumentConversion]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::Validation(ref m) if m.contains("document_conversion")));
    assert!(engine.repository.is_empty().await);
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test]
async fn test_failed_handler_does_not_affect_other_jobs() {
    let registry = registry_with(Arc::new(InstantHandler))
        .with_handler(StageType::MalwareScan, Arc::new(FailingHandler("virus db offline")));
    let engine = TestEngine::start(test_config(2), registry);

    let file = engine.add_file("image/jpeg").await;
    let ids = engine.scheduler.process_file(file, "u", None).await.unwrap();

    engine.wait_for_status(ids[0], JobStatus::Failed).await;
    engine.wait_for_status(ids[1], JobStatus::Completed).await;

    let failed = engine.job(ids[0]).await;
    assert_eq!(failed.error_message.as_deref(), Some("virus db offline"));
    assert!(failed.completed_at.is_some());

    // The engine keeps dispatching.
    let next = add(&engine, Priority::Low).await;
    engine.wait_for_status(next, JobStatus::Completed).await;
}

#[tokio::test]
async fn test_panicking_handler_fails_only_its_job() {
    let registry = registry_with(Arc::new(InstantHandler))
        .with_handler(StageType::ThumbnailGeneration, Arc::new(PanickingHandler));
    let engine = TestEngine::start(test_config(1), registry);

    let file = engine.add_file("image/png").await;
    let ids = engine.scheduler.process_file(file, "u", None).await.unwrap();

    engine.wait_for_status(ids[1], JobStatus::Failed).await;
    let failed = engine.job(ids[1]).await;
    assert!(failed
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("renderer exploded"));
    engine.wait_for_status(ids[0], JobStatus::Completed).await;

    let next = add(&engine, Priority::Low).await;
    engine.wait_for_status(next, JobStatus::Completed).await;
    assert_eventually(
        || async { engine.scheduler.get_queue_status().active_jobs == 0 },
        TIMEOUT,
        "slot should be released after a panic",
    )
    .await;
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_pending_job_never_runs() {
    let handler = GatedHandler::new();
    let engine = TestEngine::start(test_config(1), registry_with(handler.clone()));

    let blocker = add(&engine, Priority::Low).await;
    engine.wait_for_status(blocker, JobStatus::Processing).await;
    let victim = add(&engine, Priority::Urgent).await;

    let outcome = engine.scheduler.cancel_job(victim).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Dequeued);
    assert_eq!(engine.status(victim).await, JobStatus::Cancelled);

    handler.release(2);
    engine.wait_for_status(blocker, JobStatus::Completed).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(handler.started(), vec![blocker]);
    let victim = engine.job(victim).await;
    assert_eq!(victim.status, JobStatus::Cancelled);
    assert!(victim.started_at.is_none());
}

#[tokio::test]
async fn test_queue_status_is_current_after_cancel() {
    let handler = GatedHandler::new();
    let engine = TestEngine::start(test_config(1), registry_with(handler.clone()));

    let blocker = add(&engine, Priority::Low).await;
    engine.wait_for_status(blocker, JobStatus::Processing).await;
    let first = add(&engine, Priority::Low).await;
    add(&engine, Priority::Low).await;
    assert_eventually(
        || async { engine.scheduler.get_queue_status().queue_length == 2 },
        TIMEOUT,
        "both jobs should be queued",
    )
    .await;

    engine.scheduler.cancel_job(first).await.unwrap();
    let status = engine.scheduler.get_queue_status();
    assert_eq!(status.queue_length, 1);
    assert_eq!(status.active_jobs, 1);

    handler.release(2);
}

#[tokio::test]
async fn test_cancel_running_job_with_cooperative_handler() {
    let handler = GatedHandler::new();
    let engine = TestEngine::start(test_config(1), registry_with(handler.clone()));

    let running = add(&engine, Priority::Low).await;
    engine.wait_for_status(running, JobStatus::Processing).await;
    let queued = add(&engine, Priority::Low).await;

    let outcome = engine.scheduler.cancel_job(running).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Signalled);
    engine.wait_for_status(running, JobStatus::Cancelled).await;

    // The freed slot goes to the queued job.
    engine.wait_for_status(queued, JobStatus::Processing).await;
    handler.release(1);
    engine.wait_for_status(queued, JobStatus::Completed).await;
}

#[tokio::test]
async fn test_cancel_ignored_by_handler_finishes_normally() {
    let handler = GatedHandler::stubborn();
    let engine = TestEngine::start(test_config(1), registry_with(handler.clone()));

    let job = add(&engine, Priority::Low).await;
    engine.wait_for_status(job, JobStatus::Processing).await;

    let outcome = engine.scheduler.cancel_job(job).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Signalled);

    handler.release(1);
    engine.wait_for_status(job, JobStatus::Completed).await;
}

#[tokio::test]
async fn test_cancel_terminal_and_unknown_jobs() {
    let engine = TestEngine::start(test_config(1), registry_with(Arc::new(InstantHandler)));

    let done = add(&engine, Priority::Low).await;
    engine.wait_for_status(done, JobStatus::Completed).await;

    let outcome = engine.scheduler.cancel_job(done).await.unwrap();
    assert_eq!(outcome, CancelOutcome::AlreadyFinished);
    assert_eq!(engine.status(done).await, JobStatus::Completed);

    let unknown = JobId::new();
    let err = engine.scheduler.cancel_job(unknown).await.unwrap_err();
    assert!(matches!(err, DocflowError::JobNotFound(id) if id == unknown));
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_get_file_jobs_newest_first() {
    let engine = TestEngine::start(test_config(3), registry_with(Arc::new(InstantHandler)));
    let file = engine.add_file("application/pdf").await;
    let other = engine.add_file("application/pdf").await;

    let ids = engine.scheduler.process_file(file, "u", None).await.unwrap();
    engine.scheduler.process_file(other, "u", None).await.unwrap();

    let listed: Vec<_> = engine
        .scheduler
        .get_file_jobs(file)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    let mut expected = ids.clone();
    expected.reverse();
    assert_eq!(listed, expected);

    let missing = FileId::new();
    assert!(engine.scheduler.get_file_jobs(missing).await.unwrap().is_empty());
    assert!(engine
        .scheduler
        .get_job_status(JobId::new())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_completed_job_snapshot() {
    let engine = TestEngine::start(test_config(1), registry_with(Arc::new(InstantHandler)));
    let job = add(&engine, Priority::Low).await;
    engine.wait_for_status(job, JobStatus::Completed).await;

    let snapshot = engine.job(job).await;
    assert_eq!(snapshot.progress, 100);
    assert!(snapshot.started_at.is_some());
    assert!(snapshot.completed_at.is_some());
    assert!(snapshot.started_at <= snapshot.completed_at);
    assert!(snapshot.error_message.is_none());
}

#[tokio::test]
async fn test_jobs_wait_until_dispatcher_runs() {
    let mut engine = TestEngine::build(test_config(2), registry_with(Arc::new(InstantHandler)));

    let job = add(&engine, Priority::Medium).await;
    let status = engine.scheduler.get_queue_status();
    assert!(!status.is_dispatcher_running);
    assert_eq!(status.max_concurrency, 2);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.status(job).await, JobStatus::Pending);

    engine.run_dispatcher();
    engine.wait_for_status(job, JobStatus::Completed).await;
    assert_eventually(
        || async { engine.scheduler.get_queue_status().is_dispatcher_running },
        TIMEOUT,
        "dispatcher should report running",
    )
    .await;
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_stops_admission_and_signals_running_jobs() {
    let handler = GatedHandler::new();
    let mut engine = TestEngine::start(test_config(1), registry_with(handler.clone()));

    let running = add(&engine, Priority::Low).await;
    engine.wait_for_status(running, JobStatus::Processing).await;
    let queued = add(&engine, Priority::Low).await;

    engine.stop().await;

    engine.wait_for_status(running, JobStatus::Cancelled).await;
    assert_eq!(engine.status(queued).await, JobStatus::Pending);
    assert!(!engine.scheduler.get_queue_status().is_dispatcher_running);

    let file = engine.add_file("text/plain").await;
    let err = engine
        .scheduler
        .add_job(
            file,
            StageType::TextExtraction,
            Priority::Low,
            JobMetadata::new(),
            "u",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::DispatcherStopped));

    let err = engine.scheduler.cancel_job(queued).await.unwrap_err();
    assert!(matches!(err, DocflowError::DispatcherStopped));
}

// =============================================================================
// Infrastructure failures
// =============================================================================

#[tokio::test]
async fn test_failed_start_drops_job_and_frees_slot() {
    let flaky = FlakyRepository::new();
    flaky.fail_next(UpdateKind::Started, 1);
    let engine = TestEngine::start_flaky(
        test_config(1),
        registry_with(Arc::new(InstantHandler)),
        flaky.clone(),
    );

    let dropped = add(&engine, Priority::Low).await;
    assert_eventually(
        || async { !flaky.failed().is_empty() },
        TIMEOUT,
        "start update should have been refused",
    )
    .await;
    assert_eq!(flaky.failed(), vec![(dropped, UpdateKind::Started)]);

    // The only slot is free again.
    let next = add(&engine, Priority::Low).await;
    let last = add(&engine, Priority::Low).await;
    engine.wait_for_status(next, JobStatus::Completed).await;
    engine.wait_for_status(last, JobStatus::Completed).await;
    assert_eventually(
        || async {
            let status = engine.scheduler.get_queue_status();
            status.active_jobs == 0 && status.queue_length == 0
        },
        TIMEOUT,
        "dispatcher should be idle",
    )
    .await;

    // Never started; it can still be cancelled so it does not linger.
    assert_eq!(engine.status(dropped).await, JobStatus::Pending);
    let outcome = engine.scheduler.cancel_job(dropped).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Dequeued);
    assert_eq!(engine.status(dropped).await, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_failed_final_write_frees_slot() {
    let flaky = FlakyRepository::new();
    flaky.fail_next(UpdateKind::Terminal, 1);
    let engine = TestEngine::start_flaky(
        test_config(1),
        registry_with(Arc::new(InstantHandler)),
        flaky.clone(),
    );

    let lost = add(&engine, Priority::Low).await;
    assert_eventually(
        || async { !flaky.failed().is_empty() },
        TIMEOUT,
        "final update should have been refused",
    )
    .await;
    assert_eq!(flaky.failed(), vec![(lost, UpdateKind::Terminal)]);

    let siblings = [
        add(&engine, Priority::Low).await,
        add(&engine, Priority::Medium).await,
    ];
    for id in siblings {
        engine.wait_for_status(id, JobStatus::Completed).await;
    }
    assert_eventually(
        || async { engine.scheduler.get_queue_status().active_jobs == 0 },
        TIMEOUT,
        "slot should be released",
    )
    .await;

    // The store never heard the outcome.
    assert_eq!(engine.status(lost).await, JobStatus::Processing);
}

#[tokio::test]
async fn test_failed_progress_write_does_not_fail_job() {
    let flaky = FlakyRepository::new();
    flaky.fail_next(UpdateKind::Progress, 1);
    let engine = TestEngine::start_flaky(
        test_config(1),
        registry_with(Arc::new(ProgressHandler(vec![30, 60]))),
        flaky.clone(),
    );

    let job = add(&engine, Priority::Low).await;
    engine.wait_for_status(job, JobStatus::Completed).await;

    assert_eq!(flaky.failed(), vec![(job, UpdateKind::Progress)]);
    let snapshot = engine.job(job).await;
    assert_eq!(snapshot.progress, 100);
    assert!(snapshot.error_message.is_none());
}
