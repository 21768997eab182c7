//! Queue behavior against the in-process job store and catalog.
//!
//! Run with: cargo test --test queue_test

mod fixtures;
mod helpers;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fixtures::*;
use helpers::*;
use hemp_image_queue::models::job::{JobResult, JobStatus, NewJob};
use hemp_image_queue::models::provider::ProviderConfig;
use hemp_image_queue::models::target::{TargetKind, TargetRef};
use hemp_image_queue::services::job_store::{JobStore, MemoryJobStore, StoreError};
use hemp_image_queue::services::producer::Producer;
use hemp_image_queue::services::providers::placeholder::PlaceholderProvider;
use hemp_image_queue::services::providers::ProviderRegistry;
use hemp_image_queue::services::status::StatusReporter;
use hemp_image_queue::services::worker::{BatchRequest, Worker, WorkerError};
use tokio_test::assert_ok;

fn batch(batch_size: u32) -> BatchRequest {
    BatchRequest {
        batch_size,
        provider: None,
        test: false,
    }
}

#[tokio::test]
async fn test_claim_takes_highest_priority_first() {
    let store = MemoryJobStore::new(Duration::from_secs(300));
    for priority in [1, 5, 3] {
        assert_ok!(
            store
                .enqueue(NewJob::for_prompt(format!("prompt {priority}")).with_priority(priority))
                .await
        );
    }

    let claimed = store.claim_next(2).await.unwrap();
    let priorities: Vec<i32> = claimed.iter().map(|job| job.priority).collect();
    assert_eq!(priorities, vec![5, 3]);
    assert!(claimed.iter().all(|job| job.status == JobStatus::Processing));
    assert!(claimed.iter().all(|job| job.attempts == 1));

    let counts = store.counts_by_status().await.unwrap();
    assert_eq!(counts.get(JobStatus::Pending), 1);
    assert_eq!(counts.get(JobStatus::Processing), 2);
}

#[tokio::test]
async fn test_enqueued_job_counts_as_pending() {
    let store = MemoryJobStore::new(Duration::from_secs(300));
    let job_id = store
        .enqueue(NewJob::for_prompt("hemp seed oil in a glass bottle"))
        .await
        .unwrap();

    let counts = store.counts_by_status().await.unwrap();
    assert_eq!(counts.get(JobStatus::Pending), 1);
    assert_eq!(counts.total(), 1);

    let job = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert!(job.claimed_at.is_none());
}

#[tokio::test]
async fn test_claim_breaks_priority_ties_by_age() {
    let store = MemoryJobStore::new(Duration::from_secs(300));
    let first = store.enqueue(NewJob::for_prompt("older")).await.unwrap();
    store.enqueue(NewJob::for_prompt("newer")).await.unwrap();

    let claimed = store.claim_next(1).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, first);
}

#[tokio::test]
async fn test_concurrent_claims_are_disjoint() {
    let store = Arc::new(MemoryJobStore::new(Duration::from_secs(300)));
    for i in 0..20 {
        store
            .enqueue(NewJob::for_prompt(format!("job {i}")).with_priority(i % 4))
            .await
            .unwrap();
    }

    let handles = (0..10).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.claim_next(3).await })
    });
    let results = futures::future::join_all(handles).await;

    let mut seen = HashSet::new();
    for result in results {
        for job in result.unwrap().unwrap() {
            assert!(seen.insert(job.id), "job {} claimed twice", job.id);
        }
    }
    assert_eq!(seen.len(), 20);
    assert!(store.claim_next(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_claim_is_reclaimed() {
    let store = MemoryJobStore::new(Duration::from_millis(200));
    let job_id = store.enqueue(NewJob::for_prompt("stuck")).await.unwrap();

    assert_eq!(store.claim_next(1).await.unwrap().len(), 1);
    assert!(store.claim_next(1).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;

    let reclaimed = store.claim_next(1).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, job_id);
    assert_eq!(reclaimed[0].attempts, 2);
}

#[tokio::test]
async fn test_resolved_job_cannot_be_resolved_again() {
    let store = MemoryJobStore::new(Duration::from_secs(300));
    let job_id = store.enqueue(NewJob::for_prompt("once")).await.unwrap();
    store.claim_next(1).await.unwrap();

    let result = JobResult {
        image_url: "https://images.example.com/once.png".to_string(),
        provider: "stable-diffusion".to_string(),
        cost: 0.002,
    };
    assert_ok!(store.complete(job_id, 1, result.clone()).await);

    assert!(store.fail(job_id, 1, "late failure").await.unwrap_err().is_conflict());
    assert!(store.complete(job_id, 1, result).await.unwrap_err().is_conflict());

    let job = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.cost, Some(0.002));
    assert!(job.error.is_none());
}

#[tokio::test]
async fn test_producer_is_idempotent() {
    let h = harness(catalog(), no_providers());
    let producer = Producer::new(h.dyn_store(), h.dyn_targets());

    let first = producer.run(&[], None).await.unwrap();
    assert_eq!(first.scanned, MISSING_IN_CATALOG);
    assert_eq!(first.enqueued, MISSING_IN_CATALOG);
    assert_eq!(first.skipped, 0);

    let second = producer.run(&[], None).await.unwrap();
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.skipped, MISSING_IN_CATALOG);

    let jobs = h.store.snapshot().await;
    assert_eq!(jobs.len() as u32, MISSING_IN_CATALOG);
    let targets: Vec<TargetRef> = jobs.iter().filter_map(|job| job.target).collect();
    assert_eq!(
        targets,
        vec![
            TargetRef { kind: TargetKind::PlantType, id: 10 },
            TargetRef { kind: TargetKind::PlantPart, id: 20 },
            TargetRef { kind: TargetKind::Product, id: 30 },
        ]
    );
    assert_eq!(
        jobs.iter().map(|job| job.priority).collect::<Vec<_>>(),
        vec![5, 4, 3]
    );
}

#[tokio::test]
async fn test_producer_honors_kinds_and_limit() {
    let h = harness(catalog(), no_providers());
    let producer = Producer::new(h.dyn_store(), h.dyn_targets());

    let report = producer.run(&[TargetKind::Product], None).await.unwrap();
    assert_eq!(report.enqueued, 1);

    let report = producer.run(&[], Some(1)).await.unwrap();
    assert_eq!(report.enqueued, 1);
    assert_eq!(h.store.snapshot().await.len(), 2);
}

#[tokio::test]
async fn test_worker_completes_jobs_and_writes_back_images() {
    let provider = Arc::new(UrlProvider::default());
    let h = harness(
        catalog(),
        single(stable_diffusion(), provider.clone()),
    );
    Producer::new(h.dyn_store(), h.dyn_targets())
        .run(&[], None)
        .await
        .unwrap();

    let report = h.worker.run_batch(batch(10)).await.unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 0);
    assert!(report.errors.is_empty());
    assert!((report.total_cost - 0.006).abs() < 1e-9);
    assert_eq!(report.provider_stats["stable-diffusion"].succeeded, 3);
    assert_eq!(provider.calls(), 3);

    for job in h.store.snapshot().await {
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.provider.as_deref(), Some("stable-diffusion"));
        let target = job.target.unwrap();
        let entity = h.targets.get(target).await.unwrap();
        assert_eq!(entity.image_url, job.image_url);
        assert!(!entity.needs_image());
    }

    let rerun = Producer::new(h.dyn_store(), h.dyn_targets())
        .run(&[], None)
        .await
        .unwrap();
    assert_eq!(rerun.scanned, 0);
}

#[tokio::test]
async fn test_timeout_fails_job_and_leaves_entity_untouched() {
    let h = harness(
        catalog(),
        single(stable_diffusion(), Arc::new(SlowProvider)),
    );
    Producer::new(h.dyn_store(), h.dyn_targets())
        .run(&[TargetKind::PlantType], None)
        .await
        .unwrap();

    let report = h.worker.run_batch(batch(1)).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].ends_with("timeout"));

    let job = h.store.snapshot().await.remove(0);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("timeout"));
    assert!(job.image_url.is_none());

    let entity = h.targets.get(job.target.unwrap()).await.unwrap();
    assert!(entity.image_url.is_none());
}

#[tokio::test]
async fn test_provider_error_does_not_abort_batch() {
    let h = harness(
        vec![],
        single(stable_diffusion(), Arc::new(FlakyProvider { marker: "broken" })),
    );
    h.store.enqueue(NewJob::for_prompt("hemp field at dawn").with_priority(3)).await.unwrap();
    h.store.enqueue(NewJob::for_prompt("broken prompt").with_priority(2)).await.unwrap();
    h.store.enqueue(NewJob::for_prompt("hemp fiber close-up").with_priority(1)).await.unwrap();

    let report = h.worker.run_batch(batch(5)).await.unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(report.errors[0].ends_with("quota exceeded"));

    let stats = &report.provider_stats["stable-diffusion"];
    assert_eq!((stats.attempted, stats.succeeded, stats.failed), (3, 2, 1));

    let counts = h.store.counts_by_status().await.unwrap();
    assert_eq!(counts.get(JobStatus::Completed), 2);
    assert_eq!(counts.get(JobStatus::Failed), 1);
}

#[tokio::test]
async fn test_reported_errors_are_capped() {
    let h = harness(
        vec![],
        single(stable_diffusion(), Arc::new(FlakyProvider { marker: "broken" })),
    );
    for i in 0..8 {
        h.store.enqueue(NewJob::for_prompt(format!("broken {i}"))).await.unwrap();
    }

    let report = h.worker.run_batch(batch(8)).await.unwrap();
    assert_eq!(report.failed, 8);
    assert_eq!(report.errors.len(), 5);
}

#[tokio::test]
async fn test_dry_run_claims_nothing() {
    let h = harness(
        catalog(),
        single(stable_diffusion(), Arc::new(UrlProvider::default())),
    );
    Producer::new(h.dyn_store(), h.dyn_targets())
        .run(&[], None)
        .await
        .unwrap();

    let report = h
        .worker
        .run_batch(BatchRequest {
            batch_size: 0,
            provider: None,
            test: true,
        })
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.processed, 0);
    assert_eq!(report.pending, Some(i64::from(MISSING_IN_CATALOG)));
    assert_eq!(report.selected_provider.as_deref(), Some("stable-diffusion"));
    assert!(h
        .store
        .snapshot()
        .await
        .iter()
        .all(|job| job.status == JobStatus::Pending));
}

#[tokio::test]
async fn test_unknown_or_missing_provider_claims_nothing() {
    let h = harness(
        vec![],
        single(ProviderConfig::new("dall-e-3", 0.04, 90).inactive(), Arc::new(UrlProvider::default())),
    );
    h.store.enqueue(NewJob::for_prompt("hemp seeds")).await.unwrap();

    let err = h
        .worker
        .run_batch(BatchRequest {
            batch_size: 1,
            provider: Some("dall-e-3".to_string()),
            test: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::UnknownProvider(name) if name == "dall-e-3"));

    let err = h.worker.run_batch(batch(1)).await.unwrap_err();
    assert!(matches!(err, WorkerError::NoProvider));

    let counts = h.store.counts_by_status().await.unwrap();
    assert_eq!(counts.get(JobStatus::Pending), 1);
}

#[tokio::test]
async fn test_provider_override_beats_selection() {
    let preferred = Arc::new(UrlProvider::default());
    let h = harness(
        vec![],
        single(stable_diffusion(), preferred.clone()).with(
            ProviderConfig::new("placeholder", 0.0, 10),
            Arc::new(PlaceholderProvider),
        ),
    );
    h.store.enqueue(NewJob::for_prompt("hemp seeds")).await.unwrap();

    let report = h
        .worker
        .run_batch(BatchRequest {
            batch_size: 1,
            provider: Some("placeholder".to_string()),
            test: false,
        })
        .await
        .unwrap();

    assert_eq!(report.selected_provider.as_deref(), Some("placeholder"));
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.total_cost, 0.0);
    assert_eq!(preferred.calls(), 0);
}

#[tokio::test]
async fn test_injected_policy_picks_cheapest() {
    fn cheapest(providers: &[ProviderConfig]) -> Option<&ProviderConfig> {
        providers
            .iter()
            .filter(|p| p.is_active)
            .min_by(|a, b| a.cost_per_image.total_cmp(&b.cost_per_image))
    }

    let registry = ProviderRegistry::new(Arc::new(cheapest))
        .with(stable_diffusion(), Arc::new(UrlProvider::default()))
        .with(
            ProviderConfig::new("dall-e-3", 0.04, 90),
            Arc::new(UrlProvider::default()),
        );

    let (config, _) = registry.select().unwrap();
    assert_eq!(config.name, "stable-diffusion");
}

#[tokio::test]
async fn test_bytes_without_storage_fail_the_job() {
    let h = harness(vec![], single(stable_diffusion(), Arc::new(BytesProvider)));
    let job_id = h.store.enqueue(NewJob::for_prompt("hemp seeds")).await.unwrap();

    let report = h.worker.run_batch(batch(1)).await.unwrap();
    assert_eq!(report.failed, 1);

    let job = h.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().starts_with("storage:"));
}

#[tokio::test]
async fn test_failed_job_can_be_retried_once() {
    let h = harness(
        catalog(),
        single(stable_diffusion(), Arc::new(SlowProvider)),
    );
    Producer::new(h.dyn_store(), h.dyn_targets())
        .run(&[TargetKind::Product], None)
        .await
        .unwrap();
    h.worker.run_batch(batch(1)).await.unwrap();

    let failed = h.store.snapshot().await.remove(0);
    assert_eq!(failed.status, JobStatus::Failed);

    let retry_id = h.store.retry(failed.id).await.unwrap();
    let retry = h.store.get(retry_id).await.unwrap().unwrap();
    assert_eq!(retry.status, JobStatus::Pending);
    assert_eq!(retry.retry_of, Some(failed.id));
    assert_eq!(retry.target, failed.target);
    assert_eq!(retry.prompt, failed.prompt);

    assert!(matches!(
        h.store.retry(failed.id).await,
        Err(StoreError::AlreadyQueued(_))
    ));
    assert!(h.store.retry(retry_id).await.unwrap_err().is_conflict());
}

#[tokio::test]
async fn test_status_report_estimates_remaining_cost() {
    let h = harness(
        catalog(),
        single(stable_diffusion(), Arc::new(UrlProvider::default())),
    );
    Producer::new(h.dyn_store(), h.dyn_targets())
        .run(&[], None)
        .await
        .unwrap();
    h.worker.run_batch(batch(1)).await.unwrap();

    let reporter = StatusReporter::new(h.dyn_store(), h.dyn_targets(), h.worker.registry().clone());
    let report = reporter.report().await.unwrap();

    assert_eq!(report.pending, 2);
    assert_eq!(report.completed, 1);
    assert_eq!(report.total, 3);
    assert_eq!(report.selected_provider.as_deref(), Some("stable-diffusion"));
    let estimate = report.estimated_remaining_cost.unwrap();
    assert!((estimate - 0.004).abs() < 1e-9);

    assert_eq!(report.spend.len(), 1);
    assert_eq!(report.spend[0].completed, 1);

    assert_eq!(report.coverage.len(), 3);
    let with_image: i64 = report.coverage.iter().map(|c| c.with_image).sum();
    // Hemp Rope plus the job just completed
    assert_eq!(with_image, 2);
}

#[tokio::test]
async fn test_reclaimed_job_keeps_the_winning_result() {
    let store = Arc::new(MemoryJobStore::new(Duration::from_millis(100)));
    let targets = Arc::new(hemp_image_queue::services::targets::MemoryTargets::new(catalog()));
    let slow = Worker::new(
        store.clone(),
        targets.clone(),
        single(
            stable_diffusion(),
            Arc::new(DelayedProvider {
                delay: Duration::from_millis(400),
                url: Some("https://images.example.com/slow-a.png"),
            }),
        ),
        Duration::from_secs(1),
    );
    let fast = Worker::new(
        store.clone(),
        targets.clone(),
        single(stable_diffusion(), Arc::new(UrlProvider::default())),
        Duration::from_secs(1),
    );
    let target = TargetRef {
        kind: TargetKind::PlantType,
        id: 10,
    };
    let job_id = store
        .enqueue(NewJob::for_prompt("Fiber hemp field").with_target(target))
        .await
        .unwrap();

    let first = tokio::spawn(async move { slow.run_batch(batch(1)).await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = fast.run_batch(batch(1)).await.unwrap();
    assert_eq!(second.succeeded, 1);

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.processed, 1);
    assert_eq!(first.succeeded, 0);
    assert_eq!(first.failed, 0);
    assert_eq!(first.total_cost, 0.0);

    let job = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(
        job.image_url.as_deref(),
        Some("https://images.example.com/generated-0.png")
    );
    let entity = targets.get(target).await.unwrap();
    assert_eq!(entity.image_url, job.image_url);

    let spend = store.cost_summary().await.unwrap();
    assert_eq!(spend[0].completed, 1);
}

#[tokio::test]
async fn test_late_failure_of_resolved_job_is_ignored() {
    let store = Arc::new(MemoryJobStore::new(Duration::from_millis(100)));
    let targets = Arc::new(hemp_image_queue::services::targets::MemoryTargets::new(vec![]));
    let failing = Worker::new(
        store.clone(),
        targets.clone(),
        single(
            stable_diffusion(),
            Arc::new(DelayedProvider {
                delay: Duration::from_millis(300),
                url: None,
            }),
        ),
        Duration::from_secs(1),
    );
    let fast = Worker::new(
        store.clone(),
        targets,
        single(stable_diffusion(), Arc::new(UrlProvider::default())),
        Duration::from_secs(1),
    );
    let taken_over = store
        .enqueue(NewJob::for_prompt("hemp hurds").with_priority(5))
        .await
        .unwrap();
    let left_alone = store
        .enqueue(NewJob::for_prompt("hemp oil"))
        .await
        .unwrap();

    let first = tokio::spawn(async move { failing.run_batch(batch(2)).await });
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fast.run_batch(batch(1)).await.unwrap().succeeded, 1);

    // the conflict on the first job does not stop the second one
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.processed, 2);
    assert_eq!(first.failed, 1);
    assert_eq!(first.errors.len(), 1);
    assert!(first.errors[0].starts_with(&left_alone.to_string()));

    let job = store.get(taken_over).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error.is_none());

    let job = store.get(left_alone).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("quota exceeded"));
}

#[tokio::test]
async fn test_missing_target_fails_job_without_recording_url() {
    let provider = Arc::new(UrlProvider::default());
    let h = harness(catalog(), single(stable_diffusion(), provider.clone()));
    let job_id = h
        .store
        .enqueue(NewJob::for_prompt("Hemp Twine").with_target(TargetRef {
            kind: TargetKind::Product,
            id: 999,
        }))
        .await
        .unwrap();

    let report = h.worker.run_batch(batch(1)).await.unwrap();
    assert_eq!(provider.calls(), 1);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.provider_stats["stable-diffusion"].failed, 1);
    assert!(report.errors[0].contains("target update failed"));

    let job = h.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.image_url.is_none());
    assert!(job.cost.is_none());
    assert!(job.error.unwrap().starts_with("target update failed"));
}

#[tokio::test]
async fn test_provider_table_edits_apply_to_next_run() {
    let source = Arc::new(EditableProviders::new(vec![
        ProviderConfig::new("dall-e-3", 0.04, 90),
        stable_diffusion(),
    ]));
    let registry = no_providers().with_source(source.clone());
    let h = harness(vec![], registry);
    let reporter = StatusReporter::new(h.dyn_store(), h.dyn_targets(), h.worker.registry().clone());
    for prompt in ["hemp seeds", "hemp fiber"] {
        h.store.enqueue(NewJob::for_prompt(prompt)).await.unwrap();
    }

    let report = h.worker.run_batch(batch(1)).await.unwrap();
    assert_eq!(report.selected_provider.as_deref(), Some("dall-e-3"));
    assert_eq!(source.client("dall-e-3").calls(), 1);

    source.edit("dall-e-3", |row| row.is_active = false);

    let status = reporter.report().await.unwrap();
    assert_eq!(status.selected_provider.as_deref(), Some("stable-diffusion"));

    let report = h.worker.run_batch(batch(1)).await.unwrap();
    assert_eq!(report.selected_provider.as_deref(), Some("stable-diffusion"));
    assert_eq!(source.client("stable-diffusion").calls(), 1);
    assert_eq!(source.client("dall-e-3").calls(), 1);

    source.edit("stable-diffusion", |row| row.cost_per_image = 0.5);
    let status = reporter.report().await.unwrap();
    assert_eq!(status.estimated_remaining_cost, Some(0.0));
    assert!(h.worker.registry().configs().iter().any(|c| c.cost_per_image == 0.5));
}
