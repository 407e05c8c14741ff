//! End-to-end download runs against scripted providers.

mod common;

use std::sync::Arc;

use common::{day, memory_cache, source_manager, symbols, test_config, Behavior, ScriptedProvider};
use tickvault_core::downloader::{DownloadJob, Downloader, InMemoryJobStore, JobStatus, JobStore};
use tickvault_core::Error;
use tickvault_market_data::{IssueClass, RequestFingerprint};

#[tokio::test]
async fn inconsistent_record_is_excluded_and_job_is_partial() {
    let provider = ScriptedProvider::new("UQER", Behavior::Succeed);
    provider.corrupt_row("AAA", day(3));

    let config = test_config(10);
    let cache = memory_cache();
    let jobs = Arc::new(InMemoryJobStore::new());
    let downloader = Downloader::new(
        source_manager(vec![provider], &[], &config),
        cache.clone(),
        jobs.clone(),
        &config,
    );

    let summary = downloader.run(&symbols(&["AAA"]), day(2), day(5)).await.unwrap();

    assert_eq!(summary.partial, 1);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.records_stored, 3);
    assert_eq!(summary.quality.count(IssueClass::Consistency), 1);
    assert_eq!(summary.quality.records_excluded, 1);

    let job = jobs.get_job(&summary.run_id, "AAA").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.partial);
    assert!(job.missing.is_empty());

    let cached = cache
        .get(&RequestFingerprint::for_price_series(&symbols(&["AAA"]), day(2), day(5)))
        .await
        .unwrap();
    let dates: Vec<_> = cached.as_prices().unwrap().iter().map(|r| r.date).collect();
    assert_eq!(dates, vec![day(2), day(4), day(5)]);
}

#[tokio::test]
async fn single_inconsistent_row_still_succeeds_as_partial() {
    let provider = ScriptedProvider::new("UQER", Behavior::Succeed);
    provider.corrupt_row("AAA", day(2));

    let config = test_config(10);
    let cache = memory_cache();
    let jobs = Arc::new(InMemoryJobStore::new());
    let downloader = Downloader::new(
        source_manager(vec![provider.clone()], &[], &config),
        cache.clone(),
        jobs.clone(),
        &config,
    );

    let summary = downloader.run(&symbols(&["AAA"]), day(2), day(2)).await.unwrap();

    assert_eq!(summary.partial, 1);
    assert_eq!(summary.failed_permanent, 0);
    assert_eq!(summary.records_stored, 0);
    assert_eq!(summary.quality.count(IssueClass::Consistency), 1);
    assert_eq!(provider.calls(), 1);

    let job = jobs.get_job(&summary.run_id, "AAA").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempt_count, 1);
    assert_eq!(job.missing, symbols(&["AAA"]));

    let fingerprint = RequestFingerprint::for_price_series(&symbols(&["AAA"]), day(2), day(2));
    assert!(cache.get(&fingerprint).await.is_none());
}

#[tokio::test]
async fn request_no_source_supports_fails_after_one_attempt() {
    let provider = ScriptedProvider::new("UQER", Behavior::Unsupported);

    let config = test_config(10);
    let jobs = Arc::new(InMemoryJobStore::new());
    let downloader = Downloader::new(
        source_manager(vec![provider.clone()], &[], &config),
        memory_cache(),
        jobs.clone(),
        &config,
    );

    let err = downloader.run(&symbols(&["AAA"]), day(2), day(3)).await.unwrap_err();
    let run_id = match err {
        Error::RunFailed { run_id, summary } => {
            assert_eq!(summary.failed_permanent, 1);
            run_id
        }
        other => panic!("expected RunFailed, got {:?}", other),
    };

    let job = jobs.get_job(&run_id, "AAA").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::FailedPermanent);
    assert_eq!(job.attempt_count, 1);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn rate_limited_source_fails_over_to_the_next() {
    let s1 = ScriptedProvider::new("S1", Behavior::RateLimited);
    let s2 = ScriptedProvider::new("S2", Behavior::Succeed);

    let config = test_config(10);
    let sources = source_manager(vec![s1.clone(), s2.clone()], &["S1", "S2"], &config);
    let jobs = Arc::new(InMemoryJobStore::new());
    let downloader = Downloader::new(sources.clone(), memory_cache(), jobs.clone(), &config);

    let summary = downloader.run(&symbols(&["AAA"]), day(2), day(3)).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!((s1.calls(), s2.calls()), (1, 1));
    assert_eq!(sources.health().failure_count("S1"), 1);
    assert_eq!(sources.health().failure_count("S2"), 0);

    let job = jobs.get_job(&summary.run_id, "AAA").unwrap().unwrap();
    assert_eq!(job.source.as_deref(), Some("S2"));
}

#[tokio::test]
async fn exhausted_retries_fail_permanently_and_are_not_resumed() {
    let provider = ScriptedProvider::new("UQER", Behavior::Succeed);
    provider.fail_symbol("XXX");

    let config = test_config(1);
    let jobs = Arc::new(InMemoryJobStore::new());
    let downloader = Downloader::new(
        source_manager(vec![provider.clone()], &[], &config),
        memory_cache(),
        jobs.clone(),
        &config,
    );

    let summary = downloader
        .run(&symbols(&["AAA", "XXX"]), day(2), day(3))
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed_permanent, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].job_key, "XXX");
    assert_eq!(summary.failures[0].attempts, 3);

    let job = jobs.get_job(&summary.run_id, "XXX").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::FailedPermanent);
    assert_eq!(job.attempt_count, 3);

    let calls_before = provider.calls();
    let resumed = downloader.resume(&summary.run_id).await.unwrap();
    assert_eq!(resumed.skipped, 2);
    assert_eq!(resumed.executed(), 0);
    assert_eq!(provider.calls(), calls_before);
}

#[tokio::test]
async fn resume_picks_up_interrupted_jobs_only() {
    let provider = ScriptedProvider::new("UQER", Behavior::Succeed);
    let config = test_config(1);
    let jobs = Arc::new(InMemoryJobStore::new());

    // State left behind by a process that died mid-run.
    let run_id = "run-crashed";
    let mut done = DownloadJob::new(run_id, symbols(&["AAA"]), day(2), day(3));
    done.claim().unwrap();
    done.succeed(2, Vec::new(), false).unwrap();
    let mut interrupted = DownloadJob::new(run_id, symbols(&["BBB"]), day(2), day(3));
    interrupted.claim().unwrap();
    let pending = DownloadJob::new(run_id, symbols(&["CCC"]), day(2), day(3));
    jobs.upsert_jobs(&[done, interrupted, pending]).await.unwrap();

    let downloader = Downloader::new(
        source_manager(vec![provider.clone()], &[], &config),
        memory_cache(),
        jobs.clone(),
        &config,
    );
    let summary = downloader.resume(run_id).await.unwrap();

    assert_eq!(summary.total_jobs, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(provider.calls(), 2);

    let bbb = jobs.get_job(run_id, "BBB").unwrap().unwrap();
    assert_eq!(bbb.status, JobStatus::Succeeded);
    assert_eq!(bbb.attempt_count, 2);

    let status = downloader.run_status(run_id).unwrap();
    assert!(status.is_complete());
    assert_eq!(status.progress_rate, 1.0);
}

#[tokio::test]
async fn auth_failure_surfaces_and_keeps_remaining_jobs() {
    let provider = ScriptedProvider::new("UQER", Behavior::Auth);
    let mut config = test_config(1);
    config.max_workers = 1;
    let jobs = Arc::new(InMemoryJobStore::new());
    let downloader = Downloader::new(
        source_manager(vec![provider.clone()], &[], &config),
        memory_cache(),
        jobs.clone(),
        &config,
    );

    let err = downloader
        .run(&symbols(&["AAA", "BBB", "CCC"]), day(2), day(3))
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(provider.calls(), 1);

    let run_id = jobs.list_runs().unwrap().pop().unwrap();
    let status = downloader.run_status(&run_id).unwrap();
    assert_eq!(status.failed_permanent, 1);
    assert_eq!(status.pending, 2);

    provider.set_behavior(Behavior::Succeed);
    let resumed = downloader.resume(&run_id).await.unwrap();
    assert_eq!(resumed.succeeded, 2);
    assert_eq!(resumed.skipped, 1);
}

#[tokio::test]
async fn every_job_failing_is_a_run_failure() {
    let provider = ScriptedProvider::new("UQER", Behavior::Transient);
    let config = test_config(1);
    let downloader = Downloader::new(
        source_manager(vec![provider], &[], &config),
        memory_cache(),
        Arc::new(InMemoryJobStore::new()),
        &config,
    );

    match downloader.run(&symbols(&["AAA", "BBB"]), day(2), day(3)).await {
        Err(Error::RunFailed { summary, .. }) => {
            assert_eq!(summary.failed_permanent, 2);
            assert_eq!(summary.failures.len(), 2);
        }
        other => panic!("expected RunFailed, got {:?}", other.map(|s| s.run_id)),
    }
}
