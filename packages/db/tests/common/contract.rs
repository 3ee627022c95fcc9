//! Behaviour every [`db::JobStore`] must share, written once and run
//! against each backend.

use std::collections::HashSet;

use db::{ReclaimOutcome, StoreError};
use futures_util::future::join_all;
use queue_core::{JobState, ScoreBound, ScoredSet};
use serde_json::json;

use super::{StoreFixture, T0, TestResult, job, job_id, queue};

pub async fn test_fifo_lease_order<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");

    for (offset, id) in ["a", "b", "c"].into_iter().enumerate() {
        store.enqueue(&job("render", id), T0 + offset as i64).await?;
    }
    assert_eq!(store.list_queued(&q).await?, vec!["a", "b", "c"]);

    let first = store.lease_next(&q, T0 + 10).await?.unwrap();
    let second = store.lease_next(&q, T0 + 11).await?.unwrap();
    let third = store.lease_next(&q, T0 + 12).await?.unwrap();
    assert_eq!(first.job.id.as_str(), "a");
    assert_eq!(second.job.id.as_str(), "b");
    assert_eq!(third.job.id.as_str(), "c");
    assert_eq!(first.queued_at, T0);
    assert_eq!(first.leased_at, T0 + 10);
    assert_eq!(first.job.fields.get("command"), Some(&json!("run a")));

    assert!(store.lease_next(&q, T0 + 13).await?.is_none());
    Ok(())
}

pub async fn test_empty_queue_leases_nothing<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("empty");

    assert!(store.lease_next(&q, T0).await?.is_none());
    assert!(store.list_queued(&q).await?.is_empty());
    let leased = store
        .list_scored(&q, ScoredSet::Leased, ScoreBound::NegInfinity, ScoreBound::PosInfinity)
        .await?;
    assert!(leased.is_empty());
    Ok(())
}

pub async fn test_concurrent_leases_never_share_a_job<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");

    for i in 0..5 {
        store.enqueue(&job("render", &format!("job-{i}")), T0).await?;
    }

    let attempts = (0..8).map(|i| {
        let store = store.clone();
        let q = q.clone();
        async move { store.lease_next(&q, T0 + i).await }
    });
    let results = join_all(attempts).await;

    let mut leased = HashSet::new();
    let mut empty = 0;
    for result in results {
        match result? {
            Some(assignment) => assert!(leased.insert(assignment.job.id.to_string())),
            None => empty += 1,
        }
    }
    assert_eq!(leased.len(), 5);
    assert_eq!(empty, 3);
    Ok(())
}

pub async fn test_accept_and_progress<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");
    let id = job_id("a");

    store.enqueue(&job("render", "a"), T0).await?;

    // Progress while leased refreshes the lease heartbeat.
    store.lease_next(&q, T0 + 1).await?;
    assert!(store.report_progress(&q, &id, 5.0, T0 + 2).await?);
    let leased = store
        .list_scored(&q, ScoredSet::Leased, ScoreBound::NegInfinity, ScoreBound::PosInfinity)
        .await?;
    assert_eq!(leased[0].score, (T0 + 2) as f64);

    assert!(store.accept(&q, &id, T0 + 3).await?);
    assert!(!store.accept(&q, &id, T0 + 4).await?);

    assert!(store.report_progress(&q, &id, 42.0, T0 + 5).await?);
    assert!(store.report_progress(&q, &id, 17.0, T0 + 6).await?);

    let processing = store
        .list_scored(&q, ScoredSet::Processing, ScoreBound::NegInfinity, ScoreBound::PosInfinity)
        .await?;
    assert_eq!(processing.len(), 1);
    assert_eq!(processing[0].score, (T0 + 6) as f64);

    let progress = store
        .list_scored(&q, ScoredSet::Progress, ScoreBound::NegInfinity, ScoreBound::PosInfinity)
        .await?;
    assert_eq!(progress[0].score, 17.0);

    let record = store.get_record(&id).await?.unwrap();
    assert_eq!(record.state, JobState::Processing);
    assert_eq!(record.leased_at, Some(T0 + 1));
    assert_eq!(record.processing_at, Some(T0 + 3));
    Ok(())
}

pub async fn test_unknown_ids_are_not_mutated<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");
    let ghost = job_id("ghost");

    assert!(!store.accept(&q, &ghost, T0).await?);
    assert!(!store.report_progress(&q, &ghost, 50.0, T0).await?);

    for set in [ScoredSet::Leased, ScoredSet::Processing, ScoredSet::Progress] {
        let members = store
            .list_scored(&q, set, ScoreBound::NegInfinity, ScoreBound::PosInfinity)
            .await?;
        assert!(members.is_empty());
    }
    assert!(store.get_record(&ghost).await?.is_none());
    Ok(())
}

pub async fn test_complete_clears_every_state_set<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");
    let id = job_id("a");

    store.enqueue(&job("render", "a"), T0).await?;
    store.lease_next(&q, T0 + 1).await?;
    store.accept(&q, &id, T0 + 2).await?;
    store.report_progress(&q, &id, 90.0, T0 + 3).await?;

    let finished = job("render", "a").with_field("result", "ok");
    store.complete(&finished, T0 + 4).await?;

    for set in [ScoredSet::Leased, ScoredSet::Processing, ScoredSet::Progress] {
        let members = store
            .list_scored(&q, set, ScoreBound::NegInfinity, ScoreBound::PosInfinity)
            .await?;
        assert!(members.is_empty(), "{set:?} still holds the job");
    }

    let record = store.get_record(&id).await?.unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.completed_at, Some(T0 + 4));
    assert_eq!(record.job.fields.get("result"), Some(&json!("ok")));

    // A late heartbeat never resurrects the job.
    assert!(!store.report_progress(&q, &id, 99.0, T0 + 5).await?);
    Ok(())
}

pub async fn test_complete_without_lease_removes_queue_entry<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");

    store.enqueue(&job("render", "a"), T0).await?;
    store.complete(&job("render", "a"), T0 + 1).await?;

    assert!(store.list_queued(&q).await?.is_empty());
    assert!(store.lease_next(&q, T0 + 2).await?.is_none());
    Ok(())
}

pub async fn test_idle_timestamps_never_regress<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");

    assert!(store.record_idle(&q, "w1", T0 + 100).await?);
    assert!(!store.record_idle(&q, "w1", T0 + 50).await?);
    assert!(store.record_idle(&q, "w1", T0 + 100).await?);

    let idle = store
        .list_scored(&q, ScoredSet::Idle, ScoreBound::NegInfinity, ScoreBound::PosInfinity)
        .await?;
    assert_eq!(idle.len(), 1);
    assert_eq!(idle[0].score, (T0 + 100) as f64);
    Ok(())
}

pub async fn test_purge_removes_at_or_before_cutoff<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");

    store.record_idle(&q, "old", T0).await?;
    store.record_idle(&q, "edge", T0 + 10).await?;
    store.record_idle(&q, "fresh", T0 + 11).await?;

    assert_eq!(store.purge_idle(&q, T0 + 10).await?, 2);

    let idle = store
        .list_scored(&q, ScoredSet::Idle, ScoreBound::NegInfinity, ScoreBound::PosInfinity)
        .await?;
    let names: Vec<&str> = idle.iter().map(|m| m.member.as_str()).collect();
    assert_eq!(names, vec!["fresh"]);
    Ok(())
}

pub async fn test_idle_listing_bounds_are_inclusive<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");

    store.record_idle(&q, "w1", T0).await?;
    store.record_idle(&q, "w2", T0 + 5).await?;
    store.record_idle(&q, "w3", T0 + 10).await?;

    let window = store
        .list_scored(
            &q,
            ScoredSet::Idle,
            ScoreBound::At(T0 as f64),
            ScoreBound::At((T0 + 5) as f64),
        )
        .await?;
    let names: Vec<&str> = window.iter().map(|m| m.member.as_str()).collect();
    assert_eq!(names, vec!["w1", "w2"]);
    Ok(())
}

pub async fn test_stalled_lease_requeued_once<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");
    let id = job_id("a");

    store.enqueue(&job("render", "a"), T0).await?;
    store.enqueue(&job("render", "b"), T0).await?;
    store.lease_next(&q, T0).await?;

    // Not yet stalled: the cutoff is exclusive.
    assert!(store.reclaim_stalled(&q, T0, Some(5), T0 + 1).await?.is_empty());

    let reclaimed = store.reclaim_stalled(&q, T0 + 1, Some(5), T0 + 2).await?;
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].job_id, "a");
    assert_eq!(reclaimed[0].outcome, ReclaimOutcome::Requeued);
    assert_eq!(reclaimed[0].retry_count, 1);

    // A second sweep over the same window finds nothing.
    assert!(store.reclaim_stalled(&q, T0 + 1, Some(5), T0 + 3).await?.is_empty());

    assert_eq!(store.list_queued(&q).await?, vec!["b", "a"]);
    let record = store.get_record(&id).await?.unwrap();
    assert_eq!(record.state, JobState::Queued);
    assert_eq!(record.retry_count, 1);
    assert_eq!(record.leased_at, None);
    Ok(())
}

pub async fn test_concurrent_sweeps_requeue_once<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");

    store.enqueue(&job("render", "a"), T0).await?;
    store.lease_next(&q, T0).await?;

    let sweeps = (0..4).map(|_| {
        let store = store.clone();
        let q = q.clone();
        async move { store.reclaim_stalled(&q, T0 + 1, None, T0 + 2).await }
    });
    let total: usize = join_all(sweeps)
        .await
        .into_iter()
        .map(|result| result.map(|reclaimed| reclaimed.len()))
        .sum::<Result<usize, StoreError>>()?;

    assert_eq!(total, 1);
    assert_eq!(store.list_queued(&q).await?, vec!["a"]);
    Ok(())
}

pub async fn test_stalled_processing_job_requeued<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");
    let id = job_id("a");

    store.enqueue(&job("render", "a"), T0).await?;
    store.lease_next(&q, T0).await?;
    store.accept(&q, &id, T0 + 1).await?;
    store.report_progress(&q, &id, 30.0, T0 + 2).await?;

    let reclaimed = store.reclaim_stalled(&q, T0 + 3, Some(5), T0 + 4).await?;
    assert_eq!(reclaimed.len(), 1);

    let progress = store
        .list_scored(&q, ScoredSet::Progress, ScoreBound::NegInfinity, ScoreBound::PosInfinity)
        .await?;
    assert!(progress.is_empty());

    let record = store.get_record(&id).await?.unwrap();
    assert_eq!(record.processing_at, None);
    assert_eq!(record.state, JobState::Queued);
    Ok(())
}

pub async fn test_retry_limit_fails_job<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");
    let id = job_id("a");
    let max_retries = Some(2);

    store.enqueue(&job("render", "a"), T0).await?;

    let mut now = T0;
    let mut outcomes = Vec::new();
    for _ in 0..3 {
        store.lease_next(&q, now).await?.unwrap();
        now += 100;
        let reclaimed = store.reclaim_stalled(&q, now, max_retries, now).await?;
        outcomes.push(reclaimed[0].outcome);
    }

    assert_eq!(
        outcomes,
        vec![
            ReclaimOutcome::Requeued,
            ReclaimOutcome::Requeued,
            ReclaimOutcome::Failed
        ]
    );
    assert!(store.list_queued(&q).await?.is_empty());

    let record = store.get_record(&id).await?.unwrap();
    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.retry_count, 3);
    assert_eq!(record.failed_at, Some(now));
    Ok(())
}

pub async fn test_reenqueue_resets_record<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");
    let id = job_id("a");

    store.enqueue(&job("render", "a"), T0).await?;
    store.lease_next(&q, T0).await?;
    store.reclaim_stalled(&q, T0 + 1, None, T0 + 1).await?;

    store
        .enqueue(&job("render", "a").with_field("version", 2), T0 + 5)
        .await?;

    let record = store.get_record(&id).await?.unwrap();
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.queued_at, T0 + 5);
    assert_eq!(record.job.fields.get("version"), Some(&json!(2)));
    // Duplicate ids are not deduplicated.
    assert_eq!(store.list_queued(&q).await?, vec!["a", "a"]);
    Ok(())
}

pub async fn test_missing_document_is_corrupt_assignment<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");
    let id = job_id("a");

    store.enqueue(&job("render", "a"), T0).await?;
    store.drop_document(&id).await;

    let result = store.lease_next(&q, T0).await;
    assert!(matches!(
        result,
        Err(StoreError::CorruptAssignment { ref job_id }) if job_id == "a"
    ));
    Ok(())
}

pub async fn test_orphaned_lease_dropped_by_sweep<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");
    let id = job_id("a");

    store.enqueue(&job("render", "a"), T0).await?;
    store.lease_next(&q, T0).await?;
    store.drop_document(&id).await;

    let reclaimed = store.reclaim_stalled(&q, T0 + 1, None, T0 + 1).await?;
    assert_eq!(reclaimed[0].outcome, ReclaimOutcome::Orphaned);
    assert!(store.list_queued(&q).await?.is_empty());
    Ok(())
}

pub async fn test_registry_tracks_queues<S: StoreFixture>(store: &S) -> TestResult {

    store.enqueue(&job("beta", "b"), T0).await?;
    store.enqueue(&job("alpha", "a"), T0).await?;
    store.enqueue(&job("alpha", "c"), T0).await?;

    let names: Vec<String> = store.queues().await?.iter().map(ToString::to_string).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    Ok(())
}

pub async fn test_aged_heartbeat_is_reclaimed<S: StoreFixture>(store: &S) -> TestResult {
    let q = queue("render");

    store.enqueue(&job("render", "a"), T0).await?;
    store.lease_next(&q, T0 + 1_000).await?;
    store
        .set_score(&q, ScoredSet::Leased, "a", (T0 - 1) as f64)
        .await;

    let reclaimed = store.reclaim_stalled(&q, T0, Some(5), T0 + 1_000).await?;
    assert_eq!(reclaimed.len(), 1);
    Ok(())
}

pub async fn test_prune_keeps_queues_holding_jobs<S: StoreFixture>(store: &S) -> TestResult {
    let render = queue("render");
    let encode = queue("encode");

    store.enqueue(&job("render", "a"), T0).await?;
    store.enqueue(&job("encode", "b"), T0).await?;
    store.lease_next(&encode, T0).await?;

    // Queued and leased jobs keep their queues registered.
    assert!(!store.prune_queue(&render).await?);
    assert!(!store.prune_queue(&encode).await?);

    store.complete(&job("render", "a"), T0 + 1).await?;
    assert!(store.prune_queue(&render).await?);
    assert!(!store.prune_queue(&render).await?);

    // So does a processing job.
    store.accept(&encode, &job_id("b"), T0 + 2).await?;
    assert!(!store.prune_queue(&encode).await?);
    let names: Vec<String> = store.queues().await?.iter().map(ToString::to_string).collect();
    assert_eq!(names, vec!["encode"]);

    // Enqueue registers a pruned queue again.
    store.enqueue(&job("render", "c"), T0 + 3).await?;
    let names: Vec<String> = store.queues().await?.iter().map(ToString::to_string).collect();
    assert_eq!(names, vec!["encode", "render"]);
    Ok(())
}
