use chrono::TimeDelta;
use rstest::rstest;
use serde_json::json;

use crate::domain::{
    Checkpoint, GenerationMode, Profile, QuireError, StageArtifacts, TaskStatus, TriggerSource,
};
use crate::ports::{ProfileSource, TaskStore};
use crate::testing::{Harness, date, t0};

async fn impression_task(harness: &Harness) -> crate::domain::TaskId {
    harness.catalog.add_words(["tide", "ebb", "flow"]).await;
    harness
        .queue
        .enqueue_impression(date(), 2, TriggerSource::Manual)
        .await
        .unwrap()
}

#[tokio::test]
async fn enqueue_without_profiles_creates_the_default_one() {
    let harness = Harness::new();
    harness.catalog.mark_dataset(date()).await;

    let ids = harness
        .queue
        .enqueue(date(), TriggerSource::Cron, None, GenerationMode::Rss)
        .await
        .unwrap();

    assert_eq!(ids.len(), 1);
    let profiles = harness.catalog.active_profiles().await.unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].name, Profile::DEFAULT_NAME);

    let task = harness.queue.get_task(ids[0]).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.version, 0);
    assert_eq!(task.profile_id, Some(profiles[0].id));
    assert_eq!(task.trigger_source, TriggerSource::Cron);
    assert_eq!(task.created_at, t0());
    assert!(task.locked_until.is_none());
}

#[tokio::test]
async fn enqueue_creates_one_task_per_active_profile() {
    let harness = Harness::new();
    let a = harness.catalog.add_profile("a").await;
    let b = harness.catalog.add_profile("b").await;
    harness.catalog.mark_dataset(date()).await;

    let ids = harness
        .queue
        .enqueue(
            date(),
            TriggerSource::Manual,
            Some("focus on weather".into()),
            GenerationMode::Rss,
        )
        .await
        .unwrap();

    let tasks: Vec<_> = {
        let mut tasks = Vec::new();
        for id in &ids {
            tasks.push(harness.queue.get_task(*id).await.unwrap());
        }
        tasks
    };
    let profiles: Vec<_> = tasks.iter().map(|t| t.profile_id).collect();
    assert_eq!(profiles, vec![Some(a.id), Some(b.id)]);
    assert!(tasks
        .iter()
        .all(|t| t.llm_hint.as_deref() == Some("focus on weather")));
}

#[tokio::test]
async fn enqueue_requires_the_dataset_for_the_date() {
    let harness = Harness::new();
    harness.catalog.add_profile("a").await;

    let err = harness
        .queue
        .enqueue(date(), TriggerSource::Cron, None, GenerationMode::Rss)
        .await
        .unwrap_err();

    assert!(matches!(err, QuireError::Precondition(_)));
    assert_eq!(harness.queue.counts_by_status().await.unwrap().total(), 0);
}

#[tokio::test]
async fn impression_enqueue_against_an_empty_word_table_creates_nothing() {
    let harness = Harness::new();

    let err = harness
        .queue
        .enqueue_impression(date(), 10, TriggerSource::Manual)
        .await
        .unwrap_err();

    match err {
        QuireError::Precondition(message) => assert!(message.contains("word table is empty")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(harness.queue.counts_by_status().await.unwrap().total(), 0);
}

#[tokio::test]
async fn impression_enqueue_freezes_candidates_into_the_checkpoint() {
    let harness = Harness::new();
    let id = impression_task(&harness).await;

    let task = harness.queue.get_task(id).await.unwrap();
    assert_eq!(task.mode, GenerationMode::Impression);
    assert!(task.profile_id.is_none());

    let checkpoint = Checkpoint::from_value(&task.checkpoint).unwrap();
    match checkpoint.artifacts {
        StageArtifacts::Pending {
            candidate_words: Some(words),
        } => assert_eq!(words.len(), 2),
        other => panic!("unexpected artifacts: {other:?}"),
    }
}

#[tokio::test]
async fn impression_mode_through_enqueue_uses_the_configured_count() {
    let harness = Harness::new();
    harness.catalog.add_words(["tide", "ebb"]).await;

    let ids = harness
        .queue
        .enqueue(date(), TriggerSource::Cron, None, GenerationMode::Impression)
        .await
        .unwrap();

    assert_eq!(ids.len(), 1);
    let task = harness.queue.get_task(ids[0]).await.unwrap();
    assert_eq!(task.mode, GenerationMode::Impression);
}

#[tokio::test]
async fn each_claim_bumps_the_version_by_one() {
    let harness = Harness::new();
    let id = impression_task(&harness).await;

    let claimed = harness.queue.claim_task().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.status, TaskStatus::Running);
    assert_eq!(claimed.version, 1);
    assert_eq!(claimed.started_at, Some(t0()));
    assert_eq!(claimed.locked_until, Some(t0() + TimeDelta::minutes(5)));
}

#[tokio::test]
async fn stale_compare_and_swap_changes_nothing() {
    let harness = Harness::new();
    let id = impression_task(&harness).await;
    let candidate = harness.store.next_candidate(t0()).await.unwrap().unwrap();

    harness.queue.claim_task().await.unwrap().unwrap();
    let before = harness.queue.get_task(id).await.unwrap();

    let later = t0() + TimeDelta::minutes(10);
    let won = harness
        .store
        .try_claim(candidate, later, later + TimeDelta::minutes(5))
        .await
        .unwrap();

    assert!(!won);
    assert_eq!(harness.queue.get_task(id).await.unwrap(), before);
}

#[tokio::test]
async fn live_lease_blocks_every_other_claim() {
    let harness = Harness::new();
    harness.catalog.add_words(["tide"]).await;
    for _ in 0..2 {
        harness
            .queue
            .enqueue_impression(date(), 1, TriggerSource::Manual)
            .await
            .unwrap();
    }

    let first = harness.queue.claim_task().await.unwrap();
    assert!(first.is_some());

    harness.clock.advance(TimeDelta::minutes(4));
    assert!(harness.queue.claim_task().await.unwrap().is_none());
    assert!(harness.queue().claim_task().await.unwrap().is_none());

    let counts = harness.queue.counts_by_status().await.unwrap();
    assert_eq!(counts.running, 1);
    assert_eq!(counts.queued, 1);
}

#[rstest]
#[case(TimeDelta::minutes(5), false)]
#[case(TimeDelta::minutes(5) + TimeDelta::milliseconds(1), true)]
#[case(TimeDelta::hours(2), true)]
#[tokio::test]
async fn expired_lease_is_reclaimed_with_next_version(
    #[case] elapsed: TimeDelta,
    #[case] reclaimable: bool,
) {
    let harness = Harness::new();
    let id = impression_task(&harness).await;
    // claimed, then the worker dies without heartbeat or completion
    let first = harness.queue.claim_task().await.unwrap().unwrap();

    harness.clock.advance(elapsed);
    let reclaimed = harness.queue.claim_task().await.unwrap();

    if reclaimable {
        let reclaimed = reclaimed.unwrap();
        assert_eq!(reclaimed.id, id);
        assert_eq!(reclaimed.version, first.version + 1);
        assert_eq!(reclaimed.checkpoint, first.checkpoint);
        assert_eq!(reclaimed.started_at, Some(t0() + elapsed));
    } else {
        assert!(reclaimed.is_none());
    }
}

#[tokio::test]
async fn reclaim_clears_the_previous_attempts_error() {
    let harness = Harness::new();
    let id = impression_task(&harness).await;
    let mut crashed = harness.queue.claim_task().await.unwrap().unwrap();
    crashed.error_message = Some("worker lost".into());
    crashed.error_context = Some(json!({"pid": 42}));
    harness.store.inner.put(crashed).await;

    harness.clock.advance(TimeDelta::minutes(6));
    let reclaimed = harness.queue.claim_task().await.unwrap().unwrap();

    assert_eq!(reclaimed.id, id);
    assert_eq!(reclaimed.version, 2);
    assert!(reclaimed.error_message.is_none());
    assert!(reclaimed.error_context.is_none());
}

#[tokio::test]
async fn keep_alive_extends_only_running_tasks() {
    let harness = Harness::new();
    let id = impression_task(&harness).await;

    assert!(!harness.queue.keep_alive(id).await.unwrap());
    assert!(harness.queue.get_task(id).await.unwrap().locked_until.is_none());

    harness.queue.claim_task().await.unwrap().unwrap();
    harness.clock.advance(TimeDelta::minutes(3));
    assert!(harness.queue.keep_alive(id).await.unwrap());
    let task = harness.queue.get_task(id).await.unwrap();
    assert_eq!(
        task.locked_until,
        Some(t0() + TimeDelta::minutes(3) + TimeDelta::minutes(5))
    );
    assert_eq!(task.version, 1);

    harness.queue.complete(id).await.unwrap();
    let finished = harness.queue.get_task(id).await.unwrap();
    assert!(!harness.queue.keep_alive(id).await.unwrap());
    assert_eq!(harness.queue.get_task(id).await.unwrap(), finished);
}

#[tokio::test]
async fn complete_publishes_at_finish_time() {
    let harness = Harness::new();
    let id = impression_task(&harness).await;
    harness.queue.claim_task().await.unwrap().unwrap();
    harness.clock.advance(TimeDelta::minutes(2));

    assert!(harness.queue.complete(id).await.unwrap());

    let task = harness.queue.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.finished_at, Some(t0() + TimeDelta::minutes(2)));
    assert_eq!(task.published_at, task.finished_at);
    assert!(task.error_message.is_none());

    assert!(!harness.queue.complete(id).await.unwrap());
}

#[tokio::test]
async fn fail_records_the_error_and_releases_the_lease() {
    let harness = Harness::new();
    let id = impression_task(&harness).await;
    harness.queue.claim_task().await.unwrap().unwrap();

    let context = json!({"stage": "draft", "payload": {"raw": "..."}});
    assert!(harness
        .queue
        .fail(id, "draft is empty", Some(context.clone()))
        .await
        .unwrap());

    let task = harness.queue.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some("draft is empty"));
    assert_eq!(task.error_context, Some(context));
    assert_eq!(task.finished_at, Some(t0()));
    assert!(task.locked_until.is_none());

    harness.clock.advance(TimeDelta::hours(1));
    assert!(harness.queue.claim_task().await.unwrap().is_none());
    assert!(!harness.queue.fail(id, "again", None).await.unwrap());
}

#[tokio::test]
async fn queued_task_cannot_fail_before_it_is_claimed() {
    let harness = Harness::new();
    let id = impression_task(&harness).await;

    assert!(!harness.queue.fail(id, "x", None).await.unwrap());

    let task = harness.queue.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.error_message.is_none());
    assert!(task.finished_at.is_none());
    assert_eq!(harness.queue.claim_task().await.unwrap().unwrap().id, id);
}

#[tokio::test]
async fn claimed_finishes_are_guarded_on_version() {
    let harness = Harness::new();
    let id = impression_task(&harness).await;
    let first = harness.queue.claim_task().await.unwrap().unwrap();
    harness.clock.advance(TimeDelta::minutes(6));
    let second = harness.queue.claim_task().await.unwrap().unwrap();
    assert_eq!(second.version, first.version + 1);

    assert!(!harness
        .queue
        .fail_claimed(id, first.version, "late", None)
        .await
        .unwrap());
    assert!(!harness.queue.complete_claimed(id, first.version).await.unwrap());
    assert_eq!(
        harness.queue.get_task(id).await.unwrap().status,
        TaskStatus::Running
    );

    assert!(harness.queue.complete_claimed(id, second.version).await.unwrap());
    assert_eq!(
        harness.queue.get_task(id).await.unwrap().status,
        TaskStatus::Succeeded
    );
}

#[tokio::test]
async fn finishing_an_unknown_task_is_not_found() {
    let harness = Harness::new();
    let missing = crate::domain::TaskId::from_ulid(ulid::Ulid::new());

    assert!(matches!(
        harness.queue.complete(missing).await,
        Err(QuireError::NotFound(id)) if id == missing
    ));
    assert!(matches!(
        harness.queue.get_task(missing).await,
        Err(QuireError::NotFound(_))
    ));
}

#[tokio::test]
async fn claims_follow_creation_order() {
    let harness = Harness::new();
    harness.catalog.add_words(["tide"]).await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            harness
                .queue
                .enqueue_impression(date(), 1, TriggerSource::Cron)
                .await
                .unwrap(),
        );
    }

    let mut claimed = Vec::new();
    while let Some(task) = harness.queue.claim_task().await.unwrap() {
        claimed.push(task.id);
        harness.queue.complete(task.id).await.unwrap();
    }

    assert_eq!(claimed, ids);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_have_exactly_one_winner() {
    let harness = Harness::new();
    harness.catalog.add_words(["tide"]).await;
    for _ in 0..3 {
        harness
            .queue
            .enqueue_impression(date(), 1, TriggerSource::Cron)
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = harness.queue();
            tokio::spawn(async move { queue.claim_task().await })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        if let Some(task) = handle.await.unwrap().unwrap() {
            winners.push(task);
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].version, 1);
    assert_eq!(harness.queue.counts_by_status().await.unwrap().running, 1);
}

#[tokio::test(start_paused = true)]
async fn lost_races_are_retried_until_one_lands() {
    let harness = Harness::new();
    let id = impression_task(&harness).await;
    harness.store.lose_claim_races(2);

    let claimed = harness.queue.claim_task().await.unwrap().unwrap();

    assert_eq!(claimed.id, id);
    assert_eq!(claimed.version, 1);
    assert_eq!(harness.store.try_claim_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn steep_backoff_is_capped_instead_of_overflowing() {
    let mut config = crate::queue::QueueConfig::default();
    config.claim_retry.multiplier = 1e6;
    config.claim_retry.max_attempts = 40;
    let harness = Harness::with_config(config);
    impression_task(&harness).await;
    harness.store.lose_claim_races(100);

    let claimed = harness.queue.claim_task().await.unwrap();

    assert!(claimed.is_none());
    assert_eq!(harness.store.try_claim_calls(), 40);
}

#[tokio::test(start_paused = true)]
async fn claim_gives_up_after_the_configured_attempts() {
    let harness = Harness::new();
    let id = impression_task(&harness).await;
    harness.store.lose_claim_races(100);

    let claimed = harness.queue.claim_task().await.unwrap();

    assert!(claimed.is_none());
    assert_eq!(harness.store.try_claim_calls(), 5);
    let task = harness.queue.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.version, 0);
    assert!(task.error_message.is_none());
}
