//! End-to-end batch execution through the public service API

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tasker_batch::config::{RetentionConfig, RetryQueueConfig, TaskerBatchConfig};
use tasker_batch::models::{
    AggregationMode, BatchResultStatus, RetryPolicy, StepOutcome, TemplateBatchConfig,
};
use tasker_batch::orchestration::ErrorKind;
use tasker_batch::registry::ServiceError;
use tasker_batch::state_machine::{BatchState, ContextState};
use tasker_batch::store::{BatchStore, CheckpointId, InMemoryDurableStore};

#[tokio::test]
async fn test_two_step_batch_with_retried_timeouts_succeeds() {
    let harness = Harness::new(
        ScriptedService::new("extractor").with_behavior("item-3", Behavior::HangTimes(2)),
        ScriptedService::new("writer"),
    );
    harness.register(article_template(2, 2, 3));

    let batch_id = harness
        .service
        .submit_batch(
            "article_generation",
            items(&["item-1", "item-2", "item-3", "item-4"]),
        )
        .await
        .unwrap();
    let result = harness.service.await_batch(batch_id).await.unwrap();

    assert_eq!(result.status, BatchResultStatus::Success);
    assert_eq!(result.counters.total, 4);
    assert_eq!(result.counters.completed, 4);
    assert!(result.errors.is_empty());

    let context = result
        .outcome_for("item-3")
        .and_then(|outcome| outcome.context.as_ref())
        .unwrap();
    let extract_attempts: Vec<_> = context
        .history
        .iter()
        .filter(|entry| entry.step == "extract")
        .collect();
    assert_eq!(extract_attempts.len(), 3);
    assert_eq!(extract_attempts[0].error_kind, Some(ErrorKind::ServiceTimeout));
    assert_eq!(extract_attempts[1].error_kind, Some(ErrorKind::ServiceTimeout));
    assert_eq!(extract_attempts[2].outcome, StepOutcome::Success);

    // generate consumed what extract committed
    assert_eq!(
        context.get("content.article"),
        Some(&json!(
            "generate[item-3]<-extract[item-3]<-topic of item-3"
        ))
    );

    let status = harness.service.get_batch_status(batch_id).await.unwrap();
    assert_eq!(status.state, BatchState::Completed);
    assert_eq!(status.result_status, Some(BatchResultStatus::Success));
}

#[tokio::test]
async fn test_zero_max_attempts_runs_step_once() {
    let harness = Harness::new(
        ScriptedService::new("extractor").with_behavior(
            "only",
            Behavior::AlwaysFail(ServiceError::Unavailable("down".into())),
        ),
        ScriptedService::new("writer"),
    );
    harness.register(article_template(1, 1, 0));

    let batch_id = harness
        .service
        .submit_batch("article_generation", items(&["only"]))
        .await
        .unwrap();
    let result = harness.service.await_batch(batch_id).await.unwrap();

    assert_eq!(result.status, BatchResultStatus::Failure);
    assert_eq!(harness.extractor.calls_for("only"), 1);
    assert_eq!(result.errors[0].kind, ErrorKind::ServiceUnavailable);

    let status = harness.service.get_batch_status(batch_id).await.unwrap();
    assert_eq!(status.state, BatchState::Failed);
}

#[tokio::test]
async fn test_persistent_retriable_failure_stops_at_max_attempts() {
    let harness = Harness::new(
        ScriptedService::new("extractor").with_behavior(
            "flaky",
            Behavior::AlwaysFail(ServiceError::Unavailable("down".into())),
        ),
        ScriptedService::new("writer"),
    );
    harness.register(article_template(1, 1, 3));

    let batch_id = harness
        .service
        .submit_batch("article_generation", items(&["flaky"]))
        .await
        .unwrap();
    let result = harness.service.await_batch(batch_id).await.unwrap();

    assert_eq!(harness.extractor.calls_for("flaky"), 3);
    assert_eq!(harness.writer.calls_for("flaky"), 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ErrorKind::ServiceUnavailable);
}

#[tokio::test]
async fn test_partial_failure_is_isolated() {
    let harness = Harness::new(
        ScriptedService::new("extractor"),
        ScriptedService::new("writer").with_behavior(
            "bad",
            Behavior::AlwaysFail(ServiceError::Failed("content policy".into())),
        ),
    );
    harness.register(article_template(2, 2, 3));

    let batch_id = harness
        .service
        .submit_batch("article_generation", items(&["good-1", "bad", "good-2"]))
        .await
        .unwrap();
    let result = harness.service.await_batch(batch_id).await.unwrap();

    assert_eq!(result.status, BatchResultStatus::Partial);
    assert_eq!(result.counters.completed, 2);
    assert_eq!(result.counters.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].item_id, "bad");
    assert_eq!(result.errors[0].kind, ErrorKind::ServiceError);

    // non-retriable kinds are not retried
    assert_eq!(harness.writer.calls_for("bad"), 1);

    let failed = result.outcome_for("bad").unwrap();
    assert_eq!(failed.status, ContextState::Failed);
    let context = failed.context.as_ref().unwrap();
    assert!(context.get("facts.summary").is_some());
    assert!(context.get("content.article").is_none());

    for id in ["good-1", "good-2"] {
        assert_eq!(result.outcome_for(id).unwrap().status, ContextState::Completed);
    }
}

#[tokio::test]
async fn test_missing_declared_output_is_a_contract_failure() {
    let harness = Harness::new(
        ScriptedService::new("extractor").with_behavior("mute", Behavior::OmitOutputs),
        ScriptedService::new("writer"),
    );
    harness.register(article_template(1, 1, 3));

    let batch_id = harness
        .service
        .submit_batch("article_generation", items(&["mute"]))
        .await
        .unwrap();
    let result = harness.service.await_batch(batch_id).await.unwrap();

    assert_eq!(result.errors[0].kind, ErrorKind::ServiceContract);
    assert_eq!(harness.writer.calls_for("mute"), 0);
}

#[tokio::test]
async fn test_saturated_retry_queue_fails_item() {
    let config = TaskerBatchConfig {
        retry_queue: RetryQueueConfig { max_size: 1 },
        backoff: tasker_batch::config::BackoffConfig {
            base_delay_ms: 300,
            max_delay_ms: 300,
            multiplier: 1.0,
            jitter_enabled: false,
            max_jitter: 0.0,
        },
        ..fast_config()
    };
    let flaky = || Behavior::FailTimes {
        times: 1,
        error: ServiceError::Unavailable("cold start".into()),
    };
    let harness = Harness::with_store(
        config,
        ScriptedService::new("extractor")
            .with_behavior("a", flaky())
            .with_behavior("b", flaky()),
        ScriptedService::new("writer"),
        Arc::new(InMemoryDurableStore::new()),
    );
    harness.register(article_template(2, 2, 3));

    let batch_id = harness
        .service
        .submit_batch("article_generation", items(&["a", "b"]))
        .await
        .unwrap();
    let result = harness.service.await_batch(batch_id).await.unwrap();

    assert_eq!(result.status, BatchResultStatus::Partial);
    assert_eq!(result.counters.completed, 1);
    assert_eq!(result.counters.failed, 1);
    assert_eq!(result.errors[0].kind, ErrorKind::RetryQueueSaturated);
}

#[tokio::test]
async fn test_cancellation_skips_items_not_yet_started() {
    let harness = Harness::new(
        ScriptedService::new("extractor").with_delay(Duration::from_millis(150)),
        ScriptedService::new("writer"),
    );
    harness.register(extract_only_template(TemplateBatchConfig {
        chunk_size: 1,
        max_parallel: 1,
        timeout_ms: 60_000,
        result_aggregation_mode: AggregationMode::Summary,
    }));

    let batch_id = harness
        .service
        .submit_batch("extract_only", items(&["a", "b", "c", "d", "e"]))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.service.cancel_batch(batch_id).await.unwrap();
    let result = harness.service.await_batch(batch_id).await.unwrap();

    // the in-flight step ran to completion
    assert_eq!(result.counters.completed, 1);
    assert_eq!(result.counters.skipped, 4);
    assert_eq!(result.skipped_items, vec!["b", "c", "d", "e"]);
    assert_eq!(result.status, BatchResultStatus::Partial);
    assert_eq!(harness.extractor.calls().len(), 1);

    let status = harness.service.get_batch_status(batch_id).await.unwrap();
    assert_eq!(status.state, BatchState::Cancelled);
    assert!(harness.service.cancel_batch(batch_id).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_batch_deadline_fails_unfinished_items() {
    let harness = Harness::new(
        ScriptedService::new("extractor")
            .with_behavior("a", Behavior::Hang)
            .with_behavior("b", Behavior::Hang),
        ScriptedService::new("writer"),
    );
    let mut template = article_template(1, 1, 3);
    template.batch_config.timeout_ms = 250;
    for step in &mut template.steps {
        step.timeout_ms = Some(10_000);
    }
    harness.register(template);

    let batch_id = harness
        .service
        .submit_batch("article_generation", items(&["a", "b"]))
        .await
        .unwrap();
    let result = harness.service.await_batch(batch_id).await.unwrap();

    assert_eq!(result.status, BatchResultStatus::Failure);
    assert_eq!(result.counters.failed, 2);
    assert!(result.errors.iter().all(|error| error.kind == ErrorKind::Timeout));
}

#[tokio::test]
async fn test_status_is_observable_while_running() {
    let harness = Harness::new(
        ScriptedService::new("extractor").with_delay(Duration::from_millis(100)),
        ScriptedService::new("writer"),
    );
    harness.register(article_template(1, 1, 3));

    let batch_id = harness
        .service
        .submit_batch("article_generation", items(&["a", "b"]))
        .await
        .unwrap();

    let running = harness.service.get_batch_status(batch_id).await.unwrap();
    assert_eq!(running.counters.total, 2);
    assert!(running.result_status.is_none());
    assert!(!running.state.is_terminal());
    assert!(harness.service.running_batches().contains(&batch_id));

    harness.service.await_batch(batch_id).await.unwrap();
    let finished = harness.service.get_batch_status(batch_id).await.unwrap();
    assert_eq!(finished.counters.completed, 2);
    assert_eq!(finished.state, BatchState::Completed);
}

#[tokio::test]
async fn test_unknown_batch_is_not_found() {
    let harness = Harness::new(ScriptedService::new("extractor"), ScriptedService::new("writer"));
    let missing = uuid::Uuid::new_v4();

    assert!(matches!(
        harness.service.get_batch_status(missing).await,
        Err(tasker_batch::TaskerBatchError::BatchNotFound { batch_id }) if batch_id == missing
    ));
    assert!(harness.service.await_batch(missing).await.is_err());
    assert!(!harness.service.delete_batch(missing).await.unwrap());
}

#[tokio::test]
async fn test_checkpoint_failure_is_terminal_for_items() {
    // the two submit-time checkpoints succeed, everything after fails
    let harness = Harness::with_store(
        fast_config(),
        ScriptedService::new("extractor"),
        ScriptedService::new("writer"),
        Arc::new(FailingStore::failing_context_writes_after(2)),
    );
    harness.register(article_template(2, 2, 3));

    let batch_id = harness
        .service
        .submit_batch("article_generation", items(&["a", "b"]))
        .await
        .unwrap();
    let result = harness.service.await_batch(batch_id).await.unwrap();

    assert_eq!(result.status, BatchResultStatus::Failure);
    assert!(result.errors.iter().all(|error| error.kind == ErrorKind::Storage));
    assert!(harness.extractor.calls().is_empty());
}

#[tokio::test]
async fn test_summary_mode_omits_contexts() {
    let harness = Harness::new(ScriptedService::new("extractor"), ScriptedService::new("writer"));
    harness.register(extract_only_template(TemplateBatchConfig {
        result_aggregation_mode: AggregationMode::Summary,
        ..Default::default()
    }));

    let batch_id = harness
        .service
        .submit_batch("extract_only", items(&["a", "b"]))
        .await
        .unwrap();
    let result = harness.service.await_batch(batch_id).await.unwrap();

    assert_eq!(result.status, BatchResultStatus::Success);
    assert!(result.items.iter().all(|outcome| outcome.context.is_none()));
    assert_eq!(result.summary.success_rate, 1.0);
}

#[tokio::test]
async fn test_retry_policy_allow_list_is_per_step() {
    let harness = Harness::new(
        ScriptedService::new("extractor").with_behavior(
            "x",
            Behavior::FailTimes {
                times: 1,
                error: ServiceError::Failed("transient model error".into()),
            },
        ),
        ScriptedService::new("writer"),
    );
    let mut template = article_template(1, 1, 3);
    template.steps[0].retry_policy = RetryPolicy::new(3, vec![ErrorKind::ServiceError]);
    harness.register(template);

    let batch_id = harness
        .service
        .submit_batch("article_generation", items(&["x"]))
        .await
        .unwrap();
    let result = harness.service.await_batch(batch_id).await.unwrap();

    assert_eq!(result.status, BatchResultStatus::Success);
    assert_eq!(harness.extractor.calls_for("x"), 2);
}

#[tokio::test]
async fn test_delete_removes_finished_batch() {
    let harness = Harness::new(ScriptedService::new("extractor"), ScriptedService::new("writer"));
    harness.register(article_template(2, 2, 3));

    let batch_id = harness
        .service
        .submit_batch("article_generation", items(&["a"]))
        .await
        .unwrap();
    harness.service.await_batch(batch_id).await.unwrap();

    assert!(harness.service.delete_batch(batch_id).await.unwrap());
    assert!(harness.service.get_batch_status(batch_id).await.is_err());
}

#[tokio::test]
async fn test_field_update_during_running_step_survives_checkpoint() {
    let store = Arc::new(InMemoryDurableStore::new());
    let harness = Harness::with_store(
        fast_config(),
        ScriptedService::new("extractor").with_delay(Duration::from_millis(200)),
        ScriptedService::new("writer"),
        store.clone(),
    );
    harness.register(extract_only_template(TemplateBatchConfig {
        chunk_size: 1,
        max_parallel: 1,
        timeout_ms: 10_000,
        result_aggregation_mode: AggregationMode::Detailed,
    }));

    let batch_id = harness
        .service
        .submit_batch("extract_only", items(&["note"]))
        .await
        .unwrap();
    let record = BatchStore::new(store.clone(), RetentionConfig::default())
        .load(batch_id)
        .await
        .unwrap()
        .unwrap();
    let context_id = record.run.items[0].context_id;

    // annotate the item while its extract call is still in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    let change = harness
        .service
        .context_store()
        .update_field(context_id, "notes.reviewer", json!("approved"))
        .await
        .unwrap();
    assert_eq!(change.new, json!("approved"));

    let result = harness.service.await_batch(batch_id).await.unwrap();
    assert_eq!(result.status, BatchResultStatus::Success);

    let stored = harness
        .service
        .context_store()
        .load_checkpoint(CheckpointId(context_id))
        .await
        .unwrap();
    assert_eq!(stored.status, ContextState::Completed);
    assert_eq!(stored.get("notes.reviewer"), Some(&json!("approved")));
    assert!(stored.get("facts.summary").is_some());

    let outcome = result.outcome_for("note").unwrap().context.as_ref().unwrap();
    assert_eq!(outcome.get("notes.reviewer"), Some(&json!("approved")));
}

#[tokio::test]
async fn test_expired_records_are_evicted_after_retention() {
    let store = Arc::new(InMemoryDurableStore::with_sweep_interval(
        Duration::from_millis(100),
    ));
    let config = TaskerBatchConfig {
        retention: RetentionConfig {
            completed_ttl_seconds: 1,
            failed_ttl_seconds: 1,
        },
        ..fast_config()
    };
    let harness = Harness::with_store(
        config,
        ScriptedService::new("extractor"),
        ScriptedService::new("writer"),
        store.clone(),
    );
    harness.register(article_template(2, 2, 3));

    for keys in [["a1", "a2"], ["b1", "b2"], ["c1", "c2"]] {
        let batch_id = harness
            .service
            .submit_batch("article_generation", items(&keys))
            .await
            .unwrap();
        harness.service.await_batch(batch_id).await.unwrap();
    }
    // one batch record plus two contexts per batch
    assert_eq!(store.len(), 9);

    tokio::time::sleep(Duration::from_millis(1_300)).await;

    let batch_id = harness
        .service
        .submit_batch("article_generation", items(&["d1", "d2"]))
        .await
        .unwrap();
    harness.service.await_batch(batch_id).await.unwrap();

    assert_eq!(store.len(), 3);
}
