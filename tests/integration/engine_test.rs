//! Query Engine Integration Tests
//!
//! End-to-end runs of planning, execution, reflection/retry and synthesis
//! against mock capabilities and a scripted completion provider.

use std::sync::Arc;
use std::time::Duration;

use query_cascade::services::planning::{APOLOGY_CONFIDENCE, APOLOGY_MESSAGE, COMPLETION_FALLBACK};
use query_cascade::services::telemetry::{DecisionType, InteractionKind, TelemetryStats};
use query_cascade::{
    AppError, CapabilityRegistry, EngineConfig, ExpertiseLevel, MemorySink, QueryEngine,
    QuerySession, SourceKind, SubTaskStatus,
};

use crate::common::{failure, plan_json, reflection_json, text, MockCapability, MockProvider};

fn build(
    caps: Vec<Arc<MockCapability>>,
    provider: Arc<MockProvider>,
    config: EngineConfig,
) -> (QueryEngine, Arc<MemorySink>) {
    let mut registry = CapabilityRegistry::new();
    for cap in caps {
        registry.register(cap);
    }
    let sink = Arc::new(MemorySink::new());
    let engine = QueryEngine::new(registry, provider, config)
        .unwrap()
        .with_telemetry(sink.clone());
    (engine, sink)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_linear_plan_runs_in_order_without_retry() {
    let docs = Arc::new(
        MockCapability::new("document_search")
            .script("T1", vec![Ok(0.8)])
            .script("T2", vec![Ok(0.9)]),
    );
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[
            ("T1", "document_search", &[]),
            ("T2", "document_search", &["T1"]),
        ])),
        text(&reflection_json(0.85, false, None)),
        text("Caching is done with an LRU in front of the store."),
    ]));
    let (engine, _sink) = build(vec![docs.clone()], provider.clone(), EngineConfig::default());

    let mut session = QuerySession::new("How is caching done?", ExpertiseLevel::Student);
    let answer = engine.execute_session(&mut session).await.unwrap();

    let t1 = docs.spans("T1");
    let t2 = docs.spans("T2");
    assert_eq!((t1.len(), t2.len()), (1, 1));
    assert!(t2[0].start > t1[0].end, "T2 started before T1 finished");

    assert!(answer.retried_task_ids.is_empty());
    assert!((answer.confidence - 0.85).abs() < 1e-6);
    assert_eq!(answer.sources.len(), 2);
    assert!(!answer.synthesis_fallback);
    assert_eq!(provider.calls(), 3);

    // T2 received T1's output
    let t2_ctx = docs
        .contexts()
        .into_iter()
        .find(|c| c.task_id() == Some("T2"))
        .unwrap();
    assert_eq!(t2_ctx.metadata.dependency_outputs[0].task_id, "T1");
    assert_eq!(t2_ctx.user_expertise_level, ExpertiseLevel::Student);
}

#[tokio::test]
async fn test_failed_dependency_skips_and_apologizes() {
    let docs = Arc::new(
        MockCapability::new("document_search").script("T1", vec![Err("index offline".to_string())]),
    );
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[
            ("T1", "document_search", &[]),
            ("T2", "document_search", &["T1"]),
        ])),
        text(&reflection_json(0.5, false, None)),
    ]));
    let (engine, sink) = build(vec![docs.clone()], provider.clone(), EngineConfig::default());

    let mut session = QuerySession::new("What broke?", ExpertiseLevel::General);
    let answer = engine.execute_session(&mut session).await.unwrap();

    let plan = session.plan().unwrap();
    assert_eq!(plan.get("T1").unwrap().status, SubTaskStatus::Failed);
    assert_eq!(plan.get("T2").unwrap().status, SubTaskStatus::Skipped);
    assert_eq!(docs.dispatch_count(), 1);

    assert_eq!(answer.answer, APOLOGY_MESSAGE);
    assert_eq!(answer.confidence, APOLOGY_CONFIDENCE);
    assert!(answer.synthesis_fallback);
    // planning + reflection only
    assert_eq!(provider.calls(), 2);

    let journey = sink.journeys().pop().unwrap();
    assert!(!journey.success);
    assert_eq!(journey.subtask_outcomes.len(), 2);
}

#[tokio::test]
async fn test_planning_timeout_uses_single_task_plan() {
    let docs = Arc::new(MockCapability::new("document_search").confidence(0.9));
    let provider = Arc::new(
        MockProvider::new(vec![text("never delivered in time")])
            .with_delay(Duration::from_millis(300)),
    );
    let config = EngineConfig {
        completion_timeout_ms: 25,
        ..Default::default()
    };
    let (engine, sink) = build(vec![docs.clone()], provider, config);

    let mut session = QuerySession::new("Explain the index layout", ExpertiseLevel::Expert);
    let answer = engine.execute_session(&mut session).await.unwrap();

    let plan = session.plan().unwrap();
    assert!(plan.is_fallback);
    assert_eq!(plan.subtasks.len(), 1);
    assert_eq!(plan.complexity_score, 0.3);
    assert_eq!(plan.confidence_prediction, 0.7);
    assert_eq!(plan.subtasks[0].capability, "document_search");

    // reflection and synthesis time out as well; raw content is returned
    assert!(answer.synthesis_fallback);
    assert!(answer.answer.contains("document_search findings"));
    // mean 0.9 blended with the fallback verdict's 0.6
    assert!((answer.confidence - 0.75).abs() < 1e-6);
    assert!(sink.journeys()[0].success);
}

#[tokio::test]
async fn test_cyclic_plan_is_rejected_before_dispatch() {
    let docs = Arc::new(MockCapability::new("document_search"));
    let provider = Arc::new(MockProvider::new(vec![text(&plan_json(&[
        ("T1", "document_search", &["T2"]),
        ("T2", "document_search", &["T1"]),
    ]))]));
    let (engine, sink) = build(vec![docs.clone()], provider.clone(), EngineConfig::default());

    let mut session = QuerySession::new("Loop?", ExpertiseLevel::General);
    let err = engine.execute_session(&mut session).await.unwrap_err();

    match err {
        AppError::CyclicPlan(ids) => assert_eq!(ids, vec!["T1", "T2"]),
        other => panic!("expected a cyclic plan error, got {other:?}"),
    }
    assert_eq!(docs.dispatch_count(), 0);
    assert_eq!(provider.calls(), 1);
    assert!(sink.interactions().is_empty());

    let journey = session.journey().unwrap();
    assert!(!journey.success);
    assert!(journey.error_message.as_deref().unwrap().contains("cycle"));
    assert!(session
        .plan()
        .unwrap()
        .subtasks
        .iter()
        .all(|t| t.status == SubTaskStatus::Pending));
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_low_confidence_task_is_retried_when_reflection_asks() {
    let docs = Arc::new(
        MockCapability::new("document_search")
            .script("T1", vec![Ok(0.4), Ok(0.9)])
            .script("T2", vec![Ok(0.95)]),
    );
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[
            ("T1", "document_search", &[]),
            ("T2", "document_search", &[]),
        ])),
        text(&reflection_json(0.7, true, Some("search with broader terms"))),
        text("answer"),
    ]));
    let (engine, sink) = build(vec![docs.clone()], provider.clone(), EngineConfig::default());

    let answer = engine
        .execute_query("q", ExpertiseLevel::General, Some("q-retry".to_string()))
        .await
        .unwrap();

    assert_eq!(answer.query_id, "q-retry");
    assert_eq!(answer.retried_task_ids, vec!["T1"]);
    assert_eq!(docs.spans("T1").len(), 2);
    assert_eq!(docs.spans("T2").len(), 1);
    // reflection is not re-run after the single retry pass
    assert_eq!(provider.calls(), 3);
    // (0.9 + 0.95) / 2 blended with 0.7
    assert!((answer.confidence - 0.8125).abs() < 1e-6);

    let retries: Vec<_> = sink
        .interactions()
        .into_iter()
        .filter(|i| i.kind == InteractionKind::Retry)
        .collect();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].task_id, "T1");
}

#[tokio::test]
async fn test_no_retry_when_nothing_is_eligible() {
    let docs = Arc::new(MockCapability::new("document_search").confidence(0.9));
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[("T1", "document_search", &[])])),
        text(&reflection_json(0.9, true, Some("try again"))),
        text("answer"),
    ]));
    let (engine, _sink) = build(vec![docs.clone()], provider, EngineConfig::default());

    let answer = engine
        .execute_query("q", ExpertiseLevel::General, None)
        .await
        .unwrap();
    assert!(answer.retried_task_ids.is_empty());
    assert_eq!(docs.dispatch_count(), 1);
}

#[tokio::test]
async fn test_no_retry_when_reflection_declines() {
    let docs = Arc::new(
        MockCapability::new("document_search").script("T1", vec![Err("flaky".to_string())]),
    );
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[
            ("T1", "document_search", &[]),
            ("T2", "document_search", &[]),
        ])),
        text(&reflection_json(0.6, false, None)),
        text("partial answer"),
    ]));
    let (engine, _sink) = build(vec![docs.clone()], provider, EngineConfig::default());

    let answer = engine
        .execute_query("q", ExpertiseLevel::General, None)
        .await
        .unwrap();
    assert!(answer.retried_task_ids.is_empty());
    assert_eq!(docs.dispatch_count(), 2);
    assert_eq!(answer.answer, "partial answer");
}

#[tokio::test]
async fn test_retry_reassigns_to_named_capability() {
    let docs = Arc::new(
        MockCapability::new("document_search").script("T1", vec![Err("no hits".to_string())]),
    );
    let code = Arc::new(MockCapability::new("code_analysis").confidence(0.85));
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[("T1", "document_search", &[])])),
        text(&reflection_json(
            0.5,
            true,
            Some("The docs have nothing; switch T1 to code_analysis"),
        )),
        text("found it in the code"),
    ]));
    let (engine, sink) = build(
        vec![docs.clone(), code.clone()],
        provider,
        EngineConfig::default(),
    );

    let mut session = QuerySession::new("Where is the retry loop?", ExpertiseLevel::Expert);
    let answer = engine.execute_session(&mut session).await.unwrap();

    let t1 = session.plan().unwrap().get("T1").unwrap();
    assert_eq!(t1.capability, "code_analysis");
    assert_eq!(t1.status, SubTaskStatus::Completed);
    assert_eq!(t1.attempts, 2);
    assert_eq!(code.dispatch_count(), 1);
    assert_eq!(answer.retried_task_ids, vec!["T1"]);

    let retry_decision = sink
        .decisions()
        .into_iter()
        .find(|d| d.decision_type == DecisionType::RetryDecision)
        .unwrap();
    assert!(retry_decision.reasoning.contains("document_search -> code_analysis"));
}

#[tokio::test]
async fn test_second_retry_pass_reruns_reflection() {
    let docs = Arc::new(
        MockCapability::new("document_search").script("T1", vec![Ok(0.2), Ok(0.3), Ok(0.9)]),
    );
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[("T1", "document_search", &[])])),
        text(&reflection_json(0.4, true, Some("retry"))),
        text(&reflection_json(0.5, true, Some("retry once more"))),
        text("answer"),
    ]));
    let config = EngineConfig {
        max_retry_passes: 2,
        ..Default::default()
    };
    let (engine, _sink) = build(vec![docs.clone()], provider.clone(), config);

    let answer = engine
        .execute_query("q", ExpertiseLevel::General, None)
        .await
        .unwrap();
    assert_eq!(docs.spans("T1").len(), 3);
    assert_eq!(answer.retried_task_ids, vec!["T1"]);
    assert_eq!(provider.calls(), 4);
    assert!((answer.confidence - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn test_failed_retry_keeps_output_consumed_by_dependents() {
    let docs = Arc::new(
        MockCapability::new("document_search")
            .script("T1", vec![Ok(0.4), Err("index timeout".to_string())])
            .script("T2", vec![Ok(0.9)]),
    );
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[
            ("T1", "document_search", &[]),
            ("T2", "document_search", &["T1"]),
        ])),
        text(&reflection_json(0.6, true, Some("search T1 again"))),
        text("final"),
    ]));
    let (engine, _sink) = build(vec![docs.clone()], provider, EngineConfig::default());

    let mut session = QuerySession::new("q", ExpertiseLevel::General);
    let answer = engine.execute_session(&mut session).await.unwrap();

    let plan = session.plan().unwrap();
    let t1 = plan.get("T1").unwrap();
    let t2 = plan.get("T2").unwrap();
    assert_eq!(docs.spans("T1").len(), 2);
    assert_eq!(t1.status, SubTaskStatus::Completed);
    assert_eq!(t1.confidence, Some(0.4));
    assert!(t1.error_message.as_deref().unwrap().contains("index timeout"));
    assert_eq!(t2.status, SubTaskStatus::Completed);

    // T2 consumed exactly the output T1 still carries
    let t2_ctx = docs
        .contexts()
        .into_iter()
        .find(|c| c.task_id() == Some("T2"))
        .unwrap();
    assert_eq!(
        t2_ctx.metadata.dependency_outputs[0].content,
        t1.output.as_ref().unwrap().content
    );

    // no completed subtask sits on top of a dependency that is not completed
    for task in plan.completed() {
        for dep in &task.dependencies {
            assert_eq!(plan.get(dep).unwrap().status, SubTaskStatus::Completed);
        }
    }

    assert_eq!(answer.answer, "final");
    assert_eq!(answer.retried_task_ids, vec!["T1"]);
    // (0.4 + 0.9) / 2 blended with 0.6
    assert!((answer.confidence - 0.625).abs() < 1e-6);
}

#[tokio::test]
async fn test_failed_retry_of_only_task_does_not_apologize() {
    let docs = Arc::new(
        MockCapability::new("document_search")
            .script("T1", vec![Ok(0.4), Err("timeout".to_string())]),
    );
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[("T1", "document_search", &[])])),
        text(&reflection_json(0.5, true, Some("try again"))),
        text("answer from the first attempt"),
    ]));
    let (engine, sink) = build(vec![docs.clone()], provider.clone(), EngineConfig::default());

    let answer = engine
        .execute_query("q", ExpertiseLevel::General, None)
        .await
        .unwrap();

    assert_ne!(answer.answer, APOLOGY_MESSAGE);
    assert_eq!(answer.answer, "answer from the first attempt");
    assert!(!answer.synthesis_fallback);
    assert_eq!(answer.sources.len(), 1);
    assert!((answer.confidence - 0.45).abs() < 1e-6);
    assert_eq!(provider.calls(), 3);

    let journey = sink.journeys().pop().unwrap();
    assert!(journey.success);
    let retry = sink
        .interactions()
        .into_iter()
        .find(|i| i.kind == InteractionKind::Retry)
        .unwrap();
    assert!(!retry.success);
}

#[tokio::test]
async fn test_unknown_dependency_falls_back_to_single_task_plan() {
    let docs = Arc::new(MockCapability::new("document_search").confidence(0.8));
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[
            ("T1", "document_search", &[]),
            ("T2", "document_search", &["T9"]),
        ])),
        text(&reflection_json(0.8, false, None)),
        text("answer"),
    ]));
    let (engine, _sink) = build(vec![docs.clone()], provider, EngineConfig::default());

    let mut session = QuerySession::new("q", ExpertiseLevel::General);
    engine.execute_session(&mut session).await.unwrap();

    let plan = session.plan().unwrap();
    assert!(plan.is_fallback);
    assert_eq!(plan.subtasks.len(), 1);
    assert!(plan.get("T2").is_none());
    assert_eq!(docs.dispatch_count(), 1);
}

// ============================================================================
// Fallbacks, cancellation, telemetry
// ============================================================================

#[tokio::test]
async fn test_unregistered_capability_without_default_uses_completion() {
    // the default capability (document_search) is not registered either
    let code = Arc::new(MockCapability::new("code_analysis"));
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[("T1", "image_analysis", &[])])),
        text("The chart shows a rising trend."),
        text(&reflection_json(0.6, false, None)),
        text("The chart rises."),
    ]));
    let (engine, sink) = build(vec![code.clone()], provider.clone(), EngineConfig::default());

    let mut session = QuerySession::new("What does the chart show?", ExpertiseLevel::General);
    let answer = engine.execute_session(&mut session).await.unwrap();

    let t1 = session.plan().unwrap().get("T1").unwrap();
    assert_eq!(t1.status, SubTaskStatus::Completed);
    assert_eq!(t1.confidence, Some(0.6));
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].kind, SourceKind::CompletionFallback);
    assert_eq!(
        answer.sources[0].source_label,
        format!("{}:image_analysis", COMPLETION_FALLBACK)
    );
    assert_eq!(sink.interactions()[0].capability, COMPLETION_FALLBACK);
    assert_eq!(code.dispatch_count(), 0);
    assert_eq!(provider.calls(), 4);
}

#[tokio::test]
async fn test_cancellation_skips_pending_work() {
    let docs = Arc::new(MockCapability::new("document_search").delay(Duration::from_secs(2)));
    let provider = Arc::new(MockProvider::new(vec![text(&plan_json(&[
        ("T1", "document_search", &[]),
        ("T2", "document_search", &[]),
        ("T3", "document_search", &["T1", "T2"]),
    ]))]));
    let (engine, sink) = build(vec![docs.clone()], provider, EngineConfig::default());

    let mut session = QuerySession::new("slow question", ExpertiseLevel::General);
    let token = session.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let started = std::time::Instant::now();
    let err = engine.execute_session(&mut session).await.unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2));

    let plan = session.plan().unwrap();
    assert!(plan.subtasks.iter().all(|t| t.status == SubTaskStatus::Skipped));
    let journey = sink.journeys().pop().unwrap();
    assert!(!journey.success);
    assert_eq!(journey.error_message.as_deref(), Some("Query cancelled"));
}

#[tokio::test]
async fn test_journey_and_stats_cover_the_whole_query() {
    let docs = Arc::new(
        MockCapability::new("document_search")
            .script("T2", vec![Err("timeout upstream".to_string())]),
    );
    let provider = Arc::new(MockProvider::new(vec![
        text(&plan_json(&[
            ("T1", "document_search", &[]),
            ("T2", "document_search", &[]),
        ])),
        failure("reflection unavailable"),
        text("answer"),
    ]));
    let (engine, sink) = build(vec![docs], provider, EngineConfig::default());

    let mut session = QuerySession::new("q", ExpertiseLevel::General).with_query_id("journey-1");
    engine.execute_session(&mut session).await.unwrap();

    let journey = session.journey().unwrap();
    assert_eq!(journey.query_id, "journey-1");
    assert!(journey.success);
    assert_eq!(journey.interactions.len(), 2);
    assert_eq!(
        journey.plan_id.as_deref(),
        Some(session.plan().unwrap().id.as_str())
    );
    let kinds: Vec<DecisionType> = journey.decisions.iter().map(|d| d.decision_type).collect();
    assert_eq!(
        kinds,
        vec![
            DecisionType::CapabilitySelection,
            DecisionType::ConfidenceEvaluation,
            DecisionType::ResponseGeneration,
        ]
    );

    let stats = TelemetryStats::from_events(&sink.events());
    let docs_stats = &stats.capabilities["document_search"];
    assert_eq!(docs_stats.dispatches, 2);
    assert_eq!(docs_stats.failures, 1);
    assert!((docs_stats.success_rate() - 0.5).abs() < 1e-9);
    assert_eq!(stats.queries, 1);
    assert_eq!(stats.decision_counts[&DecisionType::CapabilitySelection], 1);
}
