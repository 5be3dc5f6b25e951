//! Executor Property Tests
//!
//! Random dependency graphs with random failures: every subtask ends in a
//! terminal state, nothing starts before its dependencies finished, and a
//! subtask whose dependency did not complete is skipped without dispatch.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use query_cascade::services::planning::{PlanExecutor, RunContext};
use query_cascade::services::telemetry::JourneyRecorder;
use query_cascade::{
    CapabilityRegistry, EngineConfig, ExecutionPlan, ExpertiseLevel, NoopSink, SubTask,
    SubTaskStatus,
};

use crate::common::{MockCapability, MockProvider};

#[derive(Debug, Clone)]
struct Graph {
    /// `deps[i]` only holds indices below `i`.
    deps: Vec<Vec<usize>>,
    fails: Vec<bool>,
}

fn graph_strategy() -> impl Strategy<Value = Graph> {
    (1usize..8).prop_flat_map(|n| {
        (
            prop::collection::vec(any::<bool>(), n * n),
            prop::collection::vec(prop::bool::weighted(0.25), n),
        )
            .prop_map(move |(edges, fails)| {
                let deps = (0..n)
                    .map(|i| (0..i).filter(|&j| edges[i * n + j]).collect())
                    .collect();
                Graph { deps, fails }
            })
    })
}

fn task_id(i: usize) -> String {
    format!("t{}", i)
}

fn expected_statuses(graph: &Graph) -> Vec<SubTaskStatus> {
    let mut statuses: Vec<SubTaskStatus> = Vec::with_capacity(graph.fails.len());
    for (i, deps) in graph.deps.iter().enumerate() {
        let ready = deps
            .iter()
            .all(|&j| statuses[j] == SubTaskStatus::Completed);
        statuses.push(match (ready, graph.fails[i]) {
            (false, _) => SubTaskStatus::Skipped,
            (true, true) => SubTaskStatus::Failed,
            (true, false) => SubTaskStatus::Completed,
        });
    }
    statuses
}

fn run_graph(graph: &Graph) -> (ExecutionPlan, Arc<MockCapability>) {
    let mut cap = MockCapability::new("document_search").delay(Duration::from_millis(1));
    for (i, fail) in graph.fails.iter().enumerate() {
        if *fail {
            cap = cap.script(&task_id(i), vec![Err("scripted failure".to_string())]);
        }
    }
    let cap = Arc::new(cap);

    let registry = Arc::new(CapabilityRegistry::new().with(cap.clone()));
    let executor = PlanExecutor::new(
        registry,
        Arc::new(MockProvider::new(vec![])),
        Arc::new(EngineConfig::default()),
    );

    // plan order is the reverse of the dependency order
    let subtasks = (0..graph.fails.len())
        .rev()
        .map(|i| {
            SubTask::new(task_id(i), format!("step {}", i), "document_search")
                .with_dependencies(graph.deps[i].iter().map(|&j| task_id(j)))
        })
        .collect();
    let mut plan = ExecutionPlan::new("property query", "random graph").with_subtasks(subtasks);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let run = RunContext::new("prop", ExpertiseLevel::General);
    let mut journey = JourneyRecorder::new(
        "prop",
        "property query",
        ExpertiseLevel::General,
        Arc::new(NoopSink),
    );
    runtime
        .block_on(executor.execute(&mut plan, &run, &mut journey))
        .unwrap();

    (plan, cap)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_execution_respects_dependencies(graph in graph_strategy()) {
        let (plan, cap) = run_graph(&graph);
        let expected = expected_statuses(&graph);

        for (i, deps) in graph.deps.iter().enumerate() {
            let task = plan.get(&task_id(i)).unwrap();
            prop_assert!(task.status.is_terminal());
            prop_assert_eq!(task.status, expected[i], "status of {}", task.id);

            let spans = cap.spans(&task.id);
            if task.status == SubTaskStatus::Skipped {
                prop_assert!(spans.is_empty(), "{} was dispatched but skipped", task.id);
                prop_assert!(task.output.is_none());
                continue;
            }

            prop_assert_eq!(spans.len(), 1);
            for &j in deps {
                let dep_spans = cap.spans(&task_id(j));
                prop_assert_eq!(dep_spans.len(), 1);
                prop_assert!(
                    dep_spans[0].end < spans[0].start,
                    "{} started before dependency {} finished",
                    task.id,
                    task_id(j)
                );
            }
        }
    }
}
