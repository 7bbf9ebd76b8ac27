// tests/pipeline_run.rs

use std::error::Error;
use std::time::Duration;

use anyhow::Result as AnyResult;
use async_trait::async_trait;

use certflow::task::{RunnableTask, TaskLog, TaskResults};
use certflow::{Pipeline, RunOptions, RunnableStatus};
use certflow_test_utils::tasks::{RecordingTask, entries, execution_log};
use certflow_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn fast_options() -> RunOptions {
    RunOptions {
        max_attempts: 1,
        retry_delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn chain_runs_in_dependency_order_and_feeds_results_downstream() -> TestResult {
    init_tracing();
    let trace = execution_log();

    let mut pipeline = Pipeline::new("chain");
    let a = pipeline.add_task(RecordingTask::new("A", trace.clone()))?;
    let b = pipeline.add_task(RecordingTask::new("B", trace.clone()))?;
    let c = pipeline.add_task(RecordingTask::new("C", trace.clone()))?;
    pipeline.add_dependency(b, a)?;
    pipeline.add_dependency(c, b)?;

    let status = with_timeout(pipeline.run(fast_options())).await?;
    assert_eq!(status, RunnableStatus::Passed);

    // Each run entry records the authors of the dependency results it saw.
    let runs: Vec<String> = entries(&trace)
        .into_iter()
        .filter(|e| e.starts_with("run:"))
        .collect();
    assert_eq!(runs, vec!["run:A<-", "run:B<-A", "run:C<-B"]);

    for id in [a, b, c] {
        assert_eq!(pipeline.node(id)?.status(), RunnableStatus::Completed);
    }
    Ok(())
}

#[tokio::test]
async fn failed_node_skips_its_whole_subtree() -> TestResult {
    init_tracing();
    let trace = execution_log();

    // A -> B(fails) -> C, plus D depending only on A.
    let mut pipeline = Pipeline::new("skip");
    let a = pipeline.add_task(RecordingTask::new("A", trace.clone()))?;
    let b = pipeline.add_task(RecordingTask::new("B", trace.clone()).failing(1))?;
    let c = pipeline.add_task(RecordingTask::new("C", trace.clone()))?;
    let d = pipeline.add_task(RecordingTask::new("D", trace.clone()))?;
    pipeline.add_dependency(b, a)?;
    pipeline.add_dependency(c, b)?;
    pipeline.add_dependency(d, a)?;

    let status = with_timeout(pipeline.run(fast_options())).await?;
    assert_eq!(status, RunnableStatus::Failed);

    assert_eq!(pipeline.node(b)?.status(), RunnableStatus::Failed);
    assert_eq!(pipeline.node(c)?.status(), RunnableStatus::Skipped);
    // The unrelated branch still completes.
    assert_eq!(pipeline.node(d)?.status(), RunnableStatus::Completed);

    // C's task logic never ran, and the skip reason is recorded.
    assert!(!entries(&trace).iter().any(|e| e.starts_with("run:C")));
    let c_state = pipeline.node(c)?.task_state();
    assert!(
        c_state
            .messages
            .iter()
            .any(|m| m.contains("upstream dependency 'B' failed"))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn independent_nodes_run_concurrently() -> TestResult {
    init_tracing();
    let trace = execution_log();

    let mut pipeline = Pipeline::new("parallel");
    let delay = Duration::from_secs(1);
    pipeline.add_task(RecordingTask::new("left", trace.clone()).with_delay(delay))?;
    pipeline.add_task(RecordingTask::new("right", trace.clone()).with_delay(delay))?;

    let started = tokio::time::Instant::now();
    let status = pipeline.run(fast_options()).await?;
    assert_eq!(status, RunnableStatus::Passed);

    // Sequential execution would need two full delays.
    assert!(started.elapsed() < delay * 2);
    Ok(())
}

#[tokio::test]
async fn retry_recovers_a_flaky_node() -> TestResult {
    init_tracing();
    let trace = execution_log();

    let mut pipeline = Pipeline::new("retry");
    let a = pipeline.add_task(RecordingTask::new("A", trace.clone()).failing(1))?;

    let options = RunOptions {
        max_attempts: 2,
        retry_delay: Duration::from_millis(10),
    };
    let status = with_timeout(pipeline.run(options)).await?;
    assert_eq!(status, RunnableStatus::Passed);

    let runs = entries(&trace)
        .iter()
        .filter(|e| e.starts_with("run:A"))
        .count();
    assert_eq!(runs, 2);

    // The failed first attempt stays in the error log.
    let state = pipeline.node(a)?.task_state();
    assert!(state.errors.iter().any(|e| e.contains("attempt 1")));
    Ok(())
}

#[tokio::test]
async fn prepare_failure_counts_as_node_failure() -> TestResult {
    init_tracing();
    let trace = execution_log();

    let mut pipeline = Pipeline::new("prep");
    let a = pipeline.add_task(RecordingTask::new("A", trace.clone()).failing_prepare())?;
    let b = pipeline.add_task(RecordingTask::new("B", trace.clone()))?;
    pipeline.add_dependency(b, a)?;

    let status = with_timeout(pipeline.run(fast_options())).await?;
    assert_eq!(status, RunnableStatus::Failed);
    assert_eq!(pipeline.node(a)?.status(), RunnableStatus::Failed);
    assert_eq!(pipeline.node(b)?.status(), RunnableStatus::Skipped);
    assert!(!entries(&trace).iter().any(|e| e.starts_with("run:A")));
    Ok(())
}

#[tokio::test]
async fn reset_allows_a_second_full_pass() -> TestResult {
    init_tracing();
    let trace = execution_log();

    let mut pipeline = Pipeline::new("rerun");
    let a = pipeline.add_task(RecordingTask::new("A", trace.clone()))?;
    let b = pipeline.add_task(RecordingTask::new("B", trace.clone()))?;
    pipeline.add_dependency(b, a)?;

    assert_eq!(
        with_timeout(pipeline.run(fast_options())).await?,
        RunnableStatus::Passed
    );

    pipeline.reset()?;
    assert_eq!(pipeline.state().status, RunnableStatus::NotStarted);
    assert_eq!(pipeline.node(a)?.status(), RunnableStatus::NotStarted);
    assert!(pipeline.node(a)?.results().is_none());

    assert_eq!(
        with_timeout(pipeline.run(fast_options())).await?,
        RunnableStatus::Passed
    );
    let runs = entries(&trace)
        .iter()
        .filter(|e| e.starts_with("run:"))
        .count();
    assert_eq!(runs, 4);
    Ok(())
}

#[tokio::test]
async fn resetting_a_failed_subtree_re_runs_only_that_subtree() -> TestResult {
    init_tracing();
    let trace = execution_log();

    // A -> B(fails once) -> C, plus D depending only on A.
    let mut pipeline = Pipeline::new("subtree");
    let a = pipeline.add_task(RecordingTask::new("A", trace.clone()))?;
    let b = pipeline.add_task(RecordingTask::new("B", trace.clone()).failing(1))?;
    let c = pipeline.add_task(RecordingTask::new("C", trace.clone()))?;
    let d = pipeline.add_task(RecordingTask::new("D", trace.clone()))?;
    pipeline.add_dependency(b, a)?;
    pipeline.add_dependency(c, b)?;
    pipeline.add_dependency(d, a)?;

    assert_eq!(
        with_timeout(pipeline.run(fast_options())).await?,
        RunnableStatus::Failed
    );
    assert_eq!(pipeline.node(c)?.status(), RunnableStatus::Skipped);

    // Only the failed node and its skipped dependents go back to NotStarted.
    pipeline.reset_node(b)?;
    assert_eq!(pipeline.node(b)?.status(), RunnableStatus::NotStarted);
    assert_eq!(pipeline.node(c)?.status(), RunnableStatus::NotStarted);
    assert_eq!(pipeline.node(a)?.status(), RunnableStatus::Completed);
    assert_eq!(pipeline.node(d)?.status(), RunnableStatus::Completed);

    assert_eq!(
        with_timeout(pipeline.run(fast_options())).await?,
        RunnableStatus::Passed
    );

    // Completed siblings satisfied their dependents without re-running.
    let run_count = |name: &str| {
        entries(&trace)
            .iter()
            .filter(|e| e.starts_with(&format!("run:{name}")))
            .count()
    };
    assert_eq!(run_count("A"), 1);
    assert_eq!(run_count("D"), 1);
    assert_eq!(run_count("B"), 2);
    assert_eq!(run_count("C"), 1);
    // C still received A's result through B on the second pass.
    assert!(entries(&trace).contains(&"run:C<-B".to_string()));
    Ok(())
}

#[tokio::test]
async fn empty_pipeline_run_is_a_no_op() -> TestResult {
    init_tracing();
    let mut pipeline = Pipeline::new("empty");
    let status = pipeline.run(fast_options()).await?;
    assert_eq!(status, RunnableStatus::NotStarted);
    Ok(())
}

/// A task that cancels the pipeline's token from inside its own run.
struct CancellingTask {
    token: tokio_util::sync::CancellationToken,
}

#[async_trait]
impl RunnableTask for CancellingTask {
    fn name(&self) -> &str {
        "canceller"
    }

    async fn prepare(&mut self, _log: &TaskLog) -> certflow::Result<()> {
        Ok(())
    }

    async fn run(&mut self, _log: &TaskLog, _input: &[TaskResults]) -> AnyResult<()> {
        self.token.cancel();
        Ok(())
    }

    fn results(&self) -> Option<TaskResults> {
        Some(TaskResults::new(serde_json::json!(null)))
    }
}

#[tokio::test]
async fn cancellation_stops_dispatch_of_pending_nodes() -> TestResult {
    init_tracing();
    let trace = execution_log();

    let mut pipeline = Pipeline::new("cancel");
    let token = pipeline.cancellation_token();
    let a = pipeline.add_task(CancellingTask { token })?;
    let b = pipeline.add_task(RecordingTask::new("B", trace.clone()))?;
    pipeline.add_dependency(b, a)?;

    let status = with_timeout(pipeline.run(fast_options())).await?;

    // A finished, but B was never dispatched.
    assert_eq!(status, RunnableStatus::Pending);
    assert_eq!(pipeline.node(b)?.status(), RunnableStatus::Pending);
    assert!(entries(&trace).is_empty());
    // The interrupted pass is not reported as completed.
    assert_eq!(pipeline.state().run_state, RunnableStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn snapshot_carries_aggregate_and_per_node_state() -> TestResult {
    init_tracing();
    let trace = execution_log();

    let mut pipeline = Pipeline::new("snapshot").with_description("wire shape check");
    let a = pipeline.add_task(RecordingTask::new("A", trace.clone()))?;
    let b = pipeline.add_task(RecordingTask::new("B", trace.clone()).failing(1))?;
    pipeline.add_dependency(b, a)?;

    with_timeout(pipeline.run(fast_options())).await?;

    let snapshot = serde_json::to_value(pipeline.serialize())?;
    assert_eq!(snapshot["status"]["status"], "Failed");
    assert_eq!(snapshot["status"]["runState"], "Completed");
    assert_eq!(snapshot["metadata"]["name"], "snapshot");

    let nodes = snapshot["nodes"].as_array().ok_or("nodes not an array")?;
    assert_eq!(nodes.len(), 2);
    // Topological order: A before its dependent B.
    assert_eq!(nodes[0]["name"], "A");
    assert_eq!(nodes[1]["name"], "B");
    assert_eq!(nodes[0]["finished"], true);
    assert_eq!(nodes[0]["task"]["state"]["status"], "Completed");
    assert_eq!(nodes[1]["task"]["state"]["status"], "Failed");
    // Two-axis state serializes camelCase on the wire.
    assert_eq!(nodes[1]["task"]["state"]["runState"], "Failed");
    assert_eq!(nodes[0]["task"]["state"]["runState"], "Completed");
    Ok(())
}

#[tokio::test]
async fn node_observers_fire_during_execution() -> TestResult {
    init_tracing();
    let trace = execution_log();

    let mut pipeline = Pipeline::new("observed");
    let a = pipeline.add_task(RecordingTask::new("A", trace.clone()))?;

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_by_observer = seen.clone();
    pipeline.observe_node(a, move |node| {
        seen_by_observer.lock().unwrap().push(node.status());
    })?;

    with_timeout(pipeline.run(fast_options())).await?;

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&RunnableStatus::Pending));
    assert_eq!(seen.last().copied(), Some(RunnableStatus::Completed));
    Ok(())
}
