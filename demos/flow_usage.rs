//! Example usage of the flow builder, runner, and external job tracking

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use weir::{
    FlowBuilder, Input, JobRequest, JobStatus, MockJobService, RetryPolicy, RunConfig, Runner,
    TaskDef, TaskInputs,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weir=debug".into()),
        )
        .init();

    // ========================================
    // Flow construction
    // ========================================

    let mut builder = FlowBuilder::new("nightly-ingest");

    // A local task producing a config value
    let get_config = builder.add_task(TaskDef::new("get_config", |_inputs| async {
        Ok(json!({"cluster": "small", "date": "2026-08-07"}))
    }))?;

    // Data dependency: the input binding adds the edge automatically
    let run_now = builder.add_task(
        TaskDef::new("run_now", |inputs: TaskInputs| async move {
            let cluster = inputs
                .get(0)
                .and_then(|cfg| cfg["cluster"].as_str())
                .unwrap_or("default");
            Ok(json!(format!("prepared on {cluster}")))
        })
        .input(Input::output(&get_config))
        .retry(RetryPolicy::new(2, Duration::from_millis(100))),
    )?;

    // External jobs: their output is just an opaque handle, so ordering
    // comes from explicit edges. A stand-in service keeps this runnable
    // offline; swap in HttpJobService for a real endpoint.
    let service = Arc::new(MockJobService::new().with_job_id("42").with_statuses(vec![
        JobStatus::Running,
        JobStatus::Running,
        JobStatus::Succeeded,
    ]));
    let submit_a = builder.add_task(
        TaskDef::external(
            "submit_a",
            service.clone(),
            JobRequest::new("ingest-a", json!({"table": "events"})),
        )
        .poll_interval(Duration::from_millis(20))
        .timeout(Duration::from_secs(5)),
    )?;
    let submit_b = builder.add_task(
        TaskDef::external(
            "submit_b",
            Arc::new(MockJobService::new().with_statuses(vec![JobStatus::Succeeded])),
            JobRequest::new("ingest-b", json!({"table": "sessions"})),
        )
        .poll_interval(Duration::from_millis(20)),
    )?;

    builder.edge_between(&run_now, &submit_a);
    builder.edge_between(&submit_a, &submit_b);

    let flow = builder.build()?;
    println!("flow '{}' with {} tasks", flow.name(), flow.len());
    println!(
        "topological order: {:?}",
        flow.topological_order()
            .iter()
            .map(|id| id.as_ref())
            .collect::<Vec<_>>()
    );

    // ========================================
    // Execution
    // ========================================

    let runner = Runner::new(flow).with_config(RunConfig::default().with_max_concurrent_tasks(4));
    let report = runner.run().await?;

    println!("\nrun {} → {:?}", report.run_id, report.outcome);
    for task_id in ["get_config", "run_now", "submit_a", "submit_b"] {
        let record = report.record.get(task_id).expect("task was executed");
        println!(
            "  {:<12} {:<8} attempts={} output={}",
            task_id,
            record.state.to_string(),
            record.attempts,
            record
                .output
                .as_deref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    println!("\n{} events recorded", runner.event_log().len());

    Ok(())
}
