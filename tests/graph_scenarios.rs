//! End-to-end graph runs against a local HTTP server.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{with_timeout, TestServer};
use stampede::reporting::MemoryReporter;
use stampede::stages::StageState;
use stampede::{
    Action, ContextValue, ErrorKind, Graph, GraphBuilder, GraphStatus, Hook, PersonaConfig, PluginRegistry,
    RunOptions, StageBuilder, StageType,
};

fn persona(batch_size: usize, total: Duration) -> PersonaConfig {
    PersonaConfig::new(batch_size, total)
        .with_batch_interval(Duration::from_millis(50))
        .with_graceful_stop(Duration::from_millis(200))
}

fn memory_plugins() -> (PluginRegistry, MemoryReporter) {
    let reporter = MemoryReporter::new();
    let mut plugins = PluginRegistry::new();
    plugins.register_reporter("memory", Arc::new(reporter.clone()));
    (plugins, reporter)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_smoke_graph_reports_metrics() {
    let server = TestServer::ok().await;
    let graph = Graph::new(
        GraphBuilder::new("smoke")
            .register(StageBuilder::new("prepare", StageType::Setup).build())
            .register(
                StageBuilder::new("load", StageType::Execute)
                    .depends_on(&["prepare"])
                    .persona(persona(4, Duration::from_secs(2)))
                    .hook(Hook::action("health", Action::http("health", "GET", server.url("/healthz"))))
                    .build(),
            ),
    )
    .unwrap();
    let (plugins, reporter) = memory_plugins();

    let outcome = with_timeout(
        Duration::from_secs(30),
        graph.execute(RunOptions::default().with_pool_size(2).with_plugins(plugins)),
    )
    .await;

    assert_eq!(outcome.status, GraphStatus::Complete, "{:?}", outcome.error);
    assert_eq!(outcome.exit_code(), 0);
    let metrics = outcome.metrics.unwrap();
    let load = metrics.stage("load").unwrap();
    assert!(load.total >= 4, "only {} results", load.total);
    assert_eq!(load.failed, 0);
    assert_eq!(load.actions["health"].statuses.get(&200), Some(&load.total));
    assert!(server.requests() >= load.total);

    let reported = reporter.latest_metrics().unwrap();
    assert_eq!(reported.stage("load").unwrap().total, load.total);
    assert!(reporter.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_check_marks_every_result() {
    let server = TestServer::ok().await;
    let graph = Graph::new(
        GraphBuilder::new("checked")
            .register(StageBuilder::new("prepare", StageType::Setup).build())
            .register(
                StageBuilder::new("load", StageType::Execute)
                    .depends_on(&["prepare"])
                    .persona(persona(2, Duration::from_millis(500)))
                    .hook(Hook::action("health", Action::http("health", "GET", server.url("/"))))
                    .hook(Hook::check("is_teapot", &["health"], |result| match result.status {
                        Some(999) => Ok(()),
                        other => Err(format!("unexpected status {other:?}")),
                    }))
                    .build(),
            ),
    )
    .unwrap();
    let (plugins, reporter) = memory_plugins();

    let outcome = with_timeout(
        Duration::from_secs(30),
        graph.execute(RunOptions::default().with_pool_size(1).with_plugins(plugins)),
    )
    .await;

    // failed checks are results, not stage failures
    assert_eq!(outcome.status, GraphStatus::Complete);
    let results = reporter.results("load");
    assert!(!results.is_empty());
    for result in &results {
        let error = result.error.as_deref().unwrap();
        assert!(error.contains("Check is_teapot failed"), "{error}");
    }

    let load = outcome.metrics.unwrap().stage("load").cloned().unwrap();
    assert_eq!(load.succeeded, 0);
    assert_eq!(load.check_failures, load.total);
    assert_eq!(load.actions["health"].check_failures.get("is_teapot"), Some(&load.total));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stage_timeout_runs_error_stage() {
    let graph = Graph::new(
        GraphBuilder::new("slow")
            .register(StageBuilder::new("prepare", StageType::Setup).build())
            .register(
                StageBuilder::new("load", StageType::Execute)
                    .depends_on(&["prepare"])
                    .timeout(Duration::from_secs(1))
                    .persona(persona(1, Duration::from_secs(10)))
                    .hook(Hook::task("sleepy", |_| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(ContextValue::None)
                    }))
                    .build(),
            ),
    )
    .unwrap();

    let outcome = with_timeout(
        Duration::from_secs(20),
        graph.execute(RunOptions::default().with_pool_size(1)),
    )
    .await;

    assert_eq!(outcome.status, GraphStatus::Failed);
    assert_eq!(outcome.exit_code(), 1);
    let error = outcome.error.clone().unwrap();
    assert_eq!(error.kind, ErrorKind::StageTimeout);
    assert!(error.stages.iter().any(|s| s == "load"));
    assert_eq!(outcome.state("load"), Some(StageState::Errored));
    assert_eq!(outcome.state("submit"), Some(StageState::Initialized));
    assert_eq!(outcome.state(graph.error_stage()), Some(StageState::Complete));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_during_execute() {
    let server = TestServer::start(200, "slow", Duration::from_millis(20)).await;
    let graph = Graph::new(
        GraphBuilder::new("cancelled")
            .register(StageBuilder::new("prepare", StageType::Setup).build())
            .register(
                StageBuilder::new("load", StageType::Execute)
                    .depends_on(&["prepare"])
                    .persona(persona(2, Duration::from_secs(60)))
                    .hook(Hook::action("home", Action::http("home", "GET", server.url("/"))))
                    .build(),
            ),
    )
    .unwrap();

    let handle = graph.run(RunOptions::default().with_pool_size(2));
    // wait until requests are flowing
    with_timeout(Duration::from_secs(10), async {
        while server.requests() == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    handle.cancel();

    let outcome = with_timeout(Duration::from_secs(15), handle.wait()).await;
    assert_eq!(outcome.status, GraphStatus::Cancelled);
    assert_eq!(outcome.state("prepare"), Some(StageState::Complete));
    assert_eq!(outcome.state("load"), Some(StageState::Cancelled));
    assert_eq!(outcome.state("complete"), Some(StageState::Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_actions_are_dealt_across_execute_stages() {
    let server = TestServer::ok().await;
    let mut builder = GraphBuilder::new("fanout").register(
        StageBuilder::new("prepare", StageType::Setup)
            .hook(Hook::action("alpha", Action::http("alpha", "GET", server.url("/alpha"))))
            .hook(Hook::action("beta", Action::http("beta", "GET", server.url("/beta"))))
            .hook(Hook::action("gamma", Action::http("gamma", "GET", server.url("/gamma"))))
            .build(),
    );
    for name in ["load_a", "load_b", "load_c"] {
        builder.add(
            StageBuilder::new(name, StageType::Execute)
                .depends_on(&["prepare"])
                .persona(persona(2, Duration::from_millis(500)))
                .build(),
        );
    }
    let graph = Graph::new(builder).unwrap();

    let outcome = with_timeout(
        Duration::from_secs(30),
        graph.execute(RunOptions::default().with_pool_size(4)),
    )
    .await;

    assert_eq!(outcome.status, GraphStatus::Complete, "{:?}", outcome.error);
    let metrics = outcome.metrics.unwrap();
    let mut seen = BTreeSet::new();
    for stage in ["load_a", "load_b", "load_c"] {
        let actions: Vec<&String> = metrics.stage(stage).unwrap().actions.keys().collect();
        assert_eq!(actions.len(), 1, "{stage} ran {actions:?}");
        seen.insert(actions[0].clone());
    }
    assert_eq!(seen, BTreeSet::from(["alpha".to_string(), "beta".to_string(), "gamma".to_string()]));
}
