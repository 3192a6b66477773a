//! Programs loaded from disk, registered by discovery and run end to end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{with_timeout, TestServer};
use stampede::program::{discover_programs, read_program, validate_program};
use stampede::reporting::MemoryReporter;
use stampede::stages::StageState;
use stampede::{load_program_file, Graph, GraphStatus, PluginRegistry, RunOptions, StampedeConfig};

fn smoke_program(url: &str) -> String {
    format!(
        r#"
name: smoke
description: health check under light load
stages:
  - name: prepare
    type: setup
  - name: load
    type: execute
    depends: [prepare]
    persona:
      batch_size: 2
      batch_interval: 50ms
      total_time: 500ms
      graceful_stop: 200ms
    actions:
      - name: health
        url: {url}
        checks:
          - status: 999
          - header_present: content-type
  - name: extra
    type: execute
    depends: [prepare]
    actions:
      - name: unused
        url: {url}
"#
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_yaml_program_runs_with_declarative_checks() {
    let server = TestServer::ok().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("smoke.yaml");
    std::fs::write(&path, smoke_program(&server.url("/health"))).unwrap();

    let report = validate_program(&read_program(&path).unwrap());
    assert!(report.is_valid, "{:?}", report.diagnostics);

    let builder = load_program_file(&path).unwrap().skip(["extra"]);
    let graph = Graph::new(builder).unwrap();
    let reporter = MemoryReporter::new();
    let mut plugins = PluginRegistry::new();
    plugins.register_reporter("memory", Arc::new(reporter.clone()));

    let outcome = with_timeout(
        Duration::from_secs(30),
        graph.execute(RunOptions::default().with_pool_size(2).with_plugins(plugins)),
    )
    .await;

    assert_eq!(outcome.status, GraphStatus::Complete, "{:?}", outcome.error);
    // skipped stages pass their input through without executing
    assert_eq!(outcome.state("extra"), Some(StageState::Complete));
    assert!(!outcome.states["extra"].path().contains(&StageState::Executing));

    let results = reporter.results("load");
    assert!(!results.is_empty());
    for result in &results {
        assert_eq!(result.status, Some(200));
        let error = result.error.as_deref().unwrap();
        assert!(error.contains("Check health_status_0 failed"), "{error}");
        assert!(error.contains("expected status 999, got 200"), "{error}");
    }

    let metrics = outcome.metrics.unwrap();
    let health = &metrics.stage("load").unwrap().actions["health"];
    assert_eq!(health.failed, health.total);
    assert_eq!(health.check_failures.get("health_status_0"), Some(&health.total));
    assert!(!health.check_failures.contains_key("health_header_present_1"));
    assert!(metrics.stage("extra").is_none());
}

#[test]
fn test_discovered_programs_resolve_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let programs = dir.path().join("graphs");
    std::fs::create_dir_all(programs.join("nested")).unwrap();
    std::fs::write(programs.join("smoke.yaml"), smoke_program("http://127.0.0.1:9/")).unwrap();
    std::fs::write(
        programs.join("nested").join("soak.json"),
        r#"{"name": "soak", "stages": [{"name": "prepare", "type": "setup"}]}"#,
    )
    .unwrap();
    std::fs::write(programs.join("notes.txt"), "not a program").unwrap();

    let found = discover_programs(&programs).unwrap();
    assert_eq!(found.keys().collect::<Vec<_>>(), vec!["smoke", "soak"]);

    let config_path = dir.path().join("stampede.toml");
    let mut config = StampedeConfig::load(&config_path).unwrap();
    assert_eq!(config.register_graphs(found), 2);
    config.save(&config_path).unwrap();

    let reloaded = StampedeConfig::load(&config_path).unwrap();
    let soak = reloaded.resolve_graph("soak").unwrap();
    assert!(soak.ends_with("nested/soak.json"));
    let builder = load_program_file(&soak).unwrap();
    assert_eq!(builder.name(), "soak");

    // a path that exists is used as-is
    let direct = reloaded.resolve_graph(programs.join("smoke.yaml").to_str().unwrap()).unwrap();
    assert!(direct.ends_with("smoke.yaml"));
    assert!(reloaded.resolve_graph("missing").is_err());
}
