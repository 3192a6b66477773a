//! Driving a planned graph generation by generation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::builder::{AssembledGraph, GraphBuilder};
use super::planner::{plan, ExecutionPlan};
use super::types::GraphStatus;
use crate::config::CoreSettings;
use crate::core::{
    CheckpointStore, ContextValue, EventEmitter, GraphEvent, GraphHistory, MemoryCheckpointStore,
    RuntimeContext, ShutdownSignal,
};
use crate::error::{ErrorKind, ErrorReport, GraphResult, StageError};
use crate::executor::{partition, Assignment, BatchExecutor, StageOutput, WorkerPool};
use crate::plugins::PluginRegistry;
use crate::reporting::MetricsSet;
use crate::stages::{
    StageBehaviorRegistry, StageCatalog, StageConfig, StageEnv, StageState, StageStateMachine,
    StageType, ERROR_REPORT,
};
use crate::transitions::ANALYZE_METRICS;

/// A planned graph, ready to run any number of times.
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    id: Uuid,
    catalog: Arc<StageCatalog>,
    plan: ExecutionPlan,
    error_stage: String,
}

/// Everything a run needs besides the graph itself.
#[derive(Clone)]
pub struct RunOptions {
    pub pool_size: usize,
    pub plugins: Arc<PluginRegistry>,
    pub core: CoreSettings,
    pub store: Arc<dyn CheckpointStore>,
    pub runtime: RuntimeContext,
    pub events: EventEmitter,
    pub shutdown: ShutdownSignal,
    /// Install SIGINT/SIGTERM handlers that request shutdown.
    pub handle_signals: bool,
    /// Run only Idle, Validate and Complete stages; the rest pass through.
    pub validate_only: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            pool_size: crate::config::default_pool_size(),
            plugins: Arc::new(PluginRegistry::new()),
            core: CoreSettings::default(),
            store: Arc::new(MemoryCheckpointStore::new()),
            runtime: RuntimeContext::default(),
            events: EventEmitter::disabled(),
            shutdown: ShutdownSignal::new(),
            handle_signals: false,
            validate_only: false,
        }
    }
}

impl RunOptions {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = Arc::new(plugins);
        self
    }

    pub fn with_core(mut self, core: CoreSettings) -> Self {
        self.core = core;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    pub fn handle_signals(mut self, handle: bool) -> Self {
        self.handle_signals = handle;
        self
    }

    pub fn validate_only(mut self, validate_only: bool) -> Self {
        self.validate_only = validate_only;
        self
    }
}

/// Final state of one run.
#[derive(Debug, Clone)]
pub struct GraphOutcome {
    pub graph: String,
    pub graph_id: Uuid,
    pub status: GraphStatus,
    pub states: BTreeMap<String, StageStateMachine>,
    pub history: GraphHistory,
    pub error: Option<ErrorReport>,
    pub metrics: Option<MetricsSet>,
    pub elapsed: Duration,
}

impl GraphOutcome {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn state(&self, stage: &str) -> Option<StageState> {
        self.states.get(stage).map(StageStateMachine::state)
    }
}

/// Handle to a graph running in the background.
pub struct GraphHandle {
    status_rx: watch::Receiver<GraphStatus>,
    shutdown: ShutdownSignal,
    task: JoinHandle<GraphOutcome>,
    graph: String,
    graph_id: Uuid,
}

impl GraphHandle {
    pub fn status(&self) -> GraphStatus {
        *self.status_rx.borrow()
    }

    /// Requests a graceful stop; running stages get the shutdown grace period.
    pub fn cancel(&self) {
        self.shutdown.trigger();
    }

    /// Blocks until the graph reaches a terminal status.
    pub async fn wait_status(&self) -> GraphStatus {
        let mut rx = self.status_rx.clone();
        loop {
            let status = *rx.borrow();
            if status.is_terminal() || rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    pub async fn wait(self) -> GraphOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => GraphOutcome {
                graph: self.graph,
                graph_id: self.graph_id,
                status: GraphStatus::Failed,
                states: BTreeMap::new(),
                history: GraphHistory::new(),
                error: Some(ErrorReport::new(ErrorKind::ProcessKilled, err.to_string())),
                metrics: None,
                elapsed: Duration::ZERO,
            },
        }
    }
}

impl Graph {
    /// Assembles and plans the graph declared in `builder`.
    pub fn new(builder: GraphBuilder) -> GraphResult<Self> {
        Self::from_assembled(builder.assemble()?)
    }

    pub fn from_assembled(assembled: AssembledGraph) -> GraphResult<Self> {
        let plan = plan(&assembled)?;
        Ok(Self {
            name: assembled.name,
            id: Uuid::new_v4(),
            catalog: assembled.catalog,
            plan,
            error_stage: assembled.error_stage,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn catalog(&self) -> &Arc<StageCatalog> {
        &self.catalog
    }

    pub fn error_stage(&self) -> &str {
        &self.error_stage
    }

    /// Starts the graph on the current runtime and returns at once.
    pub fn run(&self, options: RunOptions) -> GraphHandle {
        let (status_tx, status_rx) = watch::channel(GraphStatus::Initialized);
        let shutdown = options.shutdown.clone();
        let graph = self.clone();
        let task = tokio::spawn(async move { graph.drive(options, Some(status_tx)).await });
        GraphHandle {
            status_rx,
            shutdown,
            task,
            graph: self.name.clone(),
            graph_id: self.id,
        }
    }

    /// Runs the graph to completion on the calling task.
    pub async fn execute(&self, options: RunOptions) -> GraphOutcome {
        self.drive(options, None).await
    }

    async fn drive(&self, options: RunOptions, status_tx: Option<watch::Sender<GraphStatus>>) -> GraphOutcome {
        let started = Instant::now();
        let publish = |status: GraphStatus| {
            if let Some(tx) = &status_tx {
                let _ = tx.send(status);
            }
        };
        let mut run = GraphRun::new(self, &options);

        let env = StageEnv {
            catalog: Arc::clone(&self.catalog),
            plugins: Arc::clone(&options.plugins),
            behaviors: Arc::new(StageBehaviorRegistry::new()),
            runtime: options.runtime.clone(),
            core: options.core.clone(),
            store: Arc::clone(&options.store),
            shutdown: options.shutdown.clone(),
        };
        let executor = match WorkerPool::new(options.pool_size) {
            Ok(pool) => BatchExecutor::new(Arc::new(pool), env),
            Err(err) => {
                run.fail(&err);
                publish(run.status);
                return run.finish(started, &options.events);
            }
        };

        let signals = options
            .handle_signals
            .then(|| spawn_signal_listener(options.shutdown.clone()));

        options.events.emit(GraphEvent::GraphStarted {
            graph: self.name.clone(),
            graph_id: self.id.to_string(),
            generations: self.plan.generations.len(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            graph = %self.name,
            graph_id = %self.id,
            generations = self.plan.generations.len(),
            workers = executor.pool_size(),
            "Graph started"
        );
        run.status = GraphStatus::Running;
        publish(run.status);

        for (index, generation) in self.plan.generations.iter().enumerate() {
            if options.shutdown.is_triggered() {
                run.status = GraphStatus::Cancelled;
                break;
            }
            options.events.emit(GraphEvent::GenerationStarted {
                index,
                stages: generation.clone(),
                timestamp: Utc::now(),
            });
            tracing::debug!(graph = %self.name, generation = index, stages = ?generation, "Generation started");

            if !run.run_generation(generation, &executor, &options).await {
                break;
            }
        }

        if run.status == GraphStatus::Failed {
            run.run_error_stage(&executor).await;
        }
        if run.status == GraphStatus::Running {
            run.status = GraphStatus::Complete;
        }
        if run.status == GraphStatus::Cancelled {
            run.cancel_unfinished();
        }

        executor.shutdown().await;
        if let Some(signals) = signals {
            signals.abort();
        }
        publish(run.status);
        run.finish(started, &options.events)
    }
}

/// Mutable state of one run.
struct GraphRun<'a> {
    graph: &'a Graph,
    status: GraphStatus,
    states: BTreeMap<String, StageStateMachine>,
    history: GraphHistory,
    error: Option<ErrorReport>,
    failed_stage: Option<String>,
    metrics: Option<MetricsSet>,
    skipped: BTreeSet<String>,
    validate_only: bool,
}

impl<'a> GraphRun<'a> {
    fn new(graph: &'a Graph, options: &RunOptions) -> Self {
        let states = graph
            .plan
            .generations
            .iter()
            .flatten()
            .map(|stage| (stage.clone(), StageStateMachine::new(stage.clone())))
            .collect();
        Self {
            graph,
            status: GraphStatus::Initialized,
            states,
            history: GraphHistory::new(),
            error: None,
            failed_stage: None,
            metrics: None,
            skipped: BTreeSet::new(),
            validate_only: options.validate_only,
        }
    }

    fn skips(&self, config: &StageConfig) -> bool {
        config.skip
            || (self.validate_only
                && !matches!(
                    config.stage_type,
                    StageType::Idle | StageType::Validate | StageType::Complete
                ))
    }

    /// Runs one generation; false when the run must stop.
    async fn run_generation(&mut self, generation: &[String], executor: &BatchExecutor, options: &RunOptions) -> bool {
        let catalog = Arc::clone(&self.graph.catalog);
        let mut inputs: BTreeMap<String, StageOutput> = BTreeMap::new();
        let mut runnable: Vec<&StageConfig> = Vec::new();

        for stage in generation {
            let Some(config) = catalog.config(stage) else {
                continue;
            };
            let incoming = self.history.incoming(stage);
            let missing = self.history.missing(stage, &config.requires_keys());
            // A stage starved by a skipped predecessor is skipped with it.
            let starved = !missing.is_empty()
                && self
                    .history
                    .sources_of(stage)
                    .iter()
                    .any(|source| self.skipped.contains(source));
            if self.skips(config) || starved {
                self.pass_through(stage, &incoming);
                options.events.emit(GraphEvent::StageSkipped {
                    stage: stage.clone(),
                    timestamp: Utc::now(),
                });
                continue;
            }
            if let Some(key) = missing.into_iter().next() {
                let err = StageError::MissingRequirement {
                    stage: stage.clone(),
                    key,
                };
                self.record_failure(stage, &err, &options.events);
                return false;
            }
            inputs.insert(stage.clone(), incoming);
            runnable.push(config);
        }
        if runnable.is_empty() {
            return true;
        }

        let batches = partition(&runnable, executor.pool_size());
        for assignment in batches.iter().flatten() {
            let Some(config) = catalog.config(&assignment.stage) else {
                continue;
            };
            self.advance_working(config);
            options.events.emit(GraphEvent::StageStarted {
                stage: assignment.stage.clone(),
                stage_type: config.stage_type,
                workers: assignment.workers,
                timestamp: Utc::now(),
            });
        }

        let reports = {
            let running = executor.execute_batches(&batches, &inputs);
            tokio::pin!(running);
            tokio::select! {
                reports = &mut running => reports,
                _ = options.shutdown.cancelled() => {
                    tracing::warn!(graph = %self.graph.name, "Shutdown requested, draining running stages");
                    executor.close();
                    running.await
                }
            }
        };

        let mut failures: Vec<(String, StageError)> = Vec::new();
        for report in reports {
            match report.result {
                Ok(output) => {
                    if let Some(config) = catalog.config(&report.stage) {
                        self.advance_done(config);
                    }
                    options.events.emit(GraphEvent::StageCompleted {
                        stage: report.stage.clone(),
                        state: self.state_of(&report.stage),
                        elapsed_ms: report.elapsed.as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                    tracing::info!(
                        stage = %report.stage,
                        workers = report.workers,
                        elapsed_ms = report.elapsed.as_millis() as u64,
                        "Stage complete"
                    );
                    let incoming = inputs.remove(&report.stage).unwrap_or_default();
                    self.record_output(&report.stage, &incoming, &output);
                }
                Err(err) => failures.push((report.stage, err)),
            }
        }

        if failures.is_empty() {
            return true;
        }
        let cancelled = options.shutdown.is_triggered()
            && failures.iter().all(|(_, e)| matches!(e, StageError::Cancelled { .. }));
        for (stage, err) in &failures {
            if cancelled {
                self.mark(stage, StageState::Cancelled);
                tracing::warn!(stage = %stage, "Stage cancelled");
            } else {
                self.record_failure(stage, err, &options.events);
            }
        }
        if cancelled {
            self.status = GraphStatus::Cancelled;
        }
        false
    }

    fn pass_through(&mut self, stage: &str, incoming: &StageOutput) {
        tracing::info!(stage = %stage, "Stage skipped");
        self.skipped.insert(stage.to_string());
        for edge in self.graph.plan.outgoing(stage) {
            self.history.insert(stage, &edge.destination, incoming.clone());
        }
        self.mark(stage, StageState::Complete);
    }

    fn record_output(&mut self, stage: &str, incoming: &StageOutput, output: &StageOutput) {
        let edges: Vec<_> = self.graph.plan.outgoing(stage).cloned().collect();
        for edge in edges {
            let siblings = self.graph.plan.siblings(stage, edge.destination_type);
            let slot = edge.split(edge.build_slot(incoming, output), &siblings);
            self.history.insert(stage, &edge.destination, slot);
        }
        if let Some(value) = output.get(ANALYZE_METRICS) {
            match value.deserialize_into::<MetricsSet>() {
                Ok(set) => {
                    let metrics = self.metrics.get_or_insert_with(MetricsSet::default);
                    for (_, stage_metrics) in set.stages {
                        metrics.insert(stage_metrics);
                    }
                }
                Err(err) => tracing::warn!(stage = %stage, error = %err, "Unreadable metrics"),
            }
        }
    }

    fn record_failure(&mut self, stage: &str, err: &StageError, events: &EventEmitter) {
        let report = err.report();
        tracing::error!(stage = %stage, kind = %report.kind, error = %err, "Stage failed");
        events.emit(GraphEvent::StageFailed {
            stage: stage.to_string(),
            error: report.clone(),
            timestamp: Utc::now(),
        });
        self.mark(stage, StageState::Errored);
        if self.error.is_none() {
            self.error = Some(report);
            self.failed_stage = Some(stage.to_string());
        }
        self.status = GraphStatus::Failed;
    }

    fn fail(&mut self, err: &StageError) {
        self.error = Some(err.report());
        self.status = GraphStatus::Failed;
    }

    /// Hands the failure report to the Error stage for logging and cleanup.
    async fn run_error_stage(&mut self, executor: &BatchExecutor) {
        let stage = self.graph.error_stage.clone();
        let mut input = self
            .failed_stage
            .as_deref()
            .map(|failed| self.history.incoming(failed))
            .unwrap_or_default();
        if let Some(report) = &self.error {
            match ContextValue::from_serializable(report) {
                Ok(value) => {
                    input.insert(ERROR_REPORT.to_string(), value);
                }
                Err(err) => tracing::warn!(error = %err, "Failed to encode error report"),
            }
        }
        let mut machine = StageStateMachine::new(stage.clone());
        let assignment = Assignment {
            stage: stage.clone(),
            workers: 1,
        };
        match executor.run_assignment(&assignment, input).await {
            Ok(_) => {
                let _ = machine.advance(StageState::Complete);
            }
            Err(err) => {
                tracing::error!(stage = %stage, error = %err, "Error stage failed");
                machine.fail(StageState::Errored);
            }
        }
        self.states.insert(stage, machine);
    }

    fn cancel_unfinished(&mut self) {
        for machine in self.states.values_mut() {
            if !machine.state().is_terminal() {
                machine.fail(StageState::Cancelled);
            }
        }
    }

    fn state_of(&self, stage: &str) -> StageState {
        self.states
            .get(stage)
            .map(StageStateMachine::state)
            .unwrap_or(StageState::Initialized)
    }

    fn advance_working(&mut self, config: &StageConfig) {
        if let Some((working, _)) = config.stage_type.lifecycle_states() {
            self.advance(&config.name, working);
        }
    }

    fn advance_done(&mut self, config: &StageConfig) {
        if let Some((_, done)) = config.stage_type.lifecycle_states() {
            self.advance(&config.name, done);
        }
        self.advance(&config.name, StageState::Complete);
    }

    fn advance(&mut self, stage: &str, next: StageState) {
        if let Some(machine) = self.states.get_mut(stage) {
            if let Err(err) = machine.advance(next) {
                tracing::warn!(stage = %stage, error = %err, "Ignoring illegal state change");
            }
        }
    }

    fn mark(&mut self, stage: &str, state: StageState) {
        match state {
            StageState::Cancelled | StageState::Errored => {
                if let Some(machine) = self.states.get_mut(stage) {
                    machine.fail(state);
                }
            }
            _ => self.advance(stage, state),
        }
    }

    fn finish(self, started: Instant, events: &EventEmitter) -> GraphOutcome {
        let elapsed = started.elapsed();
        events.emit(GraphEvent::GraphFinished {
            graph: self.graph.name.clone(),
            status: self.status,
            timestamp: Utc::now(),
        });
        match &self.error {
            Some(report) => tracing::error!(
                graph = %self.graph.name,
                status = %self.status,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %report.summary(),
                "Graph finished"
            ),
            None => tracing::info!(
                graph = %self.graph.name,
                status = %self.status,
                elapsed_ms = elapsed.as_millis() as u64,
                "Graph finished"
            ),
        }
        GraphOutcome {
            graph: self.graph.name.clone(),
            graph_id: self.graph.id,
            status: self.status,
            states: self.states,
            history: self.history,
            error: self.error,
            metrics: self.metrics,
            elapsed,
        }
    }
}

/// Triggers `shutdown` on Ctrl+C or SIGTERM. The SIGTERM handler is
/// installed before this returns, so a signal sent afterwards is never missed.
fn spawn_signal_listener(shutdown: ShutdownSignal) -> tokio::task::JoinHandle<()> {
    #[cfg(unix)]
    let terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|err| tracing::warn!(error = %err, "Failed to listen for SIGTERM"))
        .ok();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            match terminate {
                Some(mut signal) => {
                    signal.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::warn!("Received Ctrl+C, stopping graph"),
            _ = terminate => tracing::warn!("Received SIGTERM, stopping graph"),
        }
        shutdown.trigger();
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::create_event_channel;
    use crate::hooks::Hook;
    use crate::personas::PersonaConfig;
    use crate::stages::{is_monotone_path, StageBuilder};

    fn persona() -> PersonaConfig {
        PersonaConfig::new(2, Duration::from_millis(150))
            .with_batch_interval(Duration::from_millis(10))
            .with_graceful_stop(Duration::from_millis(50))
    }

    fn task_graph(calls: Arc<AtomicUsize>) -> GraphBuilder {
        GraphBuilder::new("tasks")
            .register(StageBuilder::new("prepare", StageType::Setup).build())
            .register(
                StageBuilder::new("load", StageType::Execute)
                    .depends_on(&["prepare"])
                    .persona(persona())
                    .hook(Hook::task("compute", move |_| {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(ContextValue::from(1i64))
                        }
                    }))
                    .build(),
            )
    }

    #[tokio::test]
    async fn test_runs_to_complete() {
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = Graph::new(task_graph(Arc::clone(&calls))).unwrap();
        let (tx, mut rx) = create_event_channel();
        let options = RunOptions::default()
            .with_pool_size(2)
            .with_events(EventEmitter::new(tx));

        let outcome = graph.execute(options).await;
        assert_eq!(outcome.status, GraphStatus::Complete);
        assert_eq!(outcome.exit_code(), 0);
        assert!(calls.load(Ordering::SeqCst) > 0);
        for machine in outcome.states.values() {
            assert!(is_monotone_path(machine.path()));
        }
        assert_eq!(outcome.state("load"), Some(StageState::Complete));
        assert!(outcome.states["load"].path().contains(&StageState::Executed));

        let metrics = outcome.metrics.unwrap();
        assert_eq!(metrics.stage("load").unwrap().total, calls.load(Ordering::SeqCst));

        let mut finished = false;
        while let Ok(event) = rx.try_recv() {
            if let GraphEvent::GraphFinished { status, .. } = event {
                assert_eq!(status, GraphStatus::Complete);
                finished = true;
            }
        }
        assert!(finished);
    }

    #[tokio::test]
    async fn test_stage_timeout_fails_graph() {
        let graph = Graph::new(
            GraphBuilder::new("slow")
                .register(
                    StageBuilder::new("prepare", StageType::Setup)
                        .timeout(Duration::from_millis(100))
                        .hook(Hook::setup("sleepy", |_| async {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            Ok(ContextValue::None)
                        }))
                        .build(),
                )
                .register(StageBuilder::new("load", StageType::Execute).depends_on(&["prepare"]).build()),
        )
        .unwrap();

        let outcome = graph.execute(RunOptions::default().with_pool_size(1)).await;
        assert_eq!(outcome.status, GraphStatus::Failed);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.error.as_ref().unwrap().kind, ErrorKind::StageTimeout);
        assert_eq!(outcome.state("prepare"), Some(StageState::Errored));
        assert_eq!(outcome.state("load"), Some(StageState::Initialized));
        assert_eq!(outcome.state(graph.error_stage()), Some(StageState::Complete));
    }

    #[tokio::test]
    async fn test_skipped_stage_passes_history_through() {
        let graph = Graph::new(task_graph(Arc::new(AtomicUsize::new(0))).skip(["load"])).unwrap();
        let (tx, mut rx) = create_event_channel();
        let outcome = graph
            .execute(RunOptions::default().with_pool_size(1).with_events(EventEmitter::new(tx)))
            .await;
        assert_eq!(outcome.status, GraphStatus::Complete);
        assert!(outcome.history.slot("load", "analyze").is_some());
        assert!(outcome.metrics.is_none());

        let mut skipped = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let GraphEvent::StageSkipped { stage, .. } = event {
                skipped.push(stage);
            }
        }
        // analyze and submit lose their inputs with it
        assert_eq!(skipped, vec!["load", "analyze", "submit"]);
    }

    #[tokio::test]
    async fn test_cancel_through_handle() {
        let graph = Graph::new(
            GraphBuilder::new("long")
                .register(StageBuilder::new("prepare", StageType::Setup).build())
                .register(
                    StageBuilder::new("load", StageType::Execute)
                        .depends_on(&["prepare"])
                        .persona(PersonaConfig::new(2, Duration::from_secs(30)).with_graceful_stop(Duration::from_millis(50)))
                        .hook(Hook::task("compute", |_| async {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok(ContextValue::from(1i64))
                        }))
                        .build(),
                ),
        )
        .unwrap();

        let shutdown = ShutdownSignal::new();
        let handle = graph.run(RunOptions::default().with_pool_size(2).with_shutdown(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.trigger_with_grace(Duration::from_millis(200));

        let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait()).await.unwrap();
        assert_eq!(outcome.status, GraphStatus::Cancelled);
        for stage in ["load", "analyze", "submit", "complete"] {
            assert_eq!(outcome.state(stage), Some(StageState::Cancelled), "{stage}");
        }
        assert_eq!(outcome.state("prepare"), Some(StageState::Complete));
    }

    #[tokio::test]
    async fn test_validate_only_runs_validation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = Graph::new(task_graph(Arc::clone(&calls))).unwrap();
        let outcome = graph
            .execute(RunOptions::default().with_pool_size(1).validate_only(true))
            .await;
        assert_eq!(outcome.status, GraphStatus::Complete);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(outcome.states["validate"].path().contains(&StageState::Validated));
    }
}
