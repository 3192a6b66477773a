use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::config::{PersonaConfig, PersonaType};
use super::selector::{normalize_weights, Selector};
use crate::core::ShutdownSignal;
use crate::dispatcher::ActionPlan;
use crate::engines::{ActionResult, ActionRunner};
use crate::error::ConfigError;

/// What a persona run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaOutput {
    pub results: Vec<ActionResult>,
    pub total_results: usize,
    #[serde(with = "crate::config::duration::serde_duration")]
    pub total_elapsed: Duration,
}

impl PersonaOutput {
    /// Folds another run into this one; elapsed time is the longest of the two.
    pub fn merge(&mut self, other: PersonaOutput) {
        self.total_results += other.total_results;
        self.total_elapsed = self.total_elapsed.max(other.total_elapsed);
        self.results.extend(other.results);
    }
}

/// Closed-loop load controller.
///
/// Keeps up to `batch_size` plans in flight: each cycle fills the free slots,
/// then waits for the in-flight work or `batch_interval`, whichever comes
/// first. After `total_time` it stops issuing work and gives what is still
/// running `graceful_stop` to finish before aborting it.
pub struct Persona {
    config: PersonaConfig,
    plans: Vec<ActionPlan>,
    weights: Vec<f64>,
    runner: Option<Arc<ActionRunner>>,
    stop: ShutdownSignal,
    seed: Option<u64>,
}

impl Persona {
    pub fn new(config: PersonaConfig) -> Self {
        Self {
            config,
            plans: Vec::new(),
            weights: Vec::new(),
            runner: None,
            stop: ShutdownSignal::new(),
            seed: None,
        }
    }

    /// Stops together with `shutdown`; [`Persona::stop`] still only stops this persona.
    pub fn with_shutdown(mut self, shutdown: &ShutdownSignal) -> Self {
        self.stop = shutdown.child();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn config(&self) -> &PersonaConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PersonaConfig {
        &mut self.config
    }

    /// Binds the runner and orders the plans: sequence personas by declared
    /// order, everything else by name. Weights are normalized.
    pub fn setup(&mut self, runner: ActionRunner, mut plans: Vec<ActionPlan>) -> Result<(), ConfigError> {
        self.config.validate()?;
        match self.config.persona_type {
            PersonaType::Sequence => plans.sort_by(|a, b| (a.order, &a.name).cmp(&(b.order, &b.name))),
            _ => plans.sort_by(|a, b| a.name.cmp(&b.name)),
        }
        let weights: Vec<f64> = plans.iter().map(|p| p.weight).collect();
        self.weights = normalize_weights(&weights);
        self.plans = plans;
        self.runner = Some(Arc::new(runner));
        Ok(())
    }

    pub fn plans(&self) -> &[ActionPlan] {
        &self.plans
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn runner(&self) -> Option<&ActionRunner> {
        self.runner.as_deref()
    }

    /// Cooperative stop: no new work is issued and in-flight work drains.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_triggered()
    }

    pub async fn execute(&self) -> PersonaOutput {
        let started = Instant::now();
        let mut results = Vec::new();
        let Some(runner) = self.runner.clone() else {
            tracing::warn!("Persona executed before setup");
            return PersonaOutput::default();
        };
        if self.plans.is_empty() {
            return PersonaOutput::default();
        }

        let deadline = started + self.config.total_time;
        let mut selector = Selector::new(&self.config, &self.weights);
        if let Some(seed) = self.seed {
            selector = selector.with_seed(seed);
        }
        let mut in_flight: JoinSet<Vec<ActionResult>> = JoinSet::new();

        while !self.stop.is_triggered() && Instant::now() < deadline {
            let free = self.config.batch_size.saturating_sub(in_flight.len());
            let batch = selector.next_batch(free, self.plans.len(), started.elapsed());
            let spawned = batch.len();
            for index in batch {
                let runner = Arc::clone(&runner);
                let plan = self.plans[index].clone();
                in_flight.spawn(async move { runner.run_plan(&plan).await });
            }

            let cycle_end = (Instant::now() + self.config.batch_interval).min(deadline);
            if spawned == 0 && in_flight.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep_until(cycle_end) => {}
                    _ = self.stop.cancelled() => {}
                }
                continue;
            }
            loop {
                tokio::select! {
                    joined = in_flight.join_next() => match joined {
                        Some(Ok(batch)) => results.extend(batch),
                        Some(Err(err)) => {
                            if err.is_panic() {
                                tracing::error!(error = %err, "Persona unit panicked");
                            }
                        }
                        None => break,
                    },
                    _ = tokio::time::sleep_until(cycle_end) => break,
                    _ = self.stop.cancelled() => break,
                }
            }
        }

        let grace = tokio::time::sleep(self.config.graceful_stop);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                joined = in_flight.join_next() => match joined {
                    Some(Ok(batch)) => results.extend(batch),
                    Some(Err(_)) => {}
                    None => break,
                },
                _ = &mut grace => break,
            }
        }
        if !in_flight.is_empty() {
            tracing::debug!(remaining = in_flight.len(), "Aborting units past graceful stop");
            in_flight.abort_all();
            while let Some(joined) = in_flight.join_next().await {
                if let Ok(batch) = joined {
                    results.extend(batch);
                }
            }
        }

        PersonaOutput {
            total_results: results.len(),
            total_elapsed: started.elapsed(),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::{ContextValue, RuntimeContext, StageContext};
    use crate::engines::EngineSet;
    use crate::hooks::{Hook, HookArgs};

    fn sleeping_task(name: &str, counter: Arc<AtomicUsize>, sleep: Duration) -> Hook {
        Hook::task(name, move |_args: HookArgs| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(sleep).await;
                Ok(ContextValue::None)
            }
        })
    }

    fn runner(hooks: &[Hook]) -> ActionRunner {
        let mut runner = ActionRunner::new(
            "load",
            EngineSet::new(4, RuntimeContext::default()),
            StageContext::new(),
        );
        runner.bind_hooks(hooks);
        runner
    }

    fn plan(name: &str, order: u32, weight: f64) -> ActionPlan {
        ActionPlan {
            name: name.to_string(),
            steps: vec![name.to_string()],
            order,
            weight,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_loop_respects_batch_size() {
        let counter = Arc::new(AtomicUsize::new(0));
        let hook = sleeping_task("ping", counter.clone(), Duration::from_millis(100));
        let mut persona = Persona::new(PersonaConfig::new(4, Duration::from_secs(1)));
        persona.setup(runner(&[hook]), vec![plan("ping", 0, 1.0)]).unwrap();

        let output = persona.execute().await;
        assert_eq!(output.total_results, output.results.len());
        assert!((36..=44).contains(&output.total_results), "got {}", output.total_results);
        assert!(output.results.iter().all(|r| r.success()));
        assert!(output.total_elapsed >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_stop_aborts_stragglers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let hook = sleeping_task("slow", counter.clone(), Duration::from_secs(30));
        let config = PersonaConfig::new(2, Duration::from_secs(1))
            .with_graceful_stop(Duration::from_millis(200));
        let mut persona = Persona::new(config);
        persona.setup(runner(&[hook]), vec![plan("slow", 0, 1.0)]).unwrap();

        let output = persona.execute().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(output.total_results, 0);
        assert!(output.total_elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_cooperative() {
        let counter = Arc::new(AtomicUsize::new(0));
        let hook = sleeping_task("ping", counter.clone(), Duration::from_millis(50));
        let shutdown = ShutdownSignal::new();
        let mut persona = Persona::new(PersonaConfig::new(1, Duration::from_secs(60))).with_shutdown(&shutdown);
        persona.setup(runner(&[hook]), vec![plan("ping", 0, 1.0)]).unwrap();

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(175)).await;
            stopper.trigger();
        });
        let output = persona.execute().await;
        assert!(output.total_elapsed < Duration::from_secs(1));
        assert!((3..=5).contains(&output.total_results), "got {}", output.total_results);
    }

    #[test]
    fn test_setup_orders_and_normalizes() {
        let mut persona = Persona::new(
            PersonaConfig::new(2, Duration::from_secs(1)).with_type(PersonaType::Sequence),
        );
        persona
            .setup(
                runner(&[]),
                vec![plan("b", 2, 1.0), plan("a", 5, 3.0), plan("c", 1, 0.0)],
            )
            .unwrap();
        let names: Vec<&str> = persona.plans().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
        assert_eq!(persona.weights(), &[0.0, 0.25, 0.75]);
    }

    #[tokio::test]
    async fn test_execute_without_plans_is_empty() {
        let mut persona = Persona::new(PersonaConfig::new(2, Duration::from_secs(5)));
        persona.setup(runner(&[]), Vec::new()).unwrap();
        let output = persona.execute().await;
        assert_eq!(output.total_results, 0);
    }
}
