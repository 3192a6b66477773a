//! `stampede ping <url>`

use std::time::Duration;

use anyhow::Context;
use clap::Args;
use stampede::config::parse_duration;
use stampede::core::RuntimeContext;
use stampede::engines::{Action, EngineSet, EngineType};

#[derive(Debug, Args)]
pub struct PingArgs {
    pub url: String,

    /// http, graphql or udp
    #[arg(long, default_value = "http")]
    pub engine: String,

    #[arg(long, default_value = "GET")]
    pub method: String,

    /// Connect and total timeout, e.g. 500ms or 5s
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub timeout: Duration,
}

/// Issues one request and prints its status and timings.
pub async fn run(args: PingArgs) -> anyhow::Result<i32> {
    let engine_type: EngineType = args.engine.parse()?;
    let action = Action::new("ping", engine_type, &args.url)
        .with_method(&args.method)
        .with_timeouts(args.timeout, args.timeout)
        .with_redirects(0);

    let engines = EngineSet::new(1, RuntimeContext::default());
    let engine = engines.get(engine_type);
    let prepared = engine
        .prepare(&action, "ping")
        .await
        .with_context(|| format!("cannot reach {}", args.url))?;
    let result = engine.execute(&prepared.action).await;
    engines.close().await;

    println!(
        "{} {} -> {} in {:.2}ms",
        result.method,
        prepared.socket.address,
        result
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "no response".to_string()),
        result.elapsed().as_secs_f64() * 1000.0
    );
    match &result.error {
        Some(error) => {
            eprintln!("{error}");
            Ok(1)
        }
        None => Ok(0),
    }
}
