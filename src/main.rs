//! Stampede CLI
//!
//! ```bash
//! stampede run graphs/smoke.yaml --cpus 4 --show-summaries actions,checks
//! stampede check smoke
//! stampede graph discover ./graphs
//! stampede ping http://127.0.0.1:8080/health --timeout 2s
//! ```

mod cli;

use std::process::ExitCode;

use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    let code = match cli::execute(args).await {
        Ok(code) => code,
        Err(err) => {
            cli::report_error(&err);
            cli::exit_code_for(&err)
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
