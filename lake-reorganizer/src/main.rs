//! Reorganizer binary.
//!
//! Loads the layered configuration, runs the reorganize, commit and validate phases, and prints
//! a JSON run summary followed by the rendered validation reports.
//!
//! Exit codes: `0` on success, `1` when a phase errored or halted, `2` when validation found
//! errors.

use std::path::PathBuf;
use std::process::ExitCode;

use lake::pipeline::PipelineOutcome;
use lake_config::shared::LakeConfig;
use lake_telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::config::load_reorganizer_config;
use crate::core::start_reorganizer_with_config;
use crate::error::{ReorganizerError, ReorganizerResult};

mod config;
mod core;
mod error;

/// Directory for rotated log files. Logs only go to stdout when unset.
const LOG_DIR_ENV_NAME: &str = "LAKE_LOG_DIR";

const EXIT_FAILED: u8 = 1;

const EXIT_VALIDATION_FAILED: u8 = 2;

fn main() -> ExitCode {
    match run() {
        Ok(outcome) => exit_code(&outcome),
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::from(EXIT_FAILED)
        }
    }
}

fn run() -> ReorganizerResult<PipelineOutcome> {
    let config = load_reorganizer_config()?;

    let log_dir = std::env::var_os(LOG_DIR_ENV_NAME).map(PathBuf::from);
    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"), log_dir.as_deref())
        .map_err(ReorganizerError::config)?;

    let verbose = config.validation.verbose;
    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))?;

    print_outcome(&outcome, verbose);

    Ok(outcome)
}

async fn async_main(config: LakeConfig) -> ReorganizerResult<PipelineOutcome> {
    match start_reorganizer_with_config(config).await {
        Ok(outcome) => {
            info!(
                succeeded = outcome.succeeded(),
                chunk_count = outcome.chunk_count,
                "reorganizer finished"
            );
            Ok(outcome)
        }
        Err(err) => {
            error!("{err}");
            Err(err)
        }
    }
}

fn print_outcome(outcome: &PipelineOutcome, verbose: bool) {
    match serde_json::to_string_pretty(outcome) {
        Ok(json) => println!("{json}"),
        Err(err) => error!(error = %err, "failed to serialize run summary"),
    }

    if let Some(validation) = &outcome.validation {
        println!("{}", validation.render(verbose));
    }
}

fn exit_code(outcome: &PipelineOutcome) -> ExitCode {
    if outcome.halted_at.is_some() {
        ExitCode::from(EXIT_FAILED)
    } else if !outcome.succeeded() {
        ExitCode::from(EXIT_VALIDATION_FAILED)
    } else {
        ExitCode::SUCCESS
    }
}
