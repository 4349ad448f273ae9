use lake::pipeline::{Pipeline, PipelineOutcome};
use lake::status::{JsonFileStatusStore, MemoryStatusStore, StatusStore};
use lake::table::{FileTableStore, TableStore};
use lake_config::shared::LakeConfig;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use crate::error::ReorganizerResult;

/// Opens the stores named by the configuration and runs the pipeline.
///
/// Status is persisted to a JSON document when `status.path` is set, otherwise it only lives
/// for this run.
pub async fn start_reorganizer_with_config(
    config: LakeConfig,
) -> ReorganizerResult<PipelineOutcome> {
    info!("starting reorganizer");

    log_config(&config);

    let table_store =
        FileTableStore::open(&config.paths.table_dir, config.commit.max_rows_per_file)?;

    let outcome = match config.status.path.clone() {
        Some(path) => {
            let status_store = JsonFileStatusStore::open(path)?;
            run_pipeline(config, status_store, table_store).await?
        }
        None => {
            info!("no status path configured, keeping status in memory");
            run_pipeline(config, MemoryStatusStore::new(), table_store).await?
        }
    };

    Ok(outcome)
}

fn log_config(config: &LakeConfig) {
    info!(
        raw_dir = %config.paths.raw_dir.display(),
        organized_dir = %config.paths.organized_dir.display(),
        table_dir = %config.paths.table_dir.display(),
        "paths config"
    );
    info!(
        chunk_count = ?config.reorg.chunk_count,
        chunk_size = ?config.reorg.chunk_size,
        batch_size = config.reorg.batch_size,
        max_buffered_rows = config.reorg.max_buffered_rows,
        force = config.reorg.force,
        fail_fast = config.reorg.fail_fast,
        dry_run = config.reorg.dry_run,
        "reorg config"
    );
    info!(
        force = config.commit.force,
        max_rows_per_file = config.commit.max_rows_per_file,
        optimize = config.commit.optimize,
        "commit config"
    );
    info!(
        targets = ?config.validation.targets,
        cross_check = config.validation.cross_check,
        skew_threshold = config.validation.skew_threshold,
        "validation config"
    );
    info!(
        validate_only = config.run.validate_only,
        force = config.run.force,
        workers = config.workers(),
        "run config"
    );
}

/// Runs the pipeline and triggers shutdown on SIGINT or SIGTERM.
///
/// Phases stop at their next unit boundary once shutdown is requested.
#[tracing::instrument(skip_all)]
async fn run_pipeline<S, T>(
    config: LakeConfig,
    status_store: S,
    table_store: T,
) -> ReorganizerResult<PipelineOutcome>
where
    S: StatusStore + Clone + Send + Sync + 'static,
    T: TableStore + Clone + Send + Sync + 'static,
{
    let pipeline = Pipeline::new(config, status_store, table_store);

    let shutdown_tx = pipeline.shutdown_tx();
    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown_handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, shutting down pipeline");
            }
            _ = sigterm.recv() => {
                info!("sigterm received, shutting down pipeline");
            }
        }

        shutdown_tx.shutdown();
    });

    let result = pipeline.run().await;
    shutdown_handle.abort();

    let outcome = result?;
    if let Some(phase) = outcome.halted_at {
        warn!(%phase, "pipeline halted");
    }

    Ok(outcome)
}
