use std::path::Path;
use std::sync::Arc;

use lake_config::shared::LakeConfig;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::bail;
use crate::codec;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, LakeResult};
use crate::hash::derive_chunk_count;
use crate::layout::organized;
use crate::layout::raw::RawLayout;
use crate::reorg::merger::{ChunkOutcome, MergeOptions, ReorgSummary, StreamingChunkMerger};
use crate::status::base::{ChunkStatus, Phase, PhaseStatus, StatusStore};
use crate::table::base::TableStore;
use crate::table::committer::{CommitOptions, CommitSummary, PartitionOutcome, TableCommitter};
use crate::validate::report::ValidationSummary;
use crate::validate::validator::{Validator, ValidatorOptions};

/// What a pipeline run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineOutcome {
    pub chunk_count: u32,
    pub reorg: Option<ReorgSummary>,
    pub commit: Option<CommitSummary>,
    pub validation: Option<ValidationSummary>,
    /// Phases skipped because the status store records them as completed.
    pub skipped_phases: Vec<Phase>,
    /// Phase that left work unfinished; later phases did not run.
    pub halted_at: Option<Phase>,
    /// The run only planned the reorganize phase.
    pub dry_run: bool,
}

impl PipelineOutcome {
    /// Whether every requested phase completed and validation, if it ran, passed.
    pub fn succeeded(&self) -> bool {
        self.halted_at.is_none()
            && self
                .validation
                .as_ref()
                .is_none_or(ValidationSummary::passed)
    }
}

/// Runs reorganize, commit and validate in order, recording progress in a status store.
#[derive(Debug)]
pub struct Pipeline<S, T> {
    config: Arc<LakeConfig>,
    status_store: S,
    table_store: T,
    shutdown_tx: ShutdownTx,
}

impl<S, T> Pipeline<S, T>
where
    S: StatusStore + Clone + Send + Sync + 'static,
    T: TableStore + Clone + Send + Sync + 'static,
{
    pub fn new(config: LakeConfig, status_store: S, table_store: T) -> Self {
        // Receivers are created on demand from the sender.
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            status_store,
            table_store,
            shutdown_tx,
        }
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Runs the phases selected by the configuration.
    pub async fn run(&self) -> LakeResult<PipelineOutcome> {
        if self.config.run.validate_only {
            self.run_phases(&[Phase::Validate]).await
        } else {
            self.run_phases(&Phase::ALL).await
        }
    }

    /// Runs `phases` in pipeline order.
    ///
    /// A phase that leaves chunks unfinished halts the run. Reorganize and commit are skipped
    /// when already completed unless `run.force` is set; validation always runs.
    pub async fn run_phases(&self, phases: &[Phase]) -> LakeResult<PipelineOutcome> {
        let mut phases = phases.to_vec();
        phases.sort();
        phases.dedup();

        let chunk_count = self.resolve_chunk_count().await?;
        info!(chunk_count, phases = ?phases, "starting pipeline");

        let mut outcome = PipelineOutcome {
            chunk_count,
            ..PipelineOutcome::default()
        };

        for phase in phases {
            self.shutdown_tx.subscribe().check()?;

            if phase != Phase::Validate
                && !self.config.run.force
                && self.status_store.get_phase_status(phase).await?.is_completed()
            {
                info!(%phase, "phase already completed, skipping");
                outcome.skipped_phases.push(phase);
                continue;
            }

            self.status_store
                .set_phase_status(phase, PhaseStatus::running())
                .await?;

            let result = match phase {
                Phase::Reorganize => self.reorganize(chunk_count, &mut outcome).await,
                Phase::Commit => self.commit(chunk_count, &mut outcome).await,
                Phase::Validate => self.validate(chunk_count, &mut outcome).await,
            };

            let status = match result {
                Ok(PhaseEnd::Completed) => PhaseStatus::completed(),
                Ok(PhaseEnd::Planned) => PhaseStatus::NotStarted,
                Ok(PhaseEnd::Incomplete(reason)) => PhaseStatus::failed(reason),
                Err(err) => {
                    error!(%phase, error = %err, "phase failed");
                    self.status_store
                        .set_phase_status(phase, PhaseStatus::failed(err.reason()))
                        .await?;
                    return Err(err);
                }
            };

            let halted = matches!(status, PhaseStatus::Failed { .. }) && phase != Phase::Validate;
            self.status_store.set_phase_status(phase, status).await?;

            if outcome.dry_run {
                info!("dry run, stopping after planning");
                break;
            }
            if halted {
                warn!(%phase, "phase left work unfinished, halting pipeline");
                outcome.halted_at = Some(phase);
                break;
            }
        }

        Ok(outcome)
    }

    async fn reorganize(
        &self,
        chunk_count: u32,
        outcome: &mut PipelineOutcome,
    ) -> LakeResult<PhaseEnd> {
        let options =
            MergeOptions::from_config(&self.config.reorg, chunk_count, self.config.workers());
        let merger = StreamingChunkMerger::new(
            &self.config.paths.raw_dir,
            &self.config.paths.organized_dir,
            options,
            self.shutdown_tx.subscribe(),
        )?;

        let summary = merger.run().await?;
        if summary.dry_run {
            outcome.dry_run = true;
            outcome.reorg = Some(summary);
            return Ok(PhaseEnd::Planned);
        }

        let updates = summary
            .chunks
            .iter()
            .map(|(chunk, chunk_outcome)| (*chunk, reorg_chunk_status(chunk_outcome)))
            .collect();
        self.status_store
            .update_chunk_statuses(Phase::Reorganize, updates)
            .await?;

        let end = if summary.is_complete() {
            PhaseEnd::Completed
        } else {
            PhaseEnd::Incomplete(format!(
                "{} of {} chunks failed",
                summary.failed, summary.total_chunks
            ))
        };
        outcome.reorg = Some(summary);

        Ok(end)
    }

    async fn commit(&self, chunk_count: u32, outcome: &mut PipelineOutcome) -> LakeResult<PhaseEnd> {
        let options = CommitOptions::from_config(
            &self.config.commit,
            self.config.reorg.batch_size,
            self.config.workers(),
        );
        let committer = TableCommitter::new(
            self.table_store.clone(),
            options,
            self.shutdown_tx.subscribe(),
        );

        let summary = committer
            .commit_organized(&self.config.paths.organized_dir, chunk_count)
            .await?;

        let updates = summary
            .partitions
            .iter()
            .map(|(chunk, partition)| (*chunk, commit_chunk_status(partition)))
            .collect();
        self.status_store
            .update_chunk_statuses(Phase::Commit, updates)
            .await?;

        let end = if summary.is_complete() {
            PhaseEnd::Completed
        } else {
            PhaseEnd::Incomplete(format!(
                "{} of {} partitions failed",
                summary.failed, summary.total_chunks
            ))
        };
        outcome.commit = Some(summary);

        Ok(end)
    }

    async fn validate(
        &self,
        chunk_count: u32,
        outcome: &mut PipelineOutcome,
    ) -> LakeResult<PhaseEnd> {
        let options = ValidatorOptions::from_config(&self.config, chunk_count);
        let validator = Validator::new(
            options,
            self.table_store.clone(),
            self.shutdown_tx.subscribe(),
        );

        let summary = validator.run(&self.config.validation.targets).await?;
        let end = if summary.passed() {
            PhaseEnd::Completed
        } else {
            let errors: usize = summary.reports.iter().map(|r| r.error_count()).sum();
            PhaseEnd::Incomplete(format!("validation found {errors} errors"))
        };
        outcome.validation = Some(summary);

        Ok(end)
    }

    /// Uses the configured chunk count, or derives one from `chunk_size` and an estimate of the
    /// entity population.
    async fn resolve_chunk_count(&self) -> LakeResult<u32> {
        if let Some(chunk_count) = self.config.reorg.chunk_count {
            return Ok(chunk_count);
        }

        let Some(chunk_size) = self.config.reorg.chunk_size else {
            bail!(
                ErrorKind::ConfigError,
                "Chunking is not configured",
                "set either reorg.chunk_count or reorg.chunk_size"
            );
        };

        let raw_dir = self.config.paths.raw_dir.clone();
        let organized_dir = self.config.paths.organized_dir.clone();
        tokio::task::spawn_blocking(move || -> LakeResult<u32> {
            if !raw_dir.is_dir()
                && let Some(existing) = existing_chunk_count(&organized_dir)?
            {
                info!(chunk_count = existing, "raw layout missing, using organized chunk count");
                return Ok(existing);
            }

            let layout = RawLayout::discover(&raw_dir)?;
            let population = estimate_population(&layout)?;
            let chunk_count = derive_chunk_count(population, chunk_size)?;
            info!(population, chunk_size, chunk_count, "derived chunk count");

            Ok(chunk_count)
        })
        .await?
    }
}

/// How a phase ended when it did not fail outright.
#[derive(Debug)]
enum PhaseEnd {
    Completed,
    /// Dry run: nothing was done.
    Planned,
    Incomplete(String),
}

/// Estimates the number of distinct entities from the first file of every tile.
///
/// Every raw file of a tile holds one record per entity, so its footer row count is the tile's
/// population.
pub fn estimate_population(layout: &RawLayout) -> LakeResult<u64> {
    let mut population = 0;
    for (tile, inputs) in layout.by_tile() {
        let Some(first) = inputs.first() else {
            continue;
        };

        let rows = codec::row_count(&first.path)?;
        info!(tile, rows, path = %first.path.display(), "sampled tile population");
        population += rows;
    }

    Ok(population)
}

fn existing_chunk_count(organized_dir: &Path) -> LakeResult<Option<u32>> {
    if !organized_dir.is_dir() {
        return Ok(None);
    }

    // Gaps in the range are missing chunks, not a smaller chunk count.
    let count = organized::list_chunk_dirs(organized_dir)?
        .into_iter()
        .filter_map(|entry| entry.chunk)
        .map(|chunk| chunk.0.saturating_add(1))
        .max();

    Ok(count)
}

fn reorg_chunk_status(outcome: &ChunkOutcome) -> ChunkStatus {
    match outcome {
        ChunkOutcome::Created { rows, .. } => ChunkStatus::Done { rows: *rows },
        ChunkOutcome::Skipped => ChunkStatus::Skipped,
        ChunkOutcome::Planned => ChunkStatus::Pending,
        ChunkOutcome::Failed { reason } => ChunkStatus::Failed {
            reason: reason.clone(),
        },
    }
}

fn commit_chunk_status(outcome: &PartitionOutcome) -> ChunkStatus {
    match outcome {
        PartitionOutcome::Committed { rows, .. } => ChunkStatus::Done { rows: *rows },
        PartitionOutcome::Skipped => ChunkStatus::Skipped,
        PartitionOutcome::Failed { reason } => ChunkStatus::Failed {
            reason: reason.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::test_utils::{RawFixture, date, entity_ids, weekly_dates};
    use crate::types::ChunkId;

    #[test]
    fn population_is_summed_over_tiles() {
        let dir = TempDir::new().unwrap();
        let fixture = RawFixture::new(dir.path());
        let dates = weekly_dates(date(2024, 1, 1), 2);
        fixture.write_grid("T1", &entity_ids("a", 12), &dates);
        fixture.write_grid("T2", &entity_ids("b", 8), &dates);

        let layout = RawLayout::discover(dir.path()).unwrap();

        assert_eq!(estimate_population(&layout).unwrap(), 20);
    }

    #[test]
    fn existing_chunk_count_spans_missing_chunks() {
        let dir = TempDir::new().unwrap();
        assert_eq!(existing_chunk_count(&dir.path().join("absent")).unwrap(), None);
        assert_eq!(existing_chunk_count(dir.path()).unwrap(), None);

        for chunk in [0, 1, 3] {
            std::fs::create_dir_all(dir.path().join(ChunkId(chunk).dir_name())).unwrap();
        }
        std::fs::create_dir_all(organized::staging_dir(dir.path()).join("parcel_chunk=09"))
            .unwrap();

        assert_eq!(existing_chunk_count(dir.path()).unwrap(), Some(4));
    }

    #[test]
    fn chunk_status_mirrors_outcomes() {
        assert_eq!(
            reorg_chunk_status(&ChunkOutcome::Created {
                rows: 10,
                entities: 2
            }),
            ChunkStatus::Done { rows: 10 }
        );
        assert_eq!(
            commit_chunk_status(&PartitionOutcome::Failed {
                reason: "boom".to_string()
            }),
            ChunkStatus::Failed {
                reason: "boom".to_string()
            }
        );
    }
}
