use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::NaiveDate;
use tracing::{Instrument, debug, info, info_span};

use crate::codec;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::LakeResult;
use crate::layout::raw::{RawInput, RawLayout};
use crate::validate::report::{FindingKind, Representation, ValidationReport};
use crate::workers::pool::WorkerPool;

/// Distinct entities and date range of one raw file.
#[derive(Debug)]
struct FileScan {
    entities: HashSet<String>,
    rows: u64,
    dates: Option<(NaiveDate, NaiveDate)>,
}

#[derive(Debug, Default)]
struct TileState {
    entities: HashSet<String>,
    min_per_file: Option<u64>,
    max_per_file: u64,
}

/// Checks the raw layout: per-tile entity population and per-file date consistency.
///
/// Files are scanned in parallel; at most `workers` file scans are held at once.
pub async fn check_raw(
    raw_dir: &Path,
    expected_entities_per_tile: Option<u64>,
    batch_size: usize,
    workers: usize,
    shutdown_rx: &ShutdownRx,
) -> LakeResult<ValidationReport> {
    let mut report = ValidationReport::new(Representation::Raw);

    if !raw_dir.is_dir() {
        report.push(FindingKind::EmptyRepresentation {
            reason: format!("raw directory {} does not exist", raw_dir.display()),
        });
        return Ok(report);
    }

    let layout = RawLayout::discover(raw_dir)?;
    info!(files = layout.inputs().len(), "checking raw layout");

    for rejected in layout.rejected() {
        report.push(FindingKind::UnreadableInput {
            path: rejected.path.clone(),
            reason: rejected.reason.clone(),
        });
    }

    if layout.is_empty() {
        report.push(FindingKind::EmptyRepresentation {
            reason: format!("no raw inputs under {}", raw_dir.display()),
        });
        report.sort();
        return Ok(report);
    }

    let mut tiles: BTreeMap<String, TileState> = BTreeMap::new();
    let mut pool: WorkerPool<u32, FileScan> = WorkerPool::new(workers);
    let workers = workers.max(1);

    for input in layout.inputs() {
        shutdown_rx.check()?;

        while pool.len() >= workers {
            let Some((index, result)) = pool.join_next().await else {
                break;
            };
            if let Some(input) = layout.inputs().get(index as usize) {
                absorb(&mut report, &mut tiles, input, result);
            }
        }

        let path = input.path.clone();
        let span = info_span!("check_raw_file", path = %path.display());
        pool.spawn(
            input.index,
            async move {
                tokio::task::spawn_blocking(move || scan_file(&path, batch_size)).await?
            }
            .instrument(span),
        )?;
    }

    while let Some((index, result)) = pool.join_next().await {
        if let Some(input) = layout.inputs().get(index as usize) {
            absorb(&mut report, &mut tiles, input, result);
        }
    }

    for (tile, state) in &tiles {
        let found = state.entities.len() as u64;
        if let Some(expected) = expected_entities_per_tile
            && found != expected
        {
            report.push(FindingKind::UnexpectedEntityCount {
                tile: tile.clone(),
                expected,
                found,
            });
        }

        if let Some(min) = state.min_per_file
            && min != state.max_per_file
        {
            report.push(FindingKind::InconsistentEntityCounts {
                tile: tile.clone(),
                min,
                max: state.max_per_file,
            });
        }
    }

    report.stats.files = layout.inputs().len() as u64;
    report.stats.entities = tiles.values().map(|state| state.entities.len() as u64).sum();
    report.stats.dates = layout.available_dates().len() as u64;
    report.sort();

    Ok(report)
}

fn absorb(
    report: &mut ValidationReport,
    tiles: &mut BTreeMap<String, TileState>,
    input: &RawInput,
    result: LakeResult<FileScan>,
) {
    let scan = match result {
        Ok(scan) => scan,
        Err(err) => {
            report.push(FindingKind::UnreadableInput {
                path: input.path.clone(),
                reason: err.reason(),
            });
            return;
        }
    };

    debug!(
        path = %input.path.display(),
        rows = scan.rows,
        entities = scan.entities.len(),
        "scanned raw file"
    );

    let partition_date = input.partition.date;
    if let Some((min, max)) = scan.dates
        && (min != partition_date || max != partition_date)
    {
        report.push(FindingKind::DateInconsistency {
            path: input.path.clone(),
            partition_date,
            min,
            max,
        });
    }

    report.stats.rows += scan.rows;

    let state = tiles.entry(input.partition.tile.clone()).or_default();
    let count = scan.entities.len() as u64;
    state.min_per_file = Some(state.min_per_file.map_or(count, |min| min.min(count)));
    state.max_per_file = state.max_per_file.max(count);
    state.entities.extend(scan.entities);
}

fn scan_file(path: &Path, batch_size: usize) -> LakeResult<FileScan> {
    let mut scan = FileScan {
        entities: HashSet::new(),
        rows: 0,
        dates: None,
    };

    for batch in codec::open_reader(path, batch_size)? {
        for record in batch? {
            scan.rows += 1;
            scan.dates = Some(match scan.dates {
                Some((min, max)) => (min.min(record.date), max.max(record.date)),
                None => (record.date, record.date),
            });
            scan.entities.insert(record.parcel_id);
        }
    }

    Ok(scan)
}
