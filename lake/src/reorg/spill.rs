//! Per-chunk buffers that spill to run files when memory runs short.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, RecordBatch, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, UInt32Type};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::bail;
use crate::codec;
use crate::error::{ErrorKind, LakeResult};
use crate::reorg::dedup::{ScanPosition, ScannedRecord};
use crate::types::{ChunkId, Observation};

const SCAN_INPUT_COLUMN: &str = "scan_input";
const SCAN_ROW_COLUMN: &str = "scan_row";

/// Rows encoded per record batch in a run file.
const RUN_BATCH_ROWS: usize = 65_536;

fn run_schema() -> SchemaRef {
    let mut fields = codec::observation_fields();
    fields.push(Field::new(SCAN_INPUT_COLUMN, DataType::UInt32, false));
    fields.push(Field::new(SCAN_ROW_COLUMN, DataType::UInt32, false));
    Arc::new(Schema::new(fields))
}

fn encode_run_batch(schema: &SchemaRef, records: &[ScannedRecord]) -> LakeResult<RecordBatch> {
    let observations: Vec<Observation> = records
        .iter()
        .map(|record| record.observation.clone())
        .collect();

    let mut columns = codec::observation_columns(&observations);
    columns.push(Arc::new(UInt32Array::from_iter_values(
        records.iter().map(|record| record.position.input),
    )) as ArrayRef);
    columns.push(Arc::new(UInt32Array::from_iter_values(
        records.iter().map(|record| record.position.row),
    )) as ArrayRef);

    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

/// Writes `records` as a run file at `path`.
pub fn write_run(path: &Path, records: &[ScannedRecord]) -> LakeResult<()> {
    let schema = run_schema();
    codec::write_batches(
        path,
        schema.clone(),
        records
            .chunks(RUN_BATCH_ROWS)
            .map(|batch| encode_run_batch(&schema, batch)),
    )
}

/// Reads every record of the run file at `path`.
pub fn read_run(path: &Path, batch_size: usize) -> LakeResult<Vec<ScannedRecord>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?
        .with_batch_size(batch_size)
        .build()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        let observations = codec::decode_observations(&batch)?;
        let inputs = position_column(&batch, SCAN_INPUT_COLUMN)?;
        let rows = position_column(&batch, SCAN_ROW_COLUMN)?;

        records.extend(observations.into_iter().enumerate().map(|(i, observation)| {
            ScannedRecord {
                position: ScanPosition {
                    input: inputs.value(i),
                    row: rows.value(i),
                },
                observation,
            }
        }));
    }

    Ok(records)
}

fn position_column<'a>(batch: &'a RecordBatch, name: &str) -> LakeResult<&'a UInt32Array> {
    match batch
        .column_by_name(name)
        .and_then(|column| column.as_primitive_opt::<UInt32Type>())
    {
        Some(column) if column.null_count() == 0 => Ok(column),
        _ => bail!(
            ErrorKind::InvalidData,
            "Run file is missing scan positions",
            format!("column `{name}`")
        ),
    }
}

/// Records routed to one chunk: an in-memory buffer plus the runs already spilled.
#[derive(Debug)]
pub struct ChunkAccumulator {
    chunk: ChunkId,
    spill_dir: PathBuf,
    buffer: Vec<ScannedRecord>,
    runs: Vec<PathBuf>,
}

impl ChunkAccumulator {
    pub fn new(chunk: ChunkId, staging_root: &Path) -> Self {
        Self {
            chunk,
            spill_dir: staging_root.join(chunk.dir_name()),
            buffer: Vec::new(),
            runs: Vec::new(),
        }
    }

    pub fn chunk(&self) -> ChunkId {
        self.chunk
    }

    pub fn push(&mut self, record: ScannedRecord) {
        self.buffer.push(record);
    }

    /// Rows currently held in memory.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Takes the buffered records and returns them with the path of the next run file.
    ///
    /// The run is registered immediately; the caller must write it before the chunk is
    /// flushed.
    pub fn take_run(&mut self) -> LakeResult<(PathBuf, Vec<ScannedRecord>)> {
        std::fs::create_dir_all(&self.spill_dir)?;
        let path = self
            .spill_dir
            .join(format!("run-{:05}.parquet", self.runs.len()));
        self.runs.push(path.clone());

        Ok((path, std::mem::take(&mut self.buffer)))
    }

    /// Consumes the accumulator, returning the in-memory records and the run files.
    pub fn into_parts(self) -> (Vec<ScannedRecord>, Vec<PathBuf>) {
        (self.buffer, self.runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{date, observation};

    #[test]
    fn runs_keep_scan_positions() {
        let dir = tempfile::tempdir().unwrap();
        let mut accumulator = ChunkAccumulator::new(ChunkId(3), dir.path());
        for row in 0..5u32 {
            accumulator.push(ScannedRecord {
                position: ScanPosition { input: 7, row },
                observation: observation("p1", date(2024, 1, 1), f64::from(row)),
            });
        }

        let (path, records) = accumulator.take_run().unwrap();
        write_run(&path, &records).unwrap();

        assert_eq!(accumulator.buffered(), 0);
        assert_eq!(records.len(), 5);
        assert!(path.starts_with(dir.path().join("parcel_chunk=03")));

        let read_back = read_run(&path, 2).unwrap();
        assert_eq!(read_back, records);

        let (buffer, runs) = accumulator.into_parts();
        assert!(buffer.is_empty());
        assert_eq!(runs, vec![path]);
    }
}
