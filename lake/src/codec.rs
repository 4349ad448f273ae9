//! Parquet encoding of observation records.
//!
//! Every representation (raw inputs, organized chunks, table partitions and spill runs) stores
//! observations with the same columns: `parcel_id` (Utf8), `date` (Date32) and the twelve
//! Float64 measurements. Extra columns are ignored on read.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Date32Array, Float64Array, RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, Date32Type, Field, Float64Type, Schema, SchemaRef};
use chrono::{Datelike, NaiveDate};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::file::properties::WriterProperties;
use tracing::warn;

use crate::bail;
use crate::error::{ErrorKind, LakeResult};
use crate::lake_error;
use crate::types::{MEASUREMENT_COLUMNS, MEASUREMENT_COUNT, Measurements, Observation};

pub const PARCEL_ID_COLUMN: &str = "parcel_id";
pub const DATE_COLUMN: &str = "date";

/// Rows encoded into a single record batch when writing.
const WRITE_BATCH_ROWS: usize = 65_536;

/// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

/// Returns the observation columns as arrow fields.
pub fn observation_fields() -> Vec<Field> {
    let mut fields = Vec::with_capacity(MEASUREMENT_COUNT + 2);
    fields.push(Field::new(PARCEL_ID_COLUMN, DataType::Utf8, false));
    fields.push(Field::new(DATE_COLUMN, DataType::Date32, false));
    fields.extend(
        MEASUREMENT_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, false)),
    );
    fields
}

pub fn observation_schema() -> SchemaRef {
    Arc::new(Schema::new(observation_fields()))
}

/// Encodes records into arrow columns in [`observation_fields`] order.
pub fn observation_columns(records: &[Observation]) -> Vec<ArrayRef> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(MEASUREMENT_COUNT + 2);
    columns.push(Arc::new(StringArray::from_iter_values(
        records.iter().map(|record| record.parcel_id.as_str()),
    )));
    columns.push(Arc::new(Date32Array::from_iter_values(
        records.iter().map(|record| date_to_days(record.date)),
    )));

    let values: Vec<[f64; MEASUREMENT_COUNT]> = records
        .iter()
        .map(|record| record.measurements.to_array())
        .collect();
    for column in 0..MEASUREMENT_COUNT {
        columns.push(Arc::new(Float64Array::from_iter_values(
            values.iter().map(|row| row[column]),
        )));
    }

    columns
}

pub fn to_record_batch(records: &[Observation]) -> LakeResult<RecordBatch> {
    Ok(RecordBatch::try_new(
        observation_schema(),
        observation_columns(records),
    )?)
}

/// Decodes the observation columns of `batch`.
pub fn decode_observations(batch: &RecordBatch) -> LakeResult<Vec<Observation>> {
    let parcel_ids = required_column(batch, PARCEL_ID_COLUMN)?;
    let Some(parcel_ids) = parcel_ids.as_string_opt::<i32>() else {
        bail!(
            ErrorKind::InvalidData,
            "Unexpected column type",
            format!("`{PARCEL_ID_COLUMN}` must be Utf8")
        );
    };

    let dates = required_column(batch, DATE_COLUMN)?;
    let Some(dates) = dates.as_primitive_opt::<Date32Type>() else {
        bail!(
            ErrorKind::InvalidData,
            "Unexpected column type",
            format!("`{DATE_COLUMN}` must be Date32")
        );
    };

    let mut measurements = Vec::with_capacity(MEASUREMENT_COUNT);
    for name in MEASUREMENT_COLUMNS {
        let column = required_column(batch, name)?;
        let Some(column) = column.as_primitive_opt::<Float64Type>() else {
            bail!(
                ErrorKind::InvalidData,
                "Unexpected column type",
                format!("`{name}` must be Float64")
            );
        };
        measurements.push(column);
    }

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let days = dates.value(row);
        let date = days_to_date(days).ok_or_else(|| {
            lake_error!(
                ErrorKind::InvalidData,
                "Date out of range",
                format!("{days} days from the Unix epoch")
            )
        })?;

        let mut values = [0.0; MEASUREMENT_COUNT];
        for (value, column) in values.iter_mut().zip(&measurements) {
            *value = column.value(row);
        }

        records.push(Observation::new(
            parcel_ids.value(row),
            date,
            Measurements::from_array(values),
        ));
    }

    Ok(records)
}

fn required_column<'a>(batch: &'a RecordBatch, name: &str) -> LakeResult<&'a ArrayRef> {
    let Some(column) = batch.column_by_name(name) else {
        bail!(
            ErrorKind::InvalidData,
            "Missing column",
            format!("column `{name}` not found")
        );
    };

    if column.null_count() > 0 {
        bail!(
            ErrorKind::InvalidData,
            "Null values are not supported",
            format!("column `{name}` contains {} nulls", column.null_count())
        );
    }

    Ok(column)
}

/// Streaming reader yielding decoded observations one batch at a time.
pub struct ObservationReader {
    inner: ParquetRecordBatchReader,
}

impl Iterator for ObservationReader {
    type Item = LakeResult<Vec<Observation>>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.inner.next()?;
        Some(
            batch
                .map_err(Into::into)
                .and_then(|batch| decode_observations(&batch)),
        )
    }
}

/// Opens `path` for reading in batches of at most `batch_size` rows.
pub fn open_reader(path: &Path, batch_size: usize) -> LakeResult<ObservationReader> {
    let file = File::open(path)?;
    let inner = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(batch_size)
        .build()?;

    Ok(ObservationReader { inner })
}

/// Reads every observation of `path`.
pub fn read_observations(path: &Path, batch_size: usize) -> LakeResult<Vec<Observation>> {
    let mut records = Vec::new();
    for batch in open_reader(path, batch_size)? {
        records.extend(batch?);
    }

    Ok(records)
}

/// Returns the row count recorded in the file footer without decoding data.
pub fn row_count(path: &Path) -> LakeResult<u64> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let rows = builder.metadata().file_metadata().num_rows();

    Ok(u64::try_from(rows).unwrap_or_default())
}

/// Writes `batches` into a new parquet file at `path`.
pub fn write_batches<I>(path: &Path, schema: SchemaRef, batches: I) -> LakeResult<()>
where
    I: IntoIterator<Item = LakeResult<RecordBatch>>,
{
    let file = File::create(path)?;
    let properties = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(properties))?;
    for batch in batches {
        writer.write(&batch?)?;
    }
    writer.close()?;

    Ok(())
}

/// Writes `records` into a new parquet file at `path`. Returns the number of rows written.
pub fn write_observations(path: &Path, records: &[Observation]) -> LakeResult<u64> {
    write_batches(
        path,
        observation_schema(),
        records.chunks(WRITE_BATCH_ROWS).map(to_record_batch),
    )?;

    Ok(records.len() as u64)
}

/// Writes `records` to `path` so that the file is either complete or absent.
///
/// Data is written to a hidden temporary sibling, synced, and renamed over `path`. The
/// temporary file is removed when any step fails.
pub fn write_observations_atomic(path: &Path, records: &[Observation]) -> LakeResult<u64> {
    let temp_path = temp_sibling(path)?;

    let result = write_observations(&temp_path, records).and_then(|rows| {
        File::open(&temp_path)?.sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(rows)
    });

    if result.is_err() {
        remove_quietly(&temp_path);
    }

    result
}

/// Returns a unique hidden path next to `path` for staging a write.
pub fn temp_sibling(path: &Path) -> LakeResult<PathBuf> {
    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        bail!(
            ErrorKind::InvalidState,
            "Output path has no parent directory",
            path.display()
        );
    };

    Ok(parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    )))
}

/// Removes a file, logging instead of failing when it cannot be removed.
pub fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %err, "failed to remove temporary file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{date, observation};

    #[test]
    fn dates_convert_around_the_epoch() {
        assert_eq!(date_to_days(date(1970, 1, 1)), 0);
        assert_eq!(date_to_days(date(1970, 1, 2)), 1);
        assert_eq!(date_to_days(date(1969, 12, 31)), -1);
        assert_eq!(days_to_date(19_723), Some(date(2024, 1, 1)));
    }

    #[test]
    fn written_files_read_back_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.parquet");
        let records: Vec<_> = (0..25)
            .map(|i| observation(&format!("parcel_{i:03}"), date(2024, 1, 1), i as f64))
            .collect();

        assert_eq!(write_observations_atomic(&path, &records).unwrap(), 25);
        assert_eq!(row_count(&path).unwrap(), 25);

        let batches: Vec<_> = open_reader(&path, 10)
            .unwrap()
            .collect::<LakeResult<Vec<_>>>()
            .unwrap();
        assert_eq!(
            batches.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert_eq!(batches.concat(), records);

        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn missing_columns_are_invalid_data() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            PARCEL_ID_COLUMN,
            DataType::Utf8,
            false,
        )]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(StringArray::from_iter_values(["p1"])) as ArrayRef],
        )
        .unwrap();

        let err = decode_observations(&batch).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn garbage_files_fail_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.parquet");
        fs::write(&path, b"definitely not parquet").unwrap();

        assert!(open_reader(&path, 10).is_err());
        assert!(row_count(&path).is_err());
    }
}
