//! Append-only summary table.
//!
//! One CSV row per [`DispatchResult`], encoded through Arrow record batches
//! so the column set and types are fixed by a schema. Rows are appended as
//! results arrive; the header is written once, when the file is new.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use arrow::array::{ArrayRef, Float64Array, StringArray, UInt32Array, UInt64Array};
use arrow::csv::WriterBuilder;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use super::error::DispatchError;
use super::result::DispatchResult;
use super::sanitize::KPI_FIELDS;

static SUMMARY_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    let mut fields = vec![
        Field::new("run_id", DataType::Utf8, false),
        Field::new("index", DataType::UInt64, false),
        Field::new("label", DataType::Utf8, false),
        Field::new("sweep", DataType::Utf8, false),
        Field::new("status", DataType::Utf8, false),
        Field::new("error_kind", DataType::Utf8, true),
        Field::new("error", DataType::Utf8, true),
        Field::new("note", DataType::Utf8, true),
        Field::new("attempts", DataType::UInt32, false),
        Field::new("elapsed_ms", DataType::UInt64, false),
    ];
    fields.extend(KPI_FIELDS.iter().map(|k| Field::new(*k, DataType::Float64, true)));
    fields.extend([
        Field::new("sanitized", DataType::Utf8, true),
        Field::new("sweep_params", DataType::Utf8, false),
        Field::new("detail_path", DataType::Utf8, true),
    ]);
    Arc::new(Schema::new(fields))
});

/// Schema of the summary table.
#[must_use]
pub fn summary_schema() -> SchemaRef {
    Arc::clone(&SUMMARY_SCHEMA)
}

/// Header line this version writes.
#[must_use]
pub fn header_line() -> String {
    SUMMARY_SCHEMA
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Check an existing summary file is compatible.
///
/// Returns `true` when the file is missing or empty (a header is needed).
pub fn check_existing(path: &Path) -> Result<bool, DispatchError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(DispatchError::io(path, e)),
    };

    let mut first = String::new();
    BufReader::new(file)
        .read_line(&mut first)
        .map_err(|e| DispatchError::io(path, e))?;
    let found = first.trim_end_matches(['\r', '\n']);
    if found.is_empty() {
        return Ok(true);
    }

    let expected = header_line();
    if found == expected {
        Ok(false)
    } else {
        Err(DispatchError::SummaryHeaderMismatch {
            path: path.to_path_buf(),
            expected,
            found: found.to_string(),
        })
    }
}

/// Build a one-row record batch for a result.
pub fn result_batch(run_id: &str, result: &DispatchResult) -> Result<RecordBatch, DispatchError> {
    let text = |v: Option<&str>| -> ArrayRef { Arc::new(StringArray::from(vec![v])) };

    let sweep_params = serde_json::to_string(&result.sweep_params).unwrap_or_default();
    let sanitized = (!result.kpis.sanitized.is_empty()).then(|| result.kpis.sanitized.join(";"));
    let detail_path = result.detail_path.as_ref().map(|p| p.display().to_string());

    let mut columns: Vec<ArrayRef> = vec![
        text(Some(run_id)),
        Arc::new(UInt64Array::from(vec![result.index as u64])),
        text(Some(result.label.as_str())),
        text(Some(result.sweep.as_str())),
        text(Some(result.status.as_str())),
        text(result.error_kind.map(|k| k.as_str())),
        text(result.error.as_deref()),
        text(result.note.as_deref()),
        Arc::new(UInt32Array::from(vec![result.attempts])),
        Arc::new(UInt64Array::from(vec![result.elapsed_ms])),
    ];
    for i in 0..KPI_FIELDS.len() {
        let value = result.kpis.values.get(i).copied().flatten();
        columns.push(Arc::new(Float64Array::from(vec![value])));
    }
    columns.push(text(sanitized.as_deref()));
    columns.push(text(Some(sweep_params.as_str())));
    columns.push(text(detail_path.as_deref()));

    Ok(RecordBatch::try_new(summary_schema(), columns)?)
}

/// Single writer for the summary file of one batch.
#[derive(Debug)]
pub struct SummaryWriter {
    path: PathBuf,
    run_id: String,
    file: File,
    needs_header: bool,
    rows_written: u64,
}

impl SummaryWriter {
    /// Open `path` for appending, creating it (and its directory) if needed.
    pub fn open(path: &Path, run_id: &str) -> Result<Self, DispatchError> {
        let needs_header = check_existing(path)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DispatchError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| DispatchError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
            file,
            needs_header,
            rows_written: 0,
        })
    }

    /// Append one row and flush it to the file.
    pub fn append(&mut self, result: &DispatchResult) -> Result<(), DispatchError> {
        let batch = result_batch(&self.run_id, result)?;

        let mut buffer = Vec::new();
        {
            let mut writer = WriterBuilder::new()
                .with_header(self.needs_header)
                .build(&mut buffer);
            writer.write(&batch)?;
        }

        self.file
            .write_all(&buffer)
            .and_then(|()| self.file.flush())
            .map_err(|e| DispatchError::io(&self.path, e))?;
        self.needs_header = false;
        self.rows_written += 1;
        Ok(())
    }

    /// Rows appended by this writer.
    #[must_use]
    pub const fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Summary file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
