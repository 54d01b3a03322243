//! Detail packet store.
//!
//! Layout: `<detail_dir>/<run_id>/<artifact_key>.json`, one file per
//! attempted configuration, plus an `_index.csv` written at the end of the
//! batch. Packets are written to a `.tmp` sibling and renamed, so a reader
//! never sees a partial file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, StringArray, UInt64Array};
use arrow::csv::WriterBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use serde_json::Value;

use super::error::DispatchError;
use crate::atomic::write_atomic;

/// Name of the per-run index file.
pub const INDEX_FILE: &str = "_index.csv";

/// Per-run directory of detail packets.
#[derive(Debug, Clone)]
pub struct DetailStore {
    root: PathBuf,
}

/// One row of the packet index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Configuration label, when the packet records one.
    pub label: String,
    /// Packet path.
    pub file_path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Whether the packet parses as JSON.
    pub valid: bool,
    /// `error` when the packet records a failure.
    pub note: String,
}

impl DetailStore {
    /// Create (or reuse) the directory for `run_id` under `detail_dir`.
    pub fn create(detail_dir: &Path, run_id: &str) -> Result<Self, DispatchError> {
        let root = detail_dir.join(run_id);
        std::fs::create_dir_all(&root).map_err(|e| DispatchError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Directory holding this run's packets.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Packet path for an artifact key.
    #[must_use]
    pub fn path_for(&self, artifact_key: &str) -> PathBuf {
        self.root.join(format!("{artifact_key}.json"))
    }

    /// Persist a packet. The label is stored alongside the payload.
    pub fn write_packet(
        &self,
        artifact_key: &str,
        label: &str,
        payload: &Value,
    ) -> Result<PathBuf, DispatchError> {
        let path = self.path_for(artifact_key);
        let packet = serde_json::json!({
            "label": label,
            "response": payload,
        });
        let bytes = serde_json::to_vec_pretty(&packet)
            .map_err(|e| DispatchError::io(&path, std::io::Error::other(e)))?;
        write_atomic(&path, &bytes).map_err(|e| DispatchError::io(&path, e))?;
        Ok(path)
    }

    /// Scan the run directory and describe every packet.
    pub fn scan(&self) -> Result<Vec<IndexEntry>, DispatchError> {
        let read_dir = std::fs::read_dir(&self.root).map_err(|e| DispatchError::io(&self.root, e))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let path = entry.map_err(|e| DispatchError::io(&self.root, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let parsed = std::fs::read(&path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok());

            let (label, valid, note) = match &parsed {
                Some(packet) => {
                    let label = packet
                        .get("label")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let failed = packet
                        .get("response")
                        .and_then(|r| r.get("error"))
                        .is_some_and(|e| !e.is_null());
                    (label, true, if failed { "error" } else { "" })
                }
                None => (String::new(), false, "unreadable"),
            };

            entries.push(IndexEntry {
                label,
                file_path: path,
                size,
                valid,
                note: note.to_string(),
            });
        }

        entries.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(entries)
    }

    /// Write `_index.csv` for the run; returns the number of packets listed.
    pub fn write_index(&self) -> Result<usize, DispatchError> {
        let entries = self.scan()?;

        let schema = Arc::new(Schema::new(vec![
            Field::new("label", DataType::Utf8, false),
            Field::new("file_path", DataType::Utf8, false),
            Field::new("size", DataType::UInt64, false),
            Field::new("valid", DataType::Boolean, false),
            Field::new("note", DataType::Utf8, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(entries.iter().map(|e| e.label.as_str()))),
            Arc::new(StringArray::from_iter_values(
                entries.iter().map(|e| e.file_path.display().to_string()),
            )),
            Arc::new(UInt64Array::from_iter_values(entries.iter().map(|e| e.size))),
            Arc::new(BooleanArray::from(
                entries.iter().map(|e| e.valid).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from_iter_values(entries.iter().map(|e| e.note.as_str()))),
        ];
        let batch = RecordBatch::try_new(schema, columns)?;

        let mut buffer = Vec::new();
        {
            let mut writer = WriterBuilder::new().with_header(true).build(&mut buffer);
            writer.write(&batch)?;
        }

        let index_path = self.root.join(INDEX_FILE);
        write_atomic(&index_path, &buffer).map_err(|e| DispatchError::io(&index_path, e))?;
        tracing::debug!(path = %index_path.display(), packets = entries.len(), "Wrote packet index");
        Ok(entries.len())
    }
}
