//! Bulk export of a store to a gzip-compressed JSON-lines file.
//!
//! [`BulkExporter`] drains any [`RecordStore`] page by page through its
//! primary index and writes one JSON object per line to
//! `<path>/<Type>_<session>[_<postfix>].txt.gz`. The store may still be
//! running, in which case the export is not a snapshot: a record written
//! between two page reads can shift later pages, so some records may be
//! missing and others exported twice. Stop the store first for an exact copy.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};
use verdant_core::TelemetryRecord;

use crate::config::ExportConfig;
use crate::error::{StoreError, StoreResult};
use crate::storage::{ManagedStore, RecordStore};

/// File name of the export for `record_type` in `session_id`.
#[must_use]
pub fn export_file_name(record_type: &str, session_id: &str, postfix: Option<&str>) -> String {
    match postfix {
        Some(postfix) => format!("{record_type}_{session_id}_{postfix}.txt.gz"),
        None => format!("{record_type}_{session_id}.txt.gz"),
    }
}

/// Result of one bulk export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    /// The file written.
    pub path: PathBuf,
    /// Number of records written to it.
    pub records: u64,
}

/// Writes whole stores to export files.
#[derive(Debug, Clone)]
pub struct BulkExporter {
    config: ExportConfig,
}

impl BulkExporter {
    #[must_use]
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Path the export of `T` in `session_id` is written to.
    #[must_use]
    pub fn path_for<T: TelemetryRecord>(&self, session_id: &str) -> PathBuf {
        self.config.path.join(export_file_name(
            T::TYPE_NAME,
            session_id,
            self.config.postfix.as_deref(),
        ))
    }

    /// Exports every record of `store`, primary key descending.
    ///
    /// A streaming store's own output file is never touched: exporting one
    /// to the path it streams into is rejected, open or closed.
    ///
    /// # Errors
    ///
    /// `OutputInUse` if the target is `store`'s streaming output; `Io` if the
    /// directory or file cannot be written; any error `page()` returns, such
    /// as `Closed` for a store that has been shut down.
    pub fn export<T: TelemetryRecord>(
        &self,
        session_id: &str,
        store: &dyn RecordStore<T>,
    ) -> StoreResult<ExportSummary> {
        fs::create_dir_all(&self.config.path)
            .map_err(|e| StoreError::io(&self.config.path, e))?;
        let path = self.path_for::<T>(session_id);
        if let Some(output) = store.output_path() {
            if same_file(output, &path) {
                return Err(StoreError::OutputInUse {
                    path,
                    store: store.key().to_string(),
                });
            }
        }
        let file = File::create(&path).map_err(|e| StoreError::io(&path, e))?;
        let mut out = GzEncoder::new(BufWriter::new(file), Compression::default());

        let mut records = 0u64;
        let mut page_number = 0u32;
        loop {
            let page = store.page(None, page_number, self.config.chunk_size)?;
            if page.is_empty() {
                break;
            }
            for record in &page {
                write_line(&mut out, record).map_err(|e| StoreError::io(&path, e))?;
            }
            records += page.len() as u64;
            debug!(store = %store.key(), page_number, records, "export chunk written");
            page_number += 1;
        }

        finish(out).map_err(|e| StoreError::io(&path, e))?;
        info!(store = %store.key(), path = %path.display(), records, "export complete");
        Ok(ExportSummary { path, records })
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn write_line<T: TelemetryRecord>(out: &mut impl Write, record: &T) -> std::io::Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")
}

fn finish(out: GzEncoder<BufWriter<File>>) -> std::io::Result<()> {
    let file = out
        .finish()?
        .into_inner()
        .map_err(std::io::IntoInnerError::into_error)?;
    file.sync_all()
}

/// Reads an export file back. Used by tests and the soak tool.
///
/// # Errors
///
/// `Io` if the file cannot be read or a line is not a valid record.
pub fn read_export<T: TelemetryRecord>(path: &Path) -> StoreResult<Vec<T>> {
    use std::io::BufRead;

    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let reader = std::io::BufReader::new(flate2::read::GzDecoder::new(file));
    reader
        .lines()
        .map(|line| {
            let line = line.map_err(|e| StoreError::io(path, e))?;
            serde_json::from_str(&line).map_err(|e| StoreError::io(path, e.into()))
        })
        .collect()
}
