//! Append-only bar store, one CSV file per instrument.
//!
//! Layout: `{root}/{CODE}.csv`, header row from [`BAR_HEADER`], then one bar
//! per line in strictly increasing date order.
//!
//! Features:
//! - Atomic writes (write to .tmp, fsync, rename into place)
//! - Append only ever adds rows dated after the current last date
//! - Integrity validation on every read (header, row schema, ordering,
//!   trailing newline)
//! - A missing file and a header-only file are distinct states

use crate::domain::{
    check_header, check_strictly_increasing, Bar, InstrumentCode, SchemaError, BAR_HEADER,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no store for {code}; run `bulk-load` first")]
    NotFound { code: InstrumentCode },

    #[error("store for {code} already exists (pass overwrite to replace it)")]
    AlreadyExists { code: InstrumentCode },

    #[error("store for {code} is corrupt: {reason}")]
    Corrupt { code: InstrumentCode, reason: String },

    #[error("rows for {code} are out of order: {source}")]
    OutOfOrder {
        code: InstrumentCode,
        #[source]
        source: SchemaError,
    },

    #[error("store I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, err: csv::Error) -> Self {
        StoreError::io(path, std::io::Error::other(err))
    }
}

/// Row count and date range of one store file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSummary {
    pub code: InstrumentCode,
    pub rows: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

/// The on-disk archive.
#[derive(Debug, Clone)]
pub struct BarStore {
    root: PathBuf,
}

impl BarStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the store file for an instrument: `{root}/{CODE}.csv`
    pub fn path_for(&self, code: &InstrumentCode) -> PathBuf {
        self.root.join(format!("{code}.csv"))
    }

    pub fn exists(&self, code: &InstrumentCode) -> bool {
        self.path_for(code).is_file()
    }

    /// Date of the newest stored bar, or `None` for a header-only store.
    pub fn last_date(&self, code: &InstrumentCode) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.load(code)?.last().map(|b| b.date))
    }

    /// Load all bars for an instrument, validated and in date order.
    pub fn load(&self, code: &InstrumentCode) -> Result<Vec<Bar>, StoreError> {
        let bytes = self.read_bytes(code)?;
        parse_store(code, &bytes)
    }

    /// Append bars dated strictly after the current last date.
    ///
    /// Rows at or before the last date are dropped. When nothing remains no
    /// write happens and the result is `0`. Otherwise the existing content
    /// plus the new rows are written to a temp file that replaces the store
    /// in one rename, so readers see either the old or the new file.
    ///
    /// Each call re-reads and rewrites the whole file: O(stored rows) per
    /// append, regardless of how few rows are new.
    pub fn append(&self, code: &InstrumentCode, rows: &[Bar]) -> Result<usize, StoreError> {
        let existing = self.read_bytes(code)?;
        let stored = parse_store(code, &existing)?;
        let last = stored.last().map(|b| b.date);

        let fresh: Vec<Bar> = rows
            .iter()
            .filter(|b| last.map_or(true, |l| b.date > l))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }
        check_strictly_increasing(&fresh).map_err(|source| StoreError::OutOfOrder {
            code: code.clone(),
            source,
        })?;

        write_atomic(&self.path_for(code), Some(&existing), &fresh)?;
        tracing::debug!(code = %code, rows = fresh.len(), "appended bars");
        Ok(fresh.len())
    }

    /// Create a store from a complete history, or replace one when
    /// `overwrite` is set.
    pub fn create_full(
        &self,
        code: &InstrumentCode,
        rows: &[Bar],
        overwrite: bool,
    ) -> Result<usize, StoreError> {
        if !overwrite && self.exists(code) {
            return Err(StoreError::AlreadyExists { code: code.clone() });
        }
        check_strictly_increasing(rows).map_err(|source| StoreError::OutOfOrder {
            code: code.clone(),
            source,
        })?;

        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        write_atomic(&self.path_for(code), None, rows)?;
        tracing::debug!(code = %code, rows = rows.len(), overwrite, "wrote full store");
        Ok(rows.len())
    }

    /// Codes of every store file under the root, ascending.
    pub fn list_codes(&self) -> Result<Vec<InstrumentCode>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut codes = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.root, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Only files already named by their normalized code belong to the store.
            if let Ok(code) = InstrumentCode::parse(stem) {
                if code.as_str() == stem {
                    codes.push(code);
                }
            }
        }
        codes.sort();
        Ok(codes)
    }

    pub fn summary(&self, code: &InstrumentCode) -> Result<StoreSummary, StoreError> {
        let bars = self.load(code)?;
        Ok(StoreSummary {
            code: code.clone(),
            rows: bars.len(),
            first_date: bars.first().map(|b| b.date),
            last_date: bars.last().map(|b| b.date),
        })
    }

    fn read_bytes(&self, code: &InstrumentCode) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(code);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound { code: code.clone() })
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

// ── CSV helpers ─────────────────────────────────────────────────────

fn parse_store(code: &InstrumentCode, bytes: &[u8]) -> Result<Vec<Bar>, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        code: code.clone(),
        reason,
    };

    if bytes.is_empty() {
        return Err(corrupt("missing header".into()));
    }
    if bytes.last() != Some(&b'\n') {
        return Err(corrupt("truncated trailing row".into()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut records = reader.records();

    let header = match records.next() {
        Some(Ok(record)) => record,
        Some(Err(e)) => return Err(corrupt(format!("unreadable header: {e}"))),
        None => return Err(corrupt("missing header".into())),
    };
    let header_fields: Vec<&str> = header.iter().collect();
    check_header(&header_fields).map_err(|e| corrupt(e.to_string()))?;

    let mut bars = Vec::new();
    for (i, record) in records.enumerate() {
        // Line 1 is the header.
        let line = i + 2;
        let record = record.map_err(|e| corrupt(format!("line {line}: {e}")))?;
        let fields: Vec<&str> = record.iter().collect();
        let bar = Bar::from_fields(&fields).map_err(|e| corrupt(format!("line {line}: {e}")))?;
        bars.push(bar);
    }

    check_strictly_increasing(&bars).map_err(|e| corrupt(e.to_string()))?;
    Ok(bars)
}

/// Write `prefix` (or a fresh header) plus `rows` to `{path}.tmp`, fsync, and
/// rename over `path`.
fn write_atomic(path: &Path, prefix: Option<&[u8]>, rows: &[Bar]) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("csv.tmp");

    let result = write_file(&tmp_path, prefix, rows).and_then(|()| {
        fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path, e))
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_file(path: &Path, prefix: Option<&[u8]>, rows: &[Bar]) -> Result<(), StoreError> {
    let mut file = fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
    if let Some(prefix) = prefix {
        file.write_all(prefix).map_err(|e| StoreError::io(path, e))?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if prefix.is_none() {
        writer
            .write_record(BAR_HEADER)
            .map_err(|e| StoreError::csv(path, e))?;
    }
    for bar in rows {
        writer.serialize(bar).map_err(|e| StoreError::csv(path, e))?;
    }

    let file = writer
        .into_inner()
        .map_err(|e| StoreError::io(path, e.into_error()))?;
    file.sync_all().map_err(|e| StoreError::io(path, e))
}
