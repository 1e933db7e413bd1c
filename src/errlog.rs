//! Translation error log.
//!
//! One NDJSON file per dialect, `translate-error-<dialect>.log`, appended to
//! whenever a rewrite fails or a rewritten statement is rejected by the
//! target. A record is serialized before the file lock is taken and written
//! with a single `write_all`, so a reader never sees half a record.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::dialect::normalize_name;
use crate::error::{ErrorKind, ShiftError, ShiftResult};
use crate::value::SqlValue;

const FILE_PREFIX: &str = "translate-error-";
const FILE_SUFFIX: &str = ".log";

/// One failed translation or execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationErrorRecord {
    pub timestamp: String,
    pub dialect: String,
    #[serde(rename = "originalSQL")]
    pub original_sql: String,
    #[serde(rename = "rewrittenSQL", default, skip_serializing_if = "Option::is_none")]
    pub rewritten_sql: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    #[serde(rename = "errorType")]
    pub error_type: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<SqlValue>>,
    #[serde(rename = "stackTrace", default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl TranslationErrorRecord {
    fn new(dialect: &str, original_sql: &str, error: &ShiftError, error_type: ErrorKind) -> Self {
        let backtrace = Backtrace::capture();
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            dialect: dialect.to_string(),
            original_sql: original_sql.to_string(),
            rewritten_sql: None,
            error_message: error.to_string(),
            error_type,
            params: None,
            stack_trace: (backtrace.status() == BacktraceStatus::Captured)
                .then(|| backtrace.to_string()),
        }
    }
}

/// Append-only per-dialect error log rooted at one directory.
#[derive(Debug)]
pub struct ErrorLog {
    dir: PathBuf,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl ErrorLog {
    /// The directory is created on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, dialect: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", FILE_PREFIX, normalize_name(dialect), FILE_SUFFIX))
    }

    fn lock_for(&self, dialect: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self
            .locks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(dialect)
        {
            return lock.clone();
        }
        self.locks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(dialect.to_string())
            .or_default()
            .clone()
    }

    /// Record a rewrite failure.
    pub fn log_translation_error(
        &self,
        dialect: &str,
        original_sql: &str,
        error: &ShiftError,
        rewritten_sql: Option<&str>,
    ) {
        let dialect = normalize_name(dialect);
        let mut record =
            TranslationErrorRecord::new(&dialect, original_sql, error, ErrorKind::Translation);
        record.rewritten_sql = rewritten_sql.map(str::to_string);
        self.append(&record);
    }

    /// Record a rewritten statement the target rejected.
    pub fn log_execution_error(
        &self,
        dialect: &str,
        original_sql: &str,
        rewritten_sql: &str,
        error: &ShiftError,
        params: Option<&[SqlValue]>,
    ) {
        let dialect = normalize_name(dialect);
        let mut record =
            TranslationErrorRecord::new(&dialect, original_sql, error, ErrorKind::Execution);
        record.rewritten_sql = Some(rewritten_sql.to_string());
        record.params = params.map(<[SqlValue]>::to_vec);
        self.append(&record);
    }

    /// Write failures are reported and swallowed; the caller's own error
    /// is what propagates.
    fn append(&self, record: &TranslationErrorRecord) {
        if let Err(e) = self.try_append(record) {
            tracing::error!(
                "failed to write translation error record for {}: {}",
                record.dialect,
                e
            );
        }
    }

    fn try_append(&self, record: &TranslationErrorRecord) -> ShiftResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let lock = self.lock_for(&record.dialect);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&record.dialect))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// All records for a dialect, oldest first. Lines that do not parse are skipped.
    pub fn read_errors(&self, dialect: &str) -> ShiftResult<Vec<TranslationErrorRecord>> {
        let dialect = normalize_name(dialect);
        let content = {
            let lock = self.lock_for(&dialect);
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            match fs::read_to_string(self.path_for(&dialect)) {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            }
        };
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::debug!("skipping unreadable record in {} log: {}", dialect, e);
                    None
                }
            })
            .collect())
    }

    pub fn clear_errors(&self, dialect: &str) -> ShiftResult<()> {
        let dialect = normalize_name(dialect);
        let lock = self.lock_for(&dialect);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(self.path_for(&dialect)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Record counts per dialect, for every log file in the directory.
    pub fn error_summary(&self) -> ShiftResult<BTreeMap<String, usize>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let mut summary = BTreeMap::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            let Some(dialect) = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            else {
                continue;
            };
            summary.insert(dialect.to_string(), self.read_errors(dialect)?.len());
        }
        Ok(summary)
    }
}
