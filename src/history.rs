//! Append-only execution history, one JSON record per line.

use crate::storage::{HistoryRecord, NewRecord};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

const HISTORY_FILE: &str = "history.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history storage unavailable: {0}")]
    Storage(#[from] io::Error),

    #[error("history record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("history record {0} not found")]
    NotFound(u64),
}

/// AND-combined query filters. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub requester_id: Option<String>,
    pub success: Option<bool>,
    pub search: Option<String>,
}

impl HistoryFilter {
    fn matches(&self, record: &HistoryRecord) -> bool {
        if let Some(id) = &self.requester_id {
            if &record.requester_id != id {
                return false;
            }
        }
        if let Some(success) = self.success {
            if record.success != success {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let contains = |text: &str| text.to_lowercase().contains(&needle);
            let hit = contains(&record.code)
                || contains(&record.requester_name)
                || record.description.as_deref().is_some_and(contains)
                || record.error_msg.as_deref().is_some_and(contains);
            if !hit {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub records: Vec<HistoryRecord>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
    pub unique_requesters: usize,
    pub recent_count: usize,
}

pub struct HistoryStore {
    path: PathBuf,
    // Highest id this handle has issued. Serializes appends within the process;
    // the file lock serializes them across processes.
    last_issued: Mutex<u64>,
}

impl HistoryStore {
    pub fn open(data_dir: &Path) -> Result<Self, HistoryError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(HISTORY_FILE);
        debug!(path = %path.display(), "history store opened");

        Ok(Self {
            path,
            last_issued: Mutex::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists `record` and returns its id once the line is synced to disk.
    ///
    /// The id is chosen under an exclusive lock on the log, after the last id
    /// already on disk, so stores opened by separate processes never collide.
    /// An id is spent even if the write fails afterwards.
    pub fn append(&self, record: NewRecord) -> Result<u64, HistoryError> {
        let mut last_issued = self.last_issued.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        let _lock = LogLock::exclusive(&file)?;

        let mut content = Vec::new();
        (&file).read_to_end(&mut content)?;
        // A previous write that died halfway must not swallow this record
        if content.last().is_some_and(|b| *b != b'\n') {
            warn!(path = %self.path.display(), "terminating torn history line");
            (&file).write_all(b"\n")?;
        }

        let last_on_disk = parse_records(&content).iter().map(|r| r.id).max().unwrap_or(0);
        let id = last_on_disk.max(*last_issued) + 1;
        *last_issued = id;

        let record = HistoryRecord::from_new(id, Utc::now(), record);
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        (&file).write_all(&line)?;
        file.sync_data()?;

        debug!(id, "history record appended");
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Result<HistoryRecord, HistoryError> {
        self.get_all_records()?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or(HistoryError::NotFound(id))
    }

    /// Newest first. Pages start at 1; a page past the end is empty.
    pub fn query(
        &self,
        filter: &HistoryFilter,
        page: usize,
        page_size: usize,
    ) -> Result<HistoryPage, HistoryError> {
        let page = page.max(1);
        let page_size = page_size.max(1);

        let mut matching: Vec<HistoryRecord> = self
            .get_all_records()?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total_count = matching.len();
        let records = matching
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(HistoryPage {
            records,
            total_count,
            page,
            page_size,
            total_pages: total_count.div_ceil(page_size),
        })
    }

    pub fn stats(&self) -> Result<HistoryStats, HistoryError> {
        let records = self.get_all_records()?;
        let total = records.len();
        let success_count = records.iter().filter(|r| r.success).count();
        let cutoff = Utc::now() - Duration::days(7);

        let (avg_duration_ms, success_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            let total_ms: u64 = records.iter().map(|r| r.duration_ms).sum();
            let rate = success_count as f64 / total as f64 * 100.0;
            (total_ms as f64 / total as f64, (rate * 100.0).round() / 100.0)
        };

        Ok(HistoryStats {
            total,
            success_count,
            failure_count: total - success_count,
            avg_duration_ms,
            success_rate,
            unique_requesters: records
                .iter()
                .map(|r| r.requester_id.as_str())
                .collect::<HashSet<_>>()
                .len(),
            recent_count: records.iter().filter(|r| r.created_at >= cutoff).count(),
        })
    }

    pub fn get_all_records(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        read_records(&self.path)
    }
}

/// Exclusive advisory lock on the log file, released on drop.
struct LogLock<'a> {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: &'a fs::File,
}

impl<'a> LogLock<'a> {
    fn exclusive(file: &'a fs::File) -> io::Result<Self> {
        #[cfg(unix)]
        loop {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the descriptor stays open for as long as `file` is borrowed.
            let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if ret == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
        Ok(Self { file })
    }
}

impl Drop for LogLock<'_> {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

fn read_records(path: &Path) -> Result<Vec<HistoryRecord>, HistoryError> {
    match fs::read(path) {
        Ok(content) => Ok(parse_records(&content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn parse_records(content: &[u8]) -> Vec<HistoryRecord> {
    let mut records = Vec::new();
    for (index, line) in content.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<HistoryRecord>(line) {
            Ok(record) => records.push(record),
            // A torn line after a crash must not hide the rest of the log
            Err(e) => warn!(line = index + 1, error = %e, "skipping unreadable history line"),
        }
    }
    records
}
