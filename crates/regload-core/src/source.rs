//! Exactly-once distribution of dataset rows.
//!
//! [`WorkItemSource`] loads a CSV file once and hands rows out front to
//! back. The queue mutex is held only for the swap-in on `load` and the
//! pop on `next`; parsing and everything the caller does with an item
//! happen outside it.

use indexmap::IndexMap;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

use crate::error::{SourceError, SourceResult};

/// Columns every dataset must provide.
pub const REQUIRED_COLUMNS: [&str; 3] = ["repo_name", "policy_name", "watch_name"];

/// One dataset row: header-named fields in column order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkItem {
    fields: IndexMap<String, String>,
}

impl WorkItem {
    pub fn new(fields: IndexMap<String, String>) -> Self {
        Self { fields }
    }

    /// Build an item from `(column, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Field value, `None` when absent or blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn repo_name(&self) -> Option<&str> {
        self.get("repo_name")
    }

    pub fn policy_name(&self) -> Option<&str> {
        self.get("policy_name")
    }

    pub fn watch_name(&self) -> Option<&str> {
        self.get("watch_name")
    }

    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.fields
    }
}

/// Loaded-once, pop-once queue of work items.
#[derive(Debug, Default)]
pub struct WorkItemSource {
    queue: Mutex<Option<VecDeque<WorkItem>>>,
    loaded: AtomicU64,
    issued: AtomicU64,
}

impl WorkItemSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source pre-filled with `items`, as if loaded from a file.
    pub fn from_items(items: Vec<WorkItem>) -> Self {
        let source = Self::new();
        source.install(items);
        source
    }

    /// Parse the CSV at `path` and replace the queue with its rows.
    ///
    /// On any error the previously loaded queue stays as it was.
    pub fn load(&self, path: impl AsRef<Path>) -> SourceResult<usize> {
        let path = path.as_ref();
        let items = parse_csv(path)?;
        let count = items.len();
        self.install(items);
        info!(event = "dataset.loaded", path = %path.display(), rows = count);
        Ok(count)
    }

    /// Remove and return the front item.
    pub fn next(&self) -> SourceResult<WorkItem> {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let queue = queue.as_mut().ok_or(SourceError::NotLoaded)?;
        let item = queue.pop_front().ok_or(SourceError::Exhausted)?;
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(item)
    }

    pub fn is_loaded(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Rows in the most recent successful load.
    pub fn loaded_count(&self) -> u64 {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Items handed out since the most recent successful load.
    pub fn issued_count(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map_or(0, VecDeque::len)
    }

    fn install(&self, items: Vec<WorkItem>) {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.loaded.store(items.len() as u64, Ordering::SeqCst);
        self.issued.store(0, Ordering::SeqCst);
        *queue = Some(items.into());
    }
}

fn parse_csv(path: &Path) -> SourceResult<Vec<WorkItem>> {
    let load_error = |reason: String| SourceError::DataLoad {
        path: path.display().to_string(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(|e| load_error(e.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|e| load_error(e.to_string()))?
        .clone();

    let missing: Vec<_> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(load_error(format!(
            "missing required column(s): {}",
            missing.join(", ")
        )));
    }

    let mut items = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| load_error(format!("row {}: {e}", line + 1)))?;
        let fields = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        items.push(WorkItem::new(fields));
    }
    Ok(items)
}
