use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::OperationLogRecord;
use crate::models::task_log::MAX_STREAM_BYTES;

const MAX_OPERATION_LOGS: usize = 256;

/// Bounded ring of closed operation logs, owned by one manager instance.
#[derive(Debug, Default)]
pub struct OperationLogStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: u64,
    records: VecDeque<OperationLogRecord>,
}

impl OperationLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, mut record: OperationLogRecord) -> u64 {
        record.stdout = tail(record.stdout);
        record.stderr = tail(record.stderr);

        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };

        inner.next_id += 1;
        record.id = inner.next_id;
        if inner.records.len() >= MAX_OPERATION_LOGS {
            inner.records.pop_front();
        }
        let id = record.id;
        inner.records.push_back(record);
        id
    }

    pub fn get(&self, id: u64) -> Option<OperationLogRecord> {
        self.inner
            .lock()
            .ok()?
            .records
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<OperationLogRecord> {
        self.inner
            .lock()
            .map(|inner| inner.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.records.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn tail(text: String) -> String {
    if text.len() <= MAX_STREAM_BYTES {
        return text;
    }

    let mut start = text.len() - MAX_STREAM_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::{MAX_OPERATION_LOGS, MAX_STREAM_BYTES, OperationLogStore};
    use crate::models::{ManagerId, OperationLog, TaskType};

    fn closed(task_type: TaskType, stdout: &str) -> crate::models::OperationLogRecord {
        let mut log = OperationLog::new(ManagerId::WinGet, task_type);
        log.stdout(stdout);
        log.finish(Some(0))
    }

    #[test]
    fn record_and_get_round_trip_output() {
        let store = OperationLogStore::new();
        let id = store.record(closed(TaskType::ListSources, "winget  https://cdn"));

        let record = store.get(id).expect("expected record to be kept");
        assert_eq!(record.stdout, "winget  https://cdn");
        assert_eq!(record.task_type, TaskType::ListSources);
    }

    #[test]
    fn output_is_truncated_to_tail_window() {
        let store = OperationLogStore::new();
        let input = "a".repeat(MAX_STREAM_BYTES + 32);
        let id = store.record(closed(TaskType::ListInstalledPackages, &input));

        let record = store.get(id).expect("expected record to be kept");
        assert_eq!(record.stdout.len(), MAX_STREAM_BYTES);
    }

    #[test]
    fn tail_never_splits_a_multibyte_character() {
        let store = OperationLogStore::new();
        let input = format!("x{}", "…".repeat(MAX_STREAM_BYTES / 3 + 1));
        let id = store.record(closed(TaskType::FindPackages, &input));

        let record = store.get(id).expect("expected record to be kept");
        assert!(record.stdout.len() <= MAX_STREAM_BYTES);
        assert!(record.stdout.chars().all(|c| c == '…'));
    }

    #[test]
    fn oldest_logs_are_evicted_first() {
        let store = OperationLogStore::new();
        for _ in 0..MAX_OPERATION_LOGS + 3 {
            store.record(closed(TaskType::FindPackages, "row"));
        }

        assert_eq!(store.len(), MAX_OPERATION_LOGS);
        assert!(store.get(1).is_none());
        assert_eq!(store.snapshot()[0].id, 4);
    }
}
