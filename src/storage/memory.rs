//! In-process storage gateway. Used when no spreadsheet is configured and
//! as the fake store in tests.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::mode::Mode;
use crate::storage::{EntryFilter, HourEntry, RowRef, StorageGateway};

/// Two append-only vectors, one per mode.
#[derive(Default)]
pub struct MemoryGateway {
    test: RwLock<Vec<HourEntry>>,
    production: RwLock<Vec<HourEntry>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn target(&self, mode: Mode) -> &RwLock<Vec<HourEntry>> {
        match mode {
            Mode::Test => &self.test,
            Mode::Production => &self.production,
        }
    }

    /// Snapshot of every row in a target.
    pub async fn rows(&self, mode: Mode) -> Vec<HourEntry> {
        self.target(mode).read().await.clone()
    }

    pub async fn len(&self, mode: Mode) -> usize {
        self.target(mode).read().await.len()
    }

    pub async fn is_empty(&self, mode: Mode) -> bool {
        self.len(mode).await == 0
    }
}

#[async_trait]
impl StorageGateway for MemoryGateway {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, entry: &HourEntry, mode: Mode) -> Result<RowRef, StorageError> {
        let mut rows = self.target(mode).write().await;
        rows.push(entry.clone());
        Ok(RowRef {
            target: mode.label().to_string(),
            range: format!("row {}", rows.len()),
        })
    }

    async fn query(
        &self,
        filter: &EntryFilter,
        mode: Mode,
    ) -> Result<Vec<HourEntry>, StorageError> {
        let rows = self.target(mode).read().await;
        Ok(rows.iter().filter(|e| filter.matches(e)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sample_entry;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    #[tokio::test]
    async fn append_then_query_same_mode() {
        let store = MemoryGateway::new();
        let entry = sample_entry("42", d(26), dec!(3));
        let row = store.append(&entry, Mode::Test).await.unwrap();
        assert_eq!(row.target, "test");

        let found = store.query(&EntryFilter::on(d(26)), Mode::Test).await.unwrap();
        assert_eq!(found, vec![entry]);
    }

    #[tokio::test]
    async fn modes_are_isolated() {
        let store = MemoryGateway::new();
        store
            .append(&sample_entry("42", d(26), dec!(3)), Mode::Production)
            .await
            .unwrap();

        assert!(store.is_empty(Mode::Test).await);
        let found = store
            .query(&EntryFilter::default(), Mode::Test)
            .await
            .unwrap();
        assert!(found.is_empty());
        assert_eq!(store.len(Mode::Production).await, 1);
    }

    #[tokio::test]
    async fn query_keeps_insertion_order() {
        let store = MemoryGateway::new();
        for (day, hours) in [(26, dec!(1)), (24, dec!(2)), (25, dec!(3))] {
            store
                .append(&sample_entry("42", d(day), hours), Mode::Test)
                .await
                .unwrap();
        }
        let found = store
            .query(&EntryFilter::between(d(24), d(26)), Mode::Test)
            .await
            .unwrap();
        let hours: Vec<_> = found.iter().map(|e| e.duration).collect();
        assert_eq!(hours, vec![dec!(1), dec!(2), dec!(3)]);
    }
}
