//! Storage gateway — append-only hour entries in a spreadsheet-backed store.
//!
//! Every call takes the [`Mode`] explicitly; implementations keep test and
//! production rows in separate targets and never mutate written rows.

pub mod memory;
pub mod sheets;

pub use memory::MemoryGateway;
pub use sheets::{SheetsConfig, SheetsGateway};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;
use crate::mode::Mode;

/// Header row of the hours sheet, in column order.
pub const SHEET_COLUMNS: [&str; 9] = [
    "Date",
    "Client",
    "Project",
    "Hours",
    "Billable",
    "Description",
    "Timestamp",
    "User",
    "RequestId",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One persisted hour registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourEntry {
    /// Client-generated id, reused across retries of the same append.
    pub request_id: Uuid,
    pub user_id: String,
    pub date: NaiveDate,
    pub duration: Decimal,
    pub task_description: String,
    pub client: Option<String>,
    pub project: Option<String>,
    pub billable: bool,
    /// Server-assigned write time.
    pub recorded_at: DateTime<Utc>,
}

impl HourEntry {
    /// Cell values in [`SHEET_COLUMNS`] order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.date.format("%Y-%m-%d").to_string(),
            self.client.clone().unwrap_or_default(),
            self.project.clone().unwrap_or_default(),
            self.duration.normalize().to_string(),
            if self.billable { "Yes" } else { "No" }.to_string(),
            self.task_description.clone(),
            self.recorded_at.format(TIMESTAMP_FORMAT).to_string(),
            self.user_id.clone(),
            self.request_id.to_string(),
        ]
    }

    /// Parse a data row. Returns `None` for the header row and for rows whose
    /// date or hours cells are unreadable; short rows are padded.
    pub fn from_row(row: &[String]) -> Option<Self> {
        let cell = |i: usize| row.get(i).map(|s| s.trim()).unwrap_or("");

        let date = NaiveDate::parse_from_str(cell(0), "%Y-%m-%d").ok()?;
        let duration: Decimal = cell(3).replace(',', ".").parse().ok()?;
        let recorded_at = NaiveDateTime::parse_from_str(cell(6), TIMESTAMP_FORMAT)
            .map(|t| t.and_utc())
            .unwrap_or_else(|_| date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
        let optional = |s: &str| (!s.is_empty()).then(|| s.to_string());

        Some(Self {
            request_id: Uuid::parse_str(cell(8)).unwrap_or(Uuid::nil()),
            user_id: cell(7).to_string(),
            date,
            duration,
            task_description: cell(5).to_string(),
            client: optional(cell(1)),
            project: optional(cell(2)),
            billable: !matches!(cell(4).to_lowercase().as_str(), "no" | "false" | "n"),
            recorded_at,
        })
    }
}

/// Where an appended row landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRef {
    /// Storage target (sheet tab) the row was written to.
    pub target: String,
    /// Backend-specific location, e.g. `WorkHours!A7:I7`.
    pub range: String,
}

/// Query filter. All bounds are inclusive; `None` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub user_id: Option<String>,
}

impl EntryFilter {
    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            user_id: None,
        }
    }

    pub fn on(date: NaiveDate) -> Self {
        Self::between(date, date)
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn matches(&self, entry: &HourEntry) -> bool {
        if self.from.is_some_and(|from| entry.date < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.date > to) {
            return false;
        }
        match self.user_id {
            Some(ref user) => entry.user_id == *user,
            None => true,
        }
    }
}

/// Append/query access to the hours store.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Append one entry to the target selected by `mode`. At-least-once: the
    /// gateway does not deduplicate on `request_id`.
    async fn append(&self, entry: &HourEntry, mode: Mode) -> Result<RowRef, StorageError>;

    /// Entries matching `filter` in the target selected by `mode`, in
    /// insertion order.
    async fn query(&self, filter: &EntryFilter, mode: Mode)
    -> Result<Vec<HourEntry>, StorageError>;
}

#[cfg(test)]
pub(crate) fn sample_entry(user: &str, date: NaiveDate, hours: Decimal) -> HourEntry {
    HourEntry {
        request_id: Uuid::new_v4(),
        user_id: user.to_string(),
        date,
        duration: hours,
        task_description: "report".to_string(),
        client: Some("Acme".to_string()),
        project: None,
        billable: true,
        recorded_at: Utc::now(),
    }
}
