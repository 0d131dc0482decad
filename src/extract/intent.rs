//! Intent record — the typed result of natural-language extraction.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// The action vocabulary the model may choose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    LogHours,
    Query,
    Unrecognized,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::LogHours, Action::Query, Action::Unrecognized];

    pub fn label(self) -> &'static str {
        match self {
            Self::LogHours => "log_hours",
            Self::Query => "query",
            Self::Unrecognized => "unrecognized",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.label() == label)
    }
}

/// Why a message could not be turned into a concrete action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecognizedReason {
    /// The model judged the message unrelated to hour registration.
    NotWorkRelated,
    /// The model proposed `log_hours` without a positive duration.
    MissingDuration,
    /// The model's confidence fell below the configured threshold.
    LowConfidence,
}

/// What the user asked for. Each variant carries only the fields that are
/// valid for that action, so `LogHours` always has a positive duration and
/// `Unrecognized` never has numbers attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Intent {
    LogHours {
        date: NaiveDate,
        duration: Decimal,
        task_description: String,
        client: Option<String>,
        project: Option<String>,
        billable: bool,
    },
    Query {
        date: NaiveDate,
    },
    Unrecognized {
        reason: UnrecognizedReason,
    },
}

/// Extraction result: the intent plus the model's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentRecord {
    pub intent: Intent,
    /// Model confidence, clamped to 0..=1.
    pub confidence: f32,
}

impl IntentRecord {
    pub fn unrecognized(reason: UnrecognizedReason, confidence: f32) -> Self {
        Self {
            intent: Intent::Unrecognized { reason },
            confidence,
        }
    }

    pub fn action(&self) -> Action {
        match self.intent {
            Intent::LogHours { .. } => Action::LogHours,
            Intent::Query { .. } => Action::Query,
            Intent::Unrecognized { .. } => Action::Unrecognized,
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self.intent {
            Intent::LogHours { date, .. } | Intent::Query { date } => Some(date),
            Intent::Unrecognized { .. } => None,
        }
    }

    pub fn duration(&self) -> Option<Decimal> {
        match self.intent {
            Intent::LogHours { duration, .. } => Some(duration),
            _ => None,
        }
    }
}

/// Per-call context handed to the extractor.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    /// The user's current calendar date; fills in omitted dates.
    pub today: NaiveDate,
    /// Optional summary of earlier turns.
    pub prior_summary: Option<String>,
}

impl ConversationContext {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            prior_summary: None,
        }
    }

    pub fn with_prior_summary(mut self, summary: impl Into<String>) -> Self {
        self.prior_summary = Some(summary.into());
        self
    }
}
