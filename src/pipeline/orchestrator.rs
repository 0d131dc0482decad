//! Pipeline orchestrator — one inbound message in, exactly one reply out.
//!
//! `Received → Authorizing → (Commanding | Routing | Extracting) →
//! Persisting → Replying → Done`, with `Error` reachable from every step.
//! No failure escapes [`Orchestrator::process`]: every error state is logged
//! and turned into a reply.

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::commands::{
    CommandRegistry, DEFAULT_PREFIX, HandlerContext, HandlerResult, MessageRouter, RouteOutcome,
    parse_command,
};
use crate::error::{ExtractionError, HandlerError, StorageError};
use crate::extract::{ConversationContext, Intent, StructuredExtractor, UnrecognizedReason};
use crate::mode::{Mode, ModeController};
use crate::pipeline::auth::AllowList;
use crate::pipeline::types::{InboundMessage, PipelineOutcome, Route, Stage};
use crate::retry::RetryPolicy;
use crate::storage::{EntryFilter, HourEntry, RowRef, StorageGateway};

// ── Replies ─────────────────────────────────────────────────────────

pub const DENIED_REPLY: &str = "Sorry, you are not authorized to use this bot.";
pub const SAVE_FAILED_REPLY: &str = "I couldn't save your hours right now. Please try again.";
pub const READ_FAILED_REPLY: &str = "I couldn't read your registered hours right now. Please try again.";
pub const LLM_UNAVAILABLE_REPLY: &str =
    "I couldn't reach the language service right now. Please try again in a moment.";
pub const MALFORMED_REPLY: &str =
    "Sorry, I couldn't make sense of that message. Could you rephrase it?";
pub const TIMEOUT_REPLY: &str = "That took too long to process. Please try again.";
pub const HANDLER_FAILED_REPLY: &str =
    "Sorry, I encountered an error processing your message. Please try again.";

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub command_prefix: String,
    pub allow_list: AllowList,
    /// Bound on each external call including its retries.
    pub call_timeout: Duration,
    /// Retry policy for storage calls.
    pub storage_retry: RetryPolicy,
    /// The user's timezone, used to derive "today".
    pub timezone: FixedOffset,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            command_prefix: DEFAULT_PREFIX.to_string(),
            allow_list: AllowList::default(),
            call_timeout: Duration::from_secs(30),
            storage_retry: RetryPolicy::default(),
            timezone: Utc.fix(),
        }
    }
}

/// Ties the registry, router, extractor and storage together.
pub struct Orchestrator {
    config: PipelineConfig,
    modes: Arc<ModeController>,
    registry: CommandRegistry,
    router: MessageRouter,
    extractor: Arc<StructuredExtractor>,
    storage: Arc<dyn StorageGateway>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        modes: Arc<ModeController>,
        registry: CommandRegistry,
        router: MessageRouter,
        extractor: Arc<StructuredExtractor>,
        storage: Arc<dyn StorageGateway>,
    ) -> Self {
        Self {
            config,
            modes,
            registry,
            router,
            extractor,
            storage,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn modes(&self) -> &ModeController {
        &self.modes
    }

    /// Run one message through the pipeline.
    pub async fn process(&self, message: &InboundMessage) -> PipelineOutcome {
        info!(
            id = %message.id,
            channel = %message.channel,
            sender = %message.sender_id,
            stage = Stage::Received.label(),
            "Message received"
        );

        let outcome = self.run(message).await;

        match outcome.stage {
            Stage::Error => warn!(
                id = %message.id,
                route = ?outcome.route,
                "Message finished in error state"
            ),
            _ => info!(
                id = %message.id,
                route = ?outcome.route,
                stored = outcome.row.is_some(),
                "Message processed"
            ),
        }
        outcome
    }

    /// Check the sender against the allow-list. A denied sender gets the
    /// denial outcome and nothing else runs.
    pub fn authorize(&self, message: &InboundMessage) -> Result<(), PipelineOutcome> {
        if self.config.allow_list.is_allowed(message) {
            return Ok(());
        }
        warn!(
            id = %message.id,
            sender = %message.sender_id,
            "Ignoring message from unauthorized sender"
        );
        Err(reply(DENIED_REPLY, Route::Denied, Stage::Error))
    }

    /// Outcome for an invocation that panicked before producing a reply.
    pub fn crashed(&self, message: &InboundMessage) -> PipelineOutcome {
        let route = match parse_command(&message.text, &self.config.command_prefix) {
            Some((name, _)) => Route::Command {
                name: name.to_string(),
            },
            None => Route::Message,
        };
        reply(HANDLER_FAILED_REPLY, route, Stage::Error)
    }

    async fn run(&self, message: &InboundMessage) -> PipelineOutcome {
        // ── Authorizing ─────────────────────────────────────────────
        if let Err(denied) = self.authorize(message) {
            return denied;
        }

        // One mode value for the whole invocation.
        let mode = self.modes.get_mode();

        // ── Commanding ──────────────────────────────────────────────
        if let Some((name, args)) = parse_command(&message.text, &self.config.command_prefix) {
            debug!(id = %message.id, command = name, stage = Stage::Commanding.label());
            return self.command(message, name, args, mode).await;
        }

        // ── Routing ─────────────────────────────────────────────────
        debug!(id = %message.id, stage = Stage::Routing.label());
        let routed = tokio::time::timeout(
            self.config.call_timeout,
            self.router.route(message, mode),
        )
        .await;
        match routed {
            Err(_) => return reply(TIMEOUT_REPLY, Route::Message, Stage::Error),
            Ok(RouteOutcome::Handled { owner, result }) => {
                debug!(id = %message.id, owner = %owner, "Message binding matched");
                return handler_reply(message, result, Route::Message);
            }
            Ok(RouteOutcome::NoMatch) => {}
        }

        // ── Extracting ──────────────────────────────────────────────
        self.extract(message, mode).await
    }

    async fn command(
        &self,
        message: &InboundMessage,
        name: &str,
        args: &str,
        mode: Mode,
    ) -> PipelineOutcome {
        let ctx = HandlerContext::new(message, args, mode).with_prefix(&self.config.command_prefix);
        let route = Route::Command {
            name: name.to_string(),
        };
        let dispatched =
            tokio::time::timeout(self.config.call_timeout, self.registry.dispatch(name, &ctx)).await;

        match dispatched {
            Err(_) => {
                warn!(id = %message.id, command = name, "Command timed out");
                reply(TIMEOUT_REPLY, route, Stage::Error)
            }
            Ok(Err(unknown)) => {
                debug!(id = %message.id, error = %unknown, "Unknown command");
                reply(
                    format!(
                        "Sorry, I don't recognize the command {}{}. Use {}help to see the available commands.",
                        self.config.command_prefix, unknown.name, self.config.command_prefix
                    ),
                    Route::UnknownCommand { name: unknown.name },
                    Stage::Error,
                )
            }
            Ok(Ok(result)) => handler_reply(message, result, route),
        }
    }

    async fn extract(&self, message: &InboundMessage, mode: Mode) -> PipelineOutcome {
        let today = self.today(message);
        let context = ConversationContext::new(today);
        debug!(id = %message.id, stage = Stage::Extracting.label(), %today);

        let extracted = match tokio::time::timeout(
            self.config.call_timeout,
            self.extractor.extract(&message.text, &context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractionError::Timeout(self.config.call_timeout)),
        };

        let record = match extracted {
            Ok(record) => record,
            Err(e) => {
                error!(id = %message.id, error = %e, "Extraction failed");
                let text = match e {
                    ExtractionError::MalformedResponse(_) => MALFORMED_REPLY.to_string(),
                    ExtractionError::LowConfidence { .. } => {
                        clarification(UnrecognizedReason::LowConfidence, self.prefix())
                    }
                    ExtractionError::TransportFailure(_) => LLM_UNAVAILABLE_REPLY.to_string(),
                    ExtractionError::Timeout(_) => TIMEOUT_REPLY.to_string(),
                };
                return reply(text, Route::Extraction { action: None }, Stage::Error);
            }
        };

        let route = Route::Extraction {
            action: Some(record.action()),
        };
        debug!(
            id = %message.id,
            action = record.action().label(),
            confidence = record.confidence,
            "Intent extracted"
        );

        match record.intent {
            Intent::Unrecognized { reason } => {
                reply(clarification(reason, self.prefix()), route, Stage::Done)
            }
            Intent::Query { date } => self.query(message, date, mode, route).await,
            Intent::LogHours {
                date,
                duration,
                task_description,
                client,
                project,
                billable,
            } => {
                let entry = HourEntry {
                    request_id: Uuid::new_v4(),
                    user_id: message.sender_id.clone(),
                    date,
                    duration,
                    task_description,
                    client,
                    project,
                    billable,
                    recorded_at: Utc::now(),
                };
                self.persist(message, entry, mode, route).await
            }
        }
    }

    async fn persist(
        &self,
        message: &InboundMessage,
        entry: HourEntry,
        mode: Mode,
        route: Route,
    ) -> PipelineOutcome {
        debug!(
            id = %message.id,
            stage = Stage::Persisting.label(),
            request_id = %entry.request_id,
            mode = %mode
        );

        let appended = tokio::time::timeout(
            self.config.call_timeout,
            self.config
                .storage_retry
                .run("append", StorageError::is_transient, || {
                    self.storage.append(&entry, mode)
                }),
        )
        .await
        .unwrap_or_else(|_| Err(StorageError::Timeout(self.config.call_timeout)));

        match appended {
            Ok(row) => {
                info!(
                    id = %message.id,
                    request_id = %entry.request_id,
                    target = %row.target,
                    range = %row.range,
                    "Hour entry stored"
                );
                let text = confirmation(&entry, mode, self.prefix());
                stored(text, route, row)
            }
            Err(e) => {
                error!(
                    id = %message.id,
                    request_id = %entry.request_id,
                    error = %e,
                    "Failed to store hour entry"
                );
                reply(SAVE_FAILED_REPLY, route, Stage::Error)
            }
        }
    }

    async fn query(
        &self,
        message: &InboundMessage,
        date: NaiveDate,
        mode: Mode,
        route: Route,
    ) -> PipelineOutcome {
        let filter = EntryFilter::on(date).for_user(&message.sender_id);
        let queried = tokio::time::timeout(
            self.config.call_timeout,
            self.config
                .storage_retry
                .run("query", StorageError::is_transient, || {
                    self.storage.query(&filter, mode)
                }),
        )
        .await
        .unwrap_or_else(|_| Err(StorageError::Timeout(self.config.call_timeout)));

        match queried {
            Ok(entries) => {
                let total: Decimal = entries.iter().map(|e| e.duration).sum();
                let text = if entries.is_empty() {
                    format!("No hours registered on {}.", date.format("%A %Y-%m-%d"))
                } else {
                    format!(
                        "You registered {} on {} ({} {}).",
                        format_hours(total),
                        date.format("%A %Y-%m-%d"),
                        entries.len(),
                        if entries.len() == 1 { "entry" } else { "entries" }
                    )
                };
                reply(text, route, Stage::Done)
            }
            Err(e) => {
                error!(id = %message.id, error = %e, "Failed to query hour entries");
                reply(READ_FAILED_REPLY, route, Stage::Error)
            }
        }
    }

    fn prefix(&self) -> &str {
        &self.config.command_prefix
    }

    /// The message's calendar date in the user's timezone.
    fn today(&self, message: &InboundMessage) -> NaiveDate {
        message
            .received_at
            .with_timezone(&self.config.timezone)
            .date_naive()
    }
}

// ── Reply helpers ───────────────────────────────────────────────────

fn reply(text: impl Into<String>, route: Route, stage: Stage) -> PipelineOutcome {
    PipelineOutcome {
        reply: text.into(),
        route,
        stage,
        row: None,
    }
}

fn stored(text: String, route: Route, row: RowRef) -> PipelineOutcome {
    PipelineOutcome {
        reply: text,
        route,
        stage: Stage::Done,
        row: Some(row),
    }
}

fn handler_reply(message: &InboundMessage, result: HandlerResult, route: Route) -> PipelineOutcome {
    match result {
        Ok(text) => reply(text, route, Stage::Done),
        Err(HandlerError::InvalidInput(text)) => reply(text, route, Stage::Error),
        Err(e) => {
            error!(id = %message.id, error = %e, "Handler failed");
            reply(HANDLER_FAILED_REPLY, route, Stage::Error)
        }
    }
}

fn clarification(reason: UnrecognizedReason, prefix: &str) -> String {
    match reason {
        UnrecognizedReason::NotWorkRelated => format!(
            "I'm here to register your hours. Tell me what you worked on, for example: \
             \"Worked 3 hours on the report today\". Use {prefix}help to see the commands."
        ),
        UnrecognizedReason::MissingDuration => {
            "How long did you work on that? Please include the number of hours.".to_string()
        }
        UnrecognizedReason::LowConfidence => {
            "I'm not sure I understood. Could you tell me the date, how many hours, \
             and what you worked on?"
                .to_string()
        }
    }
}

/// `1 hour`, `3 hours`, `1.5 hours`.
pub fn format_hours(value: Decimal) -> String {
    let value = value.round_dp(2).normalize();
    if value == Decimal::ONE {
        "1 hour".to_string()
    } else {
        format!("{value} hours")
    }
}

fn confirmation(entry: &HourEntry, mode: Mode, prefix: &str) -> String {
    let mut out = format!(
        "I've registered your work:\n\nDate: {}\nHours: {}\nDescription: {}\n",
        entry.date.format("%Y-%m-%d"),
        format_hours(entry.duration),
        entry.task_description
    );
    if let Some(ref client) = entry.client {
        out.push_str(&format!("Client: {client}\n"));
    }
    if let Some(ref project) = entry.project {
        out.push_str(&format!("Project: {project}\n"));
    }
    out.push_str(&format!(
        "Billable: {}",
        if entry.billable { "Yes" } else { "No" }
    ));
    if mode == Mode::Test {
        out.push_str(&format!(
            "\n\nNote: this entry was added to the test sheet. \
             Use {prefix}enable_production to start writing to your actual sheet."
        ));
    }
    out
}
