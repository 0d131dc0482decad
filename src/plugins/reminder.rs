//! Reminder plugin — `/remind`, `/reminders`, `/clear_reminders` and free
//! text containing "remind me".
//!
//! Reminders are kept per user, optionally persisted to a JSON file, and a
//! background ticker pushes due reminders through the [`Notifier`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveTime, TimeZone,
    Utc,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::commands::{CommandBinding, Handler, HandlerContext, HandlerResult, MessageBinding};
use crate::dates::{parse_date_phrase, parse_weekday};
use crate::error::{HandlerError, PluginError};
use crate::notify::{Notification, Notifier};
use crate::pipeline::types::InboundMessage;
use crate::plugins::{Plugin, PluginDeps};

pub const PLUGIN_ID: &str = "reminders";

/// Pattern that routes free text to this plugin.
pub const REMIND_ME_PATTERN: &str = r"(?i)remind\s+me\s+";

fn usage(prefix: &str) -> String {
    format!(
        "Usage: {prefix}remind [time] [message]\n\
         Examples:\n\
         {prefix}remind tomorrow at 9am Submit the report\n\
         {prefix}remind in 2 hours Check the server status\n\
         {prefix}remind on friday Call the client"
    )
}

const DISPLAY_FORMAT: &str = "%A, %B %d at %I:%M %p";

// ── Time expressions ────────────────────────────────────────────────

static REMIND_ME: LazyLock<Regex> = LazyLock::new(|| Regex::new(REMIND_ME_PATTERN).unwrap());
static RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bin\s+(\d+)\s+(minutes?|mins?|hours?|hrs?|days?)\b").unwrap()
});
static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bat\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b").unwrap()
});
static DAY_AFTER_TOMORROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bday\s+after\s+tomorrow\b").unwrap());
static TOMORROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\btomorrow\b").unwrap());
static WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(on|next)\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
        .unwrap()
});
static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:on\s+)?(today|\d{4}-\d{2}-\d{2}|\d{1,2}[/-]\d{1,2}[/-](?:\d{4}|\d{2}))\b")
        .unwrap()
});
static LEADING_TO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(?:to|about)\s+").unwrap());

fn default_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// A reminder request split into when and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReminder {
    pub due_at: DateTime<Utc>,
    pub message: String,
}

/// Why a reminder request could not be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderParseError {
    MissingTime,
    MissingMessage,
}

impl ReminderParseError {
    fn reply(self) -> &'static str {
        match self {
            Self::MissingTime => {
                "I couldn't understand when to remind you. Please try again with a clearer time."
            }
            Self::MissingMessage => "Please specify what to remind you about.",
        }
    }
}

/// Parse `text` relative to `now` (in the user's timezone).
///
/// `in N minutes|hours|days` is taken as-is. Otherwise a day (`tomorrow`,
/// `day after tomorrow`, `on|next <weekday>`, a date) and a clock time
/// (`at 14:30`, `at 3pm`) are combined; a day alone means 09:00 and a time
/// alone means the next occurrence of that time.
pub fn parse_reminder(
    text: &str,
    now: DateTime<FixedOffset>,
) -> Result<ParsedReminder, ReminderParseError> {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let tz = *now.offset();
    let today = now.date_naive();

    let due_at = if let Some(caps) = RELATIVE.captures(text) {
        let whole = caps.get(0).ok_or(ReminderParseError::MissingTime)?;
        spans.push((whole.start(), whole.end()));
        let amount: i64 = caps[1].parse().map_err(|_| ReminderParseError::MissingTime)?;
        let unit = caps[2].to_lowercase();
        let delta = if unit.starts_with('m') {
            ChronoDuration::try_minutes(amount)
        } else if unit.starts_with('h') {
            ChronoDuration::try_hours(amount)
        } else {
            ChronoDuration::try_days(amount)
        };
        delta
            .and_then(|delta| now.checked_add_signed(delta))
            .ok_or(ReminderParseError::MissingTime)?
    } else {
        let clock = match CLOCK.captures(text) {
            Some(caps) => {
                let whole = caps.get(0).ok_or(ReminderParseError::MissingTime)?;
                let time = clock_time(&caps).ok_or(ReminderParseError::MissingTime)?;
                spans.push((whole.start(), whole.end()));
                Some(time)
            }
            None => None,
        };

        let (day, is_next_weekday) = match day_anchor(text, today, &mut spans) {
            Some(found) => (Some(found.0), found.1),
            None => (None, false),
        };

        let local = match (day, clock) {
            (Some(day), time) => {
                let mut at = day.and_time(time.unwrap_or_else(default_time));
                // "on friday" said on a friday after the time has passed
                // means next week.
                if is_next_weekday && at <= now.naive_local() {
                    at += ChronoDuration::days(7);
                }
                at
            }
            (None, Some(time)) => {
                let mut at = today.and_time(time);
                if at <= now.naive_local() {
                    at += ChronoDuration::days(1);
                }
                at
            }
            (None, None) => return Err(ReminderParseError::MissingTime),
        };
        tz.from_local_datetime(&local)
            .single()
            .ok_or(ReminderParseError::MissingTime)?
    };

    let message = strip_spans(text, &mut spans);
    let message = REMIND_ME.replace_all(&message, " ");
    let message = message.split_whitespace().collect::<Vec<_>>().join(" ");
    let message = LEADING_TO.replace(&message, "").trim().to_string();
    if message.is_empty() {
        return Err(ReminderParseError::MissingMessage);
    }

    Ok(ParsedReminder {
        due_at: due_at.with_timezone(&Utc),
        message,
    })
}

/// `at 14:30`, `at 3pm`, `at 12:15 am`. A bare hour needs am/pm.
fn clock_time(caps: &regex::Captures<'_>) -> Option<NaiveTime> {
    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let meridiem = caps.get(3).map(|m| m.as_str().to_lowercase());
    if caps.get(2).is_none() && meridiem.is_none() {
        return None;
    }
    match meridiem.as_deref() {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        Some(_) if hour > 12 => return None,
        _ => {}
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Find the day part of a reminder. The flag is set for a weekday said
/// with `on`, which rolls over a week once its time has passed.
fn day_anchor(
    text: &str,
    today: NaiveDate,
    spans: &mut Vec<(usize, usize)>,
) -> Option<(NaiveDate, bool)> {
    if let Some(m) = DAY_AFTER_TOMORROW.find(text) {
        spans.push((m.start(), m.end()));
        return Some((today + ChronoDuration::days(2), false));
    }
    if let Some(m) = TOMORROW.find(text) {
        spans.push((m.start(), m.end()));
        return Some((today + ChronoDuration::days(1), false));
    }
    if let Some(caps) = WEEKDAY.captures(text) {
        let whole = caps.get(0)?;
        let weekday = parse_weekday(&caps[2])?;
        let is_next = caps[1].eq_ignore_ascii_case("next");
        let today_idx = i64::from(today.weekday().num_days_from_monday());
        let target_idx = i64::from(weekday.num_days_from_monday());
        let mut ahead = (target_idx - today_idx).rem_euclid(7);
        if ahead == 0 && is_next {
            ahead = 7;
        }
        spans.push((whole.start(), whole.end()));
        return Some((today + ChronoDuration::days(ahead), !is_next && ahead == 0));
    }
    if let Some(caps) = DATE.captures(text) {
        let whole = caps.get(0)?;
        let date = parse_date_phrase(&caps[1], today)?;
        spans.push((whole.start(), whole.end()));
        return Some((date, false));
    }
    None
}

fn strip_spans(text: &str, spans: &mut [(usize, usize)]) -> String {
    spans.sort_unstable();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for &(start, end) in spans.iter() {
        if start >= cursor {
            out.push_str(&text[cursor..start]);
            out.push(' ');
            cursor = end;
        }
    }
    out.push_str(&text[cursor..]);
    out
}

// ── Reminder book ───────────────────────────────────────────────────

/// A pending reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub due_at: DateTime<Utc>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Where to deliver it.
    pub channel: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

type Book = HashMap<String, Vec<Reminder>>;

/// State shared between the handlers and the ticker.
struct ReminderState {
    book: Mutex<Book>,
    path: Option<PathBuf>,
    timezone: FixedOffset,
    notifier: Notifier,
}

impl ReminderState {
    async fn load(&self) -> Result<usize, String> {
        let Some(ref path) = self.path else {
            return Ok(0);
        };
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(format!("failed to read {}: {e}", path.display())),
        };
        let loaded: Book = match serde_json::from_str(&raw) {
            Ok(book) => book,
            Err(e) => {
                // Move it aside so the next save cannot overwrite it.
                let backup = backup_path(path);
                tokio::fs::rename(path, &backup).await.map_err(|io| {
                    format!("failed to move {} aside: {io}", path.display())
                })?;
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "Unreadable reminders file moved aside, starting empty"
                );
                Book::new()
            }
        };
        let count = loaded.values().map(Vec::len).sum();
        *self.book.lock().await = loaded;
        Ok(count)
    }

    /// Write the book to disk. Failures are logged, never surfaced.
    async fn save(&self, book: &Book) {
        let Some(ref path) = self.path else {
            return;
        };
        let json = match serde_json::to_string_pretty(book) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize reminders");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!(path = %parent.display(), error = %e, "Failed to create reminders directory");
                    return;
                }
            }
        }
        if let Err(e) = tokio::fs::write(path, json).await {
            warn!(path = %path.display(), error = %e, "Failed to save reminders");
        }
    }

    async fn add(&self, message: &InboundMessage, parsed: ParsedReminder) -> Reminder {
        let reminder = Reminder {
            id: Uuid::new_v4(),
            due_at: parsed.due_at,
            message: parsed.message,
            created_at: Utc::now(),
            channel: message.channel.clone(),
            metadata: message.metadata.clone(),
        };
        let mut book = self.book.lock().await;
        book.entry(message.sender_id.clone())
            .or_default()
            .push(reminder.clone());
        self.save(&book).await;
        reminder
    }

    /// Remove and deliver every reminder due at `now`. Returns how many fired.
    async fn fire_due(&self, now: DateTime<Utc>) -> usize {
        let mut due: Vec<(String, Reminder)> = Vec::new();
        {
            let mut book = self.book.lock().await;
            for (user, reminders) in book.iter_mut() {
                let (fire, keep): (Vec<_>, Vec<_>) =
                    reminders.drain(..).partition(|r| r.due_at <= now);
                *reminders = keep;
                due.extend(fire.into_iter().map(|r| (user.clone(), r)));
            }
            book.retain(|_, reminders| !reminders.is_empty());
            if !due.is_empty() {
                self.save(&book).await;
            }
        }

        for (user_id, reminder) in &due {
            let local = reminder.due_at.with_timezone(&self.timezone);
            let text = format!(
                "*Reminder!*\n\n{}\n\n(Set for {})",
                reminder.message,
                local.format(DISPLAY_FORMAT)
            );
            self.notifier.notify(Notification {
                channel: reminder.channel.clone(),
                user_id: user_id.clone(),
                metadata: reminder.metadata.clone(),
                text,
            });
            info!(user = %user_id, reminder = %reminder.id, "Reminder sent");
        }
        due.len()
    }
}

fn relative_status(due_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = due_at - now;
    if diff < ChronoDuration::zero() {
        "overdue".to_string()
    } else if diff.num_days() > 0 {
        format!("in {} days", diff.num_days())
    } else if diff.num_hours() > 0 {
        format!("in {} hours", diff.num_hours())
    } else {
        format!("in {} minutes", diff.num_minutes())
    }
}

/// `reminders.json` becomes `reminders.json.bak`.
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

// ── Handlers ────────────────────────────────────────────────────────

struct RemindHandler {
    state: Arc<ReminderState>,
    /// Free-text binding: the whole message is the request.
    from_message: bool,
}

#[async_trait]
impl Handler for RemindHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        let request = ctx.args.trim();
        if !self.from_message && request.split_whitespace().count() < 2 {
            return Ok(usage(ctx.prefix));
        }

        let now = ctx.message.received_at.with_timezone(&self.state.timezone);
        let parsed = parse_reminder(request, now)
            .map_err(|e| HandlerError::InvalidInput(e.reply().to_string()))?;
        let reminder = self.state.add(ctx.message, parsed).await;
        debug!(user = %ctx.message.sender_id, due_at = %reminder.due_at, "Reminder set");

        Ok(format!(
            "I'll remind you on {}:\n\"{}\"",
            reminder
                .due_at
                .with_timezone(&self.state.timezone)
                .format(DISPLAY_FORMAT),
            reminder.message
        ))
    }
}

struct ListHandler {
    state: Arc<ReminderState>,
}

#[async_trait]
impl Handler for ListHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        let book = self.state.book.lock().await;
        let Some(reminders) = book.get(&ctx.message.sender_id).filter(|r| !r.is_empty()) else {
            return Ok("You don't have any reminders set.".to_string());
        };

        let mut sorted: Vec<&Reminder> = reminders.iter().collect();
        sorted.sort_by_key(|r| r.due_at);

        let now = ctx.message.received_at;
        let mut out = String::from("*Your Reminders:*\n");
        for (i, reminder) in sorted.iter().enumerate() {
            out.push_str(&format!(
                "\n{}. {}\n   {} ({})\n",
                i + 1,
                reminder.message,
                reminder
                    .due_at
                    .with_timezone(&self.state.timezone)
                    .format(DISPLAY_FORMAT),
                relative_status(reminder.due_at, now)
            ));
        }
        Ok(out.trim_end().to_string())
    }
}

struct ClearHandler {
    state: Arc<ReminderState>,
}

#[async_trait]
impl Handler for ClearHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        let mut book = self.state.book.lock().await;
        if book.remove(&ctx.message.sender_id).is_some() {
            self.state.save(&book).await;
        }
        Ok("All your reminders have been cleared.".to_string())
    }
}

// ── Plugin ──────────────────────────────────────────────────────────

pub struct ReminderPlugin {
    state: Arc<ReminderState>,
    check_interval: Duration,
    prefix: String,
    ticker: Option<JoinHandle<()>>,
}

impl ReminderPlugin {
    pub fn new(deps: &PluginDeps) -> Self {
        Self {
            state: Arc::new(ReminderState {
                book: Mutex::new(Book::new()),
                path: deps.reminders_path.clone(),
                timezone: deps.timezone,
                notifier: deps.notifier.clone(),
            }),
            check_interval: deps.reminder_check_interval,
            prefix: deps.command_prefix.clone(),
            ticker: None,
        }
    }

    /// Pending reminders for one user, soonest first.
    pub async fn pending_for(&self, user_id: &str) -> Vec<Reminder> {
        let book = self.state.book.lock().await;
        let mut reminders = book.get(user_id).cloned().unwrap_or_default();
        reminders.sort_by_key(|r| r.due_at);
        reminders
    }
}

#[async_trait]
impl Plugin for ReminderPlugin {
    fn name(&self) -> &str {
        "Reminders"
    }

    fn description(&self) -> &str {
        "Set and manage reminders for future tasks"
    }

    async fn initialize(&mut self) -> Result<(), PluginError> {
        let count = self
            .state
            .load()
            .await
            .map_err(|reason| PluginError::InitFailed {
                plugin: PLUGIN_ID.to_string(),
                reason,
            })?;
        info!(count, "Reminders loaded");

        let state = Arc::clone(&self.state);
        let period = self.check_interval.max(Duration::from_millis(10));
        self.ticker = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                state.fire_due(Utc::now()).await;
            }
        }));
        Ok(())
    }

    fn commands(&self) -> Vec<CommandBinding> {
        vec![
            CommandBinding::new(
                "remind",
                "Set a reminder",
                Arc::new(RemindHandler {
                    state: Arc::clone(&self.state),
                    from_message: false,
                }),
            ),
            CommandBinding::new(
                "reminders",
                "List all reminders",
                Arc::new(ListHandler {
                    state: Arc::clone(&self.state),
                }),
            ),
            CommandBinding::new(
                "clear_reminders",
                "Clear all reminders",
                Arc::new(ClearHandler {
                    state: Arc::clone(&self.state),
                }),
            ),
        ]
    }

    fn message_bindings(&self) -> Vec<MessageBinding> {
        vec![MessageBinding::pattern(
            REMIND_ME_PATTERN,
            Arc::new(RemindHandler {
                state: Arc::clone(&self.state),
                from_message: true,
            }),
        )]
    }

    fn help(&self) -> String {
        let prefix = &self.prefix;
        format!(
            "*{}*: {}\n\
             {prefix}remind [time] [message] - Set a reminder\n\
             {prefix}reminders - List all your reminders\n\
             {prefix}clear_reminders - Clear all your reminders\n\
             You can also say: \"Remind me tomorrow to call John\"",
            self.name(),
            self.description()
        )
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        let book = self.state.book.lock().await;
        self.state.save(&book).await;
        Ok(())
    }
}
