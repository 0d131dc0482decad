//! Summary plugin — `/today`, `/yesterday`, `/week`, `/last_week`, `/month`
//! and `/last_month` overviews of the sender's registered hours in the
//! current mode.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, FixedOffset, NaiveDate};
use rust_decimal::Decimal;

use crate::commands::{CommandBinding, Handler, HandlerContext, HandlerResult};
use crate::dates::Period;
use crate::error::PluginError;
use crate::plugins::{Plugin, PluginDeps};
use crate::storage::{EntryFilter, HourEntry, StorageGateway};

pub const PLUGIN_ID: &str = "summary";

const MAX_ENTRIES_DAY: usize = 15;
const MAX_ENTRIES_RANGE: usize = 30;

/// Command name, period and help line, in help order.
const COMMANDS: [(&str, Period, &str); 6] = [
    ("today", Period::Today, "Show hours worked today"),
    ("yesterday", Period::Yesterday, "Show hours worked yesterday"),
    ("week", Period::ThisWeek, "Show hours worked this week"),
    ("last_week", Period::LastWeek, "Show hours worked last week"),
    ("month", Period::ThisMonth, "Show hours worked this month"),
    ("last_month", Period::LastMonth, "Show hours worked last month"),
];

pub struct SummaryPlugin {
    storage: Arc<dyn StorageGateway>,
    timezone: FixedOffset,
    prefix: String,
}

impl SummaryPlugin {
    pub fn new(deps: &PluginDeps) -> Self {
        Self {
            storage: Arc::clone(&deps.storage),
            timezone: deps.timezone,
            prefix: deps.command_prefix.clone(),
        }
    }

    fn binding(&self, name: &str, period: Period, help: &str) -> CommandBinding {
        CommandBinding::new(
            name,
            help,
            Arc::new(SummaryHandler {
                period,
                storage: Arc::clone(&self.storage),
                timezone: self.timezone,
            }),
        )
    }
}

#[async_trait]
impl Plugin for SummaryPlugin {
    fn name(&self) -> &str {
        "Hour Summary"
    }

    fn description(&self) -> &str {
        "Overviews of your registered hours for different periods"
    }

    async fn initialize(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn commands(&self) -> Vec<CommandBinding> {
        COMMANDS
            .iter()
            .map(|(name, period, help)| self.binding(name, *period, help))
            .collect()
    }

    fn help(&self) -> String {
        let mut out = format!("*{}*: {}", self.name(), self.description());
        for (name, _, help) in COMMANDS {
            out.push_str(&format!("\n{}{} - {}", self.prefix, name, help));
        }
        out
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

struct SummaryHandler {
    period: Period,
    storage: Arc<dyn StorageGateway>,
    timezone: FixedOffset,
}

#[async_trait]
impl Handler for SummaryHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        let today = ctx
            .message
            .received_at
            .with_timezone(&self.timezone)
            .date_naive();
        let (start, end) = self.period.range(today);

        let filter = EntryFilter::between(start, end).for_user(&ctx.message.sender_id);
        let entries = self.storage.query(&filter, ctx.mode).await?;
        tracing::debug!(
            period = self.period.label(),
            %start,
            %end,
            count = entries.len(),
            mode = %ctx.mode,
            "Summary query"
        );

        Ok(format_summary(self.period, start, end, &entries))
    }
}

fn header(period: Period, start: NaiveDate, end: NaiveDate) -> String {
    match period {
        Period::Today | Period::Yesterday => {
            format!("Hours worked {} ({})", period.label(), start.format("%a %-d %b %Y"))
        }
        Period::ThisWeek | Period::LastWeek => format!(
            "Hours worked week {} ({} to {})",
            start.iso_week().week(),
            start.format("%-d %b"),
            end.format("%-d %b")
        ),
        Period::ThisMonth | Period::LastMonth => {
            format!("Hours worked {}", start.format("%B %Y"))
        }
    }
}

fn hours(value: Decimal) -> String {
    format!("{}h", value.round_dp(2).normalize())
}

/// Render totals, the billable split and a per-date breakdown grouped by
/// client, newest date first.
pub fn format_summary(
    period: Period,
    start: NaiveDate,
    end: NaiveDate,
    entries: &[HourEntry],
) -> String {
    if entries.is_empty() {
        return format!("No hours registered {}.", period.label());
    }

    let total: Decimal = entries.iter().map(|e| e.duration).sum();
    let billable: Decimal = entries
        .iter()
        .filter(|e| e.billable)
        .map(|e| e.duration)
        .sum();

    let mut out = format!(
        "*{}*\nTotal: {} | Billable: {} | Non-billable: {}\n",
        header(period, start, end),
        hours(total),
        hours(billable),
        hours(total - billable)
    );

    let cap = match period {
        Period::Today | Period::Yesterday => MAX_ENTRIES_DAY,
        _ => MAX_ENTRIES_RANGE,
    };

    // Most recent first: newer date, then later insertion.
    let mut recent: Vec<&HourEntry> = entries.iter().rev().collect();
    recent.sort_by(|a, b| b.date.cmp(&a.date));
    let shown = recent.len().min(cap);

    // date -> client -> [(description, hours)]
    let mut by_date: BTreeMap<NaiveDate, BTreeMap<String, Vec<(&str, Decimal)>>> = BTreeMap::new();
    for entry in &recent[..shown] {
        let client = entry
            .client
            .clone()
            .unwrap_or_else(|| "No client".to_string());
        by_date
            .entry(entry.date)
            .or_default()
            .entry(client)
            .or_default()
            .push((entry.task_description.as_str(), entry.duration));
    }

    for (date, clients) in by_date.iter().rev() {
        out.push_str(&format!("\n*{}*\n", date.format("%a %-d %b")));
        for (client, items) in clients {
            let client_total: Decimal = items.iter().map(|(_, h)| *h).sum();
            out.push_str(&format!("{} ({})\n", client, hours(client_total)));
            for (description, h) in items {
                out.push_str(&format!("  - {} ({})\n", description, hours(*h)));
            }
        }
    }

    if shown < entries.len() {
        out.push_str(&format!(
            "\nShowing the {} most recent of {} entries.",
            shown,
            entries.len()
        ));
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;
    use crate::pipeline::types::InboundMessage;
    use crate::storage::{MemoryGateway, sample_entry};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    #[test]
    fn empty_period() {
        assert_eq!(
            format_summary(Period::ThisWeek, d(24), d(26), &[]),
            "No hours registered this week."
        );
    }

    #[test]
    fn totals_and_grouping() {
        let mut internal = sample_entry("42", d(25), dec!(1.5));
        internal.billable = false;
        internal.client = None;
        internal.task_description = "admin".into();
        let entries = vec![
            sample_entry("42", d(24), dec!(2)),
            internal,
            sample_entry("42", d(25), dec!(3)),
        ];

        let text = format_summary(Period::ThisWeek, d(24), d(26), &entries);
        assert!(text.contains("week 13"));
        assert!(text.contains("Total: 6.5h | Billable: 5h | Non-billable: 1.5h"));
        assert!(text.contains("No client (1.5h)"));

        // Newest date first.
        let tue = text.find("Tue 25 Mar").unwrap();
        let mon = text.find("Mon 24 Mar").unwrap();
        assert!(tue < mon);
    }

    #[test]
    fn day_summary_is_capped() {
        let entries: Vec<_> = (0..20)
            .map(|_| sample_entry("42", d(26), dec!(0.5)))
            .collect();
        let text = format_summary(Period::Today, d(26), d(26), &entries);
        assert!(text.contains("Total: 10h"));
        assert!(text.ends_with("Showing the 15 most recent of 20 entries."));
    }

    #[tokio::test]
    async fn handler_queries_sender_in_current_mode() {
        let store = Arc::new(MemoryGateway::new());
        store
            .append(&sample_entry("42", d(26), dec!(3)), Mode::Test)
            .await
            .unwrap();
        store
            .append(&sample_entry("7", d(26), dec!(8)), Mode::Test)
            .await
            .unwrap();
        store
            .append(&sample_entry("42", d(26), dec!(4)), Mode::Production)
            .await
            .unwrap();

        let handler = SummaryHandler {
            period: Period::Today,
            storage: store,
            timezone: FixedOffset::east_opt(0).unwrap(),
        };
        let msg = InboundMessage::new("cli", "42", "/today")
            .with_received_at(Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 0).unwrap());

        let reply = handler
            .handle(&HandlerContext::new(&msg, "", Mode::Test))
            .await
            .unwrap();
        assert!(reply.contains("Total: 3h"));

        let reply = handler
            .handle(&HandlerContext::new(&msg, "", Mode::Production))
            .await
            .unwrap();
        assert!(reply.contains("Total: 4h"));
    }

    #[tokio::test]
    async fn last_week_covers_previous_monday_to_sunday() {
        let store = Arc::new(MemoryGateway::new());
        for (day, hours) in [(16, dec!(9)), (17, dec!(2)), (23, dec!(3)), (24, dec!(5))] {
            store
                .append(&sample_entry("42", d(day), hours), Mode::Test)
                .await
                .unwrap();
        }

        let handler = SummaryHandler {
            period: Period::LastWeek,
            storage: store,
            timezone: FixedOffset::east_opt(0).unwrap(),
        };
        let msg = InboundMessage::new("cli", "42", "/last_week")
            .with_received_at(Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 0).unwrap());
        let reply = handler
            .handle(&HandlerContext::new(&msg, "", Mode::Test))
            .await
            .unwrap();
        assert!(reply.contains("week 12 (17 Mar to 23 Mar)"), "{reply}");
        assert!(reply.contains("Total: 5h"));
    }

    #[test]
    fn help_and_commands_use_configured_prefix() {
        let mut deps = crate::test_support::plugin_deps();
        deps.command_prefix = "!".to_string();
        let plugin = SummaryPlugin::new(&deps);

        let names: Vec<String> = plugin.commands().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec!["today", "yesterday", "week", "last_week", "month", "last_month"]
        );
        let help = plugin.help();
        assert!(help.contains("!last_month - Show hours worked last month"));
        assert!(!help.contains('/'));
    }

    #[tokio::test]
    async fn today_follows_user_timezone() {
        let store = Arc::new(MemoryGateway::new());
        store
            .append(&sample_entry("42", d(27), dec!(2)), Mode::Test)
            .await
            .unwrap();

        let handler = SummaryHandler {
            period: Period::Today,
            storage: store,
            timezone: FixedOffset::east_opt(2 * 3600).unwrap(),
        };
        // 23:30 UTC on the 26th is already the 27th at UTC+2.
        let msg = InboundMessage::new("cli", "42", "/today")
            .with_received_at(Utc.with_ymd_and_hms(2025, 3, 26, 23, 30, 0).unwrap());
        let reply = handler
            .handle(&HandlerContext::new(&msg, "", Mode::Test))
            .await
            .unwrap();
        assert!(reply.contains("Total: 2h"));
    }
}
