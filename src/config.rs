//! Configuration, read once from the environment at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::extract::{DEFAULT_CONFIDENCE_THRESHOLD, ExtractorConfig};
use crate::llm::{LlmBackend, LlmConfig};
use crate::mode::Mode;
use crate::pipeline::{AllowList, PipelineConfig};
use crate::retry::RetryPolicy;
use crate::storage::SheetsConfig;

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
pub const DEFAULT_PRODUCTION_TAB: &str = "WorkHours";
pub const DEFAULT_TEST_TAB: &str = "WorkHours_Test";

/// How often the reminder plugin checks for due reminders.
const REMINDER_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Telegram bot token. Without one only the CLI channel runs.
    pub telegram_bot_token: Option<SecretString>,
    pub allow_list: AllowList,
    pub llm: LlmConfig,
    /// Google Sheets settings. Without them entries go to an in-memory store.
    pub sheets: Option<SheetsConfig>,
    pub command_prefix: String,
    pub confidence_threshold: f32,
    /// Mode at startup.
    pub default_mode: Mode,
    /// Bound on each external call including its retries.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    /// The user's timezone.
    pub timezone: FixedOffset,
    pub reminders_path: Option<PathBuf>,
    pub reminder_check_interval: Duration,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("ANTHROPIC_API_KEY").ok_or_else(|| ConfigError::MissingRequired {
            key: "ANTHROPIC_API_KEY".into(),
            hint: "export ANTHROPIC_API_KEY=sk-ant-...".into(),
        })?;
        let llm = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: SecretString::from(api_key),
            model: get("ANTHROPIC_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        };

        let sheets = match get("GOOGLE_SHEETS_SPREADSHEET_ID") {
            Some(spreadsheet_id) => {
                let token =
                    get("GOOGLE_SHEETS_ACCESS_TOKEN").ok_or_else(|| ConfigError::MissingRequired {
                        key: "GOOGLE_SHEETS_ACCESS_TOKEN".into(),
                        hint: "required when GOOGLE_SHEETS_SPREADSHEET_ID is set".into(),
                    })?;
                Some(SheetsConfig {
                    spreadsheet_id,
                    access_token: SecretString::from(token),
                    production_tab: get("BRAMIFY_SHEET_PRODUCTION")
                        .unwrap_or_else(|| DEFAULT_PRODUCTION_TAB.to_string()),
                    test_tab: get("BRAMIFY_SHEET_TEST")
                        .unwrap_or_else(|| DEFAULT_TEST_TAB.to_string()),
                    base_url: get("GOOGLE_SHEETS_BASE_URL"),
                })
            }
            None => None,
        };

        let confidence_threshold: f32 = parse_or(
            "BRAMIFY_CONFIDENCE_THRESHOLD",
            get("BRAMIFY_CONFIDENCE_THRESHOLD"),
            DEFAULT_CONFIDENCE_THRESHOLD,
        )?;
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(invalid(
                "BRAMIFY_CONFIDENCE_THRESHOLD",
                "must be between 0 and 1",
            ));
        }

        let default_mode = match get("BRAMIFY_DEFAULT_MODE") {
            Some(raw) => Mode::from_str(&raw).map_err(|e| invalid("BRAMIFY_DEFAULT_MODE", e))?,
            None => Mode::default(),
        };

        let timeout_secs: u64 = parse_or(
            "BRAMIFY_CALL_TIMEOUT_SECS",
            get("BRAMIFY_CALL_TIMEOUT_SECS"),
            30,
        )?;
        if timeout_secs == 0 {
            return Err(invalid("BRAMIFY_CALL_TIMEOUT_SECS", "must be positive"));
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_or(
                "BRAMIFY_MAX_RETRIES",
                get("BRAMIFY_MAX_RETRIES"),
                defaults.max_retries,
            )?,
            base_delay: Duration::from_millis(parse_or(
                "BRAMIFY_RETRY_BASE_MS",
                get("BRAMIFY_RETRY_BASE_MS"),
                defaults.base_delay.as_millis() as u64,
            )?),
            max_delay: defaults.max_delay,
        };

        let offset_minutes: i32 = parse_or(
            "BRAMIFY_UTC_OFFSET_MINUTES",
            get("BRAMIFY_UTC_OFFSET_MINUTES"),
            0,
        )?;
        let timezone = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| invalid("BRAMIFY_UTC_OFFSET_MINUTES", "offset out of range"))?;

        Ok(Self {
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN").map(SecretString::from),
            allow_list: get("TELEGRAM_ALLOWED_USER_IDS")
                .map(|raw| AllowList::parse(&raw))
                .unwrap_or_default(),
            llm,
            sheets,
            command_prefix: get("BRAMIFY_COMMAND_PREFIX").unwrap_or_else(|| "/".to_string()),
            confidence_threshold,
            default_mode,
            call_timeout: Duration::from_secs(timeout_secs),
            retry,
            timezone,
            reminders_path: get("BRAMIFY_REMINDERS_PATH").map(PathBuf::from),
            reminder_check_interval: REMINDER_CHECK_INTERVAL,
            log_dir: get("BRAMIFY_LOG_DIR").map(PathBuf::from),
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            command_prefix: self.command_prefix.clone(),
            allow_list: self.allow_list.clone(),
            call_timeout: self.call_timeout,
            storage_retry: self.retry,
            timezone: self.timezone,
        }
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            confidence_threshold: self.confidence_threshold,
            retry: self.retry,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| invalid(key, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}
