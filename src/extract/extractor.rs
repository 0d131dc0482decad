//! Structured extractor — turns raw message text into an [`IntentRecord`].
//!
//! One model call per message. The prompt is fully determined by the date,
//! the optional prior-turn summary and the message text, and the model is
//! asked for a single JSON object that is validated against the intent schema.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::dates::parse_date_phrase;
use crate::error::{ExtractionError, LlmError};
use crate::extract::intent::{
    Action, ConversationContext, Intent, IntentRecord, UnrecognizedReason,
};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::retry::RetryPolicy;

/// Default confidence below which a concrete action is treated as unrecognized.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Max tokens for the extraction call; the answer is one small JSON object.
const EXTRACTION_MAX_TOKENS: u32 = 400;

const EXTRACTION_TEMPERATURE: f32 = 0.0;

/// Message text beyond this many characters is not sent to the model.
const MAX_MESSAGE_CHARS: usize = 2000;

/// Extractor settings.
#[derive(Debug, Clone, Copy)]
pub struct ExtractorConfig {
    pub confidence_threshold: f32,
    pub retry: RetryPolicy,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            retry: RetryPolicy::default(),
        }
    }
}

/// Stateless extractor over an LLM provider.
pub struct StructuredExtractor {
    llm: Arc<dyn LlmProvider>,
    config: ExtractorConfig,
}

impl StructuredExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>, config: ExtractorConfig) -> Self {
        Self { llm, config }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.config.confidence_threshold
    }

    /// Extract an intent from `raw_text`.
    ///
    /// Low confidence is not an error for callers: it comes back as an
    /// `Unrecognized { reason: LowConfidence }` record.
    pub async fn extract(
        &self,
        raw_text: &str,
        context: &ConversationContext,
    ) -> Result<IntentRecord, ExtractionError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extraction_system_prompt()),
            ChatMessage::user(build_extraction_user_prompt(raw_text, context)),
        ])
        .with_temperature(EXTRACTION_TEMPERATURE)
        .with_max_tokens(EXTRACTION_MAX_TOKENS);

        let response = self
            .config
            .retry
            .run("extract", LlmError::is_transient, || {
                self.llm.complete(request.clone())
            })
            .await?;

        let (input_cost, output_cost) = self.llm.cost_per_token();
        let cost = input_cost * Decimal::from(response.input_tokens)
            + output_cost * Decimal::from(response.output_tokens);
        debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost_usd = %cost.round_dp(6),
            "Extraction call completed"
        );

        match parse_intent_response(
            &response.content,
            raw_text,
            context.today,
            self.config.confidence_threshold,
        ) {
            Err(ExtractionError::LowConfidence {
                confidence,
                threshold,
            }) => {
                debug!(confidence, threshold, "Low-confidence extraction, asking to clarify");
                Ok(IntentRecord::unrecognized(
                    UnrecognizedReason::LowConfidence,
                    confidence,
                ))
            }
            Err(ExtractionError::MalformedResponse(reason)) => {
                warn!(
                    raw_response = %response.content.chars().take(300).collect::<String>(),
                    reason = %reason,
                    "Model response failed intent validation"
                );
                Err(ExtractionError::MalformedResponse(reason))
            }
            other => other,
        }
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_extraction_system_prompt() -> String {
    let vocabulary = Action::ALL
        .iter()
        .map(|a| format!("\"{}\"", a.label()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You extract hour-registration intents from a user's chat message.\n\n\
         Allowed actions: {vocabulary}.\n\
         - \"log_hours\": the user reports time spent working. Requires a positive duration in hours.\n\
         - \"query\": the user asks how many hours were registered on a day.\n\
         - \"unrecognized\": anything else (greetings, chit-chat, unclear requests).\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"action\": \"...\", \"date\": \"YYYY-MM-DD\" or null, \"duration\": number or null, \
         \"task_description\": \"...\", \"client\": \"...\" or null, \"project\": \"...\" or null, \
         \"billable\": true/false, \"confidence\": 0.0}}\n\n\
         Rules:\n\
         - duration is decimal hours (\"90 minutes\" is 1.5)\n\
         - resolve relative dates (today, yesterday, last friday) against today's date; use null when no date is mentioned\n\
         - task_description is a short summary of the work, max 100 characters\n\
         - billable defaults to true when unclear\n\
         - confidence is between 0.0 and 1.0\n\
         - for \"unrecognized\" set date and duration to null"
    )
}

fn build_extraction_user_prompt(raw_text: &str, context: &ConversationContext) -> String {
    let mut prompt = String::with_capacity(256);

    prompt.push_str(&format!(
        "Today's date: {} ({})\n",
        context.today.format("%Y-%m-%d"),
        context.today.format("%A")
    ));

    if let Some(ref summary) = context.prior_summary {
        prompt.push_str(&format!("Earlier in this conversation: {}\n", summary));
    }

    let text: String = raw_text.chars().take(MAX_MESSAGE_CHARS).collect();
    prompt.push_str(&format!("\nMessage:\n{}", text));

    prompt
}

// ── Response parsing ────────────────────────────────────────────────

/// Wire shape of the model's answer. `action` and `confidence` are required;
/// a string `duration` fails deserialization on purpose.
#[derive(Debug, Deserialize)]
struct IntentResponse {
    action: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    task_description: Option<String>,
    #[serde(default)]
    client: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    billable: Option<bool>,
    confidence: f32,
}

/// Validate a raw model answer against the intent schema.
fn parse_intent_response(
    raw: &str,
    raw_text: &str,
    today: NaiveDate,
    threshold: f32,
) -> Result<IntentRecord, ExtractionError> {
    let json_str = extract_json_object(raw);
    let response: IntentResponse = serde_json::from_str(&json_str)
        .map_err(|e| ExtractionError::MalformedResponse(format!("JSON parse error: {e}")))?;

    let action = Action::from_label(response.action.trim()).ok_or_else(|| {
        ExtractionError::MalformedResponse(format!("unknown action '{}'", response.action))
    })?;

    if let Some(d) = response.duration {
        if !d.is_finite() || d < 0.0 {
            return Err(ExtractionError::MalformedResponse(format!(
                "duration must be a non-negative number, got {d}"
            )));
        }
    }

    let date = match response.date.as_deref().map(str::trim) {
        None | Some("") => parse_date_phrase(raw_text, today).unwrap_or(today),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
            ExtractionError::MalformedResponse(format!("invalid date '{s}': {e}"))
        })?,
    };

    let confidence = response.confidence.clamp(0.0, 1.0);

    if action == Action::Unrecognized {
        return Ok(IntentRecord::unrecognized(
            UnrecognizedReason::NotWorkRelated,
            confidence,
        ));
    }

    if confidence < threshold {
        return Err(ExtractionError::LowConfidence {
            confidence,
            threshold,
        });
    }

    let intent = match action {
        Action::Query => Intent::Query { date },
        Action::LogHours => {
            let duration = response
                .duration
                .and_then(Decimal::from_f64)
                .map(|d| d.round_dp(2))
                .filter(|d| *d > Decimal::ZERO);
            let Some(duration) = duration else {
                return Ok(IntentRecord::unrecognized(
                    UnrecognizedReason::MissingDuration,
                    confidence,
                ));
            };
            Intent::LogHours {
                date,
                duration,
                task_description: non_empty(response.task_description)
                    .unwrap_or_else(|| raw_text.trim().chars().take(100).collect()),
                client: non_empty(response.client),
                project: non_empty(response.project),
                billable: response.billable.unwrap_or(true),
            }
        }
        Action::Unrecognized => unreachable!("handled above"),
    };

    Ok(IntentRecord { intent, confidence })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "null")
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, FinishReason};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 26).unwrap()
    }

    fn parse(raw: &str) -> Result<IntentRecord, ExtractionError> {
        parse_intent_response(raw, "original text", today(), DEFAULT_CONFIDENCE_THRESHOLD)
    }

    // ── Prompt construction ─────────────────────────────────────────

    #[test]
    fn system_prompt_lists_vocabulary() {
        let prompt = build_extraction_system_prompt();
        assert!(prompt.contains("\"log_hours\""));
        assert!(prompt.contains("\"query\""));
        assert!(prompt.contains("\"unrecognized\""));
    }

    #[test]
    fn user_prompt_embeds_date_and_text() {
        let ctx = ConversationContext::new(today()).with_prior_summary("logged 2h for Acme");
        let prompt = build_extraction_user_prompt("Worked 3 hours", &ctx);
        assert!(prompt.contains("2025-03-26"));
        assert!(prompt.contains("Wednesday"));
        assert!(prompt.contains("logged 2h for Acme"));
        assert!(prompt.ends_with("Worked 3 hours"));
    }

    #[test]
    fn user_prompt_is_deterministic_and_truncated() {
        let ctx = ConversationContext::new(today());
        let long = "x".repeat(5000);
        let a = build_extraction_user_prompt(&long, &ctx);
        let b = build_extraction_user_prompt(&long, &ctx);
        assert_eq!(a, b);
        assert!(a.len() < MAX_MESSAGE_CHARS + 100);
    }

    // ── Schema validation ───────────────────────────────────────────

    #[test]
    fn log_hours_with_omitted_date_uses_today() {
        let record = parse(
            r#"{"action": "log_hours", "date": null, "duration": 3, "task_description": "report", "confidence": 0.95}"#,
        )
        .unwrap();
        assert_eq!(record.action(), Action::LogHours);
        assert_eq!(record.duration(), Some(dec!(3)));
        assert_eq!(record.date(), Some(today()));
    }

    #[test]
    fn omitted_date_falls_back_to_the_message_text() {
        let raw = r#"{"action": "log_hours", "date": null, "duration": 2, "confidence": 0.9}"#;
        let yesterday = parse_intent_response(
            raw,
            "Yesterday I spent 2 hours on reviews",
            today(),
            DEFAULT_CONFIDENCE_THRESHOLD,
        )
        .unwrap();
        assert_eq!(yesterday.date(), NaiveDate::from_ymd_opt(2025, 3, 25));

        let last_monday = parse_intent_response(
            raw,
            "2 hours of planning last monday",
            today(),
            DEFAULT_CONFIDENCE_THRESHOLD,
        )
        .unwrap();
        assert_eq!(last_monday.date(), NaiveDate::from_ymd_opt(2025, 3, 17));

        // An explicit date from the model wins over the text.
        let explicit = parse_intent_response(
            r#"{"action": "query", "date": "2025-03-20", "confidence": 0.9}"#,
            "what did I log yesterday",
            today(),
            DEFAULT_CONFIDENCE_THRESHOLD,
        )
        .unwrap();
        assert_eq!(explicit.date(), NaiveDate::from_ymd_opt(2025, 3, 20));
    }

    #[test]
    fn log_hours_keeps_optional_fields() {
        let record = parse(
            r#"{"action": "log_hours", "date": "2025-03-25", "duration": 1.5, "task_description": "sync", "client": "Acme", "project": "", "billable": false, "confidence": 0.8}"#,
        )
        .unwrap();
        match record.intent {
            Intent::LogHours {
                date,
                duration,
                client,
                project,
                billable,
                ..
            } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 3, 25).unwrap());
                assert_eq!(duration, dec!(1.5));
                assert_eq!(client.as_deref(), Some("Acme"));
                assert!(project.is_none());
                assert!(!billable);
            }
            other => panic!("Expected LogHours, got {:?}", other),
        }
    }

    #[test]
    fn negative_duration_is_malformed() {
        let result = parse(r#"{"action": "log_hours", "duration": -2, "confidence": 0.9}"#);
        assert!(matches!(result, Err(ExtractionError::MalformedResponse(_))));
    }

    #[test]
    fn string_duration_is_malformed() {
        let result = parse(r#"{"action": "log_hours", "duration": "three", "confidence": 0.9}"#);
        assert!(matches!(result, Err(ExtractionError::MalformedResponse(_))));
    }

    #[test]
    fn missing_required_keys_is_malformed() {
        assert!(matches!(
            parse(r#"{"duration": 2, "confidence": 0.9}"#),
            Err(ExtractionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse(r#"{"action": "log_hours", "duration": 2}"#),
            Err(ExtractionError::MalformedResponse(_))
        ));
    }

    #[test]
    fn unknown_action_is_malformed() {
        assert!(matches!(
            parse(r#"{"action": "delete_hours", "confidence": 0.9}"#),
            Err(ExtractionError::MalformedResponse(_))
        ));
    }

    #[test]
    fn bad_date_is_malformed() {
        assert!(matches!(
            parse(r#"{"action": "query", "date": "26-03-2025", "confidence": 0.9}"#),
            Err(ExtractionError::MalformedResponse(_))
        ));
    }

    #[test]
    fn zero_duration_needs_clarification() {
        let record = parse(r#"{"action": "log_hours", "duration": 0, "confidence": 0.9}"#).unwrap();
        assert_eq!(
            record.intent,
            Intent::Unrecognized {
                reason: UnrecognizedReason::MissingDuration
            }
        );
    }

    #[test]
    fn low_confidence_is_reported() {
        let result = parse(r#"{"action": "log_hours", "duration": 2, "confidence": 0.3}"#);
        assert!(matches!(
            result,
            Err(ExtractionError::LowConfidence { .. })
        ));
    }

    #[test]
    fn confidence_is_clamped() {
        let record = parse(r#"{"action": "query", "confidence": 1.7}"#).unwrap();
        assert!((record.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_description_falls_back_to_message() {
        let record =
            parse(r#"{"action": "log_hours", "duration": 2, "task_description": " ", "confidence": 0.9}"#)
                .unwrap();
        match record.intent {
            Intent::LogHours {
                task_description, ..
            } => assert_eq!(task_description, "original text"),
            other => panic!("Expected LogHours, got {:?}", other),
        }
    }

    #[test]
    fn response_wrapped_in_markdown() {
        let raw = "Sure:\n```json\n{\"action\": \"unrecognized\", \"confidence\": 0.9}\n```";
        let record = parse(raw).unwrap();
        assert_eq!(record.action(), Action::Unrecognized);
    }

    #[test]
    fn extract_json_embedded_in_text() {
        let input = "My analysis: {\"action\": \"query\"} done.";
        let result = extract_json_object(input);
        assert!(result.starts_with('{'));
        assert!(result.ends_with('}'));
    }

    // ── Extractor with mock LLM ─────────────────────────────────────

    struct MockLlm {
        response: Result<String, ()>,
        calls: AtomicU32,
    }

    impl MockLlm {
        fn replying(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
                calls: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: Err(()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock-extractor"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    input_tokens: 100,
                    output_tokens: 20,
                    finish_reason: FinishReason::Stop,
                    response_id: None,
                }),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "mock".into(),
                    reason: "connection reset".into(),
                }),
            }
        }
    }

    fn extractor(llm: Arc<MockLlm>, max_retries: u32) -> StructuredExtractor {
        StructuredExtractor::new(
            llm,
            ExtractorConfig {
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                retry: RetryPolicy {
                    max_retries,
                    base_delay: Duration::ZERO,
                    max_delay: Duration::ZERO,
                },
            },
        )
    }

    #[tokio::test]
    async fn extract_low_confidence_becomes_unrecognized() {
        let llm = Arc::new(MockLlm::replying(
            r#"{"action": "log_hours", "duration": 3, "confidence": 0.2}"#,
        ));
        let record = extractor(llm.clone(), 0)
            .extract("maybe 3 hours?", &ConversationContext::new(today()))
            .await
            .unwrap();
        assert_eq!(
            record.intent,
            Intent::Unrecognized {
                reason: UnrecognizedReason::LowConfidence
            }
        );
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn extract_transport_failure_retries_then_fails() {
        let llm = Arc::new(MockLlm::failing());
        let result = extractor(llm.clone(), 2)
            .extract("Worked 3 hours", &ConversationContext::new(today()))
            .await;
        assert!(matches!(result, Err(ExtractionError::TransportFailure(_))));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn extract_malformed_is_not_retried() {
        let llm = Arc::new(MockLlm::replying("I think you worked a lot!"));
        let result = extractor(llm.clone(), 3)
            .extract("Worked 3 hours", &ConversationContext::new(today()))
            .await;
        assert!(matches!(result, Err(ExtractionError::MalformedResponse(_))));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }
}
