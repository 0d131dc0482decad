//! Adapter from rig's `CompletionModel` to [`LlmProvider`].

use async_trait::async_trait;
use rig::completion::message::{AssistantContent, Message};
use rig::completion::{CompletionError, CompletionModel};
use rust_decimal::Decimal;

use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

const DEFAULT_MAX_TOKENS: u32 = 1024;
const PROVIDER: &str = "anthropic";

/// Wraps any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    input_cost: Decimal,
    output_cost: Decimal,
}

impl<M> RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    pub fn new(model: M, model_name: &str) -> Self {
        let (input_cost, output_cost) = costs::model_cost(model_name);
        Self {
            model,
            model_name: model_name.to_string(),
            input_cost,
            output_cost,
        }
    }
}

/// A request split the way rig expects it.
#[derive(Debug)]
struct RigPrompt {
    preamble: Option<String>,
    history: Vec<Message>,
    prompt: String,
}

/// System messages become the preamble, the final user message the prompt,
/// everything in between the chat history.
fn split_request(messages: &[ChatMessage]) -> Result<RigPrompt, LlmError> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let mut turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();

    let prompt = match turns.pop() {
        Some(last) if last.role == Role::User => last.content.clone(),
        _ => {
            return Err(LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: "request must end with a user message".into(),
            });
        }
    };

    let history = turns
        .into_iter()
        .map(|m| match m.role {
            Role::Assistant => Message::assistant(m.content.clone()),
            _ => Message::user(m.content.clone()),
        })
        .collect();

    Ok(RigPrompt {
        preamble: (!system.is_empty()).then(|| system.join("\n\n")),
        history,
        prompt,
    })
}

/// Classify a provider error message from the API's error type or status.
fn classify_provider_error(message: String) -> LlmError {
    let lower = message.to_lowercase();
    if lower.contains("rate_limit") || lower.contains("rate limit") || lower.contains("429") {
        LlmError::RateLimited {
            provider: PROVIDER.into(),
            retry_after: None,
        }
    } else if lower.contains("authentication")
        || lower.contains("permission")
        || lower.contains("401")
        || lower.contains("403")
    {
        LlmError::AuthFailed {
            provider: PROVIDER.into(),
        }
    } else if lower.contains("overloaded")
        || lower.contains("api_error")
        || lower.contains("timeout")
        || lower.contains("529")
        || lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
    {
        LlmError::RequestFailed {
            provider: PROVIDER.into(),
            reason: message,
        }
    } else {
        LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: message,
        }
    }
}

fn map_completion_error(error: CompletionError) -> LlmError {
    match error {
        CompletionError::ProviderError(message) => classify_provider_error(message),
        CompletionError::ResponseError(message) => classify_provider_error(message),
        CompletionError::JsonError(e) => LlmError::Json(e),
        // Connection and request-building failures.
        other => LlmError::RequestFailed {
            provider: PROVIDER.into(),
            reason: other.to_string(),
        },
    }
}

fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (self.input_cost, self.output_cost)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let RigPrompt {
            preamble,
            history,
            prompt,
        } = split_request(&request.messages)?;
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let mut builder = self
            .model
            .completion_request(Message::user(prompt))
            .messages(history)
            .max_tokens(u64::from(max_tokens));
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }

        let response = builder.send().await.map_err(map_completion_error)?;

        let content = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");
        let output_tokens = saturating_u32(response.usage.output_tokens);
        let finish_reason = if output_tokens >= max_tokens {
            FinishReason::Length
        } else {
            FinishReason::Stop
        };

        Ok(CompletionResponse {
            content,
            input_tokens: saturating_u32(response.usage.input_tokens),
            output_tokens,
            finish_reason,
            response_id: None,
        })
    }
}
