//! Bramify — a chat assistant that turns natural-language work descriptions
//! into rows in an hours spreadsheet.

pub mod app;
pub mod channels;
pub mod commands;
pub mod config;
pub mod dates;
pub mod error;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod mode;
pub mod notify;
pub mod pipeline;
pub mod plugins;
pub mod retry;
pub mod storage;

/// Shared fakes for unit tests.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{Offset, Utc};
    use rust_decimal::Decimal;

    use crate::error::LlmError;
    use crate::extract::{ExtractorConfig, StructuredExtractor};
    use crate::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::notify::Notifier;
    use crate::plugins::PluginDeps;
    use crate::retry::RetryPolicy;
    use crate::storage::MemoryGateway;

    /// Provider that answers every request with the same text.
    pub struct StubLlm {
        reply: String,
    }

    impl StubLlm {
        pub fn new(reply: impl Into<String>) -> Self {
            Self {
                reply: reply.into(),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.reply.clone(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    /// Extractor that classifies everything as unrelated chatter.
    pub fn chatter_extractor() -> Arc<StructuredExtractor> {
        let llm = StubLlm::new(r#"{"action": "unrecognized", "confidence": 0.9}"#);
        Arc::new(StructuredExtractor::new(
            Arc::new(llm),
            ExtractorConfig {
                retry: RetryPolicy::none(),
                ..ExtractorConfig::default()
            },
        ))
    }

    /// Minimal HTTP/1.1 server answering every request with JSON.
    pub mod fake_http {
        use std::sync::{Arc, Mutex};

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};

        #[derive(Debug, Clone)]
        pub struct Request {
            pub method: String,
            /// Path and query.
            pub target: String,
            /// JSON body, `Null` when absent.
            pub body: serde_json::Value,
        }

        pub type Seen = Arc<Mutex<Vec<Request>>>;

        /// Serve on a local port; returns the base URL and the request log.
        pub async fn serve<F>(respond: F) -> (String, Seen)
        where
            F: Fn(&Request) -> serde_json::Value + Send + Sync + 'static,
        {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let seen: Seen = Arc::new(Mutex::new(Vec::new()));
            let respond = Arc::new(respond);

            let log = Arc::clone(&seen);
            tokio::spawn(async move {
                loop {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        return;
                    };
                    let log = Arc::clone(&log);
                    let respond = Arc::clone(&respond);
                    tokio::spawn(async move {
                        let request = read_request(&mut socket).await;
                        let reply = respond(&request).to_string();
                        log.lock().unwrap().push(request);
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            reply.len(),
                            reply
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
            });

            (format!("http://{addr}"), seen)
        }

        async fn read_request(socket: &mut TcpStream) -> Request {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let header_end = loop {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
                if n == 0 {
                    break buf.len();
                }
            };
            let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let content_length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < header_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
            Request {
                method: request_line.next().unwrap_or("").to_string(),
                target: request_line.next().unwrap_or("").to_string(),
                body: serde_json::from_slice(&buf[header_end..]).unwrap_or(serde_json::Value::Null),
            }
        }
    }

    /// Dependencies backed by in-memory storage, UTC, and a notifier nobody
    /// listens to.
    pub fn plugin_deps() -> PluginDeps {
        let (notifier, _rx) = Notifier::channel();
        PluginDeps {
            extractor: chatter_extractor(),
            storage: Arc::new(MemoryGateway::new()),
            notifier,
            timezone: Utc.fix(),
            reminders_path: None,
            reminder_check_interval: Duration::from_secs(3600),
            command_prefix: crate::commands::DEFAULT_PREFIX.to_string(),
        }
    }
}
