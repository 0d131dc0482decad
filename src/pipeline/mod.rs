//! Message processing pipeline.
//!
//! All inbound messages from any channel flow through:
//! 1. `AllowList` — unauthorized senders get a fixed denial and nothing else
//! 2. `CommandRegistry` — explicit `/command` invocations
//! 3. `MessageRouter` — plugin message patterns
//! 4. `StructuredExtractor` — natural-language hour registration
//! 5. `StorageGateway` — append in the mode read at the start of the message
//!
//! The [`Dispatcher`] keeps messages from one sender in order.

pub mod auth;
pub mod dispatch;
pub mod orchestrator;
pub mod types;

pub use auth::AllowList;
pub use dispatch::Dispatcher;
pub use orchestrator::{Orchestrator, PipelineConfig};
pub use types::{InboundMessage, PipelineOutcome, Route, Stage};
