//! Natural-language extraction of hour-registration intents.

pub mod extractor;
pub mod intent;

pub use extractor::{DEFAULT_CONFIDENCE_THRESHOLD, ExtractorConfig, StructuredExtractor};
pub use intent::{Action, ConversationContext, Intent, IntentRecord, UnrecognizedReason};
