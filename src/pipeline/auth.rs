//! Sender allow-list.

use std::collections::HashSet;

use crate::pipeline::types::InboundMessage;

/// Who may use the assistant. Empty denies everyone; `*` allows everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    everyone: bool,
    identities: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::default();
        for entry in entries {
            let entry: String = entry.into();
            let entry = entry.trim();
            if entry == "*" {
                list.everyone = true;
            } else if !entry.is_empty() {
                list.identities.insert(entry.to_string());
            }
        }
        list
    }

    /// Allow every sender.
    pub fn everyone() -> Self {
        Self::new(["*"])
    }

    /// Parse a comma-separated list.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    /// Exact, case-sensitive match on any identity.
    pub fn is_any_allowed<'a>(&self, identities: impl IntoIterator<Item = &'a str>) -> bool {
        self.everyone
            || identities
                .into_iter()
                .any(|id| !id.is_empty() && self.identities.contains(id))
    }

    /// Check the sender id and, when the channel supplies one, the username.
    pub fn is_allowed(&self, message: &InboundMessage) -> bool {
        let username = message
            .metadata
            .get("username")
            .and_then(serde_json::Value::as_str);
        self.is_any_allowed(std::iter::once(message.sender_id.as_str()).chain(username))
    }

    pub fn is_empty(&self) -> bool {
        !self.everyone && self.identities.is_empty()
    }
}
