use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an inbound message (or a task created from one) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Email,
    Chat,
    Web,
    Api,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Chat => "chat",
            Channel::Web => "web",
            Channel::Api => "api",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "chat" => Ok(Channel::Chat),
            "web" => Ok(Channel::Web),
            "api" => Ok(Channel::Api),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

/// A normalized inbound message, the unit of work for the whole pipeline.
/// Ephemeral: consumed exactly once by the materializer, never persisted
/// as-is; only the derived task and audit rows survive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: Channel,
    pub sender: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    /// The per-organization routing address this message was sent to.
    pub recipient: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Thread key derived at the front door (mail headers, chat thread id).
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
    /// Originating slash command, when the chat layer forwarded one.
    #[serde(default)]
    pub command: Option<String>,
}

impl InboundMessage {
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    /// A message is a reply when the mail headers say so.
    pub fn is_reply(&self) -> bool {
        self.header_value("In-Reply-To").is_some() || self.header_value("References").is_some()
    }

    pub fn body_text(&self) -> &str {
        self.text_body
            .as_deref()
            .or(self.html_body.as_deref())
            .unwrap_or("")
    }
}
