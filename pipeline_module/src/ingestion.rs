use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::{Channel, InboundMessage, MessageHeader};

/// The unit stored on the ingestion queue: one inbound message plus the
/// routing decision the front door already made for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionEnvelope {
    pub envelope_id: Uuid,
    pub received_at: DateTime<Utc>,
    /// The organization inbox prefix the message routes to.
    pub route_key: String,
    pub channel: Channel,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    /// Idempotency key: provider message id when present, content hash
    /// otherwise. Unique on the queue; duplicate transport deliveries
    /// collapse onto the same row.
    pub dedupe_key: String,
    pub payload: IngestionPayload,
}

impl IngestionEnvelope {
    pub fn to_inbound_message(&self) -> InboundMessage {
        self.payload.to_inbound_message(self.channel, self.received_at)
    }
}

/// Serializable mirror of [`InboundMessage`] (minus the fields the envelope
/// itself carries), so the queue row is self-contained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionPayload {
    pub sender: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub recipient: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
    #[serde(default)]
    pub command: Option<String>,
}

impl IngestionPayload {
    pub fn from_inbound(message: &InboundMessage) -> Self {
        Self {
            sender: message.sender.clone(),
            sender_name: message.sender_name.clone(),
            recipient: message.recipient.clone(),
            subject: message.subject.clone(),
            text_body: message.text_body.clone(),
            html_body: message.html_body.clone(),
            provider_message_id: message.provider_message_id.clone(),
            thread_id: message.thread_id.clone(),
            headers: message.headers.clone(),
            command: message.command.clone(),
        }
    }

    pub fn to_inbound_message(
        &self,
        channel: Channel,
        received_at: DateTime<Utc>,
    ) -> InboundMessage {
        InboundMessage {
            channel,
            sender: self.sender.clone(),
            sender_name: self.sender_name.clone(),
            recipient: self.recipient.clone(),
            subject: self.subject.clone(),
            text_body: self.text_body.clone(),
            html_body: self.html_body.clone(),
            provider_message_id: self.provider_message_id.clone(),
            received_at,
            thread_id: self.thread_id.clone(),
            headers: self.headers.clone(),
            command: self.command.clone(),
        }
    }
}

/// Idempotency key for one transport delivery. Provider message ids are
/// stable across redeliveries; messages without one fall back to a content
/// hash so an exact re-send still collapses.
pub fn build_dedupe_key(
    route_key: &str,
    channel: Channel,
    provider_message_id: Option<&str>,
    payload: &IngestionPayload,
) -> String {
    let discriminator = provider_message_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| content_hash(payload));
    format!("{}:{}:{}", route_key, channel, discriminator)
}

fn content_hash(payload: &IngestionPayload) -> String {
    let material = format!(
        "{}\n{}\n{}\n{}",
        payload.sender,
        payload.recipient,
        payload.subject.as_deref().unwrap_or(""),
        payload.text_body.as_deref().unwrap_or("")
    );
    format!("{:x}", md5::compute(material.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(subject: &str) -> IngestionPayload {
        IngestionPayload {
            sender: "alice@acme.com".to_string(),
            sender_name: None,
            recipient: "acme@intake.taskwell.io".to_string(),
            subject: Some(subject.to_string()),
            text_body: Some("body".to_string()),
            html_body: None,
            provider_message_id: None,
            thread_id: None,
            headers: Vec::new(),
            command: None,
        }
    }

    #[test]
    fn provider_id_wins_over_content_hash() {
        let key = build_dedupe_key("acme", Channel::Email, Some("pm-123"), &payload("a"));
        assert_eq!(key, "acme:email:pm-123");
    }

    #[test]
    fn blank_provider_id_falls_back_to_hash() {
        let with_blank = build_dedupe_key("acme", Channel::Email, Some("  "), &payload("a"));
        let with_none = build_dedupe_key("acme", Channel::Email, None, &payload("a"));
        assert_eq!(with_blank, with_none);
        assert!(with_none.starts_with("acme:email:"));
    }

    #[test]
    fn different_content_different_key() {
        let first = build_dedupe_key("acme", Channel::Email, None, &payload("a"));
        let second = build_dedupe_key("acme", Channel::Email, None, &payload("b"));
        assert_ne!(first, second);
    }

    #[test]
    fn envelope_round_trips_message() {
        let message = InboundMessage {
            channel: Channel::Chat,
            sender: "bob@acme.com".to_string(),
            sender_name: Some("Bob".to_string()),
            recipient: "acme".to_string(),
            subject: None,
            text_body: Some("/task do the thing".to_string()),
            html_body: None,
            provider_message_id: Some("evt-9".to_string()),
            received_at: Utc::now(),
            thread_id: Some("thread-1".to_string()),
            headers: Vec::new(),
            command: Some("/task".to_string()),
        };
        let payload = IngestionPayload::from_inbound(&message);
        let envelope = IngestionEnvelope {
            envelope_id: Uuid::new_v4(),
            received_at: message.received_at,
            route_key: "acme".to_string(),
            channel: message.channel,
            provider_message_id: message.provider_message_id.clone(),
            dedupe_key: build_dedupe_key("acme", message.channel, Some("evt-9"), &payload),
            payload,
        };
        let restored = envelope.to_inbound_message();
        assert_eq!(restored.sender, message.sender);
        assert_eq!(restored.command, message.command);
        assert_eq!(restored.thread_id, message.thread_id);
    }
}
