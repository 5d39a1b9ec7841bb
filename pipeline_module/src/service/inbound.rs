use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::channel::{Channel, InboundMessage, MessageHeader};
use crate::org_store::normalize_email;

/// Validation failures reported to the transport as client errors before
/// any queueing happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InboundValidationError {
    #[error("missing sender address")]
    MissingFrom,
    #[error("missing recipient address")]
    MissingTo,
    #[error("missing subject")]
    MissingSubject,
    #[error("missing organization")]
    MissingOrganization,
    #[error("missing message text")]
    MissingText,
}

impl InboundValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            InboundValidationError::MissingFrom => "missing_from",
            InboundValidationError::MissingTo => "missing_to",
            InboundValidationError::MissingSubject => "missing_subject",
            InboundValidationError::MissingOrganization => "missing_organization",
            InboundValidationError::MissingText => "missing_text",
        }
    }
}

/// Inbound email webhook payload, provider field names (Postmark shape).
#[derive(Debug, Clone, Deserialize)]
pub struct EmailInboundPayload {
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "FromName")]
    pub from_name: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
    #[serde(rename = "Subject")]
    pub subject: Option<String>,
    #[serde(rename = "TextBody")]
    pub text_body: Option<String>,
    #[serde(rename = "HtmlBody")]
    pub html_body: Option<String>,
    #[serde(rename = "MessageID", alias = "MessageId")]
    pub message_id: Option<String>,
    #[serde(rename = "Date")]
    pub date: Option<String>,
    #[serde(rename = "Headers")]
    pub headers: Option<Vec<EmailHeader>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailHeader {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl EmailInboundPayload {
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|headers| {
            headers
                .iter()
                .find(|header| header.name.eq_ignore_ascii_case(name))
                .map(|header| header.value.as_str())
        })
    }

    fn header_message_id(&self) -> Option<&str> {
        self.header_value("Message-ID")
    }

    /// Minimal shape check: sender, recipient and subject must be present.
    pub fn validate(&self) -> Result<(), InboundValidationError> {
        if extract_address(self.from.as_deref().unwrap_or("")).is_none() {
            return Err(InboundValidationError::MissingFrom);
        }
        if extract_address(self.to.as_deref().unwrap_or("")).is_none() {
            return Err(InboundValidationError::MissingTo);
        }
        if self
            .subject
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            return Err(InboundValidationError::MissingSubject);
        }
        Ok(())
    }

    pub fn to_inbound_message(&self) -> Result<InboundMessage, InboundValidationError> {
        self.validate()?;
        let sender = extract_address(self.from.as_deref().unwrap_or(""))
            .ok_or(InboundValidationError::MissingFrom)?;
        let recipient = extract_address(self.to.as_deref().unwrap_or(""))
            .ok_or(InboundValidationError::MissingTo)?;
        let received_at = self
            .date
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
            .map(|value| value.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let provider_message_id = self
            .header_message_id()
            .or(self.message_id.as_deref())
            .and_then(normalize_message_id);

        Ok(InboundMessage {
            channel: Channel::Email,
            sender,
            sender_name: self
                .from_name
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            recipient,
            subject: self.subject.clone(),
            text_body: self.text_body.clone(),
            html_body: self.html_body.clone(),
            provider_message_id,
            received_at,
            thread_id: Some(self.thread_key()),
            headers: self
                .headers
                .as_ref()
                .map(|headers| {
                    headers
                        .iter()
                        .map(|header| MessageHeader {
                            name: header.name.clone(),
                            value: header.value.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            command: None,
        })
    }

    /// Conversation key: first id in References, then In-Reply-To, then the
    /// message's own id, then a content hash.
    pub fn thread_key(&self) -> String {
        if let Some(value) = self.header_value("References") {
            if let Some(id) = extract_first_message_id(value) {
                return id;
            }
        }
        if let Some(value) = self.header_value("In-Reply-To") {
            if let Some(id) = extract_first_message_id(value) {
                return id;
            }
        }
        if let Some(id) = self
            .header_message_id()
            .or(self.message_id.as_deref())
            .and_then(normalize_message_id)
        {
            return id;
        }
        let material = format!(
            "{}\n{}\n{}",
            self.from.as_deref().unwrap_or(""),
            self.to.as_deref().unwrap_or(""),
            self.subject.as_deref().unwrap_or("")
        );
        format!("{:x}", md5::compute(material.as_bytes()))
    }
}

/// Chat slash-command payload from the chat front door.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatInboundPayload {
    /// The organization inbox prefix.
    pub organization: Option<String>,
    pub sender_email: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl ChatInboundPayload {
    pub fn validate(&self) -> Result<(), InboundValidationError> {
        if self
            .organization
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            return Err(InboundValidationError::MissingOrganization);
        }
        if normalize_email(self.sender_email.as_deref().unwrap_or("")).is_none() {
            return Err(InboundValidationError::MissingFrom);
        }
        if self.text.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(InboundValidationError::MissingText);
        }
        Ok(())
    }

    pub fn to_inbound_message(&self) -> Result<InboundMessage, InboundValidationError> {
        self.validate()?;
        let sender = normalize_email(self.sender_email.as_deref().unwrap_or(""))
            .ok_or(InboundValidationError::MissingFrom)?;
        let text = self.text.as_deref().unwrap_or("").trim().to_string();
        Ok(InboundMessage {
            channel: Channel::Chat,
            sender,
            sender_name: self.sender_name.clone(),
            recipient: self
                .organization
                .as_deref()
                .unwrap_or("")
                .trim()
                .to_string(),
            subject: None,
            text_body: Some(text),
            html_body: None,
            provider_message_id: self
                .message_id
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            received_at: Utc::now(),
            thread_id: self.thread_id.clone(),
            headers: Vec::new(),
            command: self.command.clone(),
        })
    }
}

/// Pull the first usable address out of a From/To field, handling display
/// names and angle brackets.
fn extract_address(raw: &str) -> Option<String> {
    if let Some(start) = raw.find('<') {
        if let Some(end) = raw[start + 1..].find('>') {
            if let Some(email) = normalize_email(&raw[start + 1..start + 1 + end]) {
                return Some(email);
            }
        }
    }
    raw.split(|ch: char| matches!(ch, ',' | ';' | ' ' | '\t'))
        .find_map(normalize_email)
}

fn normalize_message_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|ch| matches!(ch, '<' | '>'));
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

fn extract_first_message_id(value: &str) -> Option<String> {
    value
        .split(|ch| matches!(ch, ' ' | '\t' | '\n' | '\r' | ',' | ';'))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .find_map(normalize_message_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_payload(raw: &str) -> EmailInboundPayload {
        serde_json::from_str(raw).expect("payload")
    }

    #[test]
    fn well_formed_email_converts() {
        let payload = email_payload(
            r#"{
                "From": "Alice Smith <Alice@Acme.com>",
                "FromName": "Alice Smith",
                "To": "acme@intake.taskwell.io",
                "Subject": "Fwd: budget",
                "TextBody": "please review",
                "MessageID": "<pm-1@mail.example>",
                "Date": "Tue, 03 Mar 2026 20:10:44 +0000"
            }"#,
        );
        let message = payload.to_inbound_message().expect("message");
        assert_eq!(message.sender, "alice@acme.com");
        assert_eq!(message.sender_name.as_deref(), Some("Alice Smith"));
        assert_eq!(message.recipient, "acme@intake.taskwell.io");
        assert_eq!(message.provider_message_id.as_deref(), Some("pm-1@mail.example"));
        assert_eq!(message.received_at.to_rfc3339(), "2026-03-03T20:10:44+00:00");
        assert_eq!(message.channel, Channel::Email);
    }

    #[test]
    fn missing_required_fields_are_client_errors() {
        let missing_from = email_payload(r#"{"To": "a@b.io", "Subject": "s"}"#);
        assert_eq!(
            missing_from.validate(),
            Err(InboundValidationError::MissingFrom)
        );

        let missing_to = email_payload(r#"{"From": "a@b.io", "Subject": "s"}"#);
        assert_eq!(missing_to.validate(), Err(InboundValidationError::MissingTo));

        let missing_subject = email_payload(r#"{"From": "a@b.io", "To": "c@d.io"}"#);
        assert_eq!(
            missing_subject.validate(),
            Err(InboundValidationError::MissingSubject)
        );
        let blank_subject =
            email_payload(r#"{"From": "a@b.io", "To": "c@d.io", "Subject": "  "}"#);
        assert_eq!(
            blank_subject.validate(),
            Err(InboundValidationError::MissingSubject)
        );
    }

    #[test]
    fn thread_key_prefers_references_chain() {
        let payload = email_payload(
            r#"{
                "From": "a@b.io", "To": "c@d.io", "Subject": "Re: x",
                "MessageID": "<msg-3@mail>",
                "Headers": [
                    {"Name": "References", "Value": "<root@mail> <msg-2@mail>"},
                    {"Name": "In-Reply-To", "Value": "<msg-2@mail>"}
                ]
            }"#,
        );
        assert_eq!(payload.thread_key(), "root@mail");

        let reply_only = email_payload(
            r#"{
                "From": "a@b.io", "To": "c@d.io", "Subject": "Re: x",
                "MessageID": "<msg-3@mail>",
                "Headers": [{"Name": "In-Reply-To", "Value": "<msg-2@mail>"}]
            }"#,
        );
        assert_eq!(reply_only.thread_key(), "msg-2@mail");

        let fresh = email_payload(
            r#"{"From": "a@b.io", "To": "c@d.io", "Subject": "x", "MessageID": "<msg-3@mail>"}"#,
        );
        assert_eq!(fresh.thread_key(), "msg-3@mail");

        // No ids anywhere: stable content hash.
        let bare = email_payload(r#"{"From": "a@b.io", "To": "c@d.io", "Subject": "x"}"#);
        assert_eq!(bare.thread_key(), bare.thread_key());
        assert_eq!(bare.thread_key().len(), 32);
    }

    #[test]
    fn chat_payload_validates_and_converts() {
        let payload: ChatInboundPayload = serde_json::from_str(
            r#"{
                "organization": "acme",
                "sender_email": "Bob@Acme.com",
                "text": "/task chase the invoice",
                "command": "/task",
                "message_id": "evt-1",
                "thread_id": "C42:170001"
            }"#,
        )
        .expect("payload");
        let message = payload.to_inbound_message().expect("message");
        assert_eq!(message.channel, Channel::Chat);
        assert_eq!(message.sender, "bob@acme.com");
        assert_eq!(message.recipient, "acme");
        assert_eq!(message.command.as_deref(), Some("/task"));
        assert_eq!(message.thread_id.as_deref(), Some("C42:170001"));

        let missing: ChatInboundPayload =
            serde_json::from_str(r#"{"organization": "acme", "sender_email": "b@a.io"}"#)
                .expect("payload");
        assert_eq!(missing.validate(), Err(InboundValidationError::MissingText));
    }
}
