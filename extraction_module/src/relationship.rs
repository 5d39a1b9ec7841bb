use serde::{Deserialize, Serialize};

use crate::drafts::strip_code_fences;

/// How the message relates the sender to the work it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Sender created work for themselves.
    #[serde(rename = "self")]
    SelfTask,
    /// Sender is handing work to a named person.
    Assigned,
    /// Sender passes on work they were given.
    Delegation,
    /// Sender only wants to follow the work.
    Tracking,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SelfTask => "self",
            TaskType::Assigned => "assigned",
            TaskType::Delegation => "delegation",
            TaskType::Tracking => "tracking",
        }
    }

    pub fn is_handoff(&self) -> bool {
        matches!(self, TaskType::Assigned | TaskType::Delegation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Executor,
    Delegator,
    Observer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Executor => "executor",
            UserRole::Delegator => "delegator",
            UserRole::Observer => "observer",
        }
    }
}

/// Advisory classification of an inbound message. The email fields are
/// best-effort model output, unvalidated against any roster; the visibility
/// resolver may override all of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub task_type: TaskType,
    pub user_role: UserRole,
    #[serde(default)]
    pub assigned_to_email: Option<String>,
    #[serde(default)]
    pub assigned_by_email: Option<String>,
}

impl Relationship {
    /// The fail-open default: sender keeps their own work.
    pub fn fallback() -> Self {
        Self {
            task_type: TaskType::SelfTask,
            user_role: UserRole::Executor,
            assigned_to_email: None,
            assigned_by_email: None,
        }
    }
}

/// Outcome of a classification attempt. The fail-open path is a first-class
/// branch, not a swallowed error: callers can observe whether the service
/// answered or the default was substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipOutcome {
    Classified(Relationship),
    Unclassified {
        fallback: Relationship,
        reason: String,
    },
}

impl RelationshipOutcome {
    pub fn unclassified(reason: impl Into<String>) -> Self {
        RelationshipOutcome::Unclassified {
            fallback: Relationship::fallback(),
            reason: reason.into(),
        }
    }

    pub fn relationship(&self) -> &Relationship {
        match self {
            RelationshipOutcome::Classified(relationship) => relationship,
            RelationshipOutcome::Unclassified { fallback, .. } => fallback,
        }
    }

    pub fn is_classified(&self) -> bool {
        matches!(self, RelationshipOutcome::Classified(_))
    }
}

/// Fixed instruction set for the relationship classification call.
pub const CLASSIFICATION_INSTRUCTIONS: &str = r#"You classify a message sent to a shared task inbox.

Decide how the sender relates to the work described:
- task_type "self": the sender will do the work themselves
- task_type "assigned": the sender hands the work to a named person
- task_type "delegation": the sender passes on work they were given
- task_type "tracking": the sender only wants to follow the work

Decide the sender's role: "executor", "delegator", or "observer".

Respond with ONLY a JSON object:
{"task_type": "...", "user_role": "...", "assigned_to_email": null, "assigned_by_email": null}

Fill the email fields when the message names a person with an address; otherwise use null. Do not invent addresses."#;

/// Fixed instruction set for the task-draft extraction call.
pub const EXTRACTION_INSTRUCTIONS: &str = r#"You extract action items from a message sent to a shared task inbox.

Respond with ONLY a JSON array of task objects, one per distinct action item:
[{"title": "...", "description": "...", "priority": "low|medium|high", "tags": [], "when": null, "effort": null, "business_impact": null, "stakeholders": []}]

Rules:
- "title" is a short imperative phrase; required.
- "when" carries any explicit date/time text verbatim (e.g. "15/03/2026"), else null.
- "business_impact" is "high", "medium", "low", or null.
- A message with one action item yields an array of one object. Never invent work the message does not ask for."#;

const MAX_PROMPT_BODY_CHARS: usize = 4000;

pub fn build_classification_prompt(
    from: &str,
    to: &str,
    subject: Option<&str>,
    body: Option<&str>,
) -> String {
    format!(
        "From: {}\nTo: {}\nSubject: {}\n\n{}",
        from,
        to,
        subject.unwrap_or("(none)"),
        clip(body.unwrap_or(""), MAX_PROMPT_BODY_CHARS)
    )
}

pub fn build_extraction_prompt(subject: Option<&str>, body: Option<&str>) -> String {
    format!(
        "Subject: {}\n\n{}",
        subject.unwrap_or("(none)"),
        clip(body.unwrap_or(""), MAX_PROMPT_BODY_CHARS)
    )
}

/// Parse the classifier's answer; tolerates code fences. `None` when the
/// output is not the expected shape.
pub fn parse_relationship(raw: &str) -> Option<Relationship> {
    let trimmed = strip_code_fences(raw);
    serde_json::from_str::<Relationship>(trimmed).ok()
}

fn clip(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_answer() {
        let raw = r#"{"task_type": "assigned", "user_role": "delegator", "assigned_to_email": "jane@acme.com", "assigned_by_email": null}"#;
        let relationship = parse_relationship(raw).expect("relationship");
        assert_eq!(relationship.task_type, TaskType::Assigned);
        assert_eq!(relationship.user_role, UserRole::Delegator);
        assert_eq!(relationship.assigned_to_email.as_deref(), Some("jane@acme.com"));
    }

    #[test]
    fn parses_self_keyword() {
        let raw = r#"{"task_type": "self", "user_role": "executor"}"#;
        let relationship = parse_relationship(raw).expect("relationship");
        assert_eq!(relationship.task_type, TaskType::SelfTask);
    }

    #[test]
    fn fenced_answers_parse() {
        let raw = "```json\n{\"task_type\": \"tracking\", \"user_role\": \"observer\"}\n```";
        let relationship = parse_relationship(raw).expect("relationship");
        assert_eq!(relationship.task_type, TaskType::Tracking);
    }

    #[test]
    fn prose_answers_yield_none() {
        assert!(parse_relationship("This looks like a self task to me.").is_none());
    }

    #[test]
    fn fallback_is_self_executor() {
        let outcome = RelationshipOutcome::unclassified("timeout");
        assert!(!outcome.is_classified());
        assert_eq!(outcome.relationship().task_type, TaskType::SelfTask);
        assert_eq!(outcome.relationship().user_role, UserRole::Executor);
    }

    #[test]
    fn prompt_clips_long_bodies() {
        let body = "x".repeat(10_000);
        let prompt = build_classification_prompt("a@b.c", "t@b.c", Some("s"), Some(&body));
        assert!(prompt.chars().count() < 5_000);
    }
}
