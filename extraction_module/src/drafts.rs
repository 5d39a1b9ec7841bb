use serde::{Deserialize, Serialize};

const MAX_FALLBACK_TITLE_CHARS: usize = 120;
const MAX_FALLBACK_DESCRIPTION_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// One step up, saturating at `High`.
    pub fn escalate(self) -> Self {
        match self {
            Priority::Low => Priority::Medium,
            Priority::Medium | Priority::High => Priority::High,
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One action item extracted from an inbound message. A single message may
/// yield one draft or several (an email listing multiple action items).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Explicit date/time text captured during extraction, if any.
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub effort: Option<String>,
    #[serde(default)]
    pub business_impact: Option<String>,
    #[serde(default)]
    pub stakeholders: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DraftListWrapper {
    tasks: Vec<TaskDraft>,
}

/// Parse model output into task drafts.
///
/// Accepts a JSON array, a bare object, or a `{"tasks": [...]}` wrapper,
/// with or without a markdown code fence. Drafts without a title are
/// dropped; `None` means nothing usable was produced and the caller should
/// fall back to [`fallback_draft`].
pub fn parse_drafts(raw: &str) -> Option<Vec<TaskDraft>> {
    let trimmed = strip_code_fences(raw);
    if trimmed.is_empty() {
        return None;
    }

    let drafts = if let Ok(list) = serde_json::from_str::<Vec<TaskDraft>>(trimmed) {
        list
    } else if let Ok(single) = serde_json::from_str::<TaskDraft>(trimmed) {
        vec![single]
    } else if let Ok(wrapper) = serde_json::from_str::<DraftListWrapper>(trimmed) {
        wrapper.tasks
    } else {
        return None;
    };

    let drafts: Vec<TaskDraft> = drafts
        .into_iter()
        .filter(|draft| !draft.title.trim().is_empty())
        .collect();
    if drafts.is_empty() {
        None
    } else {
        Some(drafts)
    }
}

/// Heuristic single draft used when extraction produced nothing usable:
/// subject becomes the title, the head of the body becomes the description.
pub fn fallback_draft(subject: Option<&str>, body: Option<&str>) -> TaskDraft {
    let body = body.unwrap_or("").trim();
    let title = subject
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| {
            body.lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(|line| truncate_chars(line, MAX_FALLBACK_TITLE_CHARS))
        })
        .unwrap_or_else(|| "Untitled task".to_string());

    TaskDraft {
        title,
        description: truncate_chars(body, MAX_FALLBACK_DESCRIPTION_CHARS),
        priority: Priority::default(),
        tags: Vec::new(),
        when: None,
        effort: None,
        business_impact: None,
        stakeholders: Vec::new(),
    }
}

pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect()
}
