use chrono::{Duration, NaiveDate};

use extraction_module::dates::parse_due_date;
use extraction_module::drafts::{Priority, TaskDraft};

use crate::sender_intel::SenderProfile;

/// Senders above this importance score escalate priority.
pub const HIGH_IMPORTANCE_THRESHOLD: f64 = 0.7;

/// What the pipeline knows about the conversation a message belongs to.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadContext {
    pub is_reply: bool,
    pub prior_thread_tasks: i64,
}

impl ThreadContext {
    /// A reply in a thread that already produced tasks is "active".
    pub fn is_active_reply(&self) -> bool {
        self.is_reply || self.prior_thread_tasks > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineAnalysis {
    pub due_date: Option<NaiveDate>,
    pub reminder_date: Option<NaiveDate>,
    pub priority: Priority,
}

/// Infer due date, reminder date and priority for one task draft.
///
/// Best-effort by contract: a miss on every date pattern leaves the dates
/// null and the priority at the extractor's default. This function never
/// fails and so can never block persistence.
pub fn analyze_deadline(
    draft: &TaskDraft,
    thread: &ThreadContext,
    sender: Option<&SenderProfile>,
    today: NaiveDate,
) -> DeadlineAnalysis {
    let due_date = draft
        .when
        .as_deref()
        .and_then(parse_due_date)
        .or_else(|| parse_due_date(&draft.tags.join(" ")));

    // Remind the day before, never in the past.
    let reminder_date = due_date.map(|due| {
        let candidate = due - Duration::days(1);
        if candidate < today {
            today
        } else {
            candidate
        }
    });

    let mut priority = draft.priority;
    let important_sender = sender
        .map(|profile| profile.importance_score >= HIGH_IMPORTANCE_THRESHOLD)
        .unwrap_or(false);
    if important_sender {
        priority = priority.escalate();
    }
    if draft
        .business_impact
        .as_deref()
        .map(|impact| impact.eq_ignore_ascii_case("high"))
        .unwrap_or(false)
    {
        priority = priority.escalate();
    }
    if thread.is_active_reply() {
        priority = priority.escalate();
    }

    DeadlineAnalysis {
        due_date,
        reminder_date,
        priority,
    }
}
