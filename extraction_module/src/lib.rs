pub mod dates;
pub mod drafts;
pub mod mentions;
pub mod relationship;

pub use dates::parse_due_date;
pub use drafts::{fallback_draft, parse_drafts, Priority, TaskDraft};
pub use mentions::{extract_mentions, Mention, MentionSource};
pub use relationship::{
    build_classification_prompt, build_extraction_prompt, parse_relationship, Relationship,
    RelationshipOutcome, TaskType, UserRole,
};
