use uuid::Uuid;

use extraction_module::mentions::{extract_mentions, Mention};
use extraction_module::relationship::Relationship;

use crate::channel::InboundMessage;
use crate::org_store::{Member, OrgStore, OrgStoreError, Organization};
use crate::roster::RosterResolver;

/// Which members may see a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Private,
    Assigned,
    Shared,
    Team,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Assigned => "assigned",
            Visibility::Shared => "shared",
            Visibility::Team => "team",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(Visibility::Private),
            "assigned" => Ok(Visibility::Assigned),
            "shared" => Ok(Visibility::Shared),
            "team" => Ok(Visibility::Team),
            other => Err(format!("unknown visibility: {}", other)),
        }
    }
}

/// The resolved audience for every task extracted from one message.
/// Computed once per message and applied to the whole batch.
#[derive(Debug, Clone)]
pub struct VisibilityDecision {
    pub visibility: Visibility,
    pub assigned_to: Option<Uuid>,
    pub shared_with: Vec<Uuid>,
    /// Mentions that matched no roster member; recorded, never blocking.
    pub unresolved_mentions: Vec<String>,
}

impl VisibilityDecision {
    fn team(unresolved_mentions: Vec<String>) -> Self {
        Self {
            visibility: Visibility::Team,
            assigned_to: None,
            shared_with: Vec::new(),
            unresolved_mentions,
        }
    }
}

/// Decide visibility, owner and sharer set for one inbound message.
///
/// Total over every input: any roster size (including a lone creator or an
/// unknown sender) and any mention count yields exactly one visibility class,
/// and `assigned` always carries a non-null owner. The advisory relationship
/// classification is input, not authority: roster size can override it.
pub fn resolve_visibility(
    store: &OrgStore,
    organization: &Organization,
    creator: Option<&Member>,
    message: &InboundMessage,
    relationship: &Relationship,
    excluded_domains: &[String],
) -> Result<VisibilityDecision, OrgStoreError> {
    // 1. Explicit subject markers short-circuit everything else.
    let subject = message.subject.as_deref().unwrap_or("");
    let subject_lower = subject.to_ascii_lowercase();
    if subject_lower.contains("[team]") || subject_lower.contains("[all]") {
        return Ok(VisibilityDecision::team(Vec::new()));
    }
    if subject_lower.contains("[private]") {
        return Ok(VisibilityDecision {
            visibility: Visibility::Private,
            assigned_to: creator.map(|member| member.id),
            shared_with: Vec::new(),
            unresolved_mentions: Vec::new(),
        });
    }

    let creator_id = creator.map(|member| member.id);
    let other_count = store.other_member_count(organization.id, creator_id)?;
    let mentions = extract_mentions(subject, message.body_text(), excluded_domains);

    // 2. Advisory handoff: resolve against roster size first.
    if relationship.task_type.is_handoff() {
        return match other_count {
            1 => auto_assign_sole_other(store, organization, creator),
            0 => Ok(resolve_from_mentions(store, organization, creator, &mentions)?.decision),
            _ => {
                let resolved = resolve_from_mentions(store, organization, creator, &mentions)?;
                if resolved.assignee_from_mention {
                    Ok(resolved.decision)
                } else {
                    // More than one candidate and nobody named: the whole
                    // organization sees it and can self-claim.
                    Ok(VisibilityDecision::team(resolved.decision.unresolved_mentions))
                }
            }
        };
    }

    // 3. No handoff signal: mentions drive the outcome.
    if mentions.is_empty() {
        if other_count == 1 {
            return auto_assign_sole_other(store, organization, creator);
        }
        return Ok(VisibilityDecision::team(Vec::new()));
    }

    // 4. Mentions present.
    Ok(resolve_from_mentions(store, organization, creator, &mentions)?.decision)
}

fn auto_assign_sole_other(
    store: &OrgStore,
    organization: &Organization,
    creator: Option<&Member>,
) -> Result<VisibilityDecision, OrgStoreError> {
    let creator_id = creator.map(|member| member.id);
    let Some(other) = store.sole_other_member(organization.id, creator_id)? else {
        return Ok(VisibilityDecision::team(Vec::new()));
    };
    Ok(VisibilityDecision {
        visibility: Visibility::Assigned,
        assigned_to: Some(other.id),
        shared_with: creator_id.into_iter().collect(),
        unresolved_mentions: Vec::new(),
    })
}

struct MentionResolution {
    decision: VisibilityDecision,
    /// True when the primary assignee came from a resolved mention rather
    /// than the creator fallback.
    assignee_from_mention: bool,
}

fn resolve_from_mentions(
    store: &OrgStore,
    organization: &Organization,
    creator: Option<&Member>,
    mentions: &[Mention],
) -> Result<MentionResolution, OrgStoreError> {
    let creator_id = creator.map(|member| member.id);
    let resolver = RosterResolver::new(store);

    let mut resolved_ids: Vec<Uuid> = Vec::new();
    let mut unresolved: Vec<String> = Vec::new();
    let mut primary: Option<Uuid> = None;
    for (index, mention) in mentions.iter().enumerate() {
        match resolver.resolve(organization.id, &mention.raw)? {
            Some(member) => {
                if index == 0 {
                    primary = Some(member.member_id);
                }
                if !resolved_ids.contains(&member.member_id) {
                    resolved_ids.push(member.member_id);
                }
            }
            None => unresolved.push(mention.raw.clone()),
        }
    }

    // The mention list orders assignment phrases first, so the first entry
    // is the strongest assignee candidate. An unresolved assignee falls
    // back to the creator; with no creator either, the task goes to the
    // whole team rather than to a null owner.
    let (assigned_to, assignee_from_mention) = match (primary, creator_id) {
        (Some(member_id), _) => (member_id, true),
        (None, Some(creator_id)) => (creator_id, false),
        (None, None) => {
            return Ok(MentionResolution {
                decision: VisibilityDecision::team(unresolved),
                assignee_from_mention: false,
            })
        }
    };

    let mut shared_with: Vec<Uuid> = resolved_ids
        .into_iter()
        .filter(|id| *id != assigned_to)
        .collect();
    if let Some(creator_id) = creator_id {
        if creator_id != assigned_to && !shared_with.contains(&creator_id) {
            shared_with.push(creator_id);
        }
    }

    let visibility = if shared_with.iter().any(|id| Some(*id) != creator_id) {
        Visibility::Shared
    } else {
        Visibility::Assigned
    };

    Ok(MentionResolution {
        decision: VisibilityDecision {
            visibility,
            assigned_to: Some(assigned_to),
            shared_with,
            unresolved_mentions: unresolved,
        },
        assignee_from_mention,
    })
}
