use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use extraction_module::drafts::Priority;

use crate::channel::InboundMessage;
use crate::classifier::RelationshipClassifier;
use crate::deadline::{analyze_deadline, ThreadContext};
use crate::org_store::{current_period, OrgStore, OrgStoreError};
use crate::sender_intel::{SenderEvent, SenderIntelligenceStore};
use crate::task_store::{
    NewTask, ProcessingEntry, ProcessingOutcome, TaskStore, TaskStoreError,
};
use crate::visibility::resolve_visibility;

pub const DEFAULT_DEDUP_WINDOW: StdDuration = StdDuration::from_secs(3600);

#[derive(Debug, thiserror::Error)]
pub enum MaterializerError {
    #[error("organization store error: {0}")]
    Org(#[from] OrgStoreError),
    #[error("task store error: {0}")]
    Task(#[from] TaskStoreError),
}

#[derive(Debug, Clone)]
pub struct MaterializerConfig {
    /// Lookback window for the title + due-date dedup check.
    pub dedup_window: StdDuration,
    /// Domains that never count as mentions (the inbound provider's own
    /// domain; the organization routing domain is excluded automatically).
    pub excluded_mention_domains: Vec<String>,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
            excluded_mention_domains: Vec::new(),
        }
    }
}

/// What happened to one consumed message, mirrored into the processing log.
#[derive(Debug, Clone)]
pub struct ProcessingReport {
    pub outcome: ProcessingOutcome,
    pub task_ids: Vec<Uuid>,
    pub duplicate_of: Vec<Uuid>,
    pub detail: Option<String>,
}

/// The pipeline orchestrator: one inbound message in, zero or more task
/// rows out, exactly once per message id, observable as a single audit
/// entry. Classification and visibility are computed once per message and
/// applied to every extracted draft.
pub struct Materializer {
    org_store: Arc<OrgStore>,
    task_store: Arc<TaskStore>,
    intel_store: Arc<SenderIntelligenceStore>,
    classifier: Arc<RelationshipClassifier>,
    config: MaterializerConfig,
}

impl Materializer {
    pub fn new(
        org_store: Arc<OrgStore>,
        task_store: Arc<TaskStore>,
        intel_store: Arc<SenderIntelligenceStore>,
        classifier: Arc<RelationshipClassifier>,
        config: MaterializerConfig,
    ) -> Self {
        Self {
            org_store,
            task_store,
            intel_store,
            classifier,
            config,
        }
    }

    pub fn process(
        &self,
        message: &InboundMessage,
    ) -> Result<ProcessingReport, MaterializerError> {
        let message_key = message_key(message);

        // Durable idempotency: a message whose audit entry exists is done,
        // however many times the transport re-delivers it.
        if let Some(entry) = self.task_store.find_processing(&message_key)? {
            info!(
                "message {} already processed (outcome {}), skipping",
                message_key,
                entry.outcome.as_str()
            );
            return Ok(ProcessingReport {
                outcome: ProcessingOutcome::Duplicate,
                task_ids: entry.task_ids,
                duplicate_of: Vec::new(),
                detail: Some("message already processed".to_string()),
            });
        }

        // Unroutable mail is a permanent failure: logged, never retried.
        let Some(route_key) = route_key_from_recipient(&message.recipient) else {
            return self.finish_unroutable(&message_key, message);
        };
        let Some(organization) = self.org_store.find_by_inbox_prefix(&route_key)? else {
            return self.finish_unroutable(&message_key, message);
        };

        let creator = self
            .org_store
            .member_by_email(organization.id, &message.sender)?;

        // One classification and one visibility resolution per message,
        // shared by every task in the batch.
        let relationship = self.classifier.classify_relationship(message);
        let excluded_domains = self.excluded_domains(message);
        let decision = resolve_visibility(
            &self.org_store,
            &organization,
            creator.as_ref(),
            message,
            relationship.relationship(),
            &excluded_domains,
        )?;

        let drafts = self.classifier.extract_drafts(message);
        let thread_id = message
            .thread_id
            .clone()
            .unwrap_or_else(|| message_key.clone());
        let thread = ThreadContext {
            is_reply: message.is_reply(),
            prior_thread_tasks: self
                .task_store
                .count_thread_tasks(organization.id, &thread_id)?,
        };
        let sender_profile = match self.intel_store.profile(organization.id, &message.sender) {
            Ok(profile) => profile,
            Err(err) => {
                warn!("sender intelligence read failed: {}", err);
                None
            }
        };

        let now = Utc::now();
        let period = current_period(now);
        let today = now.date_naive();

        let mut created: Vec<Uuid> = Vec::new();
        let mut created_priorities: Vec<Priority> = Vec::new();
        let mut duplicate_of: Vec<Uuid> = Vec::new();
        let mut quota_exhausted = false;

        for draft in &drafts {
            let quota = self.org_store.can_create_task(organization.id, &period)?;
            if !quota.can_create {
                info!(
                    "quota exhausted for {} ({}/{}), stopping batch",
                    organization.inbox_prefix, quota.used, quota.limit
                );
                quota_exhausted = true;
                break;
            }

            let analysis = analyze_deadline(draft, &thread, sender_profile.as_ref(), today);

            if let Some(original) = self.task_store.find_recent_duplicate(
                organization.id,
                &draft.title,
                analysis.due_date,
                self.config.dedup_window,
            )? {
                info!(
                    "duplicate of task {} detected for '{}', skipping",
                    original, draft.title
                );
                duplicate_of.push(original);
                continue;
            }

            let metadata = json!({
                "sender": &message.sender,
                "item_type": "action_item",
                "task_type": relationship.relationship().task_type.as_str(),
                "user_role": relationship.relationship().user_role.as_str(),
                "classified": relationship.is_classified(),
                "sender_importance": sender_profile.as_ref().map(|profile| profile.importance_score),
                "effort": &draft.effort,
                "business_impact": &draft.business_impact,
                "stakeholders": &draft.stakeholders,
                "tags": &draft.tags,
                "unresolved_mentions": &decision.unresolved_mentions,
                "command": &message.command,
            });

            let record = self.task_store.insert_task(&NewTask {
                organization_id: organization.id,
                title: draft.title.clone(),
                description: draft.description.clone(),
                priority: analysis.priority,
                due_date: analysis.due_date,
                reminder_date: analysis.reminder_date,
                visibility: decision.visibility,
                assigned_to: decision.assigned_to,
                shared_with: decision.shared_with.clone(),
                creator_id: creator.as_ref().map(|member| member.id),
                channel: message.channel,
                thread_id: Some(thread_id.clone()),
                metadata,
                reminder_recurrence: None,
            })?;
            self.org_store.increment_usage(organization.id, &period)?;
            created_priorities.push(analysis.priority);
            created.push(record.id);
        }

        // Sender intelligence is fire-and-forget: a failed update must not
        // fail the pipeline.
        let event = match created_priorities.iter().max() {
            Some(priority) => SenderEvent::task_created(*priority),
            None => SenderEvent::seen(),
        };
        if let Err(err) = self
            .intel_store
            .record(organization.id, &message.sender, &event)
        {
            warn!("sender intelligence update failed: {}", err);
        }

        let outcome = match (created.is_empty(), quota_exhausted) {
            (false, true) => ProcessingOutcome::Partial,
            (false, false) => ProcessingOutcome::Created,
            (true, true) => ProcessingOutcome::QuotaExhausted,
            (true, false) => ProcessingOutcome::Duplicate,
        };
        let detail = format!(
            "{} created, {} duplicate, {} drafts",
            created.len(),
            duplicate_of.len(),
            drafts.len()
        );

        self.task_store.record_processing(&ProcessingEntry {
            provider_message_id: message_key.clone(),
            organization_id: Some(organization.id),
            outcome,
            task_ids: created.clone(),
            detail: Some(detail.clone()),
            processed_at: now,
        })?;
        info!(
            "message {} materialized: outcome={} tasks={:?}",
            message_key,
            outcome.as_str(),
            created
        );

        Ok(ProcessingReport {
            outcome,
            task_ids: created,
            duplicate_of,
            detail: Some(detail),
        })
    }

    fn finish_unroutable(
        &self,
        message_key: &str,
        message: &InboundMessage,
    ) -> Result<ProcessingReport, MaterializerError> {
        warn!(
            "no organization routes {}, dropping message {}",
            message.recipient, message_key
        );
        self.task_store.record_processing(&ProcessingEntry {
            provider_message_id: message_key.to_string(),
            organization_id: None,
            outcome: ProcessingOutcome::Unroutable,
            task_ids: Vec::new(),
            detail: Some(format!("no organization for {}", message.recipient)),
            processed_at: Utc::now(),
        })?;
        Ok(ProcessingReport {
            outcome: ProcessingOutcome::Unroutable,
            task_ids: Vec::new(),
            duplicate_of: Vec::new(),
            detail: Some(format!("no organization for {}", message.recipient)),
        })
    }

    fn excluded_domains(&self, message: &InboundMessage) -> Vec<String> {
        let mut domains = self.config.excluded_mention_domains.clone();
        if let Some((_, domain)) = message.recipient.rsplit_once('@') {
            let domain = domain.trim().to_ascii_lowercase();
            if !domain.is_empty() && !domains.contains(&domain) {
                domains.push(domain);
            }
        }
        domains
    }
}

/// Stable processing-log key for a message: the provider id when present,
/// a content hash otherwise.
pub fn message_key(message: &InboundMessage) -> String {
    message
        .provider_message_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| {
            let material = format!(
                "{}\n{}\n{}\n{}",
                message.sender,
                message.recipient,
                message.subject.as_deref().unwrap_or(""),
                message.body_text()
            );
            format!("{:x}", md5::compute(material.as_bytes()))
        })
}

/// The organization routing key for an inbound recipient address: the local
/// part of the address (before any `+` tag), or the raw value for chat
/// payloads that already carry a prefix.
pub fn route_key_from_recipient(recipient: &str) -> Option<String> {
    let trimmed = recipient.trim();
    if trimmed.is_empty() {
        return None;
    }
    let local = trimmed.split('@').next().unwrap_or(trimmed);
    let local = local.split('+').next().unwrap_or(local);
    crate::org_store::normalize_inbox_prefix(local)
}
