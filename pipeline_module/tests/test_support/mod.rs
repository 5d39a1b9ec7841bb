use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use pipeline_module::channel::{Channel, InboundMessage, MessageHeader};
use pipeline_module::classifier::{ClassifierConfig, RelationshipClassifier};
use pipeline_module::materializer::{Materializer, MaterializerConfig};
use pipeline_module::org_store::{Member, MemberRole, OrgStore, Organization, PlanTier};
use pipeline_module::sender_intel::SenderIntelligenceStore;
use pipeline_module::task_store::TaskStore;

pub struct Harness {
    pub temp: TempDir,
    pub org_store: Arc<OrgStore>,
    pub task_store: Arc<TaskStore>,
    pub intel_store: Arc<SenderIntelligenceStore>,
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("tempdir");
        let org_store = Arc::new(OrgStore::new(temp.path().join("orgs.db")).expect("org store"));
        let task_store = Arc::new(TaskStore::new(temp.path().join("tasks.db")).expect("task store"));
        let intel_store = Arc::new(
            SenderIntelligenceStore::new(temp.path().join("intel.db")).expect("intel store"),
        );
        Self {
            temp,
            org_store,
            task_store,
            intel_store,
        }
    }

    pub fn materializer(&self, classifier: ClassifierConfig) -> Materializer {
        Materializer::new(
            self.org_store.clone(),
            self.task_store.clone(),
            self.intel_store.clone(),
            Arc::new(RelationshipClassifier::new(classifier)),
            MaterializerConfig::default(),
        )
    }

    pub fn org_with_members(&self, prefix: &str, member_emails: &[&str]) -> (Organization, Vec<Member>) {
        let org = self
            .org_store
            .create_organization("Test Org", prefix, PlanTier::Free)
            .expect("org");
        let members = member_emails
            .iter()
            .enumerate()
            .map(|(index, email)| {
                let role = if index == 0 {
                    MemberRole::Admin
                } else {
                    MemberRole::Member
                };
                let name = email.split('@').next().unwrap_or("member");
                self.org_store
                    .add_member(org.id, email, name, role)
                    .expect("member")
            })
            .collect();
        (org, members)
    }
}

pub fn email_message(
    provider_message_id: &str,
    sender: &str,
    recipient: &str,
    subject: &str,
    body: &str,
) -> InboundMessage {
    InboundMessage {
        channel: Channel::Email,
        sender: sender.to_string(),
        sender_name: None,
        recipient: recipient.to_string(),
        subject: Some(subject.to_string()),
        text_body: Some(body.to_string()),
        html_body: None,
        provider_message_id: Some(provider_message_id.to_string()),
        received_at: Utc::now(),
        thread_id: Some(format!("thread-{}", provider_message_id)),
        headers: Vec::new(),
        command: None,
    }
}

pub fn reply_headers(parent_id: &str) -> Vec<MessageHeader> {
    vec![MessageHeader {
        name: "In-Reply-To".to_string(),
        value: format!("<{}>", parent_id),
    }]
}
