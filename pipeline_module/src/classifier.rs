use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use extraction_module::drafts::{fallback_draft, parse_drafts, TaskDraft};
use extraction_module::relationship::{
    build_classification_prompt, build_extraction_prompt, parse_relationship,
    RelationshipOutcome, CLASSIFICATION_INSTRUCTIONS, EXTRACTION_INSTRUCTIONS,
};

use crate::channel::InboundMessage;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Hard ceiling on classification calls so a stalled service never holds a
/// worker; on expiry the fail-open default applies.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const MAX_COMPLETION_TOKENS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub enabled: bool,
}

impl ClassifierConfig {
    pub fn from_env() -> Self {
        let api_key = env::var("CLASSIFIER_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self {
            api_url: env::var("CLASSIFIER_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            model: env::var("CLASSIFIER_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            timeout: env::var("CLASSIFIER_TIMEOUT_SECS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            enabled: env::var("CLASSIFIER_ENABLED")
                .map(|value| value.to_lowercase() != "false")
                .unwrap_or(true),
            api_key,
        }
    }

    /// No network calls; every classification takes the fail-open path.
    pub fn disabled() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            enabled: false,
        }
    }
}

/// Client for the external text-classification service. Stateless per call;
/// every failure mode (disabled, transport error, bad status, unparseable
/// answer, timeout) degrades to the documented default rather than erroring,
/// so classification can never block task creation.
#[derive(Debug, Clone)]
pub struct RelationshipClassifier {
    config: ClassifierConfig,
    client: reqwest::blocking::Client,
}

impl RelationshipClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        info!(
            "relationship classifier initialized: url={}, model={}, enabled={}",
            config.api_url, config.model, config.enabled
        );
        Self { config, client }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.api_key.is_some()
    }

    /// Classify who the work belongs to. Advisory only: the visibility
    /// resolver may override the answer using roster size.
    pub fn classify_relationship(&self, message: &InboundMessage) -> RelationshipOutcome {
        if !self.is_enabled() {
            debug!("classifier disabled, using fallback relationship");
            return RelationshipOutcome::unclassified("classifier disabled");
        }

        let prompt = build_classification_prompt(
            &message.sender,
            &message.recipient,
            message.subject.as_deref(),
            Some(message.body_text()),
        );
        match self.chat(CLASSIFICATION_INSTRUCTIONS, &prompt) {
            Ok(answer) => match parse_relationship(&answer) {
                Some(relationship) => RelationshipOutcome::Classified(relationship),
                None => {
                    warn!("classifier answer was not parseable, using fallback");
                    RelationshipOutcome::unclassified("unparseable answer")
                }
            },
            Err(reason) => {
                warn!("classification call failed, using fallback: {}", reason);
                RelationshipOutcome::unclassified(reason)
            }
        }
    }

    /// Extract one-or-many task drafts from the message. Always yields at
    /// least one draft: failures fall back to the subject/body heuristic.
    pub fn extract_drafts(&self, message: &InboundMessage) -> Vec<TaskDraft> {
        let heuristic =
            || vec![fallback_draft(message.subject.as_deref(), Some(message.body_text()))];

        if !self.is_enabled() {
            debug!("classifier disabled, using heuristic draft");
            return heuristic();
        }

        let prompt = build_extraction_prompt(message.subject.as_deref(), Some(message.body_text()));
        match self.chat(EXTRACTION_INSTRUCTIONS, &prompt) {
            Ok(answer) => match parse_drafts(&answer) {
                Some(drafts) => drafts,
                None => {
                    warn!("extraction answer was not parseable, using heuristic draft");
                    heuristic()
                }
            },
            Err(reason) => {
                warn!("extraction call failed, using heuristic draft: {}", reason);
                heuristic()
            }
        }
    }

    fn chat(&self, instructions: &str, prompt: &str) -> Result<String, String> {
        let api_key = self.config.api_key.as_ref().ok_or("missing api key")?;
        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: instructions.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_completion_tokens: MAX_COMPLETION_TOKENS,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .map_err(|err| format!("request failed: {}", err))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(format!("service returned {}: {}", status, body));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|err| format!("bad response body: {}", err))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
