use regex::Regex;
use std::sync::LazyLock;

/// Where in the message text a mention was found. Assignment phrases carry
/// the strongest signal and always sort ahead of the other sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionSource {
    AssignmentPhrase,
    HandleToken,
    RecipientList,
}

/// A candidate identifier pulled out of message text: either a full email
/// address or a bare handle, always lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub raw: String,
    pub source: MentionSource,
}

impl Mention {
    pub fn is_email(&self) -> bool {
        self.raw.contains('@')
    }

    /// Domain part for email mentions, None for bare handles.
    pub fn domain(&self) -> Option<&str> {
        self.raw.rsplit_once('@').map(|(_, domain)| domain)
    }
}

const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}";

/// "assign to x" / "delegate to x" phrases, email or @handle target.
static ASSIGNMENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(&format!(
            r"(?i)\bassign(?:ed|ing)?(?:\s+(?:this|it))?\s+to\s+@?({EMAIL_PATTERN}|[A-Za-z0-9._-]{{2,}})"
        ))
        .unwrap(),
        Regex::new(&format!(
            r"(?i)\bdelegat(?:e|ed|ing)(?:\s+(?:this|it))?\s+to\s+@?({EMAIL_PATTERN}|[A-Za-z0-9._-]{{2,}})"
        ))
        .unwrap(),
        // "for <email>" only with a full address; a bare word after "for" is
        // almost never a person ("for tomorrow", "for review").
        Regex::new(&format!(r"(?i)\bfor\s+({EMAIL_PATTERN})")).unwrap(),
    ]
});

/// `@handle` or `@full-address` tokens.
static AT_EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?:^|[^A-Za-z0-9._%+-])@({EMAIL_PATTERN})")).unwrap());

static AT_HANDLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9._%+-])@([A-Za-z0-9][A-Za-z0-9._-]{1,63})").unwrap()
});

/// `cc:` / `to:` style recipient lines inside a forwarded body.
static RECIPIENT_LINE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[>\s]*(?:cc|to)\s*:\s*(.+)$").unwrap());

static EMAIL_TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EMAIL_PATTERN).unwrap());

/// Pull candidate member identifiers out of subject and body text.
///
/// Each pattern contributes independently; results are unioned preserving
/// first-seen order per source, assignment phrases first. Identifiers whose
/// domain is in `excluded_domains` (the organization's own routing domain and
/// the inbound provider's domain) never count as mentions. Pure function:
/// same input always yields the same list.
pub fn extract_mentions(subject: &str, body: &str, excluded_domains: &[String]) -> Vec<Mention> {
    let text = format!("{}\n{}", subject, body);
    let mut seen = Vec::new();
    let mut out = Vec::new();

    let mut push = |raw: String, source: MentionSource| {
        let raw = raw.to_ascii_lowercase();
        if raw.is_empty() || seen.contains(&raw) {
            return;
        }
        if is_excluded(&raw, excluded_domains) {
            return;
        }
        seen.push(raw.clone());
        out.push(Mention { raw, source });
    };

    for pattern in ASSIGNMENT_PATTERNS.iter() {
        for capture in pattern.captures_iter(&text) {
            if let Some(matched) = capture.get(1) {
                push(
                    matched.as_str().trim_matches('.').to_string(),
                    MentionSource::AssignmentPhrase,
                );
            }
        }
    }

    for capture in AT_EMAIL_PATTERN.captures_iter(&text) {
        if let Some(matched) = capture.get(1) {
            push(matched.as_str().to_string(), MentionSource::HandleToken);
        }
    }

    for capture in AT_HANDLE_PATTERN.captures_iter(&text) {
        let Some(matched) = capture.get(1) else {
            continue;
        };
        // Skip handles that are really the local part of an @email token:
        // in "@jane@acme.com" the handle pattern would otherwise grab "jane".
        if text[matched.end()..].starts_with('@') {
            continue;
        }
        push(
            matched.as_str().trim_matches('.').to_string(),
            MentionSource::HandleToken,
        );
    }

    for capture in RECIPIENT_LINE_PATTERN.captures_iter(&text) {
        let Some(line) = capture.get(1) else {
            continue;
        };
        for email in EMAIL_TOKEN_PATTERN.find_iter(line.as_str()) {
            push(email.as_str().to_string(), MentionSource::RecipientList);
        }
    }

    out
}

fn is_excluded(raw: &str, excluded_domains: &[String]) -> bool {
    let Some((_, domain)) = raw.rsplit_once('@') else {
        return false;
    };
    excluded_domains
        .iter()
        .any(|excluded| domain.eq_ignore_ascii_case(excluded.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raws(mentions: &[Mention]) -> Vec<&str> {
        mentions.iter().map(|m| m.raw.as_str()).collect()
    }

    #[test]
    fn assignment_phrases_come_first() {
        let mentions = extract_mentions(
            "Budget review",
            "Please @sam take a look. Assign to jane@acme.com by Friday.",
            &[],
        );
        assert_eq!(raws(&mentions), vec!["jane@acme.com", "sam"]);
        assert_eq!(mentions[0].source, MentionSource::AssignmentPhrase);
        assert_eq!(mentions[1].source, MentionSource::HandleToken);
    }

    #[test]
    fn delegate_and_for_phrases_match() {
        let mentions = extract_mentions(
            "",
            "Delegated to @mark. This one is for lucy@acme.com.",
            &[],
        );
        assert_eq!(raws(&mentions), vec!["mark", "lucy@acme.com"]);
        assert!(mentions
            .iter()
            .all(|m| m.source == MentionSource::AssignmentPhrase));
    }

    #[test]
    fn bare_word_after_for_is_not_a_mention() {
        let mentions = extract_mentions("", "Schedule it for tomorrow please", &[]);
        assert!(mentions.is_empty());
    }

    #[test]
    fn at_email_not_double_counted_as_handle() {
        let mentions = extract_mentions("", "ping @jane@acme.com about this", &[]);
        assert_eq!(raws(&mentions), vec!["jane@acme.com"]);
    }

    #[test]
    fn recipient_lines_contribute_emails() {
        let body = "FYI\n> To: alice@client.io\n> Cc: bob@client.io, carol@client.io\nthanks";
        let mentions = extract_mentions("", body, &[]);
        assert_eq!(
            raws(&mentions),
            vec!["alice@client.io", "bob@client.io", "carol@client.io"]
        );
        assert!(mentions
            .iter()
            .all(|m| m.source == MentionSource::RecipientList));
    }

    #[test]
    fn routing_domain_is_never_a_mention() {
        let excluded = vec!["intake.taskwell.io".to_string(), "pm.example.com".to_string()];
        let mentions = extract_mentions(
            "Fwd: report",
            "assign to acme@intake.taskwell.io, ping @jane@acme.com and @bot@pm.example.com",
            &excluded,
        );
        assert_eq!(raws(&mentions), vec!["jane@acme.com"]);
    }

    #[test]
    fn duplicates_keep_first_seen_source() {
        let mentions = extract_mentions(
            "",
            "assign to jane@acme.com. Later: @jane@acme.com again.",
            &[],
        );
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].source, MentionSource::AssignmentPhrase);
    }

    #[test]
    fn same_input_same_output() {
        let body = "assign to jane@acme.com, cc: bob@acme.com, @sam";
        let first = extract_mentions("s", body, &[]);
        let second = extract_mentions("s", body, &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn handles_are_lower_cased() {
        let mentions = extract_mentions("", "ask @Sam about it", &[]);
        assert_eq!(raws(&mentions), vec!["sam"]);
    }
}
