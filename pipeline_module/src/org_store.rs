use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OrgStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("uuid parse error: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("inbox prefix already routed: {0}")]
    PrefixTaken(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanTier {
    Free,
    Pro,
    Business,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Business => "business",
        }
    }

    /// Monthly task allowance for the tier.
    pub fn monthly_task_limit(&self) -> i64 {
        match self {
            PlanTier::Free => 50,
            PlanTier::Pro => 500,
            PlanTier::Business => 5000,
        }
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            "business" => Ok(PlanTier::Business),
            other => Err(format!("unknown plan tier: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }
}

impl std::str::FromStr for MemberRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(MemberRole::Admin),
            "member" => Ok(MemberRole::Member),
            other => Err(format!("unknown member role: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub inbox_prefix: String,
    pub plan_tier: PlanTier,
    pub monthly_task_limit: i64,
    pub tasks_used: i64,
    pub usage_period: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: MemberRole,
    pub created_at: DateTime<Utc>,
}

/// Quota check result, consulted before every task insert.
#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub can_create: bool,
    pub used: i64,
    pub limit: i64,
    pub remaining: i64,
}

const ORG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    inbox_prefix TEXT NOT NULL UNIQUE,
    plan_tier TEXT NOT NULL DEFAULT 'free',
    monthly_task_limit INTEGER NOT NULL,
    tasks_used INTEGER NOT NULL DEFAULT 0,
    usage_period TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS members (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    email TEXT NOT NULL,
    display_name TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'member',
    created_at TEXT NOT NULL,
    UNIQUE(organization_id, email)
);
"#;

/// Organizations and their member rosters. The roster is the universe for
/// mention resolution; the organization row carries the routing key and the
/// monthly quota counter.
#[derive(Debug)]
pub struct OrgStore {
    path: PathBuf,
}

impl OrgStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, OrgStoreError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    pub fn create_organization(
        &self,
        name: &str,
        inbox_prefix: &str,
        plan_tier: PlanTier,
    ) -> Result<Organization, OrgStoreError> {
        let prefix = normalize_inbox_prefix(inbox_prefix)
            .ok_or_else(|| OrgStoreError::InvalidIdentifier(inbox_prefix.to_string()))?;
        let conn = self.open()?;

        let taken: Option<String> = conn
            .query_row(
                "SELECT id FROM organizations WHERE inbox_prefix = ?1",
                params![prefix],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(OrgStoreError::PrefixTaken(prefix));
        }

        let organization = Organization {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            inbox_prefix: prefix,
            plan_tier,
            monthly_task_limit: plan_tier.monthly_task_limit(),
            tasks_used: 0,
            usage_period: current_period(Utc::now()),
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO organizations
                (id, name, inbox_prefix, plan_tier, monthly_task_limit, tasks_used, usage_period, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
            params![
                organization.id.to_string(),
                organization.name,
                organization.inbox_prefix,
                organization.plan_tier.as_str(),
                organization.monthly_task_limit,
                organization.usage_period,
                format_datetime(organization.created_at),
            ],
        )?;
        Ok(organization)
    }

    pub fn find_by_inbox_prefix(
        &self,
        inbox_prefix: &str,
    ) -> Result<Option<Organization>, OrgStoreError> {
        let Some(prefix) = normalize_inbox_prefix(inbox_prefix) else {
            return Ok(None);
        };
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, name, inbox_prefix, plan_tier, monthly_task_limit, tasks_used, usage_period, created_at
                 FROM organizations
                 WHERE inbox_prefix = ?1",
                params![prefix],
                map_organization_row,
            )
            .optional()?;
        row.map(finish_organization).transpose()
    }

    pub fn add_member(
        &self,
        organization_id: Uuid,
        email: &str,
        display_name: &str,
        role: MemberRole,
    ) -> Result<Member, OrgStoreError> {
        let email = normalize_email(email)
            .ok_or_else(|| OrgStoreError::InvalidIdentifier(email.to_string()))?;
        let conn = self.open()?;
        let member = Member {
            id: Uuid::new_v4(),
            organization_id,
            email,
            display_name: display_name.trim().to_string(),
            role,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO members (id, organization_id, email, display_name, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                member.id.to_string(),
                member.organization_id.to_string(),
                member.email,
                member.display_name,
                member.role.as_str(),
                format_datetime(member.created_at),
            ],
        )?;
        Ok(member)
    }

    pub fn list_members(&self, organization_id: Uuid) -> Result<Vec<Member>, OrgStoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, email, display_name, role, created_at
             FROM members
             WHERE organization_id = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![organization_id.to_string()], map_member_row)?;
        let mut members = Vec::new();
        for row in rows {
            members.push(finish_member(row?)?);
        }
        Ok(members)
    }

    pub fn member_count(&self, organization_id: Uuid) -> Result<i64, OrgStoreError> {
        let conn = self.open()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM members WHERE organization_id = ?1",
            params![organization_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Member count excluding one member (usually the creator).
    pub fn other_member_count(
        &self,
        organization_id: Uuid,
        excluding: Option<Uuid>,
    ) -> Result<i64, OrgStoreError> {
        let conn = self.open()?;
        let excluded = excluding.map(|id| id.to_string()).unwrap_or_default();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM members WHERE organization_id = ?1 AND id != ?2",
            params![organization_id.to_string(), excluded],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// The sole member other than `excluding`, when exactly one exists.
    pub fn sole_other_member(
        &self,
        organization_id: Uuid,
        excluding: Option<Uuid>,
    ) -> Result<Option<Member>, OrgStoreError> {
        let members = self.list_members(organization_id)?;
        let mut others = members
            .into_iter()
            .filter(|member| Some(member.id) != excluding);
        let first = others.next();
        if others.next().is_some() {
            return Ok(None);
        }
        Ok(first)
    }

    /// Exact case-insensitive email match.
    pub fn member_by_email(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> Result<Option<Member>, OrgStoreError> {
        let Some(email) = normalize_email(email) else {
            return Ok(None);
        };
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, organization_id, email, display_name, role, created_at
                 FROM members
                 WHERE organization_id = ?1 AND email = ?2",
                params![organization_id.to_string(), email],
                map_member_row,
            )
            .optional()?;
        row.map(finish_member).transpose()
    }

    /// Email local-part match. Ties break to admins, then earliest member.
    pub fn member_by_email_local_part(
        &self,
        organization_id: Uuid,
        local_part: &str,
    ) -> Result<Option<Member>, OrgStoreError> {
        let local_part = local_part.trim().to_ascii_lowercase();
        if local_part.is_empty() {
            return Ok(None);
        }
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, organization_id, email, display_name, role, created_at
                 FROM members
                 WHERE organization_id = ?1 AND email LIKE ?2 || '@%'
                 ORDER BY CASE role WHEN 'admin' THEN 0 ELSE 1 END, created_at, id
                 LIMIT 1",
                params![organization_id.to_string(), local_part],
                map_member_row,
            )
            .optional()?;
        row.map(finish_member).transpose()
    }

    /// Case-insensitive display-name substring match, same tie-break.
    pub fn member_by_name_substring(
        &self,
        organization_id: Uuid,
        needle: &str,
    ) -> Result<Option<Member>, OrgStoreError> {
        let needle = needle.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, organization_id, email, display_name, role, created_at
                 FROM members
                 WHERE organization_id = ?1 AND instr(lower(display_name), ?2) > 0
                 ORDER BY CASE role WHEN 'admin' THEN 0 ELSE 1 END, created_at, id
                 LIMIT 1",
                params![organization_id.to_string(), needle],
                map_member_row,
            )
            .optional()?;
        row.map(finish_member).transpose()
    }

    /// Quota check for one more task in the given period.
    pub fn can_create_task(
        &self,
        organization_id: Uuid,
        period: &str,
    ) -> Result<QuotaDecision, OrgStoreError> {
        let conn = self.open()?;
        let (limit, used): (i64, i64) = conn.query_row(
            "SELECT monthly_task_limit,
                    CASE WHEN usage_period = ?2 THEN tasks_used ELSE 0 END
             FROM organizations
             WHERE id = ?1",
            params![organization_id.to_string(), period],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(QuotaDecision {
            can_create: used < limit,
            used,
            limit,
            remaining: (limit - used).max(0),
        })
    }

    /// Plan-level override of the monthly allowance.
    pub fn set_monthly_task_limit(
        &self,
        organization_id: Uuid,
        limit: i64,
    ) -> Result<(), OrgStoreError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE organizations SET monthly_task_limit = ?2 WHERE id = ?1",
            params![organization_id.to_string(), limit],
        )?;
        Ok(())
    }

    /// Atomic usage increment. A single UPDATE so concurrent workers never
    /// lose updates; rolls the counter over when the period changes.
    pub fn increment_usage(
        &self,
        organization_id: Uuid,
        period: &str,
    ) -> Result<(), OrgStoreError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE organizations
             SET tasks_used = CASE WHEN usage_period = ?2 THEN tasks_used + 1 ELSE 1 END,
                 usage_period = ?2
             WHERE id = ?1",
            params![organization_id.to_string(), period],
        )?;
        Ok(())
    }

    fn open(&self) -> Result<Connection, OrgStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(ORG_SCHEMA)?;
        Ok(conn)
    }
}

/// Usage periods are calendar months.
pub fn current_period(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

pub fn normalize_inbox_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
    {
        return None;
    }
    Some(trimmed)
}

pub fn normalize_email(raw: &str) -> Option<String> {
    let mut value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(stripped) = value.strip_prefix("mailto:") {
        value = stripped.trim();
    }
    value = value.trim_matches(|ch: char| matches!(ch, '<' | '>' | '"' | '\'' | ',' | ';'));
    let (local, domain) = value.split_once('@')?;
    let local = local.trim();
    let domain = domain.trim();
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return None;
    }
    Some(format!(
        "{}@{}",
        local.to_ascii_lowercase(),
        domain.to_ascii_lowercase()
    ))
}

type OrganizationRow = (String, String, String, String, i64, i64, String, String);

fn map_organization_row(row: &Row<'_>) -> rusqlite::Result<OrganizationRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn finish_organization(raw: OrganizationRow) -> Result<Organization, OrgStoreError> {
    let (id, name, inbox_prefix, plan_tier, limit, used, usage_period, created_at) = raw;
    Ok(Organization {
        id: Uuid::parse_str(&id)?,
        name,
        inbox_prefix,
        plan_tier: plan_tier.parse().unwrap_or(PlanTier::Free),
        monthly_task_limit: limit,
        tasks_used: used,
        usage_period,
        created_at: parse_datetime(&created_at)?,
    })
}

type MemberRow = (String, String, String, String, String, String);

fn map_member_row(row: &Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn finish_member(raw: MemberRow) -> Result<Member, OrgStoreError> {
    let (id, organization_id, email, display_name, role, created_at) = raw;
    Ok(Member {
        id: Uuid::parse_str(&id)?,
        organization_id: Uuid::parse_str(&organization_id)?,
        email,
        display_name,
        role: role.parse().unwrap_or(MemberRole::Member),
        created_at: parse_datetime(&created_at)?,
    })
}

fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> OrgStore {
        OrgStore::new(temp.path().join("orgs.db")).expect("store")
    }

    #[test]
    fn inbox_prefix_is_unique() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        store
            .create_organization("Acme", "acme", PlanTier::Free)
            .expect("create");
        let err = store
            .create_organization("Other Acme", "ACME", PlanTier::Pro)
            .expect_err("duplicate prefix");
        assert!(matches!(err, OrgStoreError::PrefixTaken(_)));
    }

    #[test]
    fn routing_lookup_normalizes_prefix() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        let org = store
            .create_organization("Acme", "acme", PlanTier::Free)
            .expect("create");
        let found = store
            .find_by_inbox_prefix(" ACME ")
            .expect("lookup")
            .expect("org");
        assert_eq!(found.id, org.id);
        assert!(store
            .find_by_inbox_prefix("nobody")
            .expect("lookup")
            .is_none());
    }

    #[test]
    fn members_are_unique_per_org_email() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        let org = store
            .create_organization("Acme", "acme", PlanTier::Free)
            .expect("create");
        store
            .add_member(org.id, "Jane@Acme.com", "Jane Doe", MemberRole::Admin)
            .expect("add");
        assert!(store
            .add_member(org.id, "jane@acme.com", "Jane Again", MemberRole::Member)
            .is_err());
        let members = store.list_members(org.id).expect("list");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].email, "jane@acme.com");
    }

    #[test]
    fn other_member_counting() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        let org = store
            .create_organization("Acme", "acme", PlanTier::Free)
            .expect("create");
        let jane = store
            .add_member(org.id, "jane@acme.com", "Jane", MemberRole::Admin)
            .expect("add");
        let mark = store
            .add_member(org.id, "mark@acme.com", "Mark", MemberRole::Member)
            .expect("add");

        assert_eq!(store.member_count(org.id).expect("count"), 2);
        assert_eq!(
            store
                .other_member_count(org.id, Some(jane.id))
                .expect("count"),
            1
        );
        let sole = store
            .sole_other_member(org.id, Some(jane.id))
            .expect("sole")
            .expect("member");
        assert_eq!(sole.id, mark.id);
        assert!(store
            .sole_other_member(org.id, None)
            .expect("sole")
            .is_none());
    }

    #[test]
    fn local_part_ties_prefer_admins() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        let org = store
            .create_organization("Acme", "acme", PlanTier::Free)
            .expect("create");
        store
            .add_member(org.id, "sam@contractors.acme.com", "Sam Field", MemberRole::Member)
            .expect("add");
        let admin = store
            .add_member(org.id, "sam@acme.com", "Sam Ops", MemberRole::Admin)
            .expect("add");

        let resolved = store
            .member_by_email_local_part(org.id, "sam")
            .expect("query")
            .expect("member");
        assert_eq!(resolved.id, admin.id);
    }

    #[test]
    fn quota_decision_reflects_usage_and_period() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        let org = store
            .create_organization("Acme", "acme", PlanTier::Free)
            .expect("create");

        let decision = store.can_create_task(org.id, "2026-08").expect("quota");
        assert!(decision.can_create);
        assert_eq!(decision.used, 0);
        assert_eq!(decision.limit, 50);

        store.increment_usage(org.id, "2026-08").expect("increment");
        let decision = store.can_create_task(org.id, "2026-08").expect("quota");
        assert_eq!(decision.used, 1);
        assert_eq!(decision.remaining, 49);

        // Period rollover: a new month starts from zero.
        let decision = store.can_create_task(org.id, "2026-09").expect("quota");
        assert_eq!(decision.used, 0);
        store.increment_usage(org.id, "2026-09").expect("increment");
        let decision = store.can_create_task(org.id, "2026-09").expect("quota");
        assert_eq!(decision.used, 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let temp = TempDir::new().expect("tempdir");
        let store = Arc::new(store(&temp));
        let org = store
            .create_organization("Acme", "acme", PlanTier::Business)
            .expect("create");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let org_id = org.id;
                thread::spawn(move || {
                    for _ in 0..5 {
                        store.increment_usage(org_id, "2026-08").expect("increment");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        let decision = store.can_create_task(org.id, "2026-08").expect("quota");
        assert_eq!(decision.used, 40);
    }
}
