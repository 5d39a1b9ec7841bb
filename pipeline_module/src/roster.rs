use uuid::Uuid;

use crate::org_store::{Member, OrgStore, OrgStoreError};

/// A mention successfully resolved against the organization roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMember {
    pub member_id: Uuid,
    pub email: String,
    pub display_name: String,
}

impl From<Member> for ResolvedMember {
    fn from(member: Member) -> Self {
        Self {
            member_id: member.id,
            email: member.email,
            display_name: member.display_name,
        }
    }
}

/// Resolves one extracted identifier to a member of one organization.
///
/// Resolution order: exact case-insensitive email, then email local part,
/// then case-insensitive display-name substring. First tier with a match
/// wins; within a tier ties break to admins first, then the earliest
/// member, so resolution is deterministic across processes.
#[derive(Debug)]
pub struct RosterResolver<'a> {
    store: &'a OrgStore,
}

impl<'a> RosterResolver<'a> {
    pub fn new(store: &'a OrgStore) -> Self {
        Self { store }
    }

    pub fn resolve(
        &self,
        organization_id: Uuid,
        identifier: &str,
    ) -> Result<Option<ResolvedMember>, OrgStoreError> {
        let identifier = identifier.trim().trim_start_matches('@');
        if identifier.is_empty() {
            return Ok(None);
        }

        if identifier.contains('@') {
            if let Some(member) = self.store.member_by_email(organization_id, identifier)? {
                return Ok(Some(member.into()));
            }
        }

        // For full addresses the local part is still a useful handle: a
        // forwarded personal address often shares it with the work one.
        let local_part = identifier.split('@').next().unwrap_or(identifier);
        if let Some(member) = self
            .store
            .member_by_email_local_part(organization_id, local_part)?
        {
            return Ok(Some(member.into()));
        }

        if let Some(member) = self
            .store
            .member_by_name_substring(organization_id, local_part)?
        {
            return Ok(Some(member.into()));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::org_store::{MemberRole, PlanTier};
    use tempfile::TempDir;

    fn fixture() -> (TempDir, OrgStore, Uuid) {
        let temp = TempDir::new().expect("tempdir");
        let store = OrgStore::new(temp.path().join("orgs.db")).expect("store");
        let org = store
            .create_organization("Acme", "acme", PlanTier::Free)
            .expect("org");
        (temp, store, org.id)
    }

    #[test]
    fn exact_email_wins_over_everything() {
        let (_temp, store, org_id) = fixture();
        store
            .add_member(org_id, "jane@acme.com", "Jane Doe", MemberRole::Member)
            .expect("add");
        let jane_smith = store
            .add_member(org_id, "jane.smith@acme.com", "Jane Smith", MemberRole::Admin)
            .expect("add");

        let resolver = RosterResolver::new(&store);
        let resolved = resolver
            .resolve(org_id, "Jane.Smith@ACME.com")
            .expect("resolve")
            .expect("member");
        assert_eq!(resolved.member_id, jane_smith.id);
    }

    #[test]
    fn handle_resolves_via_local_part() {
        let (_temp, store, org_id) = fixture();
        let mark = store
            .add_member(org_id, "mark@acme.com", "Mark Webb", MemberRole::Member)
            .expect("add");

        let resolver = RosterResolver::new(&store);
        let resolved = resolver
            .resolve(org_id, "@mark")
            .expect("resolve")
            .expect("member");
        assert_eq!(resolved.member_id, mark.id);
    }

    #[test]
    fn foreign_email_falls_back_to_local_part() {
        let (_temp, store, org_id) = fixture();
        let mark = store
            .add_member(org_id, "mark@acme.com", "Mark Webb", MemberRole::Member)
            .expect("add");

        let resolver = RosterResolver::new(&store);
        let resolved = resolver
            .resolve(org_id, "mark@gmail.com")
            .expect("resolve")
            .expect("member");
        assert_eq!(resolved.member_id, mark.id);
    }

    #[test]
    fn name_substring_is_the_last_tier() {
        let (_temp, store, org_id) = fixture();
        let lucia = store
            .add_member(org_id, "l.ortiz@acme.com", "Lucia Ortiz", MemberRole::Member)
            .expect("add");

        let resolver = RosterResolver::new(&store);
        let resolved = resolver
            .resolve(org_id, "lucia")
            .expect("resolve")
            .expect("member");
        assert_eq!(resolved.member_id, lucia.id);
    }

    #[test]
    fn unknown_identifiers_resolve_to_none() {
        let (_temp, store, org_id) = fixture();
        store
            .add_member(org_id, "jane@acme.com", "Jane Doe", MemberRole::Member)
            .expect("add");

        let resolver = RosterResolver::new(&store);
        assert!(resolver.resolve(org_id, "nobody").expect("resolve").is_none());
        assert!(resolver.resolve(org_id, "").expect("resolve").is_none());
    }

    #[test]
    fn name_ties_prefer_admin_then_earliest() {
        let (_temp, store, org_id) = fixture();
        store
            .add_member(org_id, "jane.a@acme.com", "Jane Able", MemberRole::Member)
            .expect("add");
        let admin = store
            .add_member(org_id, "jane.b@acme.com", "Jane Baker", MemberRole::Admin)
            .expect("add");

        let resolver = RosterResolver::new(&store);
        let resolved = resolver
            .resolve(org_id, "jane")
            .expect("resolve")
            .expect("member");
        assert_eq!(resolved.member_id, admin.id);
    }
}
