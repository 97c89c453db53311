//! In-process directory for local development and tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};

use dirbatch_core::{EmailAddress, OuPath};

use super::{DirectoryClient, DirectoryError, DirectoryUser, ou_contains};

/// A stored user record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUser {
    pub ou_path: OuPath,
    pub aliases: Vec<String>,
    /// Fields set through `patch_user`.
    pub profile: Map<String, Value>,
}

#[derive(Debug, Default)]
struct Directory {
    users: BTreeMap<EmailAddress, StoredUser>,
    groups: HashMap<EmailAddress, BTreeSet<EmailAddress>>,
    /// Errors returned by the next calls touching a subject, in order.
    scripted: HashMap<EmailAddress, VecDeque<DirectoryError>>,
    outage: Option<DirectoryError>,
}

/// Directory held in memory.
///
/// Besides plain data it can inject failures: per-subject scripted errors
/// and a global outage that fails every call.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    inner: Mutex<Directory>,
    calls: AtomicU64,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Directory> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, email: EmailAddress, ou_path: OuPath, aliases: Vec<String>) {
        self.lock().users.insert(
            email,
            StoredUser {
                ou_path,
                aliases,
                profile: Map::new(),
            },
        );
    }

    pub fn add_group(&self, group: EmailAddress, members: impl IntoIterator<Item = EmailAddress>) {
        self.lock()
            .groups
            .insert(group, members.into_iter().collect());
    }

    pub fn user(&self, email: &EmailAddress) -> Option<StoredUser> {
        self.lock().users.get(email).cloned()
    }

    /// Queue errors for the next calls that act on `subject`.
    pub fn fail_next(&self, subject: EmailAddress, errors: impl IntoIterator<Item = DirectoryError>) {
        self.lock()
            .scripted
            .entry(subject)
            .or_default()
            .extend(errors);
    }

    /// Fail every call with `error` until cleared with `None`.
    pub fn set_outage(&self, error: Option<DirectoryError>) {
        self.lock().outage = error;
    }

    /// Number of calls received, resolution calls included.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, subject: Option<&EmailAddress>) -> Result<MutexGuard<'_, Directory>, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut dir = self.lock();
        if let Some(err) = &dir.outage {
            return Err(err.clone());
        }
        if let Some(subject) = subject {
            if let Some(err) = dir.scripted.get_mut(subject).and_then(VecDeque::pop_front) {
                return Err(err);
            }
        }
        Ok(dir)
    }
}

fn to_user(email: &EmailAddress, user: &StoredUser) -> DirectoryUser {
    DirectoryUser {
        primary_email: email.clone(),
        ou_path: user.ou_path.clone(),
        aliases: user.aliases.clone(),
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn patch_user(&self, user: &EmailAddress, patch: Value) -> Result<(), DirectoryError> {
        let mut dir = self.enter(Some(user))?;
        let stored = dir
            .users
            .get_mut(user)
            .ok_or_else(|| DirectoryError::NotFound(format!("user {user}")))?;
        let Value::Object(fields) = patch else {
            return Err(DirectoryError::Permanent("patch body must be an object".into()));
        };
        stored.profile.extend(fields);
        Ok(())
    }

    async fn add_group_member(
        &self,
        group: &EmailAddress,
        member: &EmailAddress,
    ) -> Result<(), DirectoryError> {
        let mut dir = self.enter(Some(member))?;
        let members = dir
            .groups
            .get_mut(group)
            .ok_or_else(|| DirectoryError::NotFound(format!("group {group}")))?;
        members.insert(member.clone());
        Ok(())
    }

    async fn remove_group_member(
        &self,
        group: &EmailAddress,
        member: &EmailAddress,
    ) -> Result<(), DirectoryError> {
        let mut dir = self.enter(Some(member))?;
        if let Some(members) = dir.groups.get_mut(group) {
            members.remove(member);
        }
        Ok(())
    }

    async fn list_user_aliases(&self, user: &EmailAddress) -> Result<Vec<String>, DirectoryError> {
        let dir = self.enter(Some(user))?;
        dir.users
            .get(user)
            .map(|u| u.aliases.clone())
            .ok_or_else(|| DirectoryError::NotFound(format!("user {user}")))
    }

    async fn list_ou_users(&self, ou: &OuPath) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let dir = self.enter(None)?;
        Ok(dir
            .users
            .iter()
            .filter(|(_, u)| ou_contains(ou, &u.ou_path))
            .map(|(email, u)| to_user(email, u))
            .collect())
    }

    async fn list_domain_users(
        &self,
        domain: Option<&str>,
    ) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let dir = self.enter(None)?;
        Ok(dir
            .users
            .iter()
            .filter(|(email, _)| domain.is_none_or(|d| email.domain().eq_ignore_ascii_case(d)))
            .map(|(email, u)| to_user(email, u))
            .collect())
    }

    async fn list_group_members(
        &self,
        group: &EmailAddress,
    ) -> Result<Vec<EmailAddress>, DirectoryError> {
        let dir = self.enter(None)?;
        Ok(dir
            .groups
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{JobParameters, TaskAction};
    use dirbatch_core::EntityKey;
    use serde_json::json;

    fn email(s: &str) -> EmailAddress {
        EmailAddress::parse(s).unwrap()
    }

    fn ou(s: &str) -> OuPath {
        OuPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn execute_patches_mapped_attribute() {
        let dir = InMemoryDirectory::new();
        dir.add_user(email("a@x.org"), ou("/Staff"), vec![]);
        let params = JobParameters::AttributeInjection {
            ou_paths: vec![ou("/Staff")],
            attribute: "department".into(),
            value: "Maths".into(),
        };
        let key = EntityKey::new(email("a@x.org"), "/Staff");

        let out = dir
            .execute(TaskAction::PatchAttribute, &key, &params)
            .await
            .unwrap();
        assert!(out.is_none());
        let user = dir.user(&email("a@x.org")).unwrap();
        assert_eq!(
            user.profile["organizations"],
            json!([{"department": "Maths", "primary": true}])
        );
    }

    #[tokio::test]
    async fn membership_operations_are_idempotent() {
        let dir = InMemoryDirectory::new();
        let group = email("all@x.org");
        dir.add_group(group.clone(), [email("a@x.org")]);

        dir.add_group_member(&group, &email("a@x.org")).await.unwrap();
        dir.add_group_member(&group, &email("b@x.org")).await.unwrap();
        dir.remove_group_member(&group, &email("c@x.org")).await.unwrap();
        dir.remove_group_member(&group, &email("a@x.org")).await.unwrap();

        assert_eq!(dir.list_group_members(&group).await.unwrap(), vec![email("b@x.org")]);
        assert!(dir.list_group_members(&email("none@x.org")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn aliases_come_back_as_output() {
        let dir = InMemoryDirectory::new();
        dir.add_user(email("a@x.org"), ou("/"), vec!["alias@x.org".into()]);
        let params = JobParameters::AliasExtraction {
            domain: None,
            ou_paths: vec![],
        };
        let out = dir
            .execute(TaskAction::ListAliases, &EntityKey::new(email("a@x.org"), "/"), &params)
            .await
            .unwrap();
        assert_eq!(
            out,
            Some(json!({"primary_email": "a@x.org", "aliases": ["alias@x.org"]}))
        );
    }

    #[tokio::test]
    async fn scripted_errors_are_consumed_in_order() {
        let dir = InMemoryDirectory::new();
        let a = email("a@x.org");
        dir.add_user(a.clone(), ou("/"), vec![]);
        dir.fail_next(a.clone(), [DirectoryError::Transient("503".into())]);

        assert!(matches!(
            dir.list_user_aliases(&a).await,
            Err(DirectoryError::Transient(_))
        ));
        assert!(dir.list_user_aliases(&a).await.is_ok());
        assert_eq!(dir.call_count(), 2);
    }

    #[tokio::test]
    async fn ou_listing_includes_sub_units() {
        let dir = InMemoryDirectory::new();
        dir.add_user(email("a@x.org"), ou("/Staff"), vec![]);
        dir.add_user(email("b@x.org"), ou("/Staff/Teachers"), vec![]);
        dir.add_user(email("c@y.org"), ou("/Students"), vec![]);

        assert_eq!(dir.list_ou_users(&ou("/Staff")).await.unwrap().len(), 2);
        assert_eq!(dir.list_domain_users(Some("y.org")).await.unwrap().len(), 1);
        assert_eq!(dir.list_domain_users(None).await.unwrap().len(), 3);

        dir.set_outage(Some(DirectoryError::Systemic("401".into())));
        assert!(dir.list_ou_users(&ou("/Staff")).await.is_err());
    }

    #[tokio::test]
    async fn mismatched_action_is_permanent() {
        let dir = InMemoryDirectory::new();
        let params = JobParameters::AliasExtraction {
            domain: None,
            ou_paths: vec![],
        };
        let err = dir
            .execute(TaskAction::AddMember, &EntityKey::new(email("a@x.org"), "/"), &params)
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Permanent(_)));
    }
}
