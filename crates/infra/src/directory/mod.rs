//! Directory Client Adapter.
//!
//! Wraps the upstream directory API behind [`DirectoryClient`]. Every
//! mutation is issued in its idempotent form and every failure is classified
//! so the scheduler can decide between retry, terminal failure and job-level
//! escalation. The adapter itself never retries.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use dirbatch_core::{EmailAddress, EntityKey, OuPath};

use crate::jobs::types::{ErrorClass, JobParameters, TaskAction};

pub mod http;
pub mod in_memory;

pub use http::{HttpDirectoryClient, HttpDirectoryConfig};
pub use in_memory::InMemoryDirectory;

/// Classified upstream failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// Rate or daily quota exhausted.
    #[error("quota exceeded: {message}")]
    Quota {
        retry_after: Option<Duration>,
        message: String,
    },
    /// Upstream hiccup worth retrying (5xx, timeouts, connection resets).
    #[error("transient upstream error: {0}")]
    Transient(String),
    /// The entity does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),
    /// Invalid value, permission denied, or anything else retrying won't fix.
    #[error("permanent upstream error: {0}")]
    Permanent(String),
    /// The upstream cannot be used at all (authentication, configuration).
    #[error("systemic upstream fault: {0}")]
    Systemic(String),
}

impl DirectoryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DirectoryError::Quota { .. } => ErrorClass::Quota,
            DirectoryError::Transient(_) => ErrorClass::Transient,
            DirectoryError::NotFound(_) | DirectoryError::Permanent(_) => ErrorClass::Permanent,
            DirectoryError::Systemic(_) => ErrorClass::Systemic,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DirectoryError::Quota { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// A user as returned by the resolution calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub primary_email: EmailAddress,
    pub ou_path: OuPath,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Upstream directory operations.
///
/// Implementations provide the primitive calls; [`DirectoryClient::execute`]
/// maps a task action onto them.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Set fields on a user (PATCH semantics).
    async fn patch_user(&self, user: &EmailAddress, patch: Value) -> Result<(), DirectoryError>;

    /// Ensure `member` belongs to `group`. Already a member is success.
    async fn add_group_member(
        &self,
        group: &EmailAddress,
        member: &EmailAddress,
    ) -> Result<(), DirectoryError>;

    /// Ensure `member` is not in `group`. Not a member is success.
    async fn remove_group_member(
        &self,
        group: &EmailAddress,
        member: &EmailAddress,
    ) -> Result<(), DirectoryError>;

    /// Alias addresses of a user.
    async fn list_user_aliases(&self, user: &EmailAddress) -> Result<Vec<String>, DirectoryError>;

    /// Users in an OU, sub-OUs included.
    async fn list_ou_users(&self, ou: &OuPath) -> Result<Vec<DirectoryUser>, DirectoryError>;

    /// Every user of a domain, or of the whole customer when `domain` is None.
    async fn list_domain_users(
        &self,
        domain: Option<&str>,
    ) -> Result<Vec<DirectoryUser>, DirectoryError>;

    /// Current members of a group. An unknown group has no members.
    async fn list_group_members(
        &self,
        group: &EmailAddress,
    ) -> Result<Vec<EmailAddress>, DirectoryError>;

    /// Perform one task's operation. Returns the output of read operations.
    async fn execute(
        &self,
        action: TaskAction,
        entity: &EntityKey,
        parameters: &JobParameters,
    ) -> Result<Option<Value>, DirectoryError> {
        match (action, parameters) {
            (TaskAction::PatchAttribute, JobParameters::AttributeInjection { attribute, value, .. }) => {
                self.patch_user(&entity.subject, attribute_patch(attribute, value))
                    .await?;
                Ok(None)
            }
            (TaskAction::AddMember, JobParameters::GroupSync { group_email, .. }) => {
                self.add_group_member(group_email, &entity.subject).await?;
                Ok(None)
            }
            (TaskAction::RemoveMember, JobParameters::GroupSync { group_email, .. }) => {
                self.remove_group_member(group_email, &entity.subject)
                    .await?;
                Ok(None)
            }
            (TaskAction::ListAliases, JobParameters::AliasExtraction { .. }) => {
                let aliases = self.list_user_aliases(&entity.subject).await?;
                Ok(Some(json!({
                    "primary_email": entity.subject,
                    "aliases": aliases,
                })))
            }
            (action, parameters) => Err(DirectoryError::Permanent(format!(
                "action {} does not apply to {} jobs",
                action.as_str(),
                parameters.kind()
            ))),
        }
    }
}

/// Whether `candidate` is `ou` itself or one of its descendants.
pub(crate) fn ou_contains(ou: &OuPath, candidate: &OuPath) -> bool {
    ou.as_str() == "/"
        || candidate == ou
        || candidate
            .as_str()
            .strip_prefix(ou.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Build the PATCH body that sets `attribute` to `value`.
///
/// Organization fields land in a primary `organizations` entry, `buildingId`
/// in a desk `locations` entry and `manager` in a manager `relations` entry;
/// anything else is set as a top-level field.
pub fn attribute_patch(attribute: &str, value: &str) -> Value {
    match attribute {
        "title" | "department" | "costCenter" => json!({
            "organizations": [{ attribute: value, "primary": true }]
        }),
        "employeeType" => json!({
            "organizations": [{ "type": value, "primary": true }]
        }),
        "buildingId" => json!({
            "locations": [{ "type": "desk", "area": "desk", "buildingId": value }]
        }),
        "manager" => json!({
            "relations": [{ "type": "manager", "value": value }]
        }),
        other => json!({ other: value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organization_fields_map_to_primary_organization() {
        assert_eq!(
            attribute_patch("department", "Science"),
            json!({"organizations": [{"department": "Science", "primary": true}]})
        );
        assert_eq!(
            attribute_patch("employeeType", "Staff"),
            json!({"organizations": [{"type": "Staff", "primary": true}]})
        );
    }

    #[test]
    fn location_and_manager_mapping() {
        assert_eq!(
            attribute_patch("buildingId", "B-12"),
            json!({"locations": [{"type": "desk", "area": "desk", "buildingId": "B-12"}]})
        );
        assert_eq!(
            attribute_patch("manager", "boss@example.org"),
            json!({"relations": [{"type": "manager", "value": "boss@example.org"}]})
        );
    }

    #[test]
    fn unknown_attributes_are_top_level() {
        assert_eq!(
            attribute_patch("includeInGlobalAddressList", "false"),
            json!({"includeInGlobalAddressList": "false"})
        );
    }

    #[test]
    fn ou_containment_includes_children_only() {
        let staff = OuPath::parse("/Staff").unwrap();
        assert!(ou_contains(&staff, &OuPath::parse("/Staff").unwrap()));
        assert!(ou_contains(&staff, &OuPath::parse("/Staff/Teachers").unwrap()));
        assert!(!ou_contains(&staff, &OuPath::parse("/StaffRoom").unwrap()));
        assert!(ou_contains(&OuPath::root(), &staff));
    }

    #[test]
    fn error_classes() {
        let quota = DirectoryError::Quota {
            retry_after: Some(Duration::from_secs(2)),
            message: "429".into(),
        };
        assert_eq!(quota.class(), ErrorClass::Quota);
        assert_eq!(quota.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(DirectoryError::NotFound("x".into()).class(), ErrorClass::Permanent);
        assert_eq!(DirectoryError::Systemic("401".into()).class(), ErrorClass::Systemic);
        assert!(DirectoryError::Transient("503".into()).class().is_retryable());
    }
}
