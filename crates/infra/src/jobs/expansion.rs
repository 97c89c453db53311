//! Task expansion: turning a job's parameters into its full task set.
//!
//! Each kind has its own expansion function; all of them resolve their scope
//! through the directory's read-only calls and return tasks in a stable order.

use std::collections::{BTreeSet, HashSet};

use dirbatch_core::{DomainError, EmailAddress, EntityKey, JobId, OuPath};

use crate::directory::{DirectoryClient, DirectoryError, DirectoryUser};

use super::types::{JobParameters, Task, TaskAction};

/// Why a job could not be expanded.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExpansionError {
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error("directory could not resolve the job scope: {0}")]
    Upstream(#[from] DirectoryError),
}

/// Check parameters before touching the directory.
pub fn validate(parameters: &JobParameters) -> Result<(), DomainError> {
    match parameters {
        JobParameters::AttributeInjection {
            ou_paths,
            attribute,
            ..
        } => {
            require_ou_paths(ou_paths)?;
            let attribute = attribute.trim();
            if attribute.is_empty() {
                return Err(DomainError::validation("attribute must not be empty"));
            }
            if !attribute
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            {
                return Err(DomainError::validation(format!(
                    "attribute '{attribute}' is not a valid field name"
                )));
            }
            Ok(())
        }
        JobParameters::GroupSync { ou_paths, .. } => require_ou_paths(ou_paths),
        JobParameters::AliasExtraction { domain, .. } => match domain {
            Some(d) if d.trim().is_empty() || !d.contains('.') || d.contains('@') => Err(
                DomainError::validation(format!("'{d}' is not a domain name")),
            ),
            _ => Ok(()),
        },
    }
}

fn require_ou_paths(ou_paths: &[OuPath]) -> Result<(), DomainError> {
    if ou_paths.is_empty() {
        return Err(DomainError::validation("at least one OU path is required"));
    }
    Ok(())
}

/// Validate and expand a job into tasks.
///
/// Fails with `Invalid` when the parameters are malformed or the scope
/// resolves to nothing to do.
pub async fn expand(
    directory: &dyn DirectoryClient,
    job_id: JobId,
    parameters: &JobParameters,
) -> Result<Vec<Task>, ExpansionError> {
    validate(parameters)?;
    let tasks = match parameters {
        JobParameters::AttributeInjection { ou_paths, .. } => {
            users_under(directory, ou_paths)
                .await?
                .into_iter()
                .map(|(user, ou)| {
                    Task::new(
                        job_id,
                        EntityKey::new(user.primary_email, ou.as_str()),
                        TaskAction::PatchAttribute,
                    )
                })
                .collect()
        }
        JobParameters::GroupSync {
            ou_paths,
            group_email,
            prune,
        } => expand_group_sync(directory, job_id, ou_paths, group_email, *prune).await?,
        JobParameters::AliasExtraction { domain, ou_paths } => {
            let users: Vec<(DirectoryUser, String)> = if ou_paths.is_empty() {
                directory
                    .list_domain_users(domain.as_deref())
                    .await?
                    .into_iter()
                    .map(|u| {
                        let scope = u.ou_path.to_string();
                        (u, scope)
                    })
                    .collect()
            } else {
                users_under(directory, ou_paths)
                    .await?
                    .into_iter()
                    .filter(|(u, _)| {
                        domain
                            .as_deref()
                            .is_none_or(|d| u.primary_email.domain().eq_ignore_ascii_case(d))
                    })
                    .map(|(u, ou)| (u, ou.to_string()))
                    .collect()
            };
            let mut seen = HashSet::new();
            users
                .into_iter()
                .filter(|(u, _)| seen.insert(u.primary_email.clone()))
                .map(|(u, scope)| {
                    Task::new(
                        job_id,
                        EntityKey::new(u.primary_email, scope),
                        TaskAction::ListAliases,
                    )
                })
                .collect()
        }
    };

    if tasks.is_empty() {
        return Err(DomainError::validation(format!(
            "{} job resolves to zero tasks",
            parameters.kind()
        ))
        .into());
    }
    Ok(tasks)
}

/// Users under the given OUs, de-duplicated by email. A user reachable from
/// several OUs is attributed to the first one listed.
async fn users_under(
    directory: &dyn DirectoryClient,
    ou_paths: &[OuPath],
) -> Result<Vec<(DirectoryUser, OuPath)>, DirectoryError> {
    let mut seen = HashSet::new();
    let mut users = Vec::new();
    for ou in ou_paths {
        let mut found = directory.list_ou_users(ou).await?;
        found.sort_by(|a, b| a.primary_email.cmp(&b.primary_email));
        for user in found {
            if seen.insert(user.primary_email.clone()) {
                users.push((user, ou.clone()));
            }
        }
    }
    Ok(users)
}

/// Membership delta: add who is missing, optionally remove who should not be there.
async fn expand_group_sync(
    directory: &dyn DirectoryClient,
    job_id: JobId,
    ou_paths: &[OuPath],
    group: &EmailAddress,
    prune: bool,
) -> Result<Vec<Task>, DirectoryError> {
    let expected = users_under(directory, ou_paths).await?;
    let current: BTreeSet<EmailAddress> = directory
        .list_group_members(group)
        .await?
        .into_iter()
        .collect();
    let expected_emails: BTreeSet<&EmailAddress> =
        expected.iter().map(|(u, _)| &u.primary_email).collect();

    let mut tasks: Vec<Task> = expected
        .iter()
        .filter(|(u, _)| !current.contains(&u.primary_email))
        .map(|(u, ou)| {
            Task::new(
                job_id,
                EntityKey::new(u.primary_email.clone(), ou.as_str()),
                TaskAction::AddMember,
            )
        })
        .collect();

    if prune {
        tasks.extend(
            current
                .iter()
                .filter(|m| !expected_emails.contains(m))
                .map(|m| {
                    Task::new(
                        job_id,
                        EntityKey::new(m.clone(), group.as_str()),
                        TaskAction::RemoveMember,
                    )
                }),
        );
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;

    fn email(s: &str) -> EmailAddress {
        EmailAddress::parse(s).unwrap()
    }

    fn ou(s: &str) -> OuPath {
        OuPath::parse(s).unwrap()
    }

    fn school() -> InMemoryDirectory {
        let dir = InMemoryDirectory::new();
        dir.add_user(email("t1@school.org"), ou("/Staff/Teachers"), vec![]);
        dir.add_user(email("t2@school.org"), ou("/Staff/Teachers"), vec!["t2.alt@school.org".into()]);
        dir.add_user(email("admin@school.org"), ou("/Staff"), vec![]);
        dir.add_user(email("s1@pupils.school.org"), ou("/Students"), vec![]);
        dir
    }

    #[tokio::test]
    async fn attribute_injection_deduplicates_across_ous() {
        let dir = school();
        let params = JobParameters::AttributeInjection {
            ou_paths: vec![ou("/Staff/Teachers"), ou("/Staff")],
            attribute: "title".into(),
            value: "Teacher".into(),
        };
        let tasks = expand(&dir, JobId::new(), &params).await.unwrap();

        assert_eq!(tasks.len(), 3);
        let t1 = tasks
            .iter()
            .find(|t| t.entity_key.subject == email("t1@school.org"))
            .unwrap();
        assert_eq!(t1.entity_key.scope, "/Staff/Teachers");
        assert!(tasks.iter().all(|t| t.action == TaskAction::PatchAttribute));
    }

    #[tokio::test]
    async fn group_sync_adds_missing_and_prunes_extras() {
        let dir = school();
        let group = email("staff@school.org");
        dir.add_group(group.clone(), [email("t1@school.org"), email("former@school.org")]);

        let params = JobParameters::GroupSync {
            ou_paths: vec![ou("/Staff")],
            group_email: group.clone(),
            prune: true,
        };
        let tasks = expand(&dir, JobId::new(), &params).await.unwrap();

        let adds: Vec<_> = tasks
            .iter()
            .filter(|t| t.action == TaskAction::AddMember)
            .map(|t| t.entity_key.subject.as_str())
            .collect();
        let removes: Vec<_> = tasks
            .iter()
            .filter(|t| t.action == TaskAction::RemoveMember)
            .collect();
        assert_eq!(adds, vec!["admin@school.org", "t2@school.org"]);
        assert_eq!(removes.len(), 1);
        assert_eq!(removes[0].entity_key.subject, email("former@school.org"));
        assert_eq!(removes[0].entity_key.scope, "staff@school.org");
    }

    #[tokio::test]
    async fn group_already_in_sync_is_rejected() {
        let dir = school();
        let group = email("students@school.org");
        dir.add_group(group.clone(), [email("s1@pupils.school.org")]);
        let params = JobParameters::GroupSync {
            ou_paths: vec![ou("/Students")],
            group_email: group,
            prune: false,
        };
        let err = expand(&dir, JobId::new(), &params).await.unwrap_err();
        assert!(matches!(err, ExpansionError::Invalid(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn alias_extraction_covers_domain() {
        let dir = school();
        let params = JobParameters::AliasExtraction {
            domain: Some("school.org".into()),
            ou_paths: vec![],
        };
        let tasks = expand(&dir, JobId::new(), &params).await.unwrap();
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.action == TaskAction::ListAliases));
    }

    #[tokio::test]
    async fn empty_ou_list_is_invalid() {
        let dir = school();
        let params = JobParameters::AttributeInjection {
            ou_paths: vec![],
            attribute: "title".into(),
            value: "x".into(),
        };
        let err = expand(&dir, JobId::new(), &params).await.unwrap_err();
        assert!(matches!(err, ExpansionError::Invalid(_)));
        assert_eq!(dir.call_count(), 0);
    }

    #[tokio::test]
    async fn resolution_failure_is_upstream() {
        let dir = school();
        dir.set_outage(Some(DirectoryError::Transient("503".into())));
        let params = JobParameters::AttributeInjection {
            ou_paths: vec![ou("/Staff")],
            attribute: "title".into(),
            value: "x".into(),
        };
        let err = expand(&dir, JobId::new(), &params).await.unwrap_err();
        assert!(matches!(err, ExpansionError::Upstream(_)));
    }

    #[test]
    fn attribute_names_are_checked() {
        let bad = JobParameters::AttributeInjection {
            ou_paths: vec![ou("/")],
            attribute: "no spaces".into(),
            value: "x".into(),
        };
        assert!(validate(&bad).is_err());
        let domain = JobParameters::AliasExtraction {
            domain: Some("localhost".into()),
            ou_paths: vec![],
        };
        assert!(validate(&domain).is_err());
    }
}
