//! Value objects: equality by value, not identity.
//!
//! The directory entities a job touches are named by value objects that are
//! validated once, at the boundary, and then trusted everywhere else.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// A normalized (trimmed, lower-cased) email address.
///
/// Directory services compare addresses case-insensitively, so normalizing at
/// construction lets the rest of the system de-duplicate with plain equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let value = raw.as_ref().trim().to_lowercase();
        let Some((local, domain)) = value.split_once('@') else {
            return Err(DomainError::validation(format!(
                "'{value}' is not an email address"
            )));
        };
        if local.is_empty()
            || domain.is_empty()
            || domain.contains('@')
            || !domain.contains('.')
            || value.chars().any(char::is_whitespace)
        {
            return Err(DomainError::validation(format!(
                "'{value}' is not an email address"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        self.0.split_once('@').map(|(_, d)| d).unwrap_or_default()
    }
}

impl ValueObject for EmailAddress {}

impl core::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EmailAddress {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

/// An organizational unit path such as `/Staff/Teachers`.
///
/// Always starts with `/`; trailing slashes are dropped (except for the root).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OuPath(String);

impl OuPath {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let value = raw.as_ref().trim();
        if !value.starts_with('/') {
            return Err(DomainError::validation(format!(
                "OU path '{value}' must start with '/'"
            )));
        }
        if value.contains("//") {
            return Err(DomainError::validation(format!(
                "OU path '{value}' contains an empty segment"
            )));
        }
        let trimmed = value.trim_end_matches('/');
        let normalized = if trimmed.is_empty() { "/" } else { trimmed };
        Ok(Self(normalized.to_string()))
    }

    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for OuPath {}

impl core::fmt::Display for OuPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OuPath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<OuPath> for String {
    fn from(value: OuPath) -> Self {
        value.0
    }
}

/// The subject of one task plus the scope it was discovered under.
///
/// `subject` is the user the operation applies to; `scope` is the OU path the
/// user was found in, or the group address for membership removals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub subject: EmailAddress,
    pub scope: String,
}

impl EntityKey {
    pub fn new(subject: EmailAddress, scope: impl Into<String>) -> Self {
        Self {
            subject,
            scope: scope.into(),
        }
    }
}

impl ValueObject for EntityKey {}

impl core::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", self.subject, self.scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn email_is_normalized() {
        let email = EmailAddress::parse("  Alice@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "alice@example.com");
        assert_eq!(email.domain(), "example.com");
    }

    #[test]
    fn email_rejects_malformed_input() {
        for raw in ["", "alice", "@example.com", "alice@", "a@b@c.com", "alice@localhost", "al ice@x.com"] {
            assert!(EmailAddress::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn email_deserializes_through_validation() {
        let ok: EmailAddress = serde_json::from_str("\"Bob@Example.com\"").unwrap();
        assert_eq!(ok.as_str(), "bob@example.com");
        assert!(serde_json::from_str::<EmailAddress>("\"bob\"").is_err());
    }

    #[test]
    fn ou_path_normalization() {
        assert_eq!(OuPath::parse("/Staff/").unwrap().as_str(), "/Staff");
        assert_eq!(OuPath::parse("/").unwrap(), OuPath::root());
        assert!(OuPath::parse("Staff").is_err());
        assert!(OuPath::parse("/Staff//Teachers").is_err());
    }

    #[test]
    fn entity_key_display() {
        let key = EntityKey::new(EmailAddress::parse("a@x.org").unwrap(), "/Students");
        assert_eq!(key.to_string(), "a@x.org (/Students)");
    }

    proptest! {
        #[test]
        fn normalized_emails_are_stable(local in "[a-zA-Z0-9._]{1,12}", domain in "[a-z]{1,8}\\.[a-z]{2,4}") {
            let raw = format!("{local}@{domain}");
            let once = EmailAddress::parse(&raw).unwrap();
            let twice = EmailAddress::parse(once.as_str()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
