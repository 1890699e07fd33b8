use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Backend user identifier (UUID primary key).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

/// Permission category assigned to a user by the backend.
///
/// The set is closed; the client only ever reads roles. Wire names follow the
/// backend (`TEACHER`, `INSTITUTION`, ...) and the older spellings are
/// accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "TEACHER", alias = "EDUCATOR")]
    Teacher,
    #[serde(rename = "INSTITUTION", alias = "INSTITUTION_ADMIN")]
    InstitutionAdmin,
    #[serde(rename = "INSTRUCTOR")]
    Instructor,
    #[serde(rename = "STUDENT")]
    Student,
    #[serde(rename = "SUPER_ADMIN", alias = "ADMIN")]
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Teacher,
        Role::InstitutionAdmin,
        Role::Instructor,
        Role::Student,
        Role::SuperAdmin,
    ];

    /// Default-mode resolution order, highest first.
    pub const PRIORITY: [Role; 5] = [
        Role::SuperAdmin,
        Role::InstitutionAdmin,
        Role::Instructor,
        Role::Teacher,
        Role::Student,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Teacher => "TEACHER",
            Role::InstitutionAdmin => "INSTITUTION",
            Role::Instructor => "INSTRUCTOR",
            Role::Student => "STUDENT",
            Role::SuperAdmin => "SUPER_ADMIN",
        }
    }

    /// Rank in [`Role::PRIORITY`]; lower wins.
    #[must_use]
    pub fn priority(self) -> usize {
        Role::PRIORITY
            .iter()
            .position(|r| *r == self)
            .unwrap_or(Role::PRIORITY.len())
    }

    /// Highest-priority role among `roles`.
    pub fn highest<'a>(roles: impl IntoIterator<Item = &'a Role>) -> Option<Role> {
        roles.into_iter().copied().min_by_key(|r| r.priority())
    }

    /// Path segment of the role's own profile endpoint, if it has one.
    #[must_use]
    pub fn profile_segment(self) -> Option<&'static str> {
        match self {
            Role::Teacher => Some("teacher"),
            Role::InstitutionAdmin => Some("institution"),
            Role::Instructor | Role::Student | Role::SuperAdmin => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TEACHER" | "EDUCATOR" => Ok(Role::Teacher),
            "INSTITUTION" | "INSTITUTION_ADMIN" => Ok(Role::InstitutionAdmin),
            "INSTRUCTOR" => Ok(Role::Instructor),
            "STUDENT" => Ok(Role::Student),
            "SUPER_ADMIN" | "ADMIN" => Ok(Role::SuperAdmin),
            _ => Err(Error::UnknownRole(s.to_string())),
        }
    }
}

/// Access/refresh token pair as persisted by a [`TokenStore`](crate::TokenStore).
///
/// Tokens are opaque. The access slot decides whether tokens are present at
/// all; the refresh slot may be empty.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken", default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenPair {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
        }
    }

    /// Pair without a refresh token.
    #[must_use]
    pub fn access_only(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }
}

// Tokens are credentials; keep them out of logs.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Deserializes an optional role, dropping values outside the closed set.
pub(crate) fn lenient_role<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| parse_or_warn(&s)))
}

/// Deserializes a role list, dropping values outside the closed set.
pub(crate) fn lenient_roles<'de, D>(deserializer: D) -> Result<Vec<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<String>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .iter()
        .filter_map(|s| parse_or_warn(s))
        .collect())
}

fn parse_or_warn(s: &str) -> Option<Role> {
    match s.parse() {
        Ok(role) => Some(role),
        Err(_) => {
            tracing::warn!(role = %s, "Ignoring unknown role from backend");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_aliases() {
        assert_eq!("TEACHER".parse::<Role>().unwrap(), Role::Teacher);
        assert_eq!("EDUCATOR".parse::<Role>().unwrap(), Role::Teacher);
        assert_eq!("INSTITUTION_ADMIN".parse::<Role>().unwrap(), Role::InstitutionAdmin);
        assert_eq!("institution".parse::<Role>().unwrap(), Role::InstitutionAdmin);
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::SuperAdmin);
        assert!("JANITOR".parse::<Role>().is_err());
    }

    #[test]
    fn role_serde_uses_backend_names() {
        assert_eq!(serde_json::to_string(&Role::Teacher).unwrap(), "\"TEACHER\"");
        assert_eq!(
            serde_json::to_string(&Role::InstitutionAdmin).unwrap(),
            "\"INSTITUTION\""
        );
        let parsed: Role = serde_json::from_str("\"EDUCATOR\"").unwrap();
        assert_eq!(parsed, Role::Teacher);
        let parsed: Role = serde_json::from_str("\"ADMIN\"").unwrap();
        assert_eq!(parsed, Role::SuperAdmin);
    }

    #[test]
    fn priority_order_is_explicit() {
        assert_eq!(
            Role::highest(&[Role::Student, Role::Teacher, Role::Instructor]),
            Some(Role::Instructor)
        );
        assert_eq!(
            Role::highest(&[Role::Teacher, Role::InstitutionAdmin]),
            Some(Role::InstitutionAdmin)
        );
        assert_eq!(Role::highest(&[]), None);
        for role in Role::ALL {
            assert!(Role::PRIORITY.contains(&role));
        }
    }

    #[test]
    fn token_pair_debug_is_redacted() {
        let pair = TokenPair::new("secret-access", "secret-refresh");
        let debug = format!("{pair:?}");
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn token_pair_uses_slot_names() {
        let pair = TokenPair::new("a", "r");
        let json = serde_json::to_value(&pair).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
    }

    #[test]
    fn user_id_parses_uuid() {
        let id: UserId = "6f1c2a7e-3b4d-4c5e-8f90-123456789abc".parse().unwrap();
        assert_eq!(id.to_string(), "6f1c2a7e-3b4d-4c5e-8f90-123456789abc");
    }
}
