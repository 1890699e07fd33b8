//! AcadWorld auth/profile REST API: payload types and the [`AuthApi`] seam.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::Error;
use crate::types::{lenient_role, lenient_roles, Role, TokenPair, UserId};

/// Current user as returned by `GET /api/auth/me/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CurrentUser {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Primary role assigned at registration.
    #[serde(default, deserialize_with = "lenient_role")]
    pub user_type: Option<Role>,
    /// Additional roles, when the backend grants more than one.
    #[serde(default, deserialize_with = "lenient_roles")]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<time::OffsetDateTime>,
}

impl CurrentUser {
    /// Create a user with only the required fields.
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            username: None,
            user_type: None,
            roles: Vec::new(),
            is_verified: false,
            created_at: None,
        }
    }

    #[must_use]
    pub fn with_user_type(mut self, role: Role) -> Self {
        self.user_type = Some(role);
        self
    }

    #[must_use]
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// `tokens` object of a login/register response.
#[derive(Clone, Deserialize)]
pub struct IssuedTokens {
    pub access: String,
    pub refresh: String,
}

impl From<IssuedTokens> for TokenPair {
    fn from(t: IssuedTokens) -> Self {
        TokenPair {
            access_token: t.access,
            refresh_token: Some(t.refresh).filter(|r| !r.is_empty()),
        }
    }
}

impl std::fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IssuedTokens(<redacted>)")
    }
}

/// Response of login and registration.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct AuthResponse {
    pub user: CurrentUser,
    pub tokens: IssuedTokens,
    #[serde(default)]
    pub message: Option<String>,
}

impl AuthResponse {
    #[must_use]
    pub fn new(user: CurrentUser, tokens: TokenPair) -> Self {
        Self {
            user,
            tokens: IssuedTokens {
                access: tokens.access_token,
                refresh: tokens.refresh_token.unwrap_or_default(),
            },
            message: None,
        }
    }
}

/// Response of `POST /api/auth/refresh/`.
///
/// With rotation enabled the backend also returns a fresh refresh token.
#[derive(Clone, Deserialize)]
pub struct RefreshedTokens {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

impl std::fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RefreshedTokens(<redacted>)")
    }
}

/// Registration form.
#[derive(Clone, Serialize)]
#[non_exhaustive]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub password_confirm: String,
    pub user_type: Role,
}

impl RegisterRequest {
    /// Registration with matching password confirmation.
    #[must_use]
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        user_type: Role,
    ) -> Self {
        let password = password.into();
        Self {
            email: email.into(),
            username: username.into(),
            password_confirm: password.clone(),
            password,
            user_type,
        }
    }

    #[must_use]
    pub fn with_password_confirm(mut self, confirm: impl Into<String>) -> Self {
        self.password_confirm = confirm.into();
        self
    }
}

impl std::fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("user_type", &self.user_type)
            .finish_non_exhaustive()
    }
}

/// Role-scoped profile document.
///
/// Fields differ per role (educator vs institution), so they are kept as a
/// JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub role: Role,
    pub fields: Map<String, JsonValue>,
}

impl Profile {
    #[must_use]
    pub fn new(role: Role, fields: Map<String, JsonValue>) -> Self {
        Self { role, fields }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    /// Name to show in navigation: person name for educators, institution
    /// name for institutions.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        let text = |key: &str| {
            self.get(key)
                .and_then(JsonValue::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };
        if let Some(name) = text("institution_name").or_else(|| text("name")) {
            return Some(name.to_string());
        }
        let full = [text("first_name"), text("last_name")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            None
        } else {
            Some(full)
        }
    }
}

/// External auth/profile API used by the session layer.
///
/// [`ApiClient`](crate::ApiClient) implements it over HTTP; tests and
/// offline front ends provide their own.
pub trait AuthApi: Send + Sync + 'static {
    /// `POST /api/auth/login/`.
    fn login(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send;

    /// `POST /api/auth/register/`.
    fn register(
        &self,
        request: &RegisterRequest,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send;

    /// `POST /api/auth/logout/`, blacklisting the refresh token.
    fn logout(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// `POST /api/auth/refresh/`.
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<RefreshedTokens, Error>> + Send;

    /// `GET /api/auth/me/`.
    fn current_user(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<CurrentUser, Error>> + Send;

    /// `GET /api/profiles/<role>/me/`. `Ok(None)` for roles without a profile.
    fn profile(
        &self,
        access_token: &str,
        role: Role,
    ) -> impl Future<Output = Result<Option<Profile>, Error>> + Send;

    /// `PATCH /api/profiles/<role>/me/`.
    fn update_profile(
        &self,
        access_token: &str,
        role: Role,
        changes: &Map<String, JsonValue>,
    ) -> impl Future<Output = Result<Profile, Error>> + Send;

    /// `PUT /api/auth/change-password/`.
    fn change_password(
        &self,
        access_token: &str,
        old_password: &str,
        new_password: &str,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}
