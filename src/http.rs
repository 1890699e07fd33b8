use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use url::Url;

use crate::api::{AuthApi, AuthResponse, CurrentUser, Profile, RefreshedTokens, RegisterRequest};
use crate::error::Error;
use crate::types::Role;

/// AcadWorld REST API endpoints.
///
/// Only the base URL is required; every path has the backend's default and
/// can be overridden.
///
/// ```rust,ignore
/// use acadworld_session::ApiConfig;
///
/// let config = ApiConfig::new("https://api.acadworld.example".parse()?)
///     .with_profiles_path("/v2/profiles/");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ApiConfig {
    pub(crate) base_url: Url,
    pub(crate) auth_path: String,
    pub(crate) profiles_path: String,
}

impl ApiConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            auth_path: "/api/auth/".into(),
            profiles_path: "/api/profiles/".into(),
        }
    }

    /// Override the auth endpoints prefix (default `/api/auth/`).
    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    /// Override the profile endpoints prefix (default `/api/profiles/`).
    #[must_use]
    pub fn with_profiles_path(mut self, path: impl Into<String>) -> Self {
        self.profiles_path = path.into();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, prefix: &str, rest: &str) -> Result<Url, Error> {
        let prefix = prefix.trim_matches('/');
        let path = if prefix.is_empty() {
            rest.to_string()
        } else {
            format!("{prefix}/{rest}")
        };
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(&path)
            .map_err(|e| Error::Config(format!("invalid endpoint {path}: {e}")))
    }

    pub(crate) fn auth_url(&self, rest: &str) -> Result<Url, Error> {
        self.endpoint(&self.auth_path, rest)
    }

    pub(crate) fn profile_url(&self, role: Role) -> Result<Option<Url>, Error> {
        role.profile_segment()
            .map(|segment| self.endpoint(&self.profiles_path, &format!("{segment}/me/")))
            .transpose()
    }
}

/// HTTP client for the AcadWorld auth and profile endpoints.
pub struct ApiClient {
    config: ApiConfig,
    http: reqwest::Client,
}

impl ApiClient {
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn post_json<B, T>(&self, url: Url, body: &B, operation: &'static str) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.http.post(url).json(body).send().await?;
        let response = Self::ensure_success(response, operation).await?;
        response.json::<T>().await.map_err(Into::into)
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::api(operation, Some(status), &body))
    }
}

impl AuthApi for ApiClient {
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, Error> {
        let body = json!({ "email": email, "password": password });
        self.post_json(self.config.auth_url("login/")?, &body, "login")
            .await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, Error> {
        self.post_json(self.config.auth_url("register/")?, request, "registration")
            .await
    }

    async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), Error> {
        let response = self
            .http
            .post(self.config.auth_url("logout/")?)
            .bearer_auth(access_token)
            .json(&json!({ "refresh": refresh_token }))
            .send()
            .await?;
        Self::ensure_success(response, "logout").await?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, Error> {
        let body = json!({ "refresh": refresh_token });
        self.post_json(self.config.auth_url("refresh/")?, &body, "token refresh")
            .await
    }

    async fn current_user(&self, access_token: &str) -> Result<CurrentUser, Error> {
        let response = self
            .http
            .get(self.config.auth_url("me/")?)
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = Self::ensure_success(response, "current user request").await?;
        response.json::<CurrentUser>().await.map_err(Into::into)
    }

    async fn profile(&self, access_token: &str, role: Role) -> Result<Option<Profile>, Error> {
        let Some(url) = self.config.profile_url(role)? else {
            return Ok(None);
        };
        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        let response = Self::ensure_success(response, "profile request").await?;
        let fields = response.json::<Map<String, JsonValue>>().await?;
        Ok(Some(Profile::new(role, fields)))
    }

    async fn update_profile(
        &self,
        access_token: &str,
        role: Role,
        changes: &Map<String, JsonValue>,
    ) -> Result<Profile, Error> {
        let url = self.config.profile_url(role)?.ok_or_else(|| Error::Api {
            operation: "profile update",
            status: None,
            message: format!("role {role} has no profile"),
        })?;
        let response = self
            .http
            .patch(url)
            .bearer_auth(access_token)
            .json(changes)
            .send()
            .await?;
        let response = Self::ensure_success(response, "profile update").await?;
        let fields = response.json::<Map<String, JsonValue>>().await?;
        Ok(Profile::new(role, fields))
    }

    async fn change_password(
        &self,
        access_token: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), Error> {
        let body = json!({ "old_password": old_password, "new_password": new_password });
        let response = self
            .http
            .put(self.config.auth_url("change-password/")?)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        Self::ensure_success(response, "password change").await?;
        Ok(())
    }
}
