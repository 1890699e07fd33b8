use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::controller::SessionController;
use crate::error::Error;
use crate::guard::GuardConfig;
use crate::http::{ApiClient, ApiConfig};
use crate::resolver::{SessionResolver, DEFAULT_RESOLVE_TIMEOUT};
use crate::token_store::{FileTokenStore, MemoryTokenStore, TokenStore};

/// Everything needed to assemble a [`SessionController`] over HTTP.
///
/// Required field (`api`) is a constructor parameter; everything else has a
/// default. Use [`from_env()`](ClientConfig::from_env) for convention-based
/// setup.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) api: ApiConfig,
    pub(crate) token_file: Option<PathBuf>,
    pub(crate) resolve_timeout: Option<Duration>,
    pub(crate) refresh_on_unauthorized: bool,
    pub(crate) guard: GuardConfig,
}

impl ClientConfig {
    #[must_use]
    pub fn new(api: ApiConfig) -> Self {
        Self {
            api,
            token_file: None,
            resolve_timeout: Some(DEFAULT_RESOLVE_TIMEOUT),
            refresh_on_unauthorized: false,
            guard: GuardConfig::default(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `ACADWORLD_API_URL`: API base URL
    ///
    /// # Optional env vars
    /// - `ACADWORLD_TOKEN_FILE`: persist tokens to this JSON file (memory otherwise)
    /// - `ACADWORLD_RESOLVE_TIMEOUT_SECS`: startup resolution bound, `0` to wait forever
    /// - `ACADWORLD_REFRESH_ON_401`: `"1"` or `"true"` to retry startup with the refresh token
    /// - `ACADWORLD_LOGIN_PATH`: route unauthenticated users are sent to
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required env vars are missing or values are invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let base = get("ACADWORLD_API_URL")
            .ok_or_else(|| Error::Config("ACADWORLD_API_URL is required".into()))?;
        let base_url: Url = base
            .parse()
            .map_err(|e| Error::Config(format!("ACADWORLD_API_URL: {e}")))?;

        let mut config = Self::new(ApiConfig::new(base_url));

        if let Some(path) = get("ACADWORLD_TOKEN_FILE").filter(|p| !p.is_empty()) {
            config = config.with_token_file(path);
        }
        if let Some(secs) = get("ACADWORLD_RESOLVE_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("ACADWORLD_RESOLVE_TIMEOUT_SECS: {e}")))?;
            config = config.with_resolve_timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }
        let refresh = matches!(
            get("ACADWORLD_REFRESH_ON_401").as_deref(),
            Some("1") | Some("true"),
        );
        config = config.with_refresh_on_unauthorized(refresh);
        if let Some(login) = get("ACADWORLD_LOGIN_PATH") {
            config.guard = config.guard.with_login_path(login);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_refresh_on_unauthorized(mut self, enabled: bool) -> Self {
        self.refresh_on_unauthorized = enabled;
        self
    }

    #[must_use]
    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }

    #[must_use]
    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    #[must_use]
    pub fn guard(&self) -> &GuardConfig {
        &self.guard
    }

    /// Token store selected by this config.
    #[must_use]
    pub fn token_store(&self) -> Box<dyn TokenStore> {
        match &self.token_file {
            Some(path) => Box::new(FileTokenStore::new(path.clone())),
            None => Box::new(MemoryTokenStore::new()),
        }
    }

    /// Assembles the HTTP-backed controller.
    #[must_use]
    pub fn into_controller(self) -> SessionController<ApiClient, Box<dyn TokenStore>> {
        let store = self.token_store();
        let resolver = SessionResolver::new(Arc::new(ApiClient::new(self.api)), store)
            .with_timeout(self.resolve_timeout)
            .with_refresh_on_unauthorized(self.refresh_on_unauthorized);
        SessionController::new(resolver).with_guard(self.guard)
    }
}
