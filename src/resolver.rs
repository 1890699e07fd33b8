use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value as JsonValue};

use crate::api::{AuthApi, AuthResponse, CurrentUser, Profile};
use crate::error::Error;
use crate::session::{Session, SessionState};
use crate::token_store::TokenStore;
use crate::types::{Role, TokenPair};

/// Default bound on startup resolution.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Turns stored tokens into a [`Session`] and keeps the token store in step
/// with login, logout and refresh.
///
/// The resolver is the only writer of its [`TokenStore`].
pub struct SessionResolver<A, T> {
    api: Arc<A>,
    store: T,
    timeout: Option<Duration>,
    refresh_on_unauthorized: bool,
}

impl<A: AuthApi, T: TokenStore> SessionResolver<A, T> {
    #[must_use]
    pub fn new(api: Arc<A>, store: T) -> Self {
        Self {
            api,
            store,
            timeout: Some(DEFAULT_RESOLVE_TIMEOUT),
            refresh_on_unauthorized: false,
        }
    }

    /// Bound startup resolution (`None` waits for the API indefinitely).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// On a 401 from the current-user call, try one token refresh before
    /// giving up.
    #[must_use]
    pub fn with_refresh_on_unauthorized(mut self, enabled: bool) -> Self {
        self.refresh_on_unauthorized = enabled;
        self
    }

    #[must_use]
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Whether an access token is currently stored.
    #[must_use]
    pub fn has_tokens(&self) -> bool {
        self.store.load().is_some()
    }

    /// Restores the session from stored tokens.
    ///
    /// Returns [`SessionState::Authenticated`] or [`SessionState::Anonymous`],
    /// never fails. Without a stored access token no request is made. A
    /// rejected token is cleared; a timeout leaves it in place.
    pub async fn resolve(&self) -> SessionState {
        let Some(tokens) = self.store.load() else {
            tracing::debug!("No stored access token, skipping session restore");
            return SessionState::Anonymous;
        };

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.restore(tokens))
                .await
                .unwrap_or(Err(Error::Timeout)),
            None => self.restore(tokens).await,
        };

        match outcome {
            Ok(session) => {
                tracing::info!(
                    user_id = %session.user_id(),
                    mode = %session.active_mode(),
                    "Session restored"
                );
                SessionState::Authenticated(session)
            }
            Err(Error::Timeout) => {
                tracing::warn!("Session restore timed out, continuing anonymously");
                SessionState::Anonymous
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session restore failed, clearing tokens");
                self.store.clear();
                SessionState::Anonymous
            }
        }
    }

    async fn restore(&self, tokens: TokenPair) -> Result<Session, Error> {
        let first = self.api.current_user(&tokens.access_token).await;
        let (user, access) = match first {
            Ok(user) => (user, tokens.access_token),
            Err(e) if e.is_unauthorized() && self.refresh_on_unauthorized => {
                let Some(refresh) = tokens.refresh_token.as_deref() else {
                    return Err(e);
                };
                tracing::debug!("Access token rejected, attempting refresh");
                let renewed = self.rotate(refresh).await?;
                let user = self.api.current_user(&renewed.access_token).await?;
                (user, renewed.access_token)
            }
            Err(e) => return Err(e),
        };
        self.build_session(user, &access).await
    }

    /// Stores the tokens from a login or registration and builds the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRoles`] (and stores nothing) when the user carries
    /// no recognised role.
    pub async fn establish(&self, response: AuthResponse) -> Result<Session, Error> {
        let tokens: TokenPair = response.tokens.into();
        let session = self.build_session(response.user, &tokens.access_token).await?;
        self.store.save(&tokens);
        tracing::info!(
            user_id = %session.user_id(),
            mode = %session.active_mode(),
            "Signed in"
        );
        Ok(session)
    }

    async fn build_session(&self, user: CurrentUser, access_token: &str) -> Result<Session, Error> {
        let session = Session::from_user(user)?;
        let profile = self.fetch_profile(access_token, session.primary_role()).await;
        Ok(session.with_profile(profile))
    }

    // Best-effort: a missing profile never blocks the session.
    async fn fetch_profile(&self, access_token: &str, role: Role) -> Option<Profile> {
        match self.api.profile(access_token, role).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "Profile fetch failed");
                None
            }
        }
    }

    /// Blacklists the refresh token server-side (best-effort) and clears
    /// local tokens.
    pub async fn sign_out(&self) {
        if let Some(TokenPair {
            access_token,
            refresh_token: Some(refresh),
        }) = self.store.load()
        {
            if let Err(e) = self.api.logout(&access_token, &refresh).await {
                tracing::warn!(error = %e, "Logout request failed");
            }
        }
        self.store.clear();
        tracing::info!("Signed out");
    }

    /// Exchanges the stored refresh token for a new pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] without a stored refresh token, or
    /// the API error. Tokens are cleared on any failure.
    pub async fn refresh_tokens(&self) -> Result<(), Error> {
        let result = match self.store.load().and_then(|t| t.refresh_token) {
            Some(refresh) => self.rotate(&refresh).await.map(drop),
            None => Err(Error::NotAuthenticated),
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Token refresh failed, clearing tokens");
            self.store.clear();
        }
        result
    }

    async fn rotate(&self, refresh: &str) -> Result<TokenPair, Error> {
        let renewed = self.api.refresh(refresh).await?;
        let pair = TokenPair {
            access_token: renewed.access,
            refresh_token: renewed
                .refresh
                .filter(|r| !r.is_empty())
                .or_else(|| Some(refresh.to_string())),
        };
        self.store.save(&pair);
        Ok(pair)
    }

    /// Sends profile changes for `role` with the stored access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] without stored tokens, or the API
    /// error.
    pub async fn update_profile(
        &self,
        role: Role,
        changes: &Map<String, JsonValue>,
    ) -> Result<Profile, Error> {
        let tokens = self.store.load().ok_or(Error::NotAuthenticated)?;
        self.api
            .update_profile(&tokens.access_token, role, changes)
            .await
    }

    /// Changes the password of the signed-in user. Stored tokens are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] without stored tokens, or the API
    /// error (e.g. a wrong old password).
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), Error> {
        let tokens = self.store.load().ok_or(Error::NotAuthenticated)?;
        self.api
            .change_password(&tokens.access_token, old_password, new_password)
            .await?;
        tracing::info!("Password changed");
        Ok(())
    }
}
