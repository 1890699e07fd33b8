use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value as JsonValue};
use tokio::sync::{watch, Mutex};

use crate::api::{AuthApi, Profile, RegisterRequest};
use crate::error::Error;
use crate::guard::{authorize, Decision, GuardConfig, NavigationIntent};
use crate::resolver::SessionResolver;
use crate::session::{Session, SessionState};
use crate::token_store::TokenStore;
use crate::types::Role;

/// Owner of the application's session.
///
/// Drives the `Unknown → Loading → {Authenticated, Anonymous}` lifecycle and
/// publishes every transition to [`SessionView`]s. Mutating operations
/// (`start`, `login`, `register`, `logout`, `refresh`, `update_profile`,
/// `change_password`) never overlap.
///
/// ```rust,ignore
/// let controller = SessionController::new(resolver);
/// let mut view = controller.subscribe();
/// tokio::spawn(async move { controller.start().await });
/// let state = view.wait_resolved().await;
/// ```
pub struct SessionController<A, T> {
    resolver: SessionResolver<A, T>,
    guard: GuardConfig,
    state: watch::Sender<SessionState>,
    op_lock: Mutex<()>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl<A: AuthApi, T: TokenStore> SessionController<A, T> {
    #[must_use]
    pub fn new(resolver: SessionResolver<A, T>) -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        Self {
            resolver,
            guard: GuardConfig::default(),
            state,
            op_lock: Mutex::new(()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }

    #[must_use]
    pub fn guard(&self) -> &GuardConfig {
        &self.guard
    }

    #[must_use]
    pub fn resolver(&self) -> &SessionResolver<A, T> {
        &self.resolver
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Read-only handle for UI consumers.
    #[must_use]
    pub fn subscribe(&self) -> SessionView {
        SessionView {
            rx: self.state.subscribe(),
        }
    }

    /// Authorizes `intent` against the current state.
    #[must_use]
    pub fn authorize(&self, intent: &NavigationIntent) -> Decision {
        authorize(intent, &self.state.borrow(), &self.guard)
    }

    /// Resolves the stored session. Runs once; later calls wait for any
    /// operation in flight and return the state it settled on, without
    /// touching the network.
    pub async fn start(&self) -> SessionState {
        let already_started = self.started.swap(true, Ordering::SeqCst);
        let _op = self.op_lock.lock().await;
        // A login or logout may have settled the state while we waited.
        if already_started || !matches!(*self.state.borrow(), SessionState::Unknown) {
            return self.state();
        }
        self.publish(SessionState::Loading);
        let resolved = self.resolver.resolve().await;
        self.publish(resolved);
        self.state()
    }

    /// Signs in with email and password.
    ///
    /// # Errors
    ///
    /// Returns the API error (e.g. wrong credentials) with the state left
    /// untouched.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, Error> {
        let _op = self.op_lock.lock().await;
        let response = self.resolver.api().login(email, password).await?;
        self.sign_in(response).await
    }

    /// Creates an account and signs in.
    ///
    /// # Errors
    ///
    /// Returns the API error (field validation messages flattened into one
    /// string) with the state left untouched.
    pub async fn register(&self, request: &RegisterRequest) -> Result<Session, Error> {
        let _op = self.op_lock.lock().await;
        let response = self.resolver.api().register(request).await?;
        self.sign_in(response).await
    }

    async fn sign_in(&self, response: crate::api::AuthResponse) -> Result<Session, Error> {
        let session = self.resolver.establish(response).await?;
        self.started.store(true, Ordering::SeqCst);
        self.publish(SessionState::Authenticated(session.clone()));
        Ok(session)
    }

    /// Signs out; always ends `Anonymous`.
    pub async fn logout(&self) {
        let _op = self.op_lock.lock().await;
        self.resolver.sign_out().await;
        self.started.store(true, Ordering::SeqCst);
        self.publish(SessionState::Anonymous);
    }

    /// Renews the token pair. A failed refresh ends the session.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure after moving to `Anonymous`.
    pub async fn refresh(&self) -> Result<(), Error> {
        let _op = self.op_lock.lock().await;
        let result = self.resolver.refresh_tokens().await;
        if result.is_err() {
            self.publish(SessionState::Anonymous);
        }
        result
    }

    /// Switches the active mode of the current session.
    ///
    /// # Errors
    ///
    /// [`Error::NotAuthenticated`] without a session, [`Error::InvalidRole`]
    /// when the role is not held. The state is unchanged on error.
    pub fn switch_mode(&self, role: Role) -> Result<(), Error> {
        let mut result = Err(Error::NotAuthenticated);
        self.state.send_if_modified(|state| match state {
            SessionState::Authenticated(session) => {
                let previous = session.active_mode();
                result = session.switch_mode(role);
                result.is_ok() && previous != role
            }
            _ => false,
        });
        if result.is_ok() {
            tracing::debug!(mode = %role, "Active mode switched");
        }
        result
    }

    /// Sends profile changes for the primary role and updates the session.
    ///
    /// # Errors
    ///
    /// [`Error::NotAuthenticated`] without a session, or the API error.
    pub async fn update_profile(&self, changes: &Map<String, JsonValue>) -> Result<Profile, Error> {
        let _op = self.op_lock.lock().await;
        let role = self
            .state
            .borrow()
            .session()
            .map(Session::primary_role)
            .ok_or(Error::NotAuthenticated)?;
        let profile = self.resolver.update_profile(role, changes).await?;
        if !self.closed.load(Ordering::SeqCst) {
            self.state.send_if_modified(|state| match state {
                SessionState::Authenticated(session) => {
                    session.set_profile(profile.clone());
                    true
                }
                _ => false,
            });
        }
        Ok(profile)
    }

    /// Changes the password of the signed-in user; the session stays as is.
    ///
    /// # Errors
    ///
    /// [`Error::NotAuthenticated`] without a session, or the API error.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), Error> {
        let _op = self.op_lock.lock().await;
        if !self.state.borrow().is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        self.resolver.change_password(old_password, new_password).await
    }

    /// Detaches the controller from its consumers. Results of operations
    /// still in flight are dropped instead of published.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn publish(&self, next: SessionState) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("Controller shut down, discarding session update");
            return;
        }
        self.state.send_replace(next);
    }
}

/// Read-only projection of the controller's state.
#[derive(Debug, Clone)]
pub struct SessionView {
    rx: watch::Receiver<SessionState>,
}

impl SessionView {
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.rx.borrow().is_loading()
    }

    /// Waits until resolution has settled and returns the settled state.
    ///
    /// If the controller is dropped first, returns whatever was last seen.
    pub async fn wait_resolved(&mut self) -> SessionState {
        let settled = match self.rx.wait_for(|state| !state.is_loading()).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.state())
    }

    /// Waits for the next transition. `false` once the controller is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::resolver::tests::FakeApi;
    use crate::session::tests::user;
    use crate::token_store::MemoryTokenStore;
    use crate::types::TokenPair;

    fn controller(
        api: FakeApi,
        store: Arc<MemoryTokenStore>,
    ) -> SessionController<FakeApi, Arc<MemoryTokenStore>> {
        SessionController::new(SessionResolver::new(Arc::new(api), store))
    }

    #[tokio::test]
    async fn start_runs_once() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new("acc", "ref")));
        let c = controller(FakeApi::with_user(user(Some(Role::Teacher), &[])), store);
        assert_eq!(c.state(), SessionState::Unknown);

        let state = c.start().await;
        assert!(state.is_authenticated());
        let calls = c.resolver().api().calls();

        let again = c.start().await;
        assert_eq!(again, state);
        assert_eq!(c.resolver().api().calls(), calls);
    }

    #[tokio::test]
    async fn start_after_concurrent_login_keeps_session() {
        let api = FakeApi::with_user(user(Some(Role::Teacher), &[]));
        *api.login_delay.lock() = Some(Duration::from_millis(20));
        let c = controller(api, Arc::new(MemoryTokenStore::new()));

        let (login, started) = tokio::join!(c.login("ada@school.edu", "secret"), c.start());
        let session = login.unwrap();
        assert_eq!(started.session(), Some(&session));
        assert!(c.state().is_authenticated());
        // No restore ran after the login.
        assert!(c.resolver().api().seen_access.lock().is_empty());
    }

    #[tokio::test]
    async fn concurrent_starts_share_one_resolution() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new("acc", "ref")));
        let api = FakeApi::with_user(user(Some(Role::Teacher), &[]));
        *api.delay.lock() = Some(Duration::from_millis(20));
        let c = controller(api, store);

        let (first, second) = tokio::join!(c.start(), c.start());
        assert!(first.is_authenticated());
        assert_eq!(first, second);
        assert_eq!(c.resolver().api().seen_access.lock().len(), 1);
    }

    #[tokio::test]
    async fn view_waits_for_resolution() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new("acc", "ref")));
        let api = FakeApi::with_user(user(Some(Role::Teacher), &[]));
        *api.delay.lock() = Some(Duration::from_millis(20));
        let c = Arc::new(controller(api, store));
        let mut view = c.subscribe();
        assert!(view.is_loading());

        let task = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.start().await })
        };
        let settled = view.wait_resolved().await;
        assert!(settled.is_authenticated());
        assert!(!view.is_loading());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn anonymous_start_then_login() {
        let store = Arc::new(MemoryTokenStore::new());
        let c = controller(
            FakeApi::with_user(user(Some(Role::InstitutionAdmin), &[])),
            Arc::clone(&store),
        );
        assert_eq!(c.start().await, SessionState::Anonymous);
        assert_eq!(
            c.authorize(&NavigationIntent::new("/jobs")),
            Decision::RedirectTo("/login".into())
        );

        let session = c.login("admin@school.edu", "secret").await.unwrap();
        assert_eq!(session.active_mode(), Role::InstitutionAdmin);
        assert!(c.state().is_authenticated());
        assert_eq!(store.load(), Some(TokenPair::new("new-access", "new-refresh")));

        let teacher_only = NavigationIntent::new("/teacher/applications").requiring([Role::Teacher]);
        assert_eq!(
            c.authorize(&teacher_only),
            Decision::RedirectTo("/institution/dashboard".into())
        );
    }

    #[tokio::test]
    async fn failed_login_leaves_state() {
        let c = controller(FakeApi::default(), Arc::new(MemoryTokenStore::new()));
        c.start().await;

        let err = c.login("who@x.y", "nope").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "login failed: Invalid email or password."
        );
        assert_eq!(c.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn register_signs_in() {
        let c = controller(
            FakeApi::with_user(user(Some(Role::Teacher), &[])),
            Arc::new(MemoryTokenStore::new()),
        );
        let req = RegisterRequest::new("ada@school.edu", "ada", "correct-horse", Role::Teacher);
        let session = c.register(&req).await.unwrap();
        assert_eq!(session.primary_role(), Role::Teacher);
        assert!(c.state().is_authenticated());
    }

    #[tokio::test]
    async fn logout_goes_anonymous() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new("acc", "ref")));
        let c = controller(
            FakeApi::with_user(user(Some(Role::Teacher), &[])),
            Arc::clone(&store),
        );
        c.start().await;
        c.logout().await;
        assert_eq!(c.state(), SessionState::Anonymous);
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn failed_refresh_goes_anonymous() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new("acc", "ref")));
        let c = controller(
            FakeApi::with_user(user(Some(Role::Teacher), &[])),
            Arc::clone(&store),
        );
        c.start().await;
        assert!(c.refresh().await.is_err());
        assert_eq!(c.state(), SessionState::Anonymous);
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn switch_mode_rules() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new("acc", "ref")));
        let c = controller(
            FakeApi::with_user(user(Some(Role::Teacher), &[Role::Instructor])),
            store,
        );
        assert!(matches!(
            c.switch_mode(Role::Instructor),
            Err(Error::NotAuthenticated)
        ));

        c.start().await;
        let calls = c.resolver().api().calls();

        c.switch_mode(Role::Instructor).unwrap();
        assert_eq!(c.state().session().unwrap().active_mode(), Role::Instructor);

        assert!(matches!(
            c.switch_mode(Role::SuperAdmin),
            Err(Error::InvalidRole(Role::SuperAdmin))
        ));
        assert_eq!(c.state().session().unwrap().active_mode(), Role::Instructor);
        assert_eq!(c.resolver().api().calls(), calls);
    }

    #[tokio::test]
    async fn update_profile_refreshes_session() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new("acc", "ref")));
        let c = controller(FakeApi::with_user(user(Some(Role::Teacher), &[])), store);
        c.start().await;

        let changes = json!({"first_name": "Grace", "last_name": "Hopper"})
            .as_object()
            .cloned()
            .unwrap();
        let profile = c.update_profile(&changes).await.unwrap();
        assert_eq!(profile.display_name().as_deref(), Some("Grace Hopper"));
        assert_eq!(
            c.state()
                .session()
                .and_then(Session::profile)
                .and_then(Profile::display_name)
                .as_deref(),
            Some("Grace Hopper")
        );
    }

    #[tokio::test]
    async fn change_password_keeps_session() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new("acc", "ref")));
        let c = controller(
            FakeApi::with_user(user(Some(Role::Teacher), &[])),
            Arc::clone(&store),
        );
        assert!(matches!(
            c.change_password("secret", "n3w-secret").await,
            Err(Error::NotAuthenticated)
        ));

        let state = c.start().await;
        c.change_password("secret", "n3w-secret").await.unwrap();
        assert_eq!(c.state(), state);

        let err = c.change_password("wrong", "n3w-secret").await.unwrap_err();
        assert_eq!(err.to_string(), "password change failed: Old password is incorrect.");
        assert_eq!(c.state(), state);
        assert_eq!(store.load(), Some(TokenPair::new("acc", "ref")));
    }

    #[tokio::test]
    async fn shutdown_discards_in_flight_resolution() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new("acc", "ref")));
        let api = FakeApi::with_user(user(Some(Role::Teacher), &[]));
        *api.delay.lock() = Some(Duration::from_millis(50));
        let c = Arc::new(controller(api, store));

        let task = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.start().await })
        };
        let mut view = c.subscribe();
        while !matches!(view.state(), SessionState::Loading) {
            assert!(view.changed().await);
        }
        c.shutdown();
        task.await.unwrap();

        assert_eq!(c.state(), SessionState::Loading);
    }
}
