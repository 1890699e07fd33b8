//! Navigation authorization.
//!
//! [`authorize`] is a pure function of the session state and the navigation
//! intent. Performing the resulting redirect is left to a [`Navigator`],
//! driven by [`navigate_guarded`].

use std::collections::{BTreeSet, HashMap};

use crate::session::SessionState;
use crate::types::Role;

/// A navigation attempt: where to, and which roles may go there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationIntent {
    pub target_path: String,
    /// Empty means unrestricted (any authenticated user).
    pub required_roles: BTreeSet<Role>,
}

impl NavigationIntent {
    /// Intent open to any authenticated user.
    #[must_use]
    pub fn new(target_path: impl Into<String>) -> Self {
        Self {
            target_path: target_path.into(),
            required_roles: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn requiring(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.required_roles.extend(roles);
        self
    }
}

/// Outcome of [`authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Session resolution is still running; render a neutral loading view
    /// and ask again once it settles.
    Pending,
    Allow,
    RedirectTo(String),
}

/// Login location and per-mode dashboards used for redirects.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    login_path: String,
    dashboards: HashMap<Role, String>,
    preserve_target: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        let dashboards = Role::ALL
            .into_iter()
            .map(|role| (role, default_dashboard(role).to_string()))
            .collect();
        Self {
            login_path: "/login".into(),
            dashboards,
            preserve_target: false,
        }
    }
}

fn default_dashboard(role: Role) -> &'static str {
    match role {
        Role::Teacher => "/teacher/dashboard",
        Role::InstitutionAdmin => "/institution/dashboard",
        Role::Instructor => "/instructor/dashboard",
        Role::Student => "/student/dashboard",
        Role::SuperAdmin => "/admin/dashboard",
    }
}

impl GuardConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_dashboard(mut self, role: Role, path: impl Into<String>) -> Self {
        self.dashboards.insert(role, path.into());
        self
    }

    /// Append `?next=<target>` to login redirects so the UI can return the
    /// user where they were headed.
    #[must_use]
    pub fn with_preserve_target(mut self, preserve: bool) -> Self {
        self.preserve_target = preserve;
        self
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Dashboard for a mode.
    #[must_use]
    pub fn dashboard(&self, role: Role) -> &str {
        self.dashboards
            .get(&role)
            .map_or_else(|| default_dashboard(role), String::as_str)
    }

    fn login_redirect(&self, target: &str) -> String {
        if self.preserve_target && !target.is_empty() && target != self.login_path {
            format!("{}?next={}", self.login_path, urlencoding::encode(target))
        } else {
            self.login_path.clone()
        }
    }
}

/// Decides whether `state` may navigate to `intent`.
///
/// Rules, first match wins: unresolved session → [`Decision::Pending`];
/// anonymous → login; missing every required role → dashboard of the
/// active mode; otherwise [`Decision::Allow`].
#[must_use]
pub fn authorize(intent: &NavigationIntent, state: &SessionState, config: &GuardConfig) -> Decision {
    let session = match state {
        SessionState::Unknown | SessionState::Loading => return Decision::Pending,
        SessionState::Anonymous => {
            return Decision::RedirectTo(config.login_redirect(&intent.target_path));
        }
        SessionState::Authenticated(session) => session,
    };

    if !session.has_any_role(&intent.required_roles) {
        return Decision::RedirectTo(config.dashboard(session.active_mode()).to_string());
    }
    Decision::Allow
}

/// Route path prefixes and the roles allowed under them.
///
/// The longest matching prefix wins. Paths matching nothing are
/// unrestricted.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<(String, BTreeSet<Role>)>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn route(mut self, prefix: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        self.routes.push((prefix.into(), roles.into_iter().collect()));
        self
    }

    /// Navigation intent for `path`.
    #[must_use]
    pub fn intent_for(&self, path: &str) -> NavigationIntent {
        let route_path = path.split(['?', '#']).next().unwrap_or(path);
        let required_roles = self
            .routes
            .iter()
            .filter(|(prefix, _)| prefix_matches(prefix, route_path))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, roles)| roles.clone())
            .unwrap_or_default();
        NavigationIntent {
            target_path: path.to_string(),
            required_roles,
        }
    }
}

// Segment-aware: "/jobs" matches "/jobs" and "/jobs/12", not "/jobsearch".
fn prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Performs the navigation side effect for a [`Decision`].
pub trait Navigator {
    fn navigate(&mut self, path: &str);
}

/// Authorizes `path` and drives `navigator` accordingly.
///
/// Returns the decision; on [`Decision::Pending`] nothing is navigated.
pub fn navigate_guarded<N: Navigator + ?Sized>(
    navigator: &mut N,
    routes: &RouteTable,
    state: &SessionState,
    config: &GuardConfig,
    path: &str,
) -> Decision {
    let intent = routes.intent_for(path);
    let decision = authorize(&intent, state, config);
    match &decision {
        Decision::Pending => {}
        Decision::Allow => navigator.navigate(&intent.target_path),
        Decision::RedirectTo(to) => {
            tracing::debug!(from = %path, to = %to, "Navigation redirected");
            navigator.navigate(to);
        }
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::user;
    use crate::session::Session;

    fn authenticated(user_type: Option<Role>, roles: &[Role]) -> SessionState {
        SessionState::Authenticated(Session::from_user(user(user_type, roles)).unwrap())
    }

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl Navigator for Recorder {
        fn navigate(&mut self, path: &str) {
            self.0.push(path.to_string());
        }
    }

    #[test]
    fn loading_defers() {
        let config = GuardConfig::default();
        let intent = NavigationIntent::new("/jobs");
        assert_eq!(authorize(&intent, &SessionState::Unknown, &config), Decision::Pending);
        assert_eq!(authorize(&intent, &SessionState::Loading, &config), Decision::Pending);
    }

    #[test]
    fn anonymous_goes_to_login() {
        let config = GuardConfig::default();
        let intent = NavigationIntent::new("/jobs").requiring([Role::Teacher]);
        assert_eq!(
            authorize(&intent, &SessionState::Anonymous, &config),
            Decision::RedirectTo("/login".into())
        );
    }

    #[test]
    fn anonymous_with_preserved_target() {
        let config = GuardConfig::default().with_preserve_target(true);
        let intent = NavigationIntent::new("/jobs/12?tab=apply");
        assert_eq!(
            authorize(&intent, &SessionState::Anonymous, &config),
            Decision::RedirectTo("/login?next=%2Fjobs%2F12%3Ftab%3Dapply".into())
        );
    }

    #[test]
    fn institution_admin_redirected_from_teacher_page() {
        let config = GuardConfig::default();
        let state = authenticated(None, &[Role::InstitutionAdmin]);
        let intent = NavigationIntent::new("/teacher/applications").requiring([Role::Teacher]);
        assert_eq!(
            authorize(&intent, &state, &config),
            Decision::RedirectTo("/institution/dashboard".into())
        );
    }

    #[test]
    fn redirect_follows_active_mode() {
        let config = GuardConfig::default().with_dashboard(Role::Instructor, "/teach");
        let mut session =
            Session::from_user(user(Some(Role::Teacher), &[Role::Instructor])).unwrap();
        session.switch_mode(Role::Instructor).unwrap();
        let state = SessionState::Authenticated(session);

        let intent = NavigationIntent::new("/admin").requiring([Role::SuperAdmin]);
        assert_eq!(
            authorize(&intent, &state, &config),
            Decision::RedirectTo("/teach".into())
        );
    }

    #[test]
    fn unrestricted_and_matching_roles_allow() {
        let config = GuardConfig::default();
        let state = authenticated(Some(Role::Teacher), &[]);
        assert_eq!(
            authorize(&NavigationIntent::new("/feed"), &state, &config),
            Decision::Allow
        );
        let intent = NavigationIntent::new("/jobs").requiring([Role::Teacher, Role::SuperAdmin]);
        assert_eq!(authorize(&intent, &state, &config), Decision::Allow);
    }

    #[test]
    fn authorize_is_idempotent() {
        let config = GuardConfig::default();
        let state = authenticated(None, &[Role::Student]);
        let intent = NavigationIntent::new("/institution/jobs").requiring([Role::InstitutionAdmin]);
        let first = authorize(&intent, &state, &config);
        for _ in 0..5 {
            assert_eq!(authorize(&intent, &state, &config), first);
        }
    }

    #[test]
    fn route_table_longest_prefix() {
        let routes = RouteTable::new()
            .route("/jobs", [])
            .route("/jobs/manage", [Role::InstitutionAdmin])
            .route("/admin", [Role::SuperAdmin]);

        assert!(routes.intent_for("/jobs/42").required_roles.is_empty());
        assert_eq!(
            routes.intent_for("/jobs/manage/42?x=1").required_roles,
            BTreeSet::from([Role::InstitutionAdmin])
        );
        assert!(routes.intent_for("/adminx").required_roles.is_empty());
        assert!(routes.intent_for("/events").required_roles.is_empty());
        assert_eq!(routes.intent_for("/admin").target_path, "/admin");
    }

    #[test]
    fn navigate_guarded_drives_navigator() {
        let config = GuardConfig::default();
        let routes = RouteTable::new().route("/admin", [Role::SuperAdmin]);
        let state = authenticated(Some(Role::Teacher), &[]);
        let mut nav = Recorder::default();

        let d = navigate_guarded(&mut nav, &routes, &state, &config, "/admin/users");
        assert_eq!(d, Decision::RedirectTo("/teacher/dashboard".into()));
        navigate_guarded(&mut nav, &routes, &state, &config, "/feed");
        navigate_guarded(&mut nav, &routes, &SessionState::Loading, &config, "/feed");

        assert_eq!(nav.0, vec!["/teacher/dashboard".to_string(), "/feed".to_string()]);
    }
}
