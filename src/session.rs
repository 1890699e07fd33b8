//! Session lifecycle state and the role/mode model.

use std::collections::BTreeSet;

use crate::api::{CurrentUser, Profile};
use crate::error::Error;
use crate::types::{Role, UserId};

/// Every role `user` holds: its explicit role list plus its primary type.
#[must_use]
pub fn derive_roles(user: &CurrentUser) -> BTreeSet<Role> {
    user.roles.iter().copied().chain(user.user_type).collect()
}

/// Role the active mode starts in: the primary type when the backend sent
/// one, otherwise the highest-priority role held.
#[must_use]
pub fn primary_role(user: &CurrentUser) -> Option<Role> {
    user.user_type.or_else(|| Role::highest(&user.roles))
}

/// An authenticated user and the mode they are currently working in.
///
/// `active_mode` is always one of `roles`; the only way to change it is
/// [`Session::switch_mode`], which enforces that.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    user: CurrentUser,
    primary_role: Role,
    roles: BTreeSet<Role>,
    active_mode: Role,
    profile: Option<Profile>,
}

impl Session {
    /// Builds a session from the backend's user payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRoles`] when the payload carries no recognised role.
    pub fn from_user(user: CurrentUser) -> Result<Self, Error> {
        let roles = derive_roles(&user);
        let primary_role = primary_role(&user).ok_or(Error::NoRoles)?;
        Ok(Self {
            user,
            primary_role,
            active_mode: primary_role,
            roles,
            profile: None,
        })
    }

    #[must_use]
    pub fn with_profile(mut self, profile: Option<Profile>) -> Self {
        self.profile = profile;
        self
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    #[must_use]
    pub fn user(&self) -> &CurrentUser {
        &self.user
    }

    #[must_use]
    pub fn primary_role(&self) -> Role {
        self.primary_role
    }

    #[must_use]
    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    #[must_use]
    pub fn active_mode(&self) -> Role {
        self.active_mode
    }

    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub(crate) fn set_profile(&mut self, profile: Profile) {
        self.profile = Some(profile);
    }

    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// True when `required` is empty (no restriction) or shares a role with
    /// the session.
    pub fn has_any_role<'a>(&self, required: impl IntoIterator<Item = &'a Role>) -> bool {
        let mut required = required.into_iter().peekable();
        if required.peek().is_none() {
            return true;
        }
        required.any(|r| self.roles.contains(r))
    }

    /// Switches the active mode. Purely local.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRole`] and leaves the mode unchanged when the
    /// user does not hold `role`.
    pub fn switch_mode(&mut self, role: Role) -> Result<(), Error> {
        if !self.roles.contains(&role) {
            return Err(Error::InvalidRole(role));
        }
        self.active_mode = role;
        Ok(())
    }
}

/// Client-side session lifecycle.
///
/// `Unknown → Loading → {Authenticated, Anonymous}`. `Authenticated` falls
/// back to `Anonymous` on logout or a failed refresh; nothing re-enters
/// `Loading` short of a fresh controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionState {
    #[default]
    Unknown,
    Loading,
    Authenticated(Session),
    Anonymous,
}

impl SessionState {
    /// Resolution has not finished yet.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Unknown | Self::Loading)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.session().map(Session::user_id)
    }
}
