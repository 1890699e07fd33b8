#![doc = include_str!("../README.md")]

pub mod api;
#[cfg(feature = "http")]
pub mod config;
pub mod controller;
pub mod error;
pub mod guard;
#[cfg(feature = "http")]
pub mod http;
pub mod resolver;
pub mod session;
pub mod token_store;
pub mod types;

// Re-exports for convenient access
pub use api::{AuthApi, AuthResponse, CurrentUser, Profile, RefreshedTokens, RegisterRequest};
#[cfg(feature = "http")]
pub use config::ClientConfig;
pub use controller::{SessionController, SessionView};
pub use error::{error_message, Error};
pub use guard::{authorize, navigate_guarded, Decision, GuardConfig, NavigationIntent, Navigator, RouteTable};
#[cfg(feature = "http")]
pub use http::{ApiClient, ApiConfig};
pub use resolver::{SessionResolver, DEFAULT_RESOLVE_TIMEOUT};
pub use session::{derive_roles, primary_role, Session, SessionState};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use types::{Role, TokenPair, UserId};
