use serde_json::Value as JsonValue;

use crate::types::Role;

/// Message shown when an API error carries nothing readable.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Mode switch to a role the user does not hold.
    #[error("role {0} is not held by the current user")]
    InvalidRole(Role),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// The user payload carried no recognised role.
    #[error("user has no recognised role")]
    NoRoles,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("session resolution timed out")]
    Timeout,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Builds an [`Error::Api`] from a raw response body.
    #[must_use]
    pub fn api(operation: &'static str, status: Option<u16>, body: &str) -> Self {
        Self::Api {
            operation,
            status,
            message: error_message(body),
        }
    }

    /// HTTP status attached to the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            #[cfg(feature = "http")]
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the backend rejected the credentials (401/403).
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

/// Extracts a human-readable message from an API error body.
///
/// Understands `{"error": "..."}`, `{"detail": "..."}` and field maps such as
/// `{"email": ["taken"], "password": ["too short"]}`, whose messages are
/// flattened and joined. Anything else yields [`GENERIC_ERROR_MESSAGE`].
#[must_use]
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|payload| flatten_payload(&payload))
        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string())
}

fn flatten_payload(payload: &JsonValue) -> Option<String> {
    let map = payload.as_object()?;
    for key in ["error", "detail", "message"] {
        if let Some(msg) = map.get(key).and_then(JsonValue::as_str) {
            return Some(msg.to_string());
        }
    }

    let mut messages = Vec::new();
    for value in map.values() {
        collect_messages(value, &mut messages);
    }
    if messages.is_empty() {
        None
    } else {
        Some(messages.join(" "))
    }
}

fn collect_messages(value: &JsonValue, out: &mut Vec<String>) {
    match value {
        JsonValue::String(s) if !s.is_empty() => out.push(s.clone()),
        JsonValue::Array(items) => items.iter().for_each(|v| collect_messages(v, out)),
        JsonValue::Object(map) => map.values().for_each(|v| collect_messages(v, out)),
        _ => {}
    }
}
