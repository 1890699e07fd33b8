//! Persistent storage for the access/refresh token pair.
//!
//! A [`TokenStore`] is a keyed get/set over two named slots, `accessToken`
//! and `refreshToken`. It never fails: an unreadable or unwritable backing
//! store is logged and behaves as if no tokens were stored.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value as JsonValue};
use tempfile::NamedTempFile;

use crate::types::TokenPair;

/// Storage slot name for the access token.
pub const ACCESS_TOKEN_SLOT: &str = "accessToken";
/// Storage slot name for the refresh token.
pub const REFRESH_TOKEN_SLOT: &str = "refreshToken";

/// Backing store for the session's token pair.
///
/// Only the [`SessionResolver`](crate::SessionResolver) writes to it.
pub trait TokenStore: Send + Sync + 'static {
    /// Persist both slots, replacing whatever was stored.
    fn save(&self, pair: &TokenPair);

    /// Stored pair, or `None` when the access slot is empty or unreadable.
    fn load(&self) -> Option<TokenPair>;

    /// Empty both slots.
    fn clear(&self);
}

impl<S: TokenStore + ?Sized> TokenStore for Box<S> {
    fn save(&self, pair: &TokenPair) {
        (**self).save(pair);
    }

    fn load(&self) -> Option<TokenPair> {
        (**self).load()
    }

    fn clear(&self) {
        (**self).clear();
    }
}

impl<S: TokenStore + ?Sized> TokenStore for Arc<S> {
    fn save(&self, pair: &TokenPair) {
        (**self).save(pair);
    }

    fn load(&self) -> Option<TokenPair> {
        (**self).load()
    }

    fn clear(&self) {
        (**self).clear();
    }
}

/// In-process token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slots: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a pair.
    #[must_use]
    pub fn with_tokens(pair: TokenPair) -> Self {
        Self {
            slots: RwLock::new(Some(pair)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, pair: &TokenPair) {
        *self.slots.write() = Some(pair.clone());
    }

    fn load(&self) -> Option<TokenPair> {
        let pair = self.slots.read().clone()?;
        if pair.access_token.is_empty() {
            return None;
        }
        Some(TokenPair {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token.filter(|t| !t.is_empty()),
        })
    }

    fn clear(&self) {
        *self.slots.write() = None;
    }
}

/// JSON document keyed by slot name.
type Slots = Map<String, JsonValue>;

fn slot(slots: &Slots, name: &str) -> Option<String> {
    slots
        .get(name)
        .and_then(JsonValue::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

/// Token store backed by a small JSON file.
///
/// Writes go through a uniquely named temp file in the same directory that is
/// then renamed over the target, so a crash never leaves a half-written
/// document behind and neighbouring files are never touched.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_slots(&self) -> Slots {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Slots::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Token file unreadable");
                return Slots::default();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "Token file corrupt");
            Slots::default()
        })
    }

    fn write_slots(&self, slots: &Slots) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let json = serde_json::to_vec_pretty(slots).map_err(std::io::Error::other)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&json)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, pair: &TokenPair) {
        let _guard = self.lock.write();
        let mut slots = Slots::new();
        slots.insert(ACCESS_TOKEN_SLOT.into(), pair.access_token.clone().into());
        if let Some(refresh) = &pair.refresh_token {
            slots.insert(REFRESH_TOKEN_SLOT.into(), refresh.clone().into());
        }
        if let Err(e) = self.write_slots(&slots) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to persist tokens");
        }
    }

    fn load(&self) -> Option<TokenPair> {
        let _guard = self.lock.read();
        let slots = self.read_slots();
        Some(TokenPair {
            access_token: slot(&slots, ACCESS_TOKEN_SLOT)?,
            refresh_token: slot(&slots, REFRESH_TOKEN_SLOT),
        })
    }

    fn clear(&self) {
        let _guard = self.lock.write();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove token file");
                // Fall back to blanking the slots so `load` still sees nothing.
                if let Err(e) = self.write_slots(&Slots::default()) {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to blank token file");
                }
            }
        }
    }
}
