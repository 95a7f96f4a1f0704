//! Bearer credential access.
//!
//! The feed never reads storage directly; it asks a [`CredentialSource`].

use crate::storage::FileStore;

pub const DEFAULT_TOKEN_KEY: &str = "token";

/// Supplies the current bearer token, or `None` when logged out.
pub trait CredentialSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A fixed token, mostly for tests and one-off runs.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Token persisted in a [`FileStore`] under a key, read on every call so a
/// login or logout elsewhere is picked up.
#[derive(Debug, Clone)]
pub struct StoredToken {
    store: FileStore,
    key: String,
}

impl StoredToken {
    pub fn new(store: FileStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Persist a token (what a login flow would do).
    pub fn store(&self, token: &str) -> bool {
        self.store.save(&self.key, &token)
    }

    /// Forget the token (logout).
    pub fn clear(&self) {
        self.store.remove(&self.key);
    }
}

impl CredentialSource for StoredToken {
    fn token(&self) -> Option<String> {
        self.store
            .load::<String>(&self.key)
            .filter(|token| !token.trim().is_empty())
    }
}
