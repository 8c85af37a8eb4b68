//! Authentication records persisted as a single document in the state store.
//!
//! Document layout under the auth key:
//! - `last-id`: last identity handed out; never reused after removal
//! - `users`: one entry per authenticated user (id, username, macaroon, discharges)
//!
//! Every operation is one read-modify-write cycle over the whole document.
//! Nothing here locks implicitly: callers that run operations concurrently
//! must hold [`AuthStore::lock`] across each call to avoid lost updates.

use super::authenticator::MacaroonAuthenticator;
use super::error::{AuthError, Result};
use crate::config::AuthConfig;
use crate::state::{StateError, StateStore, StateStoreExt};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

/// State key the auth document lives under unless configured otherwise.
pub const DEFAULT_STATE_KEY: &str = "auth";

/// All authenticated users as tracked in state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    #[serde(rename = "last-id", default)]
    pub last_id: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<UserState>,
}

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub id: u64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub macaroon: String,
    /// Always kept in byte-wise ascending order.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "null_as_empty"
    )]
    pub discharges: Vec<String>,
}

impl UserState {
    /// Authenticator presenting this user's credentials to the remote store.
    pub fn authenticator(&self) -> MacaroonAuthenticator {
        MacaroonAuthenticator::new(self.macaroon.clone(), self.discharges.clone())
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|name| !name.is_empty()))
}

/// Store of authentication records on top of a [`StateStore`].
pub struct AuthStore {
    state: Arc<dyn StateStore>,
    key: String,
    lock: Mutex<()>,
}

impl AuthStore {
    /// Records stored under [`DEFAULT_STATE_KEY`].
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self::with_key(state, DEFAULT_STATE_KEY)
    }

    pub fn with_key(state: Arc<dyn StateStore>, key: impl Into<String>) -> Self {
        Self {
            state,
            key: key.into(),
            lock: Mutex::new(()),
        }
    }

    /// Open the configured state backend and wrap it.
    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        let state = config.open_state()?;
        Ok(Self::with_key(state, config.state_key.clone()))
    }

    /// Serializes read-modify-write sequences from several threads.
    ///
    /// Hold the guard across any operation that may race with another writer.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub fn state_key(&self) -> &str {
        &self.key
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Current document; "no state yet" reads as an empty document.
    fn load(&self) -> Result<AuthState, StateError> {
        match self.state.get::<AuthState>(&self.key) {
            Ok(auth) => Ok(auth),
            Err(StateError::NoState(_)) => Ok(AuthState::default()),
            Err(e) => Err(e),
        }
    }

    fn save(&self, auth: &AuthState) -> Result<()> {
        self.state.set(&self.key, auth)?;
        Ok(())
    }

    // ── User Management ─────────────────────────────────────────────

    /// Track a new authenticated user and persist it.
    ///
    /// Any record already holding `username` is dropped first, so a username
    /// maps to at most one record. Empty usernames count as absent. The new
    /// record always receives a fresh id.
    pub fn create_user(
        &self,
        username: Option<&str>,
        macaroon: &str,
        mut discharges: Vec<String>,
    ) -> Result<UserState> {
        let username = username.filter(|u| !u.is_empty()).map(str::to_string);
        discharges.sort_unstable();

        let mut auth = self.load()?;

        if let Some(ref name) = username {
            let before = auth.users.len();
            auth.users
                .retain(|user| user.username.as_deref() != Some(name.as_str()));
            if auth.users.len() != before {
                tracing::debug!(username = %name, "Superseding existing auth user");
            }
        }

        auth.last_id = auth.last_id.checked_add(1).ok_or(AuthError::IdsExhausted)?;
        let user = UserState {
            id: auth.last_id,
            username,
            macaroon: macaroon.to_string(),
            discharges,
        };
        auth.users.push(user.clone());

        self.save(&auth)?;

        tracing::info!(
            id = user.id,
            username = user.username.as_deref().unwrap_or(""),
            "Auth user created"
        );
        Ok(user)
    }

    /// Remove the first record for `username`, keeping the others in order.
    ///
    /// Returns whether a record was removed. Removing an unknown username,
    /// or removing before anything was stored, is not an error.
    pub fn remove_user(&self, username: &str) -> Result<bool> {
        let mut auth = self.load()?;

        let Some(idx) = auth
            .users
            .iter()
            .position(|user| user.username.as_deref() == Some(username))
        else {
            return Ok(false);
        };

        let removed = auth.users.remove(idx);
        self.save(&auth)?;

        tracing::info!(id = removed.id, username = username, "Auth user removed");
        Ok(true)
    }

    /// Look up a user by id.
    pub fn user(&self, id: u64) -> Result<UserState> {
        self.load()?
            .users
            .into_iter()
            .find(|user| user.id == id)
            .ok_or(AuthError::NoSuchUser)
    }

    /// Look up a user by username.
    pub fn user_by_username(&self, username: &str) -> Result<UserState> {
        self.load()?
            .users
            .into_iter()
            .find(|user| user.username.as_deref() == Some(username))
            .ok_or(AuthError::NoSuchUser)
    }

    /// All users in stored order.
    pub fn users(&self) -> Result<Vec<UserState>> {
        Ok(self.load()?.users)
    }

    // ── Credential Matching ─────────────────────────────────────────

    /// Find the user holding exactly this macaroon and discharge set.
    ///
    /// Discharges may be given in any order. The first matching record in
    /// stored order wins. An unreadable state yields the same
    /// [`AuthError::InvalidCredential`] as a failed match.
    pub fn check_macaroon<S: AsRef<str>>(
        &self,
        macaroon: &str,
        discharges: &[S],
    ) -> Result<UserState> {
        let auth = match self.load() {
            Ok(auth) => auth,
            Err(e) => {
                tracing::debug!("Auth state unreadable during credential check: {e}");
                return Err(AuthError::InvalidCredential);
            }
        };

        let mut presented: Vec<&str> = discharges.iter().map(AsRef::as_ref).collect();
        presented.sort_unstable();

        auth.users
            .into_iter()
            .find(|user| {
                user.macaroon == macaroon
                    && user.discharges.len() == presented.len()
                    && user
                        .discharges
                        .iter()
                        .zip(&presented)
                        .all(|(stored, given)| stored.as_str() == *given)
            })
            .ok_or(AuthError::InvalidCredential)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
