//! Credential store
//!
//! Single value cell holding the access token, the renewal token and the
//! identity snapshot. Both tokens are present (authenticated) or both absent
//! (anonymous); a half-populated pair is never observable.
//!
//! Writes come from login, logout and the request pipeline's renewal routine.
//! Renewal is single-flight, so writers never interleave and a plain lock held
//! for the duration of one synchronous mutation is sufficient. Each mutation is
//! written through to the backing `BlobStore` before the lock is released.

use std::sync::{Arc, PoisonError, RwLock};

use common::Secret;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::constants::{ACCESS_TOKEN_KEY, IDENTITY_KEY, RENEWAL_TOKEN_KEY};
use crate::identity::Identity;
use crate::storage::{BlobStore, read_json, write_json};

/// An authenticated credential.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Bearer token for API calls
    pub access: Secret<String>,
    /// Token used solely to obtain a new access token
    pub renewal: Secret<String>,
    pub identity: Option<Identity>,
}

#[derive(Default)]
struct State {
    tokens: Option<(Secret<String>, Secret<String>)>,
    identity: Option<Identity>,
}

/// Process-wide credential cell with best-effort persistence.
pub struct CredentialStore {
    state: RwLock<State>,
    backing: Arc<dyn BlobStore>,
    access_tx: watch::Sender<Option<Secret<String>>>,
}

impl CredentialStore {
    /// Restore the credential persisted in `backing`, if any.
    ///
    /// A blob holding only one of the two tokens is treated as anonymous and
    /// the stray key is removed.
    pub fn load(backing: Arc<dyn BlobStore>) -> Self {
        let access = non_empty(backing.get_string(ACCESS_TOKEN_KEY));
        let renewal = non_empty(backing.get_string(RENEWAL_TOKEN_KEY));

        let tokens = match (access, renewal) {
            (Some(access), Some(renewal)) => {
                info!("restored persisted credential");
                Some((Secret::new(access), Secret::new(renewal)))
            }
            (None, None) => None,
            _ => {
                warn!("persisted credential is missing one token, discarding");
                backing.remove(ACCESS_TOKEN_KEY);
                backing.remove(RENEWAL_TOKEN_KEY);
                None
            }
        };
        let identity = read_json::<Identity>(backing.as_ref(), IDENTITY_KEY);

        let (access_tx, _) = watch::channel(tokens.as_ref().map(|(access, _)| access.clone()));
        Self {
            state: RwLock::new(State { tokens, identity }),
            backing,
            access_tx,
        }
    }

    /// Current credential, or `None` when anonymous.
    pub fn get(&self) -> Option<Credential> {
        let state = self.read();
        state.tokens.as_ref().map(|(access, renewal)| Credential {
            access: access.clone(),
            renewal: renewal.clone(),
            identity: state.identity.clone(),
        })
    }

    pub fn access_token(&self) -> Option<Secret<String>> {
        self.read().tokens.as_ref().map(|(access, _)| access.clone())
    }

    pub fn renewal_token(&self) -> Option<Secret<String>> {
        self.read().tokens.as_ref().map(|(_, renewal)| renewal.clone())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.read().identity.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().tokens.is_some()
    }

    /// Replace the token pair. An empty token in either position clears the
    /// store instead, since a half-populated pair is not a valid state.
    pub fn set_credential(&self, access: impl Into<Secret<String>>, renewal: impl Into<Secret<String>>) {
        let access = access.into();
        let renewal = renewal.into();
        if access.is_empty() || renewal.is_empty() {
            warn!("refusing to store a credential with an empty token, clearing instead");
            self.clear();
            return;
        }

        {
            let mut state = self.write();
            self.backing.set_string(ACCESS_TOKEN_KEY, access.expose());
            self.backing.set_string(RENEWAL_TOKEN_KEY, renewal.expose());
            state.tokens = Some((access.clone(), renewal));
        }
        debug!("credential updated");
        self.publish(Some(access));
    }

    pub fn set_identity(&self, identity: Identity) {
        let mut state = self.write();
        write_json(self.backing.as_ref(), IDENTITY_KEY, &identity);
        debug!(user = %identity.username, "identity updated");
        state.identity = Some(identity);
    }

    /// Drop tokens and identity.
    pub fn clear(&self) {
        {
            let mut state = self.write();
            self.backing.remove(ACCESS_TOKEN_KEY);
            self.backing.remove(RENEWAL_TOKEN_KEY);
            self.backing.remove(IDENTITY_KEY);
            state.tokens = None;
            state.identity = None;
        }
        info!("credential cleared");
        self.publish(None);
    }

    /// Watch the access token. The receiver wakes on login, renewal and
    /// logout; repeated writes of the same token do not wake it.
    pub fn subscribe(&self) -> watch::Receiver<Option<Secret<String>>> {
        self.access_tx.subscribe()
    }

    fn publish(&self, access: Option<Secret<String>>) {
        self.access_tx.send_if_modified(|current| {
            if *current == access {
                false
            } else {
                *current = access;
                true
            }
        });
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
