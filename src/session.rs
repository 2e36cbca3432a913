//! Authentication collaborator.
//!
//! The dashboard's auth provider is external; the supervisor only needs to
//! ask "who is signed in right now". [`StaticSession`] is the in-process
//! stand-in used by the binary and by tests.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Opaque id of the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Broker client id bound to this identity.
    pub fn client_id(&self) -> String {
        format!("web-client-{}", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the currently authenticated identity.
pub trait SessionProvider: Send + Sync + 'static {
    /// `None` when nobody is signed in.
    fn current_identity(&self) -> impl Future<Output = Option<Identity>> + Send;
}

impl<T: SessionProvider> SessionProvider for Arc<T> {
    fn current_identity(&self) -> impl Future<Output = Option<Identity>> + Send {
        (**self).current_identity()
    }
}

/// Session held in memory, switched with [`sign_in`](Self::sign_in) and
/// [`sign_out`](Self::sign_out).
#[derive(Debug, Default)]
pub struct StaticSession {
    identity: RwLock<Option<Identity>>,
}

impl StaticSession {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            identity: RwLock::new(identity),
        }
    }

    pub fn signed_in(id: impl Into<String>) -> Self {
        Self::new(Some(Identity::new(id)))
    }

    pub fn sign_in(&self, identity: Identity) {
        info!("Signed in as {}", identity);
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = Some(identity);
    }

    pub fn sign_out(&self) {
        info!("Signed out");
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn current(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionProvider for StaticSession {
    fn current_identity(&self) -> impl Future<Output = Option<Identity>> + Send {
        let current = self.current();
        async move { current }
    }
}
