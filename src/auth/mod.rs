//! Session source consumed by the data layer and the normalizer.
//!
//! Real sign-in against the hosted auth service is out of scope; the shipped
//! [`StaticAuth`] hands out a session taken from config or the environment.

use crate::error::SyncError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    /// Bearer token attached to every data request
    pub token: String,
}

/// State of the configured credential
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthState {
    /// A session is active
    Available,
    /// Credential is not configured or was signed out
    #[default]
    NotConfigured,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, SyncError>;

    async fn sign_out(&self) -> Result<(), SyncError>;

    fn current_session(&self) -> Option<Session>;

    /// Session changes (sign-in, sign-out, token refresh).
    fn subscribe(&self) -> watch::Receiver<Option<Session>>;

    fn state(&self) -> AuthState {
        if self.current_session().is_some() {
            AuthState::Available
        } else {
            AuthState::NotConfigured
        }
    }
}

/// A fixed session. Signing out drops it; signing in is not supported.
#[derive(Clone)]
pub struct StaticAuth {
    tx: Arc<watch::Sender<Option<Session>>>,
}

impl StaticAuth {
    pub fn new(session: Option<Session>) -> Self {
        let (tx, _) = watch::channel(session);
        Self { tx: Arc::new(tx) }
    }

    pub fn signed_in(user_id: &str, token: &str) -> Self {
        Self::new(Some(Session {
            user_id: user_id.to_string(),
            token: token.to_string(),
        }))
    }

    /// Session from `[backend]` config. Both the user id and the token must
    /// be present.
    pub fn from_config(config: &crate::config::BackendConfig) -> Self {
        match (&config.user_id, &config.token) {
            (Some(user_id), Some(token)) if !user_id.is_empty() && !token.is_empty() => {
                Self::signed_in(user_id, token)
            }
            _ => Self::new(None),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn sign_in(&self, email: &str, _password: &str) -> Result<Session, SyncError> {
        Err(SyncError::InvalidInput(format!(
            "interactive sign-in is not available ({}); set TASKDASH_TOKEN and TASKDASH_USER_ID",
            email
        )))
    }

    async fn sign_out(&self) -> Result<(), SyncError> {
        self.tx.send_replace(None);
        Ok(())
    }

    fn current_session(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }
}
