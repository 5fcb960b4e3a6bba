//! Persisted access credential with an absolute expiry
//!
//! There is no refresh path: once a session expires the caller must sign in
//! again. Expired sessions are purged when read.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::models::{Session, UserProfile};
use crate::storage::LocalStore;

pub struct SessionStore {
    store: Arc<dyn LocalStore>,
    key: String,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(store: Arc<dyn LocalStore>, namespace: &str, ttl: Duration) -> Self {
        Self {
            store,
            key: format!("mail_session:{}", namespace),
            ttl,
        }
    }

    /// Persist a credential, replacing any previous session
    pub fn persist(&self, credential: &str, profile: UserProfile) -> Result<Session> {
        self.persist_at(credential, profile, Utc::now())
    }

    pub fn persist_at(
        &self,
        credential: &str,
        profile: UserProfile,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let session = Session::new(credential, profile, now, self.ttl);
        let json = serde_json::to_string(&session).context("Failed to serialize session")?;
        self.store
            .set(&self.key, &json)
            .context("Failed to persist session")?;
        Ok(session)
    }

    /// The current session, if one exists and has not expired
    pub fn retrieve(&self) -> Result<Option<Session>> {
        self.retrieve_at(Utc::now())
    }

    pub fn retrieve_at(&self, now: DateTime<Utc>) -> Result<Option<Session>> {
        let Some(json) = self.store.get(&self.key)? else {
            return Ok(None);
        };

        let session: Session = match serde_json::from_str(&json) {
            Ok(session) => session,
            Err(e) => {
                log::warn!("Discarding unreadable session: {}", e);
                self.invalidate()?;
                return Ok(None);
            }
        };

        if !session.is_valid_at(now) {
            log::info!("Session for {} expired at {}", session.profile.email, session.expires_at);
            self.invalidate()?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    pub fn invalidate(&self) -> Result<()> {
        self.store
            .remove(&self.key)
            .context("Failed to remove session")
    }
}
