//! Authenticated session with a short absolute expiry

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Profile of the account a credential belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Account email address, also used as the provider account id
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserProfile {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: None,
        }
    }
}

/// A persisted access credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub credential: String,
    pub profile: UserProfile,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        credential: impl Into<String>,
        profile: UserProfile,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            credential: credential.into(),
            profile,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    /// A session is valid up to and including its expiry instant
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    /// Provider addressing derived from this session
    pub fn mailbox(&self) -> Mailbox {
        Mailbox {
            account_id: self.profile.email.clone(),
            credential: self.credential.clone(),
        }
    }
}

/// Account id plus credential, passed to every provider call
#[derive(Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub account_id: String,
    pub credential: String,
}

impl Mailbox {
    pub fn new(account_id: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            credential: credential.into(),
        }
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("account_id", &self.account_id)
            .field("credential", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_expiry_boundary() {
        let issued = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let session = Session::new(
            "token",
            UserProfile::new("me@example.com"),
            issued,
            Duration::minutes(10),
        );

        assert!(session.is_valid_at(issued + Duration::minutes(9)));
        assert!(session.is_valid_at(issued + Duration::minutes(10)));
        assert!(!session.is_valid_at(issued + Duration::minutes(10) + Duration::seconds(1)));
    }

    #[test]
    fn test_mailbox_debug_redacts_credential() {
        let mailbox = Mailbox::new("me@example.com", "secret-token");
        let debug = format!("{:?}", mailbox);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("me@example.com"));
    }
}
