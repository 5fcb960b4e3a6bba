//! Gmail API HTTP client
//!
//! Uses synchronous HTTP (ureq); the [`MailProvider`] implementation runs each
//! call on tokio's blocking pool so callers can suspend on it.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;

use super::api::{GmailMessage, ListMessagesResponse, ProfileResponse};
use super::normalize_message;
use crate::error::{AuthRejectedError, RateLimitedError};
use crate::models::{MailItem, MailItemId, Mailbox, UserProfile};
use crate::provider::MailProvider;

/// Gmail caps a single page of message ids at 500
const MAX_PAGE_SIZE: usize = 500;

/// Gmail API client
#[derive(Clone)]
pub struct GmailClient {
    agent: ureq::Agent,
    base_url: String,
}

impl GmailClient {
    /// Default Gmail API base URL
    pub const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Create a client against the public Gmail API
    pub fn new() -> Self {
        Self::with_base_url(Self::BASE_URL)
    }

    /// Create a client against a custom base URL (proxies, test servers)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn user_url(&self, account_id: &str) -> String {
        format!("{}/users/{}", self.base_url, urlencoding::encode(account_id))
    }

    /// List one page of message ids matching a query
    pub fn list_messages(
        &self,
        mailbox: &Mailbox,
        query: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let mut url = format!(
            "{}/messages?q={}&maxResults={}",
            self.user_url(&mailbox.account_id),
            urlencoding::encode(query),
            page_size.clamp(1, MAX_PAGE_SIZE)
        );

        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let mut response = self
            .agent
            .get(&url)
            .header("Authorization", &format!("Bearer {}", mailbox.credential))
            .call()
            .map_err(|e| classify_http_error(e, "list messages"))?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse list messages response")
    }

    /// List every message id matching a query, following pagination
    ///
    /// Pages are requested `page_size` ids at a time until Gmail stops
    /// returning a `nextPageToken`.
    pub fn list_message_ids_blocking(
        &self,
        mailbox: &Mailbox,
        query: &str,
        page_size: usize,
    ) -> Result<Vec<MailItemId>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0;

        loop {
            let response = self.list_messages(mailbox, query, page_size, page_token.as_deref())?;
            pages += 1;

            if let Some(messages) = response.messages {
                ids.extend(messages.into_iter().map(|m| MailItemId::new(m.id)));
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        log::debug!("Listed {} ids in {} page(s) for {}", ids.len(), pages, query);
        Ok(ids)
    }

    /// Get full message details by ID
    pub fn fetch_message(&self, mailbox: &Mailbox, id: &MailItemId) -> Result<GmailMessage> {
        let url = format!(
            "{}/messages/{}?format=full",
            self.user_url(&mailbox.account_id),
            urlencoding::encode(id.as_str())
        );

        let mut response = self
            .agent
            .get(&url)
            .header("Authorization", &format!("Bearer {}", mailbox.credential))
            .call()
            .map_err(|e| classify_http_error(e, "get message"))?;

        response
            .body_mut()
            .read_json()
            .with_context(|| format!("Failed to parse message response for {}", id))
    }

    /// Fetch the profile of the credential's own account
    pub fn fetch_profile(&self, credential: &str) -> Result<ProfileResponse> {
        let url = format!("{}/profile", self.user_url("me"));

        let mut response = self
            .agent
            .get(&url)
            .header("Authorization", &format!("Bearer {}", credential))
            .call()
            .map_err(|e| classify_http_error(e, "get profile"))?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse profile response")
    }
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Map HTTP failures onto the typed provider errors
fn classify_http_error(err: ureq::Error, action: &str) -> anyhow::Error {
    match err {
        ureq::Error::StatusCode(401) | ureq::Error::StatusCode(403) => {
            anyhow::Error::new(AuthRejectedError).context(format!("Failed to {}", action))
        }
        ureq::Error::StatusCode(429) => {
            anyhow::Error::new(RateLimitedError).context(format!("Failed to {}", action))
        }
        e => anyhow!("Failed to {}: {}", action, e),
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn list_message_ids(
        &self,
        mailbox: &Mailbox,
        query: &str,
        page_size: usize,
    ) -> Result<Vec<MailItemId>> {
        let client = self.clone();
        let mailbox = mailbox.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || {
            client.list_message_ids_blocking(&mailbox, &query, page_size)
        })
        .await
        .context("Gmail list task panicked")?
    }

    async fn get_message(&self, mailbox: &Mailbox, id: &MailItemId) -> Result<MailItem> {
        let client = self.clone();
        let mailbox = mailbox.clone();
        let id = id.clone();
        let message = tokio::task::spawn_blocking(move || client.fetch_message(&mailbox, &id))
            .await
            .context("Gmail fetch task panicked")??;
        Ok(normalize_message(message))
    }

    async fn get_profile(&self, credential: &str) -> Result<UserProfile> {
        let client = self.clone();
        let credential = credential.to_string();
        let profile = tokio::task::spawn_blocking(move || client.fetch_profile(&credential))
            .await
            .context("Gmail profile task panicked")??;
        Ok(UserProfile::new(profile.email_address))
    }
}
