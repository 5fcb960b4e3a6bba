//! MailItem model representing one synchronized message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::MonthKey;

/// Provider-assigned message identifier
///
/// Identity for deduplication is the identifier alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MailItemId(pub String);

impl MailItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MailItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MailItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MailItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw header (name-value pair)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A single synchronized message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailItem {
    /// Provider message ID
    pub id: MailItemId,
    /// Structured timestamp, when the provider supplied one
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    /// Raw From header value
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    /// Short body excerpt
    #[serde(default)]
    pub excerpt: String,
    /// Raw headers as returned by the provider
    #[serde(default)]
    pub headers: Vec<Header>,
    /// User-set flag, carried across merges
    #[serde(default)]
    pub ignored: bool,
}

impl MailItem {
    /// Create a new item builder
    pub fn builder(id: impl Into<MailItemId>) -> MailItemBuilder {
        MailItemBuilder::new(id.into())
    }

    /// Look up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Resolve the item's timestamp
    ///
    /// The structured `date` field wins; otherwise the `Date` header is
    /// parsed. Returns `None` when neither yields a valid timestamp.
    pub fn resolved_timestamp(&self) -> Option<DateTime<Utc>> {
        self.date
            .or_else(|| self.header("Date").and_then(parse_header_date))
    }

    /// Month partition this item belongs to, if it has a resolvable date
    pub fn month_key(&self) -> Option<MonthKey> {
        self.resolved_timestamp().map(MonthKey::from_datetime)
    }
}

/// Parse a free-text Date header
///
/// Accepts RFC 2822 (with or without a trailing `(TZ)` comment) and RFC 3339.
pub fn parse_header_date(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    let without_comment = match trimmed.rfind('(') {
        Some(pos) if trimmed.ends_with(')') => trimmed[..pos].trim_end(),
        _ => trimmed,
    };

    DateTime::parse_from_rfc2822(without_comment)
        .or_else(|_| DateTime::parse_from_rfc3339(without_comment))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Order items ascending by resolved timestamp
///
/// Undated items sort last. The sort is stable, so undated items (and
/// items sharing a timestamp) keep their relative order.
pub fn sort_chronologically(items: &mut [MailItem]) {
    items.sort_by(|a, b| match (a.resolved_timestamp(), b.resolved_timestamp()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Builder for creating MailItem instances
pub struct MailItemBuilder {
    id: MailItemId,
    date: Option<DateTime<Utc>>,
    sender: String,
    subject: String,
    excerpt: String,
    headers: Vec<Header>,
    ignored: bool,
}

impl MailItemBuilder {
    fn new(id: MailItemId) -> Self {
        Self {
            id,
            date: None,
            sender: String::new(),
            subject: String::new(),
            excerpt: String::new(),
            headers: Vec::new(),
            ignored: false,
        }
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = excerpt.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn headers(mut self, headers: Vec<Header>) -> Self {
        self.headers = headers;
        self
    }

    pub fn ignored(mut self, ignored: bool) -> Self {
        self.ignored = ignored;
        self
    }

    pub fn build(self) -> MailItem {
        MailItem {
            id: self.id,
            date: self.date,
            sender: self.sender,
            subject: self.subject,
            excerpt: self.excerpt,
            headers: self.headers,
            ignored: self.ignored,
        }
    }
}
