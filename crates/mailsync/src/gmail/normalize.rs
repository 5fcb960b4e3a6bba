//! Gmail API response normalization
//!
//! Converts Gmail API responses to [`MailItem`]s.

use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

use super::api::{GmailMessage, MessagePart, MessagePayload};
use crate::models::{Header, MailItem};

/// Excerpt length used when the snippet is empty and the body is used instead
const BODY_EXCERPT_CHARS: usize = 200;

/// Normalize a Gmail API message to a MailItem
///
/// `internalDate` becomes the structured date. When it is missing or zero the
/// item keeps only its raw headers, and date resolution falls back to the
/// `Date` header.
pub fn normalize_message(gmail_msg: GmailMessage) -> MailItem {
    let date = gmail_msg
        .internal_date
        .as_deref()
        .and_then(parse_internal_date);

    let headers: Vec<Header> = gmail_msg
        .payload
        .as_ref()
        .and_then(|p| p.headers.as_ref())
        .map(|hs| {
            hs.iter()
                .map(|h| Header::new(h.name.clone(), h.value.clone()))
                .collect()
        })
        .unwrap_or_default();

    let payload = gmail_msg.payload.as_ref();
    let sender = payload
        .and_then(|p| extract_header(p, "From"))
        .unwrap_or_default();
    let subject = payload
        .and_then(|p| extract_header(p, "Subject"))
        .unwrap_or_default();

    // Prefer the snippet, fall back to the start of the plain text body
    let excerpt = if !gmail_msg.snippet.is_empty() {
        decode_html_entities(&gmail_msg.snippet)
    } else {
        payload
            .and_then(extract_plain_text_body)
            .map(|body| body.chars().take(BODY_EXCERPT_CHARS).collect())
            .unwrap_or_default()
    };

    let mut builder = MailItem::builder(gmail_msg.id)
        .sender(sender)
        .subject(subject)
        .excerpt(excerpt)
        .headers(headers);
    if let Some(date) = date {
        builder = builder.date(date);
    }
    builder.build()
}

/// Parse Gmail's internalDate (milliseconds since epoch)
fn parse_internal_date(raw: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = raw.parse().ok()?;
    if millis <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}

/// Extract a header value by name
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

/// Extract plain text body from message payload
fn extract_plain_text_body(payload: &MessagePayload) -> Option<String> {
    // Check if this is a simple message with body data
    if let Some(body) = &payload.body
        && let Some(data) = &body.data
        && payload
            .mime_type
            .as_ref()
            .is_some_and(|m| m.starts_with("text/plain"))
    {
        return decode_base64_body(data);
    }

    // Check parts for text/plain
    if let Some(parts) = &payload.parts
        && let Some(text) = find_plain_text_in_parts(parts)
    {
        return Some(text);
    }

    None
}

/// Recursively search message parts for text/plain content
fn find_plain_text_in_parts(parts: &[MessagePart]) -> Option<String> {
    for part in parts {
        if part
            .mime_type
            .as_ref()
            .is_some_and(|m| m.starts_with("text/plain"))
            && let Some(body) = &part.body
            && let Some(data) = &body.data
            && let Some(text) = decode_base64_body(data)
        {
            return Some(text);
        }

        if let Some(nested) = &part.parts
            && let Some(text) = find_plain_text_in_parts(nested)
        {
            return Some(text);
        }
    }

    None
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data)
            && let Ok(s) = String::from_utf8(decoded)
        {
            return Some(s);
        }
    }

    None
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::{Header as ApiHeader, MessageBody};

    fn make_test_payload(headers: Vec<(&str, &str)>) -> MessagePayload {
        MessagePayload {
            headers: Some(
                headers
                    .into_iter()
                    .map(|(n, v)| ApiHeader {
                        name: n.to_string(),
                        value: v.to_string(),
                    })
                    .collect(),
            ),
            body: Some(MessageBody {
                size: Some(0),
                data: None,
            }),
            parts: None,
            mime_type: Some("text/plain".to_string()),
        }
    }

    fn make_message(internal_date: Option<&str>, snippet: &str, payload: MessagePayload) -> GmailMessage {
        GmailMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            label_ids: None,
            snippet: snippet.to_string(),
            internal_date: internal_date.map(str::to_string),
            payload: Some(payload),
        }
    }

    #[test]
    fn test_extract_header_case_insensitive() {
        let payload = make_test_payload(vec![("FROM", "test@example.com")]);
        assert_eq!(
            extract_header(&payload, "from"),
            Some("test@example.com".to_string())
        );
        assert_eq!(extract_header(&payload, "Cc"), None);
    }

    #[test]
    fn test_normalize_uses_internal_date() {
        let payload = make_test_payload(vec![
            ("From", "Bank <alerts@bank.example>"),
            ("Subject", "Statement ready"),
        ]);
        // 2025-01-14T10:00:00Z
        let item = normalize_message(make_message(Some("1736848800000"), "Your &amp; statement", payload));

        assert_eq!(item.id.as_str(), "m1");
        assert_eq!(item.sender, "Bank <alerts@bank.example>");
        assert_eq!(item.subject, "Statement ready");
        assert_eq!(item.excerpt, "Your & statement");
        assert_eq!(item.month_key().unwrap().as_str(), "2025-01");
        assert_eq!(item.headers.len(), 2);
    }

    #[test]
    fn test_normalize_without_internal_date_falls_back_to_header() {
        let payload = make_test_payload(vec![("Date", "Sat, 1 Feb 2025 08:00:00 +0000")]);
        let item = normalize_message(make_message(Some("0"), "", payload));

        assert_eq!(item.date, None);
        assert_eq!(item.month_key().unwrap().as_str(), "2025-02");
    }

    #[test]
    fn test_excerpt_falls_back_to_body() {
        let mut payload = make_test_payload(vec![]);
        payload.body = Some(MessageBody {
            size: Some(13),
            // "Hello, World!" in base64url
            data: Some("SGVsbG8sIFdvcmxkIQ".to_string()),
        });
        let item = normalize_message(make_message(None, "", payload));
        assert_eq!(item.excerpt, "Hello, World!");
    }

    #[test]
    fn test_decode_html_entities() {
        let input = "Hello &amp; welcome &lt;user&gt;";
        let output = decode_html_entities(input);
        assert_eq!(output, "Hello & welcome <user>");
    }
}
