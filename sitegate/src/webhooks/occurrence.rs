//! Event occurrences and their canonical wire body.
//!
//! An occurrence is serialized exactly once, when it is created. Every
//! delivery attempt for it, including retries, sends the same bytes, so the
//! signature a receiver sees never changes between attempts.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::EventKind;

/// Body shape sent to webhook endpoints.
#[derive(Serialize)]
struct WireBody<'a> {
    event: EventKind,
    timestamp: &'a str,
    site_id: &'a str,
    data: &'a serde_json::Value,
}

/// One domain event bound for delivery, with its frozen body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: String,
    pub event: EventKind,
    pub site_id: String,
    pub timestamp: DateTime<Utc>,
    pub body: Bytes,
}

impl Occurrence {
    /// Build an occurrence stamped with the current time.
    pub fn new(
        site_id: &str,
        event: EventKind,
        data: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Self::at(site_id, event, data, Utc::now())
    }

    pub fn at(
        site_id: &str,
        event: EventKind,
        data: &serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let stamp = format_timestamp(timestamp);
        let body = serde_json::to_vec(&WireBody {
            event,
            timestamp: &stamp,
            site_id,
            data,
        })?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            event,
            site_id: site_id.to_string(),
            timestamp,
            body: Bytes::from(body),
        })
    }

    /// ISO-8601 timestamp as it appears in the body and `X-Timestamp`.
    pub fn timestamp_header(&self) -> String {
        format_timestamp(self.timestamp)
    }

    /// Decoded body, used as the ledger's payload snapshot.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_body_shape() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let occurrence =
            Occurrence::at("site-1", EventKind::EntryPublished, &json!({"id": 7}), at).unwrap();

        assert_eq!(
            std::str::from_utf8(&occurrence.body).unwrap(),
            r#"{"event":"entry.published","timestamp":"2024-05-01T12:30:00.000Z","site_id":"site-1","data":{"id":7}}"#
        );
        assert_eq!(occurrence.timestamp_header(), "2024-05-01T12:30:00.000Z");
    }

    #[test]
    fn test_payload_snapshot() {
        let occurrence =
            Occurrence::new("site-1", EventKind::TermDeleted, &json!({"slug": "news"})).unwrap();
        let payload = occurrence.payload();

        assert_eq!(payload["event"], "term.deleted");
        assert_eq!(payload["site_id"], "site-1");
        assert_eq!(payload["data"]["slug"], "news");
    }

    #[test]
    fn test_clone_shares_exact_bytes() {
        let occurrence =
            Occurrence::new("site-1", EventKind::CssUpdated, &json!({"css": "a{}"})).unwrap();
        let retry = occurrence.clone();
        assert_eq!(occurrence.body, retry.body);
        assert_eq!(occurrence.id, retry.id);
    }
}
