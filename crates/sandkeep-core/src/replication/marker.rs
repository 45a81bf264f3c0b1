// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replication marker.
//!
//! The marker object's entire content is `<replication_id>|<timestamp>`, with
//! the timestamp in RFC 3339 UTC at millisecond precision.

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Marker content could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarkerParseError {
    /// No `|` separator.
    #[error("marker has no separator: {0:?}")]
    MissingSeparator(String),
    /// Empty replication id.
    #[error("marker has an empty replication id")]
    EmptyId,
    /// Timestamp is not RFC 3339.
    #[error("marker timestamp is invalid: {0}")]
    InvalidTimestamp(String),
}

/// Decoded marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Id generated for the replication that wrote the marker.
    pub replication_id: String,
    /// When the marker was written.
    pub written_at: DateTime<Utc>,
}

impl Marker {
    /// Marker for `replication_id` written at `written_at` (truncated to
    /// milliseconds so it survives a round trip).
    pub fn new(replication_id: impl Into<String>, written_at: DateTime<Utc>) -> Self {
        let written_at =
            DateTime::from_timestamp_millis(written_at.timestamp_millis()).unwrap_or(written_at);
        Self {
            replication_id: replication_id.into(),
            written_at,
        }
    }

    /// Encode as stored content.
    pub fn encode(&self) -> String {
        format!(
            "{}|{}",
            self.replication_id,
            self.written_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }

    /// Decode stored content.
    pub fn parse(content: &str) -> Result<Self, MarkerParseError> {
        let content = content.trim();
        let (id, timestamp) = content
            .split_once('|')
            .ok_or_else(|| MarkerParseError::MissingSeparator(content.to_string()))?;
        if id.is_empty() {
            return Err(MarkerParseError::EmptyId);
        }
        let written_at = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| MarkerParseError::InvalidTimestamp(format!("{}: {}", timestamp, e)))?
            .with_timezone(&Utc);
        Ok(Self {
            replication_id: id.to_string(),
            written_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_encode_is_bit_exact() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
            + chrono::Duration::milliseconds(589);
        let marker = Marker::new("3f1c2d9e-0000-4000-8000-000000000001", at);
        assert_eq!(
            marker.encode(),
            "3f1c2d9e-0000-4000-8000-000000000001|2025-03-14T09:26:53.589Z"
        );
        assert_eq!(Marker::parse(&marker.encode()), Ok(marker));
    }

    #[test]
    fn test_sub_millisecond_precision_is_dropped() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::microseconds(1_500);
        let marker = Marker::new("id", at);
        assert_eq!(marker.encode(), "id|2025-01-01T00:00:00.001Z");
    }

    #[test]
    fn test_parse_rejects_malformed_content() {
        assert!(matches!(
            Marker::parse("no-separator"),
            Err(MarkerParseError::MissingSeparator(_))
        ));
        assert_eq!(
            Marker::parse("|2025-01-01T00:00:00.000Z"),
            Err(MarkerParseError::EmptyId)
        );
        assert!(matches!(
            Marker::parse("id|yesterday"),
            Err(MarkerParseError::InvalidTimestamp(_))
        ));
    }
}
