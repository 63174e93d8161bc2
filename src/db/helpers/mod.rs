use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::models::{Metadata, Sentiment};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Fixed-width RFC 3339 so that lexical order in SQLite matches time order.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_sentiment(value: &str) -> Result<Sentiment> {
    value
        .parse()
        .map_err(|_| anyhow!("unknown sentiment {value}"))
}

pub fn encode_metadata(metadata: Option<&Metadata>) -> Result<Option<String>> {
    metadata
        .map(|map| serde_json::to_string(map).context("failed to serialize metadata"))
        .transpose()
}

pub fn decode_metadata(value: Option<String>) -> Result<Option<Metadata>> {
    match value {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .context("failed to parse metadata"),
        None => Ok(None),
    }
}
