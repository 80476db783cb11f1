#![forbid(unsafe_code)]

//! Playlist item filtering.
//!
//! All present criteria must match (logical AND); absent criteria impose no
//! constraint. Privacy is handled by the orchestrator, not here: private
//! items are always skipped regardless of what the filter says.

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};

use crate::api::PlaylistItem;

/// Filter criteria for playlist items. Field tests are independent and
/// order-insensitive.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Keep items added to the playlist at or after this instant.
    pub added_since: Option<DateTime<Utc>>,
    /// Keep items whose video was originally published at or after this instant.
    pub published_since: Option<DateTime<Utc>>,
    /// Keep items whose title contains this substring, case-insensitively.
    pub name: Option<String>,
}

impl ItemFilter {
    pub fn matches(&self, item: &PlaylistItem) -> bool {
        if let Some(name) = &self.name
            && !item.title.to_lowercase().contains(&name.to_lowercase())
        {
            return false;
        }

        // An item missing the relevant timestamp cannot satisfy a set
        // threshold and is excluded.
        if let Some(threshold) = self.added_since
            && !item.published_at.is_some_and(|added| added >= threshold)
        {
            return false;
        }

        if let Some(threshold) = self.published_since
            && !item
                .video_published_at
                .is_some_and(|published| published >= threshold)
        {
            return false;
        }

        true
    }
}

/// Parses a CLI-supplied threshold: RFC 3339, or a bare `YYYY-MM-DD` date
/// taken as UTC midnight.
pub fn parse_since(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid date: {value}"))?;
        return Ok(midnight.and_utc());
    }
    Err(anyhow!(
        "could not parse timestamp {value:?}; use RFC 3339 or YYYY-MM-DD"
    ))
}
