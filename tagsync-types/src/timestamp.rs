//! Millisecond timestamps for delta ordering and sync watermarks.
//!
//! Timestamps travel as RFC 3339 strings with millisecond precision
//! (`2024-05-01T10:00:00.000Z`), the same shape a browser `Date` produces,
//! so replicas on any platform agree on the dedup key of a delta.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A UTC instant, truncated to whole milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    /// Milliseconds since the Unix epoch.
    millis: i64,
}

impl Timestamp {
    /// The Unix epoch. Watermarks of peers seen for the first time start here.
    pub const EPOCH: Self = Self { millis: 0 };

    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            millis: Utc::now().timestamp_millis(),
        }
    }

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    /// Milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.millis
    }

    /// Returns the current time, bumped past `prev` if the clock has not
    /// advanced since.
    ///
    /// Used when stamping local deltas so two mutations of the same item
    /// within one millisecond still get distinct dedup keys.
    #[must_use]
    pub fn after(prev: Option<Self>) -> Self {
        let now = Self::now();
        match prev {
            Some(p) if now.millis <= p.millis => Self {
                millis: p.millis.saturating_add(1),
            },
            _ => now,
        }
    }

    /// Converts to a chrono `DateTime`.
    #[must_use]
    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis).unwrap_or_default()
    }

    /// Parses an RFC 3339 string, dropping sub-millisecond precision.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| crate::Error::InvalidTimestamp(format!("{s}: {e}")))?;
        Ok(Self {
            millis: dt.timestamp_millis(),
        })
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::EPOCH
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_datetime().to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl FromStr for Timestamp {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
