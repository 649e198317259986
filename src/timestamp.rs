//! Wall-clock timestamp handling shared by segments, records and buckets.

use chrono::{DateTime, Local, TimeZone, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SEGMENT_TIME_FORMAT: &str = "%Y%m%d%H%M";

/// A point in time, stored as microseconds since the Unix epoch.
///
/// Mirrors the teacher's `IggyTimestamp` (`sdk/src/utils/timestamp.rs`):
/// a thin newtype over microsecond precision, with `now()` built on
/// `SystemTime` rather than reaching for a timestamp-source crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_micros() as u64;
        Timestamp(micros)
    }

    pub fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    pub fn from_secs(secs: u64) -> Self {
        Timestamp(secs * 1_000_000)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Seconds since the epoch as a float, matching the record format's
    /// `send_timestamp: float seconds` field in spec.md §3.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Floor this timestamp down to the start of its `bucket_minutes`-sized
    /// window, in whole seconds.
    pub fn bucket_floor(&self, bucket_minutes: u32) -> Timestamp {
        let bucket_secs = bucket_minutes as u64 * 60;
        Timestamp::from_secs((self.as_secs() / bucket_secs) * bucket_secs)
    }

    /// Render as the `YYYYMMDDhhmm` component of a segment file name, in
    /// local time (matching the Python original's `time.localtime`-based
    /// `_filetime`).
    pub fn to_segment_name_part(&self) -> String {
        let dt: DateTime<Local> = Local
            .timestamp_opt(self.as_secs() as i64, 0)
            .single()
            .expect("bucket-floored timestamp must be unambiguous");
        dt.format(SEGMENT_TIME_FORMAT).to_string()
    }

    /// Parse a `YYYYMMDDhhmm` segment-name component back into a bucket
    /// timestamp. Reversible with `to_segment_name_part` (spec.md §4.2:
    /// "the name-to-bucket mapping is reversible").
    pub fn from_segment_name_part(part: &str) -> Option<Timestamp> {
        let naive = chrono::NaiveDateTime::parse_from_str(part, SEGMENT_TIME_FORMAT).ok()?;
        let local = Local.from_local_datetime(&naive).single()?;
        Some(Timestamp::from_secs(local.with_timezone(&Utc).timestamp() as u64))
    }
}

impl From<u64> for Timestamp {
    fn from(micros: u64) -> Self {
        Timestamp(micros)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_floor_is_idempotent() {
        let t = Timestamp::from_secs(1_700_000_123);
        let floored = t.bucket_floor(5);
        assert_eq!(floored.bucket_floor(5), floored);
        assert!(floored.as_secs() <= t.as_secs());
    }

    #[test]
    fn segment_name_round_trips() {
        let t = Timestamp::from_secs(1_700_000_100).bucket_floor(5);
        let rendered = t.to_segment_name_part();
        let parsed = Timestamp::from_segment_name_part(&rendered).unwrap();
        assert_eq!(parsed, t);
    }
}
