//! [`SimTime`] – immutable calendar timestamp with millisecond resolution.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::BridgeError;

/// Canonical textual form, e.g. `2024-03-01 12:00:05.250`.
const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A calendar timestamp (year … millisecond) used to tag frames and to feed
/// the frequency subdivider.
///
/// Sub-millisecond precision is always truncated, so two `SimTime`s built
/// from the same calendar fields compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(NaiveDateTime);

impl SimTime {
    /// Build a timestamp from calendar fields.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidTime`] when any field is out of range.
    pub fn new(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
        millisecond: u32,
    ) -> Result<Self, BridgeError> {
        if millisecond > 999 {
            return Err(BridgeError::InvalidTime(format!(
                "millisecond {millisecond} out of range"
            )));
        }
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_milli_opt(hour, minute, second, millisecond))
            .map(SimTime)
            .ok_or_else(|| {
                BridgeError::InvalidTime(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{millisecond:03}"
                ))
            })
    }

    /// Current UTC wall-clock time.
    pub fn now() -> Self {
        Self::from_naive(Utc::now().naive_utc())
    }

    /// Wrap a [`NaiveDateTime`], truncating to whole milliseconds.
    pub fn from_naive(dt: NaiveDateTime) -> Self {
        let millis = (dt.nanosecond() / 1_000_000).min(999);
        // with_nanosecond only fails for values >= 2e9, which the clamp rules out.
        SimTime(dt.with_nanosecond(millis * 1_000_000).unwrap_or(dt))
    }

    /// The underlying chrono value.
    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    pub fn second(&self) -> u32 {
        self.0.second()
    }

    pub fn millisecond(&self) -> u32 {
        self.0.nanosecond() / 1_000_000
    }

    /// Microseconds elapsed since midnight, at millisecond resolution.
    pub fn micros_of_day(&self) -> i64 {
        let seconds = i64::from(self.hour() * 3600 + self.minute() * 60 + self.second());
        seconds * 1_000_000 + i64::from(self.millisecond()) * 1000
    }

    /// Shift by `millis` (may be negative). Saturates at chrono's range limits.
    pub fn add_millis(&self, millis: i64) -> Self {
        let shifted = TimeDelta::try_milliseconds(millis)
            .and_then(|delta| self.0.checked_add_signed(delta))
            .unwrap_or(self.0);
        SimTime(shifted)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(CANONICAL_FORMAT))
    }
}

impl FromStr for SimTime {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(s.trim(), CANONICAL_FORMAT)
            .map(Self::from_naive)
            .map_err(|e| BridgeError::InvalidTime(format!("'{s}': {e}")))
    }
}

impl Serialize for SimTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SimTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_form() {
        let t = SimTime::new(2024, 3, 1, 7, 5, 9, 42).unwrap();
        assert_eq!(t.to_string(), "2024-03-01 07:05:09.042");
    }

    #[test]
    fn parse_roundtrips_canonical_form() {
        let t: SimTime = "2023-12-31 23:59:59.999".parse().unwrap();
        assert_eq!(t, SimTime::new(2023, 12, 31, 23, 59, 59, 999).unwrap());
        assert!("yesterday".parse::<SimTime>().is_err());
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert!(matches!(
            SimTime::new(2024, 2, 30, 0, 0, 0, 0),
            Err(BridgeError::InvalidTime(_))
        ));
        assert!(SimTime::new(2024, 1, 1, 24, 0, 0, 0).is_err());
        assert!(SimTime::new(2024, 1, 1, 0, 0, 0, 1000).is_err());
    }

    #[test]
    fn micros_of_day_counts_from_midnight() {
        let t = SimTime::new(2024, 1, 1, 1, 2, 3, 4).unwrap();
        assert_eq!(t.micros_of_day(), (3600 + 120 + 3) * 1_000_000 + 4_000);
        let midnight = SimTime::new(2024, 1, 1, 0, 0, 0, 0).unwrap();
        assert_eq!(midnight.micros_of_day(), 0);
    }

    #[test]
    fn from_naive_truncates_sub_millisecond_precision() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_nano_opt(0, 0, 0, 1_999_999)
            .unwrap();
        let t = SimTime::from_naive(dt);
        assert_eq!(t.millisecond(), 1);
        assert_eq!(t, SimTime::new(2024, 1, 1, 0, 0, 0, 1).unwrap());
    }

    #[test]
    fn add_millis_crosses_midnight() {
        let t = SimTime::new(2024, 1, 1, 23, 59, 59, 900).unwrap();
        let next = t.add_millis(200);
        assert_eq!(next.to_string(), "2024-01-02 00:00:00.100");
        assert!(next > t);
    }

    #[test]
    fn serde_uses_canonical_string() {
        let t = SimTime::new(2024, 6, 15, 12, 0, 0, 500).unwrap();
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"2024-06-15 12:00:00.500\"");
        let back: SimTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
