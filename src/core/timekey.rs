//! Filename-derived timestamp keys and inclusive time windows.
//!
//! Raw files are named `YYYY-MM-DD HH_MM_SS.<ext>`. The key is the part of
//! the basename before the first `.`; since the format is fixed-width it
//! sorts lexicographically in chronological order, and every comparison in
//! this crate is a plain string comparison on the key.

use std::fmt;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::error::{RegistryError, Result};

/// chrono format of a timestamp key.
pub const KEY_FORMAT: &str = "%Y-%m-%d %H_%M_%S";

/// Human-readable rendering used in summaries.
pub const READABLE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Earliest key, used as an open window start.
pub const EPOCH_KEY: &str = "1970-01-01 00_00_00";

/// A validated `%Y-%m-%d %H_%M_%S` string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimestampKey(String);

impl TimestampKey
{
    pub fn parse(raw: &str) -> Result<Self>
    {
        // Fixed width keeps string order equal to chronological order.
        if raw.len() != EPOCH_KEY.len()
        {
            return Err(RegistryError::InvalidTimestampKey(raw.to_string()));
        }
        let parsed = NaiveDateTime::parse_from_str(raw, KEY_FORMAT)
            .map_err(|_| RegistryError::InvalidTimestampKey(raw.to_string()))?;
        // chrono accepts space-padded fields; only the zero-padded form sorts.
        if parsed.format(KEY_FORMAT).to_string() != raw
        {
            return Err(RegistryError::InvalidTimestampKey(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Key of a raw file name: everything before the first `.`.
    pub fn from_file_name(name: &str) -> Result<Self>
    {
        let stem = name
            .split('.')
            .next()
            .unwrap_or(name);
        Self::parse(stem)
    }

    /// Key of the basename of `path`.
    pub fn from_path(path: &Path) -> Result<Self>
    {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RegistryError::InvalidTimestampKey(path.display().to_string()))?;
        Self::from_file_name(name)
    }

    pub fn epoch() -> Self
    {
        Self(EPOCH_KEY.to_string())
    }

    pub fn as_str(&self) -> &str
    {
        &self.0
    }

    pub fn to_datetime(&self) -> NaiveDateTime
    {
        // Validated on construction.
        NaiveDateTime::parse_from_str(&self.0, KEY_FORMAT).unwrap_or_default()
    }

    /// `2020-01-01 00:00:00 UTC`
    pub fn readable(&self) -> String
    {
        format!("{} UTC", self.to_datetime().format(READABLE_FORMAT))
    }
}

/// Days between two keys, rounded to one decimal.
pub fn days_between(
    first: &TimestampKey,
    last: &TimestampKey,
) -> f64
{
    let ms = (last.to_datetime() - first.to_datetime()).num_milliseconds() as f64;
    (ms / 86_400_000.0 * 10.0).round() / 10.0
}

impl TryFrom<String> for TimestampKey
{
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self>
    {
        Self::parse(&value)
    }
}

impl From<TimestampKey> for String
{
    fn from(key: TimestampKey) -> Self
    {
        key.0
    }
}

impl fmt::Display for TimestampKey
{
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result
    {
        f.write_str(&self.0)
    }
}

/// Inclusive `[start, end]` window over timestamp keys.
///
/// Serialized as a two-element array, matching the `UTC_range` field of an
/// exported registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "(String, String)", into = "(String, String)")]
pub struct TimeWindow
{
    start: TimestampKey,
    end: TimestampKey,
}

impl TimeWindow
{
    pub fn new(
        start: TimestampKey,
        end: TimestampKey,
    ) -> Result<Self>
    {
        if start > end
        {
            return Err(RegistryError::InvalidTimeWindow {
                start: start.0,
                end: end.0,
            });
        }
        Ok(Self { start, end })
    }

    pub fn parse(
        start: &str,
        end: &str,
    ) -> Result<Self>
    {
        Self::new(TimestampKey::parse(start)?, TimestampKey::parse(end)?)
    }

    /// Window from the epoch up to this window's end.
    pub fn up_to_end(&self) -> Self
    {
        Self {
            start: TimestampKey::epoch(),
            end: self.end.clone(),
        }
    }

    pub fn start(&self) -> &TimestampKey
    {
        &self.start
    }

    pub fn end(&self) -> &TimestampKey
    {
        &self.end
    }

    pub fn contains(
        &self,
        key: &TimestampKey,
    ) -> bool
    {
        key >= &self.start && key <= &self.end
    }
}

impl TryFrom<(String, String)> for TimeWindow
{
    type Error = RegistryError;

    fn try_from((start, end): (String, String)) -> Result<Self>
    {
        Self::parse(&start, &end)
    }
}

impl From<TimeWindow> for (String, String)
{
    fn from(w: TimeWindow) -> Self
    {
        (w.start.0, w.end.0)
    }
}

/// First/last observation, folded with min/max over any number of sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange
{
    pub first: Option<TimestampKey>,
    pub last: Option<TimestampKey>,
}

impl KeyRange
{
    pub fn new(
        first: Option<&TimestampKey>,
        last: Option<&TimestampKey>,
    ) -> Self
    {
        Self {
            first: first.cloned(),
            last: last.cloned(),
        }
    }

    /// Widen to cover `other`; `None` ends never win.
    pub fn include(
        &mut self,
        other: &KeyRange,
    )
    {
        if let Some(first) = &other.first
        {
            match &self.first
            {
                Some(current) if current <= first => {}
                _ => self.first = Some(first.clone()),
            }
        }
        if let Some(last) = &other.last
        {
            match &self.last
            {
                Some(current) if current >= last => {}
                _ => self.last = Some(last.clone()),
            }
        }
    }

    /// Days between first and last, if both are known.
    pub fn days(&self) -> Option<f64>
    {
        match (&self.first, &self.last)
        {
            (Some(first), Some(last)) => Some(days_between(first, last)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn key_from_file_name_ignores_extension()
    {
        let key = TimestampKey::from_file_name("2020-01-05 13_00_00.csv").unwrap();
        assert_eq!(key.as_str(), "2020-01-05 13_00_00");

        let key = TimestampKey::from_file_name("2020-01-05 13_00_00.mp4.tmp").unwrap();
        assert_eq!(key.as_str(), "2020-01-05 13_00_00");
    }

    #[test]
    fn rejects_non_conforming_names()
    {
        assert!(TimestampKey::from_file_name(".DS_Store").is_err());
        assert!(TimestampKey::parse("2020-01-05T13:00:00").is_err());
        assert!(TimestampKey::parse("2020-13-05 13_00_00").is_err());
        assert!(TimestampKey::parse("2020-1-5 13_00_00").is_err());
    }

    #[test]
    fn rejects_space_padded_fields_of_full_width()
    {
        for raw in ["2020-01-05  3_00_00", "2020-01- 5 13_00_00", "2020-1-05  13_00_00"]
        {
            assert_eq!(raw.len(), EPOCH_KEY.len(), "{raw:?}");
            assert!(TimestampKey::parse(raw).is_err(), "{raw:?} accepted");
        }
        assert!(TimestampKey::from_file_name("2020-01-05  3_00_00.csv").is_err());
    }

    #[test]
    fn window_is_inclusive_on_both_ends()
    {
        let w = TimeWindow::parse("2020-01-02 00_00_00", "2020-01-09 00_00_00").unwrap();
        let key = |s: &str| TimestampKey::parse(s).unwrap();

        assert!(!w.contains(&key("2020-01-01 23_00_00")));
        assert!(w.contains(&key("2020-01-02 00_00_00")));
        assert!(w.contains(&key("2020-01-05 00_00_00")));
        assert!(w.contains(&key("2020-01-09 00_00_00")));
        assert!(!w.contains(&key("2020-01-09 01_00_00")));
    }

    #[test]
    fn reversed_window_is_an_error()
    {
        let err = TimeWindow::parse("2020-02-01 00_00_00", "2020-01-01 00_00_00").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTimeWindow { .. }));
    }

    #[test]
    fn window_serializes_as_pair()
    {
        let w = TimeWindow::parse("2020-01-02 00_00_00", "2020-01-09 00_00_00").unwrap();
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"["2020-01-02 00_00_00","2020-01-09 00_00_00"]"#);

        let back: TimeWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn days_between_rounds_to_tenths()
    {
        let a = TimestampKey::parse("2020-01-01 00_00_00").unwrap();
        let b = TimestampKey::parse("2020-01-02 12_00_00").unwrap();
        assert_eq!(days_between(&a, &b), 1.5);
    }

    #[test]
    fn key_range_folds_min_max_ignoring_none()
    {
        let key = |s: &str| TimestampKey::parse(s).unwrap();
        let mut range = KeyRange::default();
        assert_eq!(range, KeyRange::default());

        range.include(&KeyRange::new(Some(&key("2020-01-05 00_00_00")), Some(&key("2020-01-06 00_00_00"))));
        range.include(&KeyRange::default());
        range.include(&KeyRange::new(Some(&key("2020-01-01 00_00_00")), Some(&key("2020-01-03 00_00_00"))));

        assert_eq!(range.first, Some(key("2020-01-01 00_00_00")));
        assert_eq!(range.last, Some(key("2020-01-06 00_00_00")));
        assert_eq!(range.days(), Some(5.0));
    }
}
