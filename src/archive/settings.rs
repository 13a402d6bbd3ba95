//! Per-site camera settings (`setting/settings.txt`).
//!
//! The file is a list of `key=value` lines written by the site installer:
//!
//! ```text
//! time_start=0900
//! time_end=1700
//! time_interval=30
//! device_number=CAM-0042
//! ```

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub const SETTINGS_DIR: &str = "setting";
pub const SETTINGS_FILE: &str = "settings.txt";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("settings file not found")]
    Missing,

    #[error("failed to read settings file: {0}")]
    Unreadable(String),

    #[error("line {line}: expected key=value, got {text:?}")]
    MalformedLine { line: usize, text: String },

    #[error("missing required key {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("time_end {end} is before time_start {start}")]
    InvertedWindow { start: ClockTime, end: ClockTime },
}

/// Time of day with minute resolution, written as `HHMM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime {
    minutes: u32,
}

impl ClockTime {
    pub fn new(hours: u32, minutes: u32) -> Option<Self> {
        (hours < 24 && minutes < 60).then_some(Self {
            minutes: hours * 60 + minutes,
        })
    }

    /// Parse `HHMM` (a leading zero may be dropped, so `900` is 09:00).
    pub fn parse_hhmm(value: &str) -> Option<Self> {
        let value = value.trim();
        if !(3..=4).contains(&value.len()) || !value.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number: u32 = value.parse().ok()?;
        Self::new(number / 100, number % 100)
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }
}

impl From<NaiveTime> for ClockTime {
    fn from(time: NaiveTime) -> Self {
        Self {
            minutes: time.hour() * 60 + time.minute(),
        }
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}", self.minutes / 60, self.minutes % 60)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ClockTime::parse_hhmm(&value).ok_or_else(|| format!("invalid HHMM time {:?}", value))
    }
}

impl From<ClockTime> for String {
    fn from(time: ClockTime) -> Self {
        time.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSettings {
    pub time_start: ClockTime,
    pub time_end: ClockTime,
    /// Minutes between two shots.
    pub time_interval: u32,
    pub device_number: String,
}

impl SiteSettings {
    pub fn read(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SettingsError::Missing)
            }
            Err(e) => return Err(SettingsError::Unreadable(e.to_string())),
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        let mut values: HashMap<&str, &str> = HashMap::new();

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| SettingsError::MalformedLine {
                line: index + 1,
                text: line.to_string(),
            })?;
            values.insert(key.trim(), value.trim());
        }

        let time_start = required_time(&values, "time_start")?;
        let time_end = required_time(&values, "time_end")?;

        let interval = required(&values, "time_interval")?;
        let time_interval = interval
            .parse::<u32>()
            .ok()
            .filter(|minutes| *minutes > 0)
            .ok_or_else(|| SettingsError::InvalidValue {
                key: "time_interval",
                value: interval.to_string(),
            })?;

        let device_number = required(&values, "device_number")?.to_string();

        if time_end < time_start {
            return Err(SettingsError::InvertedWindow {
                start: time_start,
                end: time_end,
            });
        }

        Ok(Self {
            time_start,
            time_end,
            time_interval,
            device_number,
        })
    }

    /// Number of shots the camera takes over the whole shooting window.
    pub fn expected_shot_count(&self) -> u32 {
        self.shots_until(self.time_end)
    }

    /// Number of shots that should exist by `now`. Never exceeds
    /// [`expected_shot_count`](Self::expected_shot_count); zero before the
    /// window opens.
    pub fn shots_so_far(&self, now: ClockTime) -> u32 {
        self.shots_until(now.min(self.time_end))
    }

    fn shots_until(&self, until: ClockTime) -> u32 {
        if until < self.time_start {
            return 0;
        }
        (until.minutes() - self.time_start.minutes()) / self.time_interval + 1
    }
}

fn required<'a>(
    values: &HashMap<&'a str, &'a str>,
    key: &'static str,
) -> Result<&'a str, SettingsError> {
    values
        .get(key)
        .copied()
        .filter(|v| !v.is_empty())
        .ok_or(SettingsError::MissingKey(key))
}

fn required_time(
    values: &HashMap<&str, &str>,
    key: &'static str,
) -> Result<ClockTime, SettingsError> {
    let value = required(values, key)?;
    ClockTime::parse_hhmm(value).ok_or_else(|| SettingsError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str =
        "time_start=0900\ntime_end=1700\ntime_interval=30\ndevice_number=CAM-0042\n";

    fn hhmm(s: &str) -> ClockTime {
        ClockTime::parse_hhmm(s).unwrap()
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(hhmm("0900").minutes(), 540);
        assert_eq!(hhmm("900").minutes(), 540);
        assert_eq!(hhmm("1730").minutes(), 1050);
        assert_eq!(hhmm("0000").minutes(), 0);
        assert_eq!(ClockTime::parse_hhmm("2400"), None);
        assert_eq!(ClockTime::parse_hhmm("0960"), None);
        assert_eq!(ClockTime::parse_hhmm("9:00"), None);
        assert_eq!(ClockTime::parse_hhmm(""), None);
        assert_eq!(hhmm("0905").to_string(), "0905");
    }

    #[test]
    fn test_parse_settings() {
        let settings = SiteSettings::parse(SAMPLE).unwrap();
        assert_eq!(settings.time_start, hhmm("0900"));
        assert_eq!(settings.time_end, hhmm("1700"));
        assert_eq!(settings.time_interval, 30);
        assert_eq!(settings.device_number, "CAM-0042");
    }

    #[test]
    fn test_parse_tolerates_spacing_and_blank_lines() {
        let content = concat!(
            "\n time_start = 0600 \n\n",
            "time_end=1800\ntime_interval= 15\ndevice_number=7\nextra=ignored\n",
        );
        let settings = SiteSettings::parse(content).unwrap();
        assert_eq!(settings.time_start, hhmm("0600"));
        assert_eq!(settings.time_interval, 15);
        assert_eq!(settings.device_number, "7");
    }

    #[test]
    fn test_shot_counts() {
        let settings = SiteSettings::parse(SAMPLE).unwrap();
        assert_eq!(settings.expected_shot_count(), 17);
        assert_eq!(settings.shots_so_far(hhmm("1000")), 3);
        assert_eq!(settings.shots_so_far(hhmm("0900")), 1);
        assert_eq!(settings.shots_so_far(hhmm("1029")), 3);
        assert_eq!(settings.shots_so_far(hhmm("1030")), 4);
        assert_eq!(settings.shots_so_far(hhmm("2300")), 17);
    }

    #[test]
    fn test_shots_before_window_is_zero() {
        let settings = SiteSettings::parse(SAMPLE).unwrap();
        assert_eq!(settings.shots_so_far(hhmm("0600")), 0);
        assert_eq!(settings.shots_so_far(hhmm("0859")), 0);
    }

    #[test]
    fn test_missing_interval() {
        let content = "time_start=0900\ntime_end=1700\ndevice_number=1\n";
        assert_eq!(
            SiteSettings::parse(content),
            Err(SettingsError::MissingKey("time_interval"))
        );
    }

    #[test]
    fn test_malformed_line() {
        let content = "time_start=0900\nthis line is broken\n";
        assert_eq!(
            SiteSettings::parse(content),
            Err(SettingsError::MalformedLine {
                line: 2,
                text: "this line is broken".to_string()
            })
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let content = "time_start=0900\ntime_end=1700\ntime_interval=0\ndevice_number=1\n";
        assert!(matches!(
            SiteSettings::parse(content),
            Err(SettingsError::InvalidValue { key: "time_interval", .. })
        ));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let content = "time_start=1700\ntime_end=0900\ntime_interval=30\ndevice_number=1\n";
        assert!(matches!(
            SiteSettings::parse(content),
            Err(SettingsError::InvertedWindow { .. })
        ));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            SiteSettings::read(&dir.path().join("settings.txt")),
            Err(SettingsError::Missing)
        );
    }
}
