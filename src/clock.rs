use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};
use std::fmt;

/// All time-of-day decisions run in the school's zone (Asia/Jakarta, UTC+7,
/// no DST), regardless of the host locale.
pub const JAKARTA_OFFSET_SECS: i32 = 7 * 3600;

pub fn school_zone_offset() -> FixedOffset {
    FixedOffset::east_opt(JAKARTA_OFFSET_SECS).expect("static offset")
}

pub trait Clock {
    fn now(&self) -> DateTime<FixedOffset>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&school_zone_offset())
    }
}

/// Parse an RFC3339 timestamp and normalize it into the school zone.
pub fn parse_instant(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&school_zone_offset()))
}

/// Midnight-anchored day key (YYYY-MM-DD) in the school zone.
pub fn day_key(at: DateTime<FixedOffset>) -> NaiveDate {
    at.date_naive()
}

/// Interpret a local date+time-of-day in the school zone.
#[allow(dead_code)]
pub fn at_local(date: NaiveDate, tod: TimeOfDay) -> DateTime<FixedOffset> {
    school_zone_offset()
        .from_local_datetime(
            &date
                .and_hms_opt(u32::from(tod.hour()), u32::from(tod.minute()), 0)
                .expect("time-of-day in range"),
        )
        .single()
        .expect("fixed offset has no gaps")
}

/// Minutes since midnight. Chronological ordering is the integer ordering,
/// not a property of any string encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn new(hour: u16, minute: u16) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self(hour * 60 + minute))
    }

    /// Accepts zero-padded or not ("07:05", "7:5").
    pub fn parse(raw: &str) -> Option<Self> {
        let (h, m) = raw.trim().split_once(':')?;
        Self::new(h.parse().ok()?, m.parse().ok()?)
    }

    pub fn from_instant(at: DateTime<FixedOffset>) -> Self {
        Self((at.hour() * 60 + at.minute()) as u16)
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }

    #[allow(dead_code)]
    pub fn minutes_since_midnight(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl serde::Serialize for TimeOfDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for TimeOfDay {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: String = serde::Deserialize::deserialize(deserializer)?;
        TimeOfDay::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("bad time of day: {raw}")))
    }
}
