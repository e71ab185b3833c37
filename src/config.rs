use crate::clock::TimeOfDay;
use crate::db;
use crate::geo::GeoPoint;
use crate::validate::{CheckInWindow, SchoolZone};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

const SETTINGS_KEY: &str = "school";

/// All tunable school settings, resolved in one place so every reader sees
/// the same defaults instead of re-deriving them ad hoc.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchoolConfig {
    pub school_name: String,
    pub academic_year: String,
    pub semester: u8,
    pub zone: SchoolZone,
    pub window: CheckInWindow,
    pub prevent_multiple_checkin: bool,
}

impl Default for SchoolConfig {
    fn default() -> Self {
        Self {
            school_name: "Sekolah".to_string(),
            academic_year: "2025/2026".to_string(),
            semester: 1,
            zone: SchoolZone {
                center: GeoPoint::new(-6.2088, 106.8456),
                radius_meters: 500.0,
            },
            window: CheckInWindow {
                start: TimeOfDay::new(6, 30).expect("static time"),
                late_threshold: TimeOfDay::new(7, 15).expect("static time"),
                end: TimeOfDay::new(7, 30).expect("static time"),
            },
            prevent_multiple_checkin: true,
        }
    }
}

impl SchoolConfig {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        match db::settings_get_json(conn, SETTINGS_KEY)? {
            Some(raw) => Ok(serde_json::from_value(raw)?),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(conn, SETTINGS_KEY, &serde_json::to_value(self)?)
    }

    /// Zone radius and window ordering are the two invariants an admin can
    /// break through the settings form.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.zone.center.in_range() {
            return Err(ConfigError::BadZone(
                "zone center outside latitude/longitude range",
            ));
        }
        if !(self.zone.radius_meters.is_finite() && self.zone.radius_meters > 0.0) {
            return Err(ConfigError::BadZone("radiusMeters must be > 0"));
        }
        if !self.window.is_ordered() {
            return Err(ConfigError::BadWindow(
                "window must satisfy start <= lateThreshold <= end",
            ));
        }
        if !(1..=2).contains(&self.semester) {
            return Err(ConfigError::BadValue("semester must be 1 or 2"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    BadZone(&'static str),
    BadWindow(&'static str),
    BadValue(&'static str),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::BadWindow(_) => "invalid_window",
            ConfigError::BadZone(_) | ConfigError::BadValue(_) => "bad_params",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ConfigError::BadZone(m) | ConfigError::BadWindow(m) | ConfigError::BadValue(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SchoolConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_window_rejected() {
        let mut cfg = SchoolConfig::default();
        cfg.window.late_threshold = TimeOfDay::new(6, 0).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_zone_rejected() {
        let mut cfg = SchoolConfig::default();
        cfg.zone.radius_meters = 0.0;
        assert!(cfg.validate().is_err());
        cfg.zone.radius_meters = 500.0;
        cfg.zone.center.latitude = 91.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn roundtrips_through_settings_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE settings(key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .unwrap();

        // Missing row falls back to the single source of defaults.
        let cfg = SchoolConfig::load(&conn).unwrap();
        assert!(cfg.prevent_multiple_checkin);

        let mut cfg = cfg;
        cfg.zone.radius_meters = 250.0;
        cfg.prevent_multiple_checkin = false;
        cfg.save(&conn).unwrap();

        let back = SchoolConfig::load(&conn).unwrap();
        assert_eq!(back.zone.radius_meters, 250.0);
        assert!(!back.prevent_multiple_checkin);
    }
}
