use crate::clock::TimeOfDay;
use crate::geo::{self, GeoPoint};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolZone {
    pub center: GeoPoint,
    pub radius_meters: f64,
}

/// The window during which a check-in is accepted. `start ≤ late_threshold
/// ≤ end` is validated wherever a window enters the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInWindow {
    pub start: TimeOfDay,
    pub late_threshold: TimeOfDay,
    pub end: TimeOfDay,
}

impl CheckInWindow {
    pub fn is_ordered(&self) -> bool {
        self.start <= self.late_threshold && self.late_threshold <= self.end
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationCheck {
    pub valid: bool,
    pub distance_meters: f64,
}

/// Boundary is inclusive: standing exactly on the fence counts as inside.
/// A NaN distance fails the comparison, so malformed coordinates come out
/// as invalid rather than panicking.
pub fn validate_location(point: GeoPoint, zone: &SchoolZone) -> LocationCheck {
    let distance_meters = geo::distance_meters(point, zone.center);
    LocationCheck {
        valid: distance_meters <= zone.radius_meters,
        distance_meters,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeStatus {
    Early,
    Ontime,
    Late,
    Closed,
}

impl TimeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeStatus::Early => "early",
            TimeStatus::Ontime => "ontime",
            TimeStatus::Late => "late",
            TimeStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeCheck {
    pub status: TimeStatus,
    pub valid: bool,
}

pub fn validate_time(now: TimeOfDay, window: &CheckInWindow) -> TimeCheck {
    let status = if now < window.start {
        TimeStatus::Early
    } else if now > window.end {
        TimeStatus::Closed
    } else if now <= window.late_threshold {
        TimeStatus::Ontime
    } else {
        TimeStatus::Late
    };
    TimeCheck {
        status,
        valid: matches!(status, TimeStatus::Ontime | TimeStatus::Late),
    }
}

/// Status stored on a day's attendance record. Absent is never derived at
/// check-in; the reporting layer infers it from missing records on working
/// days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

pub fn derive_check_in_status(now: TimeOfDay, window: &CheckInWindow) -> AttendanceStatus {
    if now <= window.late_threshold {
        AttendanceStatus::Present
    } else {
        AttendanceStatus::Late
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> CheckInWindow {
        CheckInWindow {
            start: TimeOfDay::parse("06:30").unwrap(),
            late_threshold: TimeOfDay::parse("07:15").unwrap(),
            end: TimeOfDay::parse("07:30").unwrap(),
        }
    }

    fn zone() -> SchoolZone {
        SchoolZone {
            center: GeoPoint::new(-6.2088, 106.8456),
            radius_meters: 500.0,
        }
    }

    #[test]
    fn fence_boundary_is_inclusive() {
        // Walk due north until the measured distance equals the radius,
        // then assert the inclusive/exclusive split around it.
        let z = SchoolZone {
            center: GeoPoint::new(-6.2088, 106.8456),
            radius_meters: 0.0,
        };
        let on_center = validate_location(z.center, &z);
        assert!(on_center.valid);
        assert_eq!(on_center.distance_meters, 0.0);

        let z = zone();
        let probe = GeoPoint::new(-6.2090, 106.8459);
        let d = validate_location(probe, &z).distance_meters;
        let exact = SchoolZone {
            center: z.center,
            radius_meters: d,
        };
        assert!(validate_location(probe, &exact).valid);
        let just_under = SchoolZone {
            center: z.center,
            radius_meters: d - 0.001,
        };
        assert!(!validate_location(probe, &just_under).valid);
    }

    #[test]
    fn out_of_range_far_away() {
        let far = GeoPoint::new(-6.3000, 106.9000);
        let check = validate_location(far, &zone());
        assert!(!check.valid);
        assert!(check.distance_meters > 500.0);
    }

    #[test]
    fn nan_point_is_invalid_not_a_panic() {
        let check = validate_location(GeoPoint::new(f64::NAN, f64::NAN), &zone());
        assert!(!check.valid);
        assert!(check.distance_meters.is_nan());
    }

    #[test]
    fn window_statuses_at_the_edges() {
        let w = window();
        assert_eq!(
            validate_time(TimeOfDay::parse("06:29").unwrap(), &w).status,
            TimeStatus::Early
        );
        assert_eq!(
            validate_time(TimeOfDay::parse("06:30").unwrap(), &w).status,
            TimeStatus::Ontime
        );
        assert_eq!(
            validate_time(TimeOfDay::parse("07:15").unwrap(), &w).status,
            TimeStatus::Ontime
        );
        assert_eq!(
            validate_time(TimeOfDay::parse("07:16").unwrap(), &w).status,
            TimeStatus::Late
        );
        assert_eq!(
            validate_time(TimeOfDay::parse("07:30").unwrap(), &w).status,
            TimeStatus::Late
        );
        assert_eq!(
            validate_time(TimeOfDay::parse("07:31").unwrap(), &w).status,
            TimeStatus::Closed
        );
    }

    #[test]
    fn statuses_are_monotone_across_the_day() {
        // Sweeping minute by minute must produce early* ontime* late* closed*
        // with no back-tracking.
        let w = window();
        let rank = |s: TimeStatus| match s {
            TimeStatus::Early => 0,
            TimeStatus::Ontime => 1,
            TimeStatus::Late => 2,
            TimeStatus::Closed => 3,
        };
        let mut last = 0;
        for minutes in 0..(24 * 60) {
            let tod = TimeOfDay::new(minutes / 60, minutes % 60).unwrap();
            let r = rank(validate_time(tod, &w).status);
            assert!(r >= last, "status went backwards at {tod}");
            last = r;
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn early_and_closed_are_invalid() {
        let w = window();
        assert!(!validate_time(TimeOfDay::parse("05:00").unwrap(), &w).valid);
        assert!(!validate_time(TimeOfDay::parse("08:00").unwrap(), &w).valid);
        assert!(validate_time(TimeOfDay::parse("07:00").unwrap(), &w).valid);
        assert!(validate_time(TimeOfDay::parse("07:20").unwrap(), &w).valid);
    }

    #[test]
    fn check_in_status_splits_on_late_threshold() {
        let w = window();
        assert_eq!(
            derive_check_in_status(TimeOfDay::parse("07:10").unwrap(), &w),
            AttendanceStatus::Present
        );
        assert_eq!(
            derive_check_in_status(TimeOfDay::parse("07:15").unwrap(), &w),
            AttendanceStatus::Present
        );
        assert_eq!(
            derive_check_in_status(TimeOfDay::parse("07:20").unwrap(), &w),
            AttendanceStatus::Late
        );
    }

    #[test]
    fn window_ordering_invariant() {
        assert!(window().is_ordered());
        let bad = CheckInWindow {
            start: TimeOfDay::parse("08:00").unwrap(),
            late_threshold: TimeOfDay::parse("07:15").unwrap(),
            end: TimeOfDay::parse("07:30").unwrap(),
        };
        assert!(!bad.is_ordered());
    }
}
