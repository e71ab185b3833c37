use crate::validate::AttendanceStatus;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-student outcome inside one teaching session. Distinct from the
/// teacher-level `AttendanceStatus`: sick and permission are excused states
/// that only exist at the session level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Present,
    Sick,
    Permission,
    Absent,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Present => "present",
            SessionStatus::Sick => "sick",
            SessionStatus::Permission => "permission",
            SessionStatus::Absent => "absent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "present" => Some(SessionStatus::Present),
            "sick" => Some(SessionStatus::Sick),
            "permission" => Some(SessionStatus::Permission),
            "absent" => Some(SessionStatus::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub present: i64,
    pub sick: i64,
    pub permission: i64,
    pub absent: i64,
}

impl SessionSummary {
    pub fn total(&self) -> i64 {
        self.present + self.sick + self.permission + self.absent
    }
}

/// Counts by status. Unseen students are not implicitly counted as
/// anything; the journal layer guarantees the roster is fully populated
/// before this runs.
pub fn summarize<I>(entries: I) -> SessionSummary
where
    I: IntoIterator<Item = SessionStatus>,
{
    let mut summary = SessionSummary::default();
    for status in entries {
        match status {
            SessionStatus::Present => summary.present += 1,
            SessionStatus::Sick => summary.sick += 1,
            SessionStatus::Permission => summary.permission += 1,
            SessionStatus::Absent => summary.absent += 1,
        }
    }
    summary
}

pub fn class_attendance_rate(summary: &SessionSummary, total_students: i64) -> f64 {
    if total_students <= 0 {
        return 0.0;
    }
    summary.present as f64 / total_students as f64 * 100.0
}

/// One teacher-day attendance record as the statistics layer sees it. The
/// engine is fed already-loaded rows and never touches storage.
#[derive(Debug, Clone)]
pub struct RecordRef {
    pub user_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone)]
pub struct TeacherRef {
    pub user_id: String,
    pub name: String,
    pub department: String,
}

pub fn daily_attendance_rate(records: &[RecordRef], total_teachers: i64) -> f64 {
    if total_teachers <= 0 {
        return 0.0;
    }
    let attended = records
        .iter()
        .filter(|r| matches!(r.status, AttendanceStatus::Present | AttendanceStatus::Late))
        .count();
    attended as f64 / total_teachers as f64 * 100.0
}

/// Late arrivals do not count toward punctuality.
pub fn punctuality_rate(records: &[RecordRef], total_teachers: i64) -> f64 {
    if total_teachers <= 0 {
        return 0.0;
    }
    let on_time = records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Present)
        .count();
    on_time as f64 / total_teachers as f64 * 100.0
}

/// Mon–Fri days in [start, end]. Clamped to at least 1 so period rates
/// never divide by zero; a weekend-only range is a degenerate case callers
/// should treat as such.
pub fn working_days_in_range(start: NaiveDate, end: NaiveDate) -> i64 {
    let mut count = 0;
    let mut day = start;
    while day <= end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            count += 1;
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    count.max(1)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRangeStat {
    pub user_id: String,
    pub name: String,
    pub department: String,
    pub working_days: i64,
    pub present_days: i64,
    pub late_days: i64,
    pub absent_days: i64,
    pub attendance_rate: f64,
    pub punctuality_rate: f64,
}

/// Per-teacher rollup over a date range. A working day with no record is an
/// inferred absence.
pub fn teacher_range_stats(
    teachers: &[TeacherRef],
    records: &[RecordRef],
    working_days: i64,
) -> Vec<TeacherRangeStat> {
    teachers
        .iter()
        .map(|t| {
            let mine: Vec<&RecordRef> = records.iter().filter(|r| r.user_id == t.user_id).collect();
            let present_days = mine
                .iter()
                .filter(|r| r.status == AttendanceStatus::Present)
                .count() as i64;
            let late_days = mine
                .iter()
                .filter(|r| r.status == AttendanceStatus::Late)
                .count() as i64;
            let attended = present_days + late_days;
            let absent_days = (working_days - attended).max(0);
            let denom = working_days.max(1) as f64;
            TeacherRangeStat {
                user_id: t.user_id.clone(),
                name: t.name.clone(),
                department: t.department.clone(),
                working_days,
                present_days,
                late_days,
                absent_days,
                attendance_rate: attended as f64 / denom * 100.0,
                punctuality_rate: present_days as f64 / denom * 100.0,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentStat {
    pub department: String,
    pub teacher_count: i64,
    pub attendance_rate: f64,
    pub punctuality_rate: f64,
}

/// Groups teachers by department and rates each group against
/// `teacher_count × working_days` expected teacher-days, using only records
/// whose user belongs to that department.
pub fn department_rollup(
    teachers: &[TeacherRef],
    records: &[RecordRef],
    working_days: i64,
) -> Vec<DepartmentStat> {
    let mut groups: BTreeMap<&str, Vec<&TeacherRef>> = BTreeMap::new();
    for t in teachers {
        groups.entry(t.department.as_str()).or_default().push(t);
    }

    groups
        .into_iter()
        .map(|(department, members)| {
            let mut attended = 0i64;
            let mut on_time = 0i64;
            for m in &members {
                for r in records.iter().filter(|r| r.user_id == m.user_id) {
                    match r.status {
                        AttendanceStatus::Present => {
                            attended += 1;
                            on_time += 1;
                        }
                        AttendanceStatus::Late => attended += 1,
                        AttendanceStatus::Absent => {}
                    }
                }
            }
            let expected = members.len() as i64 * working_days;
            let denom = if expected <= 0 { 1.0 } else { expected as f64 };
            DepartmentStat {
                department: department.to_string(),
                teacher_count: members.len() as i64,
                attendance_rate: attended as f64 / denom * 100.0,
                punctuality_rate: on_time as f64 / denom * 100.0,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

/// Share of scheduled sessions that have a journal entry, capped at 100.
pub fn teaching_quality_rate(logged_sessions: i64, expected_sessions: i64) -> f64 {
    if expected_sessions <= 0 {
        return 0.0;
    }
    (logged_sessions as f64 / expected_sessions as f64 * 100.0).min(100.0)
}

pub fn performance_grade(attendance_rate: f64, teaching_quality_rate: f64) -> Grade {
    let score = 0.6 * attendance_rate + 0.4 * teaching_quality_rate;
    if score >= 90.0 {
        Grade::A
    } else if score >= 80.0 {
        Grade::B
    } else if score >= 70.0 {
        Grade::C
    } else if score >= 60.0 {
        Grade::D
    } else {
        Grade::F
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn summary_counts_every_status_once() {
        let entries = [
            SessionStatus::Present,
            SessionStatus::Present,
            SessionStatus::Sick,
            SessionStatus::Permission,
            SessionStatus::Absent,
            SessionStatus::Present,
        ];
        let s = summarize(entries);
        assert_eq!(s.present, 3);
        assert_eq!(s.sick, 1);
        assert_eq!(s.permission, 1);
        assert_eq!(s.absent, 1);
        assert_eq!(s.total(), 6);
    }

    #[test]
    fn class_rate_guards_zero_roster() {
        let s = summarize([SessionStatus::Present]);
        assert_eq!(class_attendance_rate(&s, 0), 0.0);
        let s = summarize(std::iter::empty());
        assert_eq!(class_attendance_rate(&s, 0), 0.0);
    }

    #[test]
    fn class_rate_counts_present_only() {
        let s = summarize([
            SessionStatus::Present,
            SessionStatus::Present,
            SessionStatus::Present,
            SessionStatus::Sick,
        ]);
        assert!((class_attendance_rate(&s, 4) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn daily_rate_guards_and_counts_late_as_attended() {
        assert_eq!(daily_attendance_rate(&[], 0), 0.0);
        assert_eq!(punctuality_rate(&[], 0), 0.0);

        let records = vec![
            RecordRef {
                user_id: "a".into(),
                date: date("2025-08-04"),
                status: AttendanceStatus::Present,
            },
            RecordRef {
                user_id: "b".into(),
                date: date("2025-08-04"),
                status: AttendanceStatus::Late,
            },
        ];
        assert!((daily_attendance_rate(&records, 4) - 50.0).abs() < 1e-9);
        assert!((punctuality_rate(&records, 4) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn working_days_excludes_weekends() {
        // 2025-08-04 is a Monday.
        assert_eq!(
            working_days_in_range(date("2025-08-04"), date("2025-08-08")),
            5
        );
        assert_eq!(
            working_days_in_range(date("2025-08-04"), date("2025-08-10")),
            5
        );
        assert_eq!(
            working_days_in_range(date("2025-08-01"), date("2025-08-31")),
            21
        );
    }

    #[test]
    fn weekend_only_range_clamps_to_one() {
        // Sat..Sun — degenerate range, denominator stays usable.
        assert_eq!(
            working_days_in_range(date("2025-08-09"), date("2025-08-10")),
            1
        );
    }

    #[test]
    fn range_stats_infer_absences() {
        let teachers = vec![TeacherRef {
            user_id: "t1".into(),
            name: "Siti".into(),
            department: "Matematika".into(),
        }];
        let records = vec![
            RecordRef {
                user_id: "t1".into(),
                date: date("2025-08-04"),
                status: AttendanceStatus::Present,
            },
            RecordRef {
                user_id: "t1".into(),
                date: date("2025-08-05"),
                status: AttendanceStatus::Late,
            },
        ];
        let stats = teacher_range_stats(&teachers, &records, 5);
        assert_eq!(stats.len(), 1);
        let s = &stats[0];
        assert_eq!(s.present_days, 1);
        assert_eq!(s.late_days, 1);
        assert_eq!(s.absent_days, 3);
        assert!((s.attendance_rate - 40.0).abs() < 1e-9);
        assert!((s.punctuality_rate - 20.0).abs() < 1e-9);
    }

    #[test]
    fn department_rollup_separates_groups() {
        let teachers = vec![
            TeacherRef {
                user_id: "t1".into(),
                name: "Siti".into(),
                department: "Matematika".into(),
            },
            TeacherRef {
                user_id: "t2".into(),
                name: "Budi".into(),
                department: "Bahasa".into(),
            },
        ];
        let records = vec![
            RecordRef {
                user_id: "t1".into(),
                date: date("2025-08-04"),
                status: AttendanceStatus::Present,
            },
            RecordRef {
                user_id: "t2".into(),
                date: date("2025-08-04"),
                status: AttendanceStatus::Late,
            },
        ];
        let rollup = department_rollup(&teachers, &records, 1);
        assert_eq!(rollup.len(), 2);
        let bahasa = rollup.iter().find(|d| d.department == "Bahasa").unwrap();
        assert!((bahasa.attendance_rate - 100.0).abs() < 1e-9);
        assert_eq!(bahasa.punctuality_rate, 0.0);
        let mat = rollup.iter().find(|d| d.department == "Matematika").unwrap();
        assert!((mat.punctuality_rate - 100.0).abs() < 1e-9);
    }

    #[test]
    fn grade_thresholds() {
        assert_eq!(performance_grade(100.0, 100.0), Grade::A);
        assert_eq!(performance_grade(90.0, 90.0), Grade::A);
        assert_eq!(performance_grade(80.0, 80.0), Grade::B);
        assert_eq!(performance_grade(70.0, 70.0), Grade::C);
        assert_eq!(performance_grade(60.0, 60.0), Grade::D);
        assert_eq!(performance_grade(50.0, 50.0), Grade::F);
        // Weighted: 0.6·95 + 0.4·80 = 89 → B.
        assert_eq!(performance_grade(95.0, 80.0), Grade::B);
    }

    #[test]
    fn quality_rate_caps_and_guards() {
        assert_eq!(teaching_quality_rate(3, 0), 0.0);
        assert!((teaching_quality_rate(3, 4) - 75.0).abs() < 1e-9);
        assert_eq!(teaching_quality_rate(9, 4), 100.0);
    }
}
