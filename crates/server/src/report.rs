use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use shared::{AttendanceRecord, Flag, MeetingRecord, UserProfile, UserRole};

use crate::engine::classify::AttendancePolicy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportTotals {
    pub attendance: usize,
    pub meetings: usize,
    /// Records tagged OUT_OF_TERRITORY
    pub violations: usize,
    pub sos: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SalesmanSummary {
    pub user_id: String,
    pub name: String,
    pub meetings: usize,
    pub violations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub totals: ReportTotals,
    pub salesmen: Vec<SalesmanSummary>,
}

/// Activity summary over local dates `from..=to`
pub fn build_report(
    policy: &AttendancePolicy,
    users: &[UserProfile],
    records: &[AttendanceRecord],
    meetings: &[MeetingRecord],
    from: NaiveDate,
    to: NaiveDate,
) -> Report {
    let in_range = |at: DateTime<Utc>| {
        let day = policy.local_date(at);
        day >= from && day <= to
    };

    let records: Vec<&AttendanceRecord> = records.iter().filter(|r| in_range(r.timestamp)).collect();
    let meetings: Vec<&MeetingRecord> = meetings.iter().filter(|m| in_range(m.timestamp)).collect();

    let totals = ReportTotals {
        attendance: records.len(),
        meetings: meetings.len(),
        violations: records
            .iter()
            .filter(|r| r.has_flag(Flag::OutOfTerritory))
            .count(),
        sos: records.iter().filter(|r| r.has_flag(Flag::EmergencySos)).count(),
    };

    let salesmen = users
        .iter()
        .filter(|u| u.role == UserRole::Salesman)
        .map(|u| SalesmanSummary {
            user_id: u.id.clone(),
            name: u.name.clone(),
            meetings: meetings.iter().filter(|m| m.user_id == u.id).count(),
            violations: records
                .iter()
                .filter(|r| r.user_id == u.id && r.has_flag(Flag::OutOfTerritory))
                .count(),
        })
        .collect();

    Report {
        from,
        to,
        totals,
        salesmen,
    }
}

/// Every emergency record, oldest first
pub fn emergency_alerts(records: Vec<AttendanceRecord>) -> Vec<AttendanceRecord> {
    records
        .into_iter()
        .filter(|r| r.has_flag(Flag::EmergencySos))
        .collect()
}
