use chrono::{DateTime, Utc};
use shared::{AttendanceRecord, AttendanceStatus};

use super::classify::AttendancePolicy;

/// Derive the session state from the user's latest record.
///
/// Only a check-in stamped on today's local date keeps the session open;
/// a check-in left over from a previous day reads as checked out.
pub fn derive_status(
    policy: &AttendancePolicy,
    last: Option<&AttendanceRecord>,
    now: DateTime<Utc>,
) -> AttendanceStatus {
    match last {
        Some(record)
            if record.kind == AttendanceStatus::CheckedIn
                && policy.local_date(record.timestamp) == policy.local_date(now) =>
        {
            AttendanceStatus::CheckedIn
        }
        _ => AttendanceStatus::CheckedOut,
    }
}

/// The latest record is a check-in from an earlier day with no punch-out
pub fn is_unresolved_carry_over(
    policy: &AttendancePolicy,
    last: Option<&AttendanceRecord>,
    now: DateTime<Utc>,
) -> bool {
    matches!(
        last,
        Some(record) if record.kind == AttendanceStatus::CheckedIn
            && policy.local_date(record.timestamp) < policy.local_date(now)
    )
}

/// Type of the next manual punch
pub fn next_punch(current: AttendanceStatus) -> AttendanceStatus {
    current.toggled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, TimeZone};
    use shared::{Coordinate, Flag};
    use uuid::Uuid;

    fn policy() -> AttendancePolicy {
        AttendancePolicy::new(10, 15, FixedOffset::east_opt(19_800).unwrap())
    }

    fn record(kind: AttendanceStatus, at: DateTime<Utc>) -> AttendanceRecord {
        AttendanceRecord {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            user_name: "Rahul Sharma".to_string(),
            timestamp: at,
            kind,
            location: Coordinate::new(18.922, 72.8347),
            location_name: "Mumbai - South".to_string(),
            flags: [Flag::InTerritory].into_iter().collect(),
        }
    }

    fn local(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(19_800)
            .unwrap()
            .with_ymd_and_hms(2026, 3, day, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn empty_history_is_checked_out() {
        assert_eq!(
            derive_status(&policy(), None, local(2, 9, 0)),
            AttendanceStatus::CheckedOut
        );
    }

    #[test]
    fn same_day_check_in_is_checked_in() {
        let history = vec![record(AttendanceStatus::CheckedIn, local(2, 9, 30))];
        assert_eq!(
            derive_status(&policy(), history.last(), local(2, 23, 59)),
            AttendanceStatus::CheckedIn
        );
    }

    #[test]
    fn check_out_closes_session() {
        let history = vec![
            record(AttendanceStatus::CheckedIn, local(2, 9, 30)),
            record(AttendanceStatus::CheckedOut, local(2, 18, 0)),
        ];
        assert_eq!(
            derive_status(&policy(), history.last(), local(2, 18, 1)),
            AttendanceStatus::CheckedOut
        );
    }

    #[test]
    fn yesterdays_check_in_does_not_carry_over() {
        let history = vec![record(AttendanceStatus::CheckedIn, local(1, 17, 0))];
        let now = local(2, 0, 1);
        assert_eq!(
            derive_status(&policy(), history.last(), now),
            AttendanceStatus::CheckedOut
        );
        assert!(is_unresolved_carry_over(&policy(), history.last(), now));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn midnight_is_the_boundary() {
        let last = record(AttendanceStatus::CheckedIn, local(2, 23, 59));
        let before = local(2, 23, 59) + Duration::seconds(30);
        let after = local(3, 0, 0);
        assert_eq!(derive_status(&policy(), Some(&last), before), AttendanceStatus::CheckedIn);
        assert_eq!(derive_status(&policy(), Some(&last), after), AttendanceStatus::CheckedOut);
    }

    #[test]
    fn punch_alternates() {
        assert_eq!(next_punch(AttendanceStatus::CheckedOut), AttendanceStatus::CheckedIn);
        assert_eq!(next_punch(AttendanceStatus::CheckedIn), AttendanceStatus::CheckedOut);
    }
}
