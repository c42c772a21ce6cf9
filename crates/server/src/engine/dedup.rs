use chrono::{DateTime, Duration, Utc};
use shared::{AttendanceRecord, Flag};

/// Suppresses repeated out-of-territory alerts on the continuous watch path
#[derive(Debug, Clone, Copy)]
pub struct ViolationDeduplicator {
    cooldown: Duration,
}

impl ViolationDeduplicator {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// True when the user's latest record already reports the violation
    /// and is younger than the cooldown.
    pub fn should_suppress(&self, last: Option<&AttendanceRecord>, now: DateTime<Utc>) -> bool {
        match last {
            Some(record) if record.has_flag(Flag::OutOfTerritory) => {
                now.signed_duration_since(record.timestamp) < self.cooldown
            }
            _ => false,
        }
    }
}
