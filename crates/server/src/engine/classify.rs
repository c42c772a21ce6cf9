use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use shared::{AttendanceStatus, Coordinate, Flag, FlagSet, Territory};

use super::{geo, naming::LocationNamer};
use crate::config::TrackingConfig;

/// Work-hour rules evaluated in the organisation's local time
#[derive(Debug, Clone, Copy)]
pub struct AttendancePolicy {
    work_start_hour: u32,
    late_grace_minutes: u32,
    offset: FixedOffset,
}

impl AttendancePolicy {
    pub fn new(work_start_hour: u32, late_grace_minutes: u32, offset: FixedOffset) -> Self {
        Self {
            work_start_hour,
            late_grace_minutes,
            offset,
        }
    }

    pub fn from_config(config: &TrackingConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.work_start_hour,
            config.late_grace_minutes,
            config.local_offset()?,
        ))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Strictly after HH:grace past the start hour
    pub fn is_late(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.offset);
        local.hour() > self.work_start_hour
            || (local.hour() == self.work_start_hour && local.minute() > self.late_grace_minutes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub flags: FlagSet,
    pub location_name: String,
}

/// Derives the flag set and location label for a new record
#[derive(Debug, Clone)]
pub struct Classifier {
    policy: AttendancePolicy,
    namer: LocationNamer,
}

impl Classifier {
    pub fn new(policy: AttendancePolicy, namer: LocationNamer) -> Self {
        Self { policy, namer }
    }

    pub fn policy(&self) -> &AttendancePolicy {
        &self.policy
    }

    pub fn namer(&self) -> &LocationNamer {
        &self.namer
    }

    /// `explicit` holds caller-supplied flags (automated checks, SOS).
    /// Their presence marks the sample as non-manual and disables the
    /// late-arrival rule.
    pub fn classify(
        &self,
        territory: &Territory,
        point: Coordinate,
        at: DateTime<Utc>,
        kind: AttendanceStatus,
        explicit: &[Flag],
    ) -> Classification {
        let mut flags: FlagSet = explicit.iter().copied().collect();

        flags.insert(if geo::is_within_territory(point, territory) {
            Flag::InTerritory
        } else {
            Flag::OutOfTerritory
        });

        if kind == AttendanceStatus::CheckedIn && explicit.is_empty() && self.policy.is_late(at) {
            flags.insert(Flag::LateArrival);
        }

        Classification {
            flags,
            location_name: self.namer.resolve(point),
        }
    }
}
