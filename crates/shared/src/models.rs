use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Geography
// ============================================================================

/// A WGS84 position in degrees. Range is not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// Sentinel used when an emergency has to be reported without a fix
    pub const NULL_ISLAND: Coordinate = Coordinate { lat: 0.0, lng: 0.0 };

    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Circular area a salesman is assigned to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Territory {
    pub center: Coordinate,
    pub radius_meters: f64,
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Salesman,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Salesman => "SALESMAN",
        }
    }
}

impl FromStr for UserRole {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(UserRole::Admin),
            "SALESMAN" => Ok(UserRole::Salesman),
            _ => Err(ParseError::Role(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Idle,
    Offline,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Idle => "idle",
            UserStatus::Offline => "offline",
        }
    }
}

impl FromStr for UserStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "idle" => Ok(UserStatus::Idle),
            "offline" => Ok(UserStatus::Offline),
            _ => Err(ParseError::Status(s.to_string())),
        }
    }
}

/// Public view of a user record (no credentials)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub employee_id: String,
    pub name: String,
    pub role: UserRole,
    pub department: String,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub territory_name: Option<String>,
    pub territory: Territory,
    pub current_location: Option<Coordinate>,
    pub last_update: Option<DateTime<Utc>>,
    pub status: UserStatus,
    #[serde(default)]
    pub assigned_clients: Vec<String>,
}

// ============================================================================
// Attendance
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    CheckedIn,
    CheckedOut,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::CheckedIn => "CHECKED_IN",
            AttendanceStatus::CheckedOut => "CHECKED_OUT",
        }
    }

    /// The type a manual punch takes when issued from this state
    pub fn toggled(&self) -> Self {
        match self {
            AttendanceStatus::CheckedIn => AttendanceStatus::CheckedOut,
            AttendanceStatus::CheckedOut => AttendanceStatus::CheckedIn,
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHECKED_IN" => Ok(AttendanceStatus::CheckedIn),
            "CHECKED_OUT" => Ok(AttendanceStatus::CheckedOut),
            _ => Err(ParseError::AttendanceStatus(s.to_string())),
        }
    }
}

/// Derived tag attached to an attendance record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    InTerritory,
    OutOfTerritory,
    LateArrival,
    PeriodicCheck,
    AutomatedAlert,
    EmergencySos,
    GpsFailSos,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::InTerritory => "IN_TERRITORY",
            Flag::OutOfTerritory => "OUT_OF_TERRITORY",
            Flag::LateArrival => "LATE_ARRIVAL",
            Flag::PeriodicCheck => "PERIODIC_CHECK",
            Flag::AutomatedAlert => "AUTOMATED_ALERT",
            Flag::EmergencySos => "EMERGENCY_SOS",
            Flag::GpsFailSos => "GPS_FAIL_SOS",
        }
    }

    /// Flags that mark a record as needing operator attention
    pub fn is_alert(&self) -> bool {
        matches!(self, Flag::AutomatedAlert | Flag::EmergencySos)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flag {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_TERRITORY" => Ok(Flag::InTerritory),
            "OUT_OF_TERRITORY" => Ok(Flag::OutOfTerritory),
            "LATE_ARRIVAL" => Ok(Flag::LateArrival),
            "PERIODIC_CHECK" => Ok(Flag::PeriodicCheck),
            "AUTOMATED_ALERT" => Ok(Flag::AutomatedAlert),
            "EMERGENCY_SOS" => Ok(Flag::EmergencySos),
            "GPS_FAIL_SOS" => Ok(Flag::GpsFailSos),
            _ => Err(ParseError::Flag(s.to_string())),
        }
    }
}

pub type FlagSet = BTreeSet<Flag>;

/// Immutable, append-only attendance entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: AttendanceStatus,
    pub location: Coordinate,
    pub location_name: String,
    pub flags: FlagSet,
}

impl AttendanceRecord {
    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_alert(&self) -> bool {
        self.flags.iter().any(Flag::is_alert)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub client_name: String,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
    pub location: Coordinate,
    pub location_name: String,
}

/// Outcome of a one-shot position request as reported by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FixReport {
    Ok { coordinate: Coordinate },
    PermissionDenied,
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown flag: {0}")]
    Flag(String),
    #[error("unknown role: {0}")]
    Role(String),
    #[error("unknown user status: {0}")]
    Status(String),
    #[error("unknown attendance status: {0}")]
    AttendanceStatus(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_strings_match_serde_names() {
        for flag in [
            Flag::InTerritory,
            Flag::OutOfTerritory,
            Flag::LateArrival,
            Flag::PeriodicCheck,
            Flag::AutomatedAlert,
            Flag::EmergencySos,
            Flag::GpsFailSos,
        ] {
            let json = serde_json::to_string(&flag).unwrap();
            assert_eq!(json, format!("\"{}\"", flag.as_str()));
            assert_eq!(flag.as_str().parse::<Flag>().unwrap(), flag);
        }
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert_eq!(
            "VIP_CUSTOMER".parse::<Flag>(),
            Err(ParseError::Flag("VIP_CUSTOMER".to_string()))
        );
    }

    #[test]
    fn record_serializes_kind_as_type() {
        let record = AttendanceRecord {
            id: Uuid::nil(),
            user_id: "u1".to_string(),
            user_name: "Rahul Sharma".to_string(),
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
            kind: AttendanceStatus::CheckedIn,
            location: Coordinate::new(18.922, 72.8347),
            location_name: "Mumbai - South".to_string(),
            flags: [Flag::InTerritory, Flag::LateArrival].into_iter().collect(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "CHECKED_IN");
        assert_eq!(
            value["flags"],
            serde_json::json!(["IN_TERRITORY", "LATE_ARRIVAL"])
        );
    }

    #[test]
    fn fix_report_is_tagged_by_status() {
        let report: FixReport =
            serde_json::from_str(r#"{"status":"ok","coordinate":{"lat":19.2,"lng":72.9}}"#)
                .unwrap();
        assert_eq!(
            report,
            FixReport::Ok {
                coordinate: Coordinate::new(19.2, 72.9)
            }
        );

        let denied: FixReport = serde_json::from_str(r#"{"status":"permission_denied"}"#).unwrap();
        assert_eq!(denied, FixReport::PermissionDenied);
    }

    #[test]
    fn punch_toggles_between_states() {
        assert_eq!(
            AttendanceStatus::CheckedIn.toggled(),
            AttendanceStatus::CheckedOut
        );
        assert_eq!(
            AttendanceStatus::CheckedOut.toggled(),
            AttendanceStatus::CheckedIn
        );
    }
}
