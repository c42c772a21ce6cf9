use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use shared::{
    AttendanceRecord, Coordinate, Flag, FlagSet, MeetingRecord, Territory, UserProfile,
};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: String,
    pub employee_id: String,
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub department: String,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub territory_name: Option<String>,
    pub territory_lat: f64,
    pub territory_lng: f64,
    pub territory_radius: f64,
    pub current_lat: Option<f64>,
    pub current_lng: Option<f64>,
    pub last_update_ms: Option<i64>,
    pub status: String,
    pub assigned_clients: String,
}

impl UserRow {
    pub fn into_profile(self) -> Result<UserProfile> {
        let current_location = match (self.current_lat, self.current_lng) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
            _ => None,
        };
        let last_update = self.last_update_ms.map(from_millis).transpose()?;

        Ok(UserProfile {
            id: self.id,
            employee_id: self.employee_id,
            name: self.name,
            role: self.role.parse()?,
            department: self.department,
            mobile: self.mobile,
            email: self.email,
            territory_name: self.territory_name,
            territory: Territory {
                center: Coordinate::new(self.territory_lat, self.territory_lng),
                radius_meters: self.territory_radius,
            },
            current_location,
            last_update,
            status: self.status.parse()?,
            assigned_clients: serde_json::from_str(&self.assigned_clients)?,
        })
    }
}

/// A user to insert, credentials included
#[derive(Debug, Clone)]
pub struct NewUser {
    pub profile: UserProfile,
    pub password_hash: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct AttendanceRow {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub timestamp_ms: i64,
    pub kind: String,
    pub lat: f64,
    pub lng: f64,
    pub location_name: String,
    pub flags: String,
}

impl AttendanceRow {
    pub fn into_record(self) -> Result<AttendanceRecord> {
        Ok(AttendanceRecord {
            id: Uuid::parse_str(&self.id)?,
            timestamp: from_millis(self.timestamp_ms)?,
            kind: self.kind.parse()?,
            location: Coordinate::new(self.lat, self.lng),
            flags: decode_flags(&self.id, &self.flags)?,
            user_id: self.user_id,
            user_name: self.user_name,
            location_name: self.location_name,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MeetingRow {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub client_name: String,
    pub notes: String,
    pub timestamp_ms: i64,
    pub lat: f64,
    pub lng: f64,
    pub location_name: String,
}

impl MeetingRow {
    pub fn into_record(self) -> Result<MeetingRecord> {
        Ok(MeetingRecord {
            id: Uuid::parse_str(&self.id)?,
            timestamp: from_millis(self.timestamp_ms)?,
            location: Coordinate::new(self.lat, self.lng),
            user_id: self.user_id,
            user_name: self.user_name,
            client_name: self.client_name,
            notes: self.notes,
            location_name: self.location_name,
        })
    }
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("Timestamp out of range: {}", ms))
}

pub fn encode_flags(flags: &FlagSet) -> Result<String> {
    let names: Vec<&str> = flags.iter().map(Flag::as_str).collect();
    Ok(serde_json::to_string(&names)?)
}

/// Unknown flag names are dropped rather than failing the whole read
pub fn decode_flags(record_id: &str, raw: &str) -> Result<FlagSet> {
    let names: Vec<String> = serde_json::from_str(raw)?;
    let mut flags = FlagSet::new();
    for name in names {
        match name.parse::<Flag>() {
            Ok(flag) => {
                flags.insert(flag);
            }
            Err(e) => tracing::warn!("Ignoring flag on record {}: {}", record_id, e),
        }
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_flags_are_dropped() {
        let flags = decode_flags("r1", r#"["OUT_OF_TERRITORY","VIP","AUTOMATED_ALERT"]"#).unwrap();
        assert_eq!(
            flags,
            [Flag::OutOfTerritory, Flag::AutomatedAlert].into_iter().collect()
        );
    }

    #[test]
    fn flags_encode_as_names() {
        let flags: FlagSet = [Flag::PeriodicCheck, Flag::InTerritory].into_iter().collect();
        assert_eq!(encode_flags(&flags).unwrap(), r#"["IN_TERRITORY","PERIODIC_CHECK"]"#);
    }
}
