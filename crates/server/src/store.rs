use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{AttendanceRecord, Coordinate, MeetingRecord, Territory, UserProfile, UserStatus};

/// Partial update of a user record; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub status: Option<UserStatus>,
    pub current_location: Option<Coordinate>,
    pub last_update: Option<DateTime<Utc>>,
    pub territory: Option<Territory>,
    pub territory_name: Option<String>,
    pub assigned_clients: Option<Vec<String>>,
}

impl UserUpdate {
    /// Status, position and freshness after a location-bearing event
    pub fn presence(status: UserStatus, location: Option<Coordinate>, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            current_location: location,
            last_update: Some(at),
            ..Default::default()
        }
    }
}

/// Keyed record store the attendance engine appends to.
///
/// Histories are ordered by timestamp ascending, insertion order breaking ties.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn get_history(&self, user_id: Option<&str>) -> Result<Vec<AttendanceRecord>>;

    async fn last_record(&self, user_id: &str) -> Result<Option<AttendanceRecord>>;

    async fn append_record(&self, record: &AttendanceRecord) -> Result<()>;

    async fn list_users(&self) -> Result<Vec<UserProfile>>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>>;

    /// Returns the updated user, or `None` when it does not exist
    async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<Option<UserProfile>>;

    async fn get_meetings(&self, user_id: Option<&str>) -> Result<Vec<MeetingRecord>>;

    async fn append_meeting(&self, meeting: &MeetingRecord) -> Result<()>;
}
