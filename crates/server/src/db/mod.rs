use anyhow::Result;
use async_trait::async_trait;
use shared::{AttendanceRecord, MeetingRecord, UserProfile, UserRole};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;

use crate::store::{RecordStore, UserUpdate};

mod models;

pub use models::*;

const USER_COLUMNS: &str = "id, employee_id, password_hash, name, role, department, mobile, email, \
     territory_name, territory_lat, territory_lng, territory_radius, current_lat, current_lng, \
     last_update_ms, status, assigned_clients";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(path: &str) -> Result<Self> {
        // Ensure the directory exists
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database; a single connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                employee_id TEXT UNIQUE NOT NULL COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                name TEXT NOT NULL,
                role TEXT NOT NULL,
                department TEXT NOT NULL DEFAULT 'General Sales',
                mobile TEXT,
                email TEXT,
                territory_name TEXT,
                territory_lat REAL NOT NULL,
                territory_lng REAL NOT NULL,
                territory_radius REAL NOT NULL,
                current_lat REAL,
                current_lng REAL,
                last_update_ms INTEGER,
                status TEXT NOT NULL DEFAULT 'offline',
                assigned_clients TEXT NOT NULL DEFAULT '[]',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attendance (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                user_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('CHECKED_IN', 'CHECKED_OUT')),
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                location_name TEXT NOT NULL,
                flags TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_attendance_user_time ON attendance (user_id, timestamp_ms, seq)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meetings (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                user_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                client_name TEXT NOT NULL,
                notes TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                location_name TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    // User operations
    pub async fn create_user(&self, user: &NewUser) -> Result<()> {
        let p = &user.profile;
        sqlx::query(
            r#"
            INSERT INTO users (id, employee_id, password_hash, name, role, department, mobile, email,
                territory_name, territory_lat, territory_lng, territory_radius, current_lat, current_lng,
                last_update_ms, status, assigned_clients)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&p.id)
        .bind(&p.employee_id)
        .bind(&user.password_hash)
        .bind(&p.name)
        .bind(p.role.as_str())
        .bind(&p.department)
        .bind(&p.mobile)
        .bind(&p.email)
        .bind(&p.territory_name)
        .bind(p.territory.center.lat)
        .bind(p.territory.center.lng)
        .bind(p.territory.radius_meters)
        .bind(p.current_location.map(|c| c.lat))
        .bind(p.current_location.map(|c| c.lng))
        .bind(p.last_update.map(|t| t.timestamp_millis()))
        .bind(p.status.as_str())
        .bind(serde_json::to_string(&p.assigned_clients)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Login lookup: role must match, employee id is case-insensitive
    pub async fn get_user_credentials(
        &self,
        role: UserRole,
        employee_id: &str,
    ) -> Result<Option<(UserProfile, String)>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE role = ? AND employee_id = ? COLLATE NOCASE",
            USER_COLUMNS
        ))
        .bind(role.as_str())
        .bind(employee_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let hash = row.password_hash.clone();
                Ok(Some((row.into_profile()?, hash)))
            }
            None => Ok(None),
        }
    }

    pub async fn employee_id_exists(&self, employee_id: &str) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM users WHERE employee_id = ? COLLATE NOCASE")
                .bind(employee_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn has_admin(&self) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE role = ? LIMIT 1")
            .bind(UserRole::Admin.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Removes the user row only; attendance and meetings stay as history
    pub async fn delete_user(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RecordStore for Database {
    async fn get_history(&self, user_id: Option<&str>) -> Result<Vec<AttendanceRecord>> {
        let rows = match user_id {
            Some(user_id) => {
                sqlx::query_as::<_, AttendanceRow>(
                    "SELECT id, user_id, user_name, timestamp_ms, kind, lat, lng, location_name, flags \
                     FROM attendance WHERE user_id = ? ORDER BY timestamp_ms ASC, seq ASC",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, AttendanceRow>(
                    "SELECT id, user_id, user_name, timestamp_ms, kind, lat, lng, location_name, flags \
                     FROM attendance ORDER BY timestamp_ms ASC, seq ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(AttendanceRow::into_record).collect()
    }

    async fn last_record(&self, user_id: &str) -> Result<Option<AttendanceRecord>> {
        let row = sqlx::query_as::<_, AttendanceRow>(
            "SELECT id, user_id, user_name, timestamp_ms, kind, lat, lng, location_name, flags \
             FROM attendance WHERE user_id = ? ORDER BY timestamp_ms DESC, seq DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AttendanceRow::into_record).transpose()
    }

    async fn append_record(&self, record: &AttendanceRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO attendance (id, user_id, user_name, timestamp_ms, kind, lat, lng, location_name, flags) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.user_id)
        .bind(&record.user_name)
        .bind(record.timestamp.timestamp_millis())
        .bind(record.kind.as_str())
        .bind(record.location.lat)
        .bind(record.location.lng)
        .bind(&record.location_name)
        .bind(encode_flags(&record.flags)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users ORDER BY created_at ASC, name ASC",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UserRow::into_profile).collect()
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_profile).transpose()
    }

    async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<Option<UserProfile>> {
        let assigned_clients = update
            .assigned_clients
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // Column-wise COALESCE keeps concurrent partial updates from clobbering each other
        let result = sqlx::query(
            r#"
            UPDATE users SET
                status = COALESCE(?, status),
                current_lat = COALESCE(?, current_lat),
                current_lng = COALESCE(?, current_lng),
                last_update_ms = COALESCE(?, last_update_ms),
                territory_lat = COALESCE(?, territory_lat),
                territory_lng = COALESCE(?, territory_lng),
                territory_radius = COALESCE(?, territory_radius),
                territory_name = COALESCE(?, territory_name),
                assigned_clients = COALESCE(?, assigned_clients)
            WHERE id = ?
            "#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.current_location.map(|c| c.lat))
        .bind(update.current_location.map(|c| c.lng))
        .bind(update.last_update.map(|t| t.timestamp_millis()))
        .bind(update.territory.map(|t| t.center.lat))
        .bind(update.territory.map(|t| t.center.lng))
        .bind(update.territory.map(|t| t.radius_meters))
        .bind(&update.territory_name)
        .bind(assigned_clients)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_user(user_id).await
    }

    async fn get_meetings(&self, user_id: Option<&str>) -> Result<Vec<MeetingRecord>> {
        let rows = match user_id {
            Some(user_id) => {
                sqlx::query_as::<_, MeetingRow>(
                    "SELECT id, user_id, user_name, client_name, notes, timestamp_ms, lat, lng, location_name \
                     FROM meetings WHERE user_id = ? ORDER BY timestamp_ms ASC, seq ASC",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, MeetingRow>(
                    "SELECT id, user_id, user_name, client_name, notes, timestamp_ms, lat, lng, location_name \
                     FROM meetings ORDER BY timestamp_ms ASC, seq ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(MeetingRow::into_record).collect()
    }

    async fn append_meeting(&self, meeting: &MeetingRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO meetings (id, user_id, user_name, client_name, notes, timestamp_ms, lat, lng, location_name) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(meeting.id.to_string())
        .bind(&meeting.user_id)
        .bind(&meeting.user_name)
        .bind(&meeting.client_name)
        .bind(&meeting.notes)
        .bind(meeting.timestamp.timestamp_millis())
        .bind(meeting.location.lat)
        .bind(meeting.location.lng)
        .bind(&meeting.location_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::{AttendanceStatus, Coordinate, Flag, Territory, UserStatus};
    use uuid::Uuid;

    async fn db() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    fn salesman(id: &str, employee_id: &str) -> NewUser {
        NewUser {
            profile: UserProfile {
                id: id.to_string(),
                employee_id: employee_id.to_string(),
                name: "Rahul Sharma".to_string(),
                role: UserRole::Salesman,
                department: "South Mumbai Sales".to_string(),
                mobile: None,
                email: None,
                territory_name: Some("Mumbai - South".to_string()),
                territory: Territory {
                    center: Coordinate::new(18.9215, 72.8340),
                    radius_meters: 10_000.0,
                },
                current_location: None,
                last_update: None,
                status: UserStatus::Offline,
                assigned_clients: vec!["Tata Motors".to_string()],
            },
            password_hash: "hash".to_string(),
        }
    }

    fn record(user_id: &str, secs: i64, kind: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            user_name: "Rahul Sharma".to_string(),
            timestamp: Utc.timestamp_opt(1_772_000_000 + secs, 0).unwrap(),
            kind,
            location: Coordinate::new(18.922, 72.8347),
            location_name: "Mumbai - South".to_string(),
            flags: [Flag::InTerritory].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn history_orders_by_timestamp_then_insertion() {
        let db = db().await;
        let late = record("u1", 60, AttendanceStatus::CheckedOut);
        let tie_a = record("u1", 0, AttendanceStatus::CheckedIn);
        let tie_b = record("u1", 0, AttendanceStatus::CheckedOut);
        let other = record("u2", 30, AttendanceStatus::CheckedIn);

        for r in [&late, &tie_a, &tie_b, &other] {
            db.append_record(r).await.unwrap();
        }

        let ids: Vec<Uuid> = db
            .get_history(Some("u1"))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![tie_a.id, tie_b.id, late.id]);

        assert_eq!(db.get_history(None).await.unwrap().len(), 4);
        assert_eq!(db.last_record("u1").await.unwrap().unwrap().id, late.id);
        assert!(db.last_record("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_round_trips_flags_and_kind() {
        let db = db().await;
        let mut r = record("u1", 0, AttendanceStatus::CheckedIn);
        r.flags = [Flag::OutOfTerritory, Flag::AutomatedAlert].into_iter().collect();
        db.append_record(&r).await.unwrap();

        let stored = db.last_record("u1").await.unwrap().unwrap();
        assert_eq!(stored, r);
    }

    #[tokio::test]
    async fn partial_update_leaves_other_fields() {
        let db = db().await;
        db.create_user(&salesman("u1", "EMP-MUM-001")).await.unwrap();

        let at = Utc.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap();
        let updated = db
            .update_user(
                "u1",
                &UserUpdate::presence(UserStatus::Active, Some(Coordinate::new(19.0, 72.9)), at),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, UserStatus::Active);
        assert_eq!(updated.current_location, Some(Coordinate::new(19.0, 72.9)));
        assert_eq!(updated.last_update, Some(at));
        assert_eq!(updated.territory.radius_meters, 10_000.0);
        assert_eq!(updated.assigned_clients, vec!["Tata Motors".to_string()]);

        let missing = db.update_user("ghost", &UserUpdate::default()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn login_lookup_ignores_employee_id_case() {
        let db = db().await;
        db.create_user(&salesman("u1", "EMP-MUM-001")).await.unwrap();

        let found = db
            .get_user_credentials(UserRole::Salesman, "emp-mum-001")
            .await
            .unwrap();
        assert!(found.is_some());

        let wrong_role = db
            .get_user_credentials(UserRole::Admin, "EMP-MUM-001")
            .await
            .unwrap();
        assert!(wrong_role.is_none());
        assert!(db.employee_id_exists("emp-MUM-001").await.unwrap());
    }

    #[tokio::test]
    async fn deleting_user_keeps_history() {
        let db = db().await;
        db.create_user(&salesman("u1", "EMP-MUM-001")).await.unwrap();
        db.append_record(&record("u1", 0, AttendanceStatus::CheckedIn))
            .await
            .unwrap();

        assert!(db.delete_user("u1").await.unwrap());
        assert!(db.get_user("u1").await.unwrap().is_none());
        assert_eq!(db.get_history(Some("u1")).await.unwrap().len(), 1);
    }
}
