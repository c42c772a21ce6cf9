//! Operator endpoints: user management, history, reporting

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use shared::{
    AttendanceRecord, AttendanceStatus, Coordinate, MeetingRecord, Territory, UserProfile,
    UserRole, UserStatus,
};
use uuid::Uuid;

use crate::{
    db::NewUser,
    error::AppError,
    report::{self, Report},
    routes::auth::{hash_password, AdminUser},
    state::AppState,
    store::UserUpdate,
};

const DEFAULT_DEPARTMENT: &str = "General Sales";
const DEFAULT_REPORT_DAYS: u64 = 30;

#[derive(Debug, Serialize)]
pub struct UserOverview {
    #[serde(flatten)]
    pub user: UserProfile,
    pub session: AttendanceStatus,
    pub tracking: bool,
    pub device_connected: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub employee_id: String,
    pub name: String,
    pub password: String,
    pub department: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
    /// Preset area name; also supplies the center when `center` is absent
    pub territory_name: Option<String>,
    pub center: Option<Coordinate>,
    pub radius_meters: Option<f64>,
    #[serde(default)]
    pub assigned_clients: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub territory_name: Option<String>,
    pub center: Option<Coordinate>,
    pub radius_meters: Option<f64>,
    pub assigned_clients: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct UserFilter {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// GET /admin/users
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<UserOverview>>, AppError> {
    let users = state.engine.store().list_users().await?;

    let mut overview = Vec::with_capacity(users.len());
    for user in users {
        let session = state.engine.session_status(&user.id).await?;
        overview.push(UserOverview {
            session,
            tracking: state.engine.is_tracking(&user.id),
            device_connected: state.devices.is_connected(&user.id),
            user,
        });
    }
    Ok(Json(overview))
}

/// POST /admin/users
pub async fn create_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserProfile>), AppError> {
    let employee_id = req.employee_id.trim();
    let name = req.name.trim();
    if employee_id.is_empty() || name.is_empty() || req.password.is_empty() {
        return Err(AppError::BadRequest(
            "Employee ID, name and password are required".to_string(),
        ));
    }
    if state.db.employee_id_exists(employee_id).await? {
        return Err(AppError::Conflict(format!(
            "Employee ID {} already exists",
            employee_id
        )));
    }

    let center = match (req.center, req.territory_name.as_deref()) {
        (Some(center), _) => center,
        (None, Some(preset)) => state.config.preset(preset).ok_or_else(|| {
            AppError::BadRequest(format!("Unknown territory preset: {}", preset))
        })?,
        (None, None) => {
            return Err(AppError::BadRequest(
                "A territory center or preset name is required".to_string(),
            ))
        }
    };
    let radius_meters = validate_radius(
        req.radius_meters
            .unwrap_or(state.config.tracking.territory_radius_meters),
    )?;

    let profile = UserProfile {
        id: Uuid::new_v4().to_string(),
        employee_id: employee_id.to_string(),
        name: name.to_string(),
        role: UserRole::Salesman,
        department: req
            .department
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DEPARTMENT.to_string()),
        mobile: req.mobile,
        email: req.email,
        territory_name: req.territory_name,
        territory: Territory {
            center,
            radius_meters,
        },
        current_location: None,
        last_update: None,
        status: UserStatus::Offline,
        assigned_clients: clean_clients(req.assigned_clients),
    };

    state
        .db
        .create_user(&NewUser {
            profile: profile.clone(),
            password_hash: hash_password(&req.password)?,
        })
        .await?;

    tracing::info!("Salesman {} created ({})", profile.employee_id, profile.id);
    state.engine.publish_user(profile.clone());
    Ok((StatusCode::CREATED, Json(profile)))
}

/// PATCH /admin/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserProfile>, AppError> {
    let existing = state
        .engine
        .store()
        .get_user(&user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;

    let preset_center = match (req.center, req.territory_name.as_deref()) {
        (None, Some(preset)) => state.config.preset(preset),
        _ => None,
    };
    let territory = match (req.center.or(preset_center), req.radius_meters) {
        (None, None) => None,
        (center, radius) => Some(Territory {
            center: center.unwrap_or(existing.territory.center),
            radius_meters: validate_radius(radius.unwrap_or(existing.territory.radius_meters))?,
        }),
    };

    let update = UserUpdate {
        territory,
        territory_name: req.territory_name,
        assigned_clients: req.assigned_clients.map(clean_clients),
        ..Default::default()
    };
    let user = state
        .engine
        .store()
        .update_user(&user_id, &update)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;

    tracing::info!("User {} updated", user.employee_id);
    state.engine.publish_user(user.clone());
    Ok(Json(user))
}

/// DELETE /admin/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if admin.user_id == user_id {
        return Err(AppError::BadRequest(
            "Cannot delete your own account".to_string(),
        ));
    }

    state.engine.stop_tracking(&user_id);
    if !state.db.delete_user(&user_id).await? {
        return Err(AppError::NotFound(format!("User {}", user_id)));
    }
    tracing::info!("User {} deleted; history retained", user_id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /admin/history?user_id=
pub async fn history(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<UserFilter>,
) -> Result<Json<Vec<AttendanceRecord>>, AppError> {
    let records = state
        .engine
        .store()
        .get_history(filter.user_id.as_deref())
        .await?;
    Ok(Json(records))
}

/// GET /admin/meetings?user_id=
pub async fn meetings(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<UserFilter>,
) -> Result<Json<Vec<MeetingRecord>>, AppError> {
    let meetings = state
        .engine
        .store()
        .get_meetings(filter.user_id.as_deref())
        .await?;
    Ok(Json(meetings))
}

/// GET /admin/report?from=&to=
///
/// Defaults to the last 30 local days.
pub async fn report(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Report>, AppError> {
    let policy = *state.engine.policy();
    let today = policy.local_date(state.engine.now());
    let to = query.to.unwrap_or(today);
    let from = match query.from {
        Some(from) => from,
        None => to
            .checked_sub_days(Days::new(DEFAULT_REPORT_DAYS))
            .unwrap_or(to),
    };
    if from > to {
        return Err(AppError::BadRequest(
            "Report start date is after its end date".to_string(),
        ));
    }

    let store = state.engine.store();
    let users = store.list_users().await?;
    let records = store.get_history(None).await?;
    let meetings = store.get_meetings(None).await?;

    Ok(Json(report::build_report(
        &policy, &users, &records, &meetings, from, to,
    )))
}

/// GET /admin/alerts
pub async fn alerts(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<AttendanceRecord>>, AppError> {
    let records = state.engine.store().get_history(None).await?;
    Ok(Json(report::emergency_alerts(records)))
}

fn validate_radius(radius: f64) -> Result<f64, AppError> {
    if radius.is_finite() && radius > 0.0 {
        Ok(radius)
    } else {
        Err(AppError::BadRequest(format!(
            "Territory radius must be positive, got {}",
            radius
        )))
    }
}

fn clean_clients(clients: Vec<String>) -> Vec<String> {
    clients
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}
