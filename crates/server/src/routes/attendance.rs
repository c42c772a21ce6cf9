use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use shared::{AttendanceRecord, AttendanceStatus, FixReport};

use crate::{
    engine::location::ReportedFix, error::AppError, routes::auth::SalesmanUser, state::AppState,
};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: AttendanceStatus,
    pub tracking: bool,
    pub device_connected: bool,
}

#[derive(Debug, Deserialize)]
pub struct PunchRequest {
    pub fix: FixReport,
}

#[derive(Debug, Deserialize)]
pub struct SosRequest {
    #[serde(default)]
    pub confirmed: bool,
    pub fix: FixReport,
}

/// GET /attendance/status
pub async fn status(
    State(state): State<AppState>,
    SalesmanUser(user): SalesmanUser,
) -> Result<Json<StatusResponse>, AppError> {
    let status = state.engine.session_status(&user.user_id).await?;
    Ok(Json(StatusResponse {
        status,
        tracking: state.engine.is_tracking(&user.user_id),
        device_connected: state.devices.is_connected(&user.user_id),
    }))
}

/// POST /attendance/punch
pub async fn punch(
    State(state): State<AppState>,
    SalesmanUser(user): SalesmanUser,
    Json(req): Json<PunchRequest>,
) -> Result<Json<AttendanceRecord>, AppError> {
    let record = state
        .engine
        .punch(&user.user_id, &ReportedFix(req.fix))
        .await?;
    Ok(Json(record))
}

/// POST /attendance/sos
pub async fn sos(
    State(state): State<AppState>,
    SalesmanUser(user): SalesmanUser,
    Json(req): Json<SosRequest>,
) -> Result<Json<AttendanceRecord>, AppError> {
    let record = state
        .engine
        .sos(&user.user_id, req.confirmed, &ReportedFix(req.fix))
        .await?;
    Ok(Json(record))
}

/// GET /attendance/history
pub async fn history(
    State(state): State<AppState>,
    SalesmanUser(user): SalesmanUser,
) -> Result<Json<Vec<AttendanceRecord>>, AppError> {
    let records = state.engine.store().get_history(Some(&user.user_id)).await?;
    Ok(Json(records))
}
