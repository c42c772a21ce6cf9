use axum::{extract::State, Json};
use serde::Deserialize;
use shared::{FixReport, MeetingRecord};

use crate::{
    engine::location::ReportedFix, error::AppError, routes::auth::SalesmanUser, state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct MeetingRequest {
    pub client_name: String,
    #[serde(default)]
    pub notes: String,
    pub fix: FixReport,
}

/// POST /meetings
pub async fn create(
    State(state): State<AppState>,
    SalesmanUser(user): SalesmanUser,
    Json(req): Json<MeetingRequest>,
) -> Result<Json<MeetingRecord>, AppError> {
    let meeting = state
        .engine
        .record_meeting(&user.user_id, &req.client_name, &req.notes, &ReportedFix(req.fix))
        .await?;
    Ok(Json(meeting))
}

/// GET /meetings
pub async fn list(
    State(state): State<AppState>,
    SalesmanUser(user): SalesmanUser,
) -> Result<Json<Vec<MeetingRecord>>, AppError> {
    let meetings = state.engine.store().get_meetings(Some(&user.user_id)).await?;
    Ok(Json(meetings))
}
