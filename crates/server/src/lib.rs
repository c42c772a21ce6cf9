//! Geofenced attendance tracking server for field sales teams.

pub mod config;
pub mod db;
pub mod devices;
pub mod engine;
pub mod error;
pub mod report;
pub mod routes;
pub mod state;
pub mod store;

use shared::{Coordinate, Territory, UserProfile, UserRole, UserStatus};
use uuid::Uuid;

pub use routes::create_router;
pub use state::AppState;

/// Create the configured admin account unless an admin already exists
pub async fn bootstrap_admin(state: &AppState) -> anyhow::Result<bool> {
    if state.db.has_admin().await? {
        return Ok(false);
    }

    let auth = &state.config.auth;
    let center = state
        .config
        .presets
        .first()
        .map(|p| p.coordinate())
        .unwrap_or(Coordinate::NULL_ISLAND);

    let profile = UserProfile {
        id: Uuid::new_v4().to_string(),
        employee_id: auth.admin_employee_id.clone(),
        name: auth.admin_name.clone(),
        role: UserRole::Admin,
        department: "Operations".to_string(),
        mobile: None,
        email: None,
        territory_name: None,
        territory: Territory {
            center,
            radius_meters: state.config.tracking.territory_radius_meters,
        },
        current_location: None,
        last_update: None,
        status: UserStatus::Offline,
        assigned_clients: Vec::new(),
    };

    state
        .db
        .create_user(&db::NewUser {
            profile,
            password_hash: routes::auth::hash_password(&auth.admin_password)?,
        })
        .await?;
    tracing::info!("Created admin account {}", auth.admin_employee_id);
    Ok(true)
}
