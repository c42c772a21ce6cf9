use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod admin;
pub mod attendance;
pub mod auth;
mod health;
pub mod meetings;
mod ws_admin;
mod ws_device;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Auth routes
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        // Salesman routes
        .route("/attendance/status", get(attendance::status))
        .route("/attendance/punch", post(attendance::punch))
        .route("/attendance/sos", post(attendance::sos))
        .route("/attendance/history", get(attendance::history))
        .route("/meetings", post(meetings::create).get(meetings::list))
        // Admin routes
        .route("/admin/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/admin/users/:id",
            patch(admin::update_user).delete(admin::delete_user),
        )
        .route("/admin/history", get(admin::history))
        .route("/admin/meetings", get(admin::meetings))
        .route("/admin/report", get(admin::report))
        .route("/admin/alerts", get(admin::alerts))
        // WebSocket routes
        .route("/ws/device", get(ws_device::ws_handler))
        .route("/ws/admin", get(ws_admin::ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
