use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AttendanceRecord, AttendanceStatus, Coordinate, FixReport, UserProfile};

// ============================================================================
// Device <-> Server Messages
// ============================================================================

/// Messages sent from a field device to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceToServer {
    /// First message after connecting, reports the OS location permission
    Hello { permission_granted: bool },

    /// Location permission changed on the device
    Permission { granted: bool },

    /// Continuous watch delivery
    Position { coordinate: Coordinate },

    /// Continuous watch failed to produce a position
    PositionError { reason: String },

    /// Answer to a `LocateRequest`
    Fix { request_id: Uuid, report: FixReport },

    /// Heartbeat to keep connection alive
    Heartbeat,
}

/// Messages sent from the server to a field device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToDevice {
    /// Device link accepted
    Registered { user_id: String },

    /// Current derived session state for the device's user
    SessionState { status: AttendanceStatus },

    /// Ask the device for a single fresh position
    LocateRequest {
        request_id: Uuid,
        high_accuracy: bool,
        timeout_ms: u64,
    },

    /// Heartbeat response
    Heartbeat,

    /// Error message
    Error { message: String },
}

// ============================================================================
// Server -> Admin Messages
// ============================================================================

/// Live feed pushed to connected admin consoles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToAdmin {
    /// A new attendance record was appended
    Record {
        record: AttendanceRecord,
        /// Record carries AUTOMATED_ALERT or EMERGENCY_SOS
        alert: bool,
    },

    /// A user's status or location changed
    UserUpdated { user: UserProfile },

    /// Error message
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_messages_are_tagged_snake_case() {
        let msg: DeviceToServer = serde_json::from_str(
            r#"{"type":"position","coordinate":{"lat":19.076,"lng":72.8777}}"#,
        )
        .unwrap();
        match msg {
            DeviceToServer::Position { coordinate } => {
                assert_eq!(coordinate, Coordinate::new(19.076, 72.8777));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let request = ServerToDevice::LocateRequest {
            request_id: Uuid::nil(),
            high_accuracy: true,
            timeout_ms: 10_000,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "locate_request");
        assert_eq!(value["timeout_ms"], 10_000);
    }
}
