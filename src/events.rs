//! Typed link events.
//!
//! One enum for everything observable beyond the telemetry snapshot itself,
//! delivered over a broadcast channel. Subscribers pick the variants they
//! care about; the snapshot's own `watch` channel is the "telemetry updated"
//! signal and is not duplicated here.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    Connected {
        port: String,
        baud: u32,
    },
    Disconnected,
    /// Free-text status from the vehicle; severity follows syslog levels.
    StatusText {
        severity: u8,
        text: String,
    },
    /// Vehicle verdict on an earlier command; result 0 is MAV_RESULT_ACCEPTED.
    CommandAck {
        command: u16,
        result: u8,
    },
    MissionAck {
        result: u8,
    },
    CalibrationProgress {
        compass_id: u8,
        completion_pct: u8,
    },
    CalibrationReport {
        compass_id: u8,
        cal_status: u8,
        fitness: f32,
    },
    Error {
        message: String,
    },
}
