//! Vehicle telemetry snapshot and link status.
//!
//! The snapshot is published by copy through a `watch` channel: the
//! dispatcher builds a complete new value per decoded message and swaps it
//! in, so readers never observe a half-updated state.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::modes::VehicleKind;

/// Telemetry older than this is considered stale; a link without a heartbeat
/// inside the same window is considered dead.
pub const STALE_AFTER: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    // Attitude, degrees
    pub roll_deg: f32,
    pub pitch_deg: f32,
    pub yaw_deg: f32,

    // Position
    pub latitude: f64,
    pub longitude: f64,
    /// Mean-sea-level altitude, meters.
    pub altitude_msl: f32,
    /// Altitude above the home position, meters.
    pub altitude_rel: f32,
    pub ground_speed: f32,
    pub air_speed: f32,
    pub climb_rate: f32,
    pub heading_deg: f32,

    // Battery
    pub battery_voltage: f32,
    pub battery_current: f32,
    pub battery_percent: i8,

    // GPS
    pub gps_fix_type: u8,
    pub satellites_visible: u8,

    // Flight state
    pub armed: bool,
    pub flight_mode: String,
    pub base_mode: u8,
    pub custom_mode: u32,
    pub vehicle_kind: VehicleKind,

    // Mission progress
    pub current_waypoint: u16,

    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub last_update: Option<Instant>,
}

impl TelemetrySnapshot {
    pub fn empty(kind: VehicleKind) -> Self {
        Self {
            roll_deg: 0.0,
            pitch_deg: 0.0,
            yaw_deg: 0.0,
            latitude: 0.0,
            longitude: 0.0,
            altitude_msl: 0.0,
            altitude_rel: 0.0,
            ground_speed: 0.0,
            air_speed: 0.0,
            climb_rate: 0.0,
            heading_deg: 0.0,
            battery_voltage: 0.0,
            battery_current: 0.0,
            battery_percent: -1,
            gps_fix_type: 0,
            satellites_visible: 0,
            armed: false,
            flight_mode: "Unknown".to_string(),
            base_mode: 0,
            custom_mode: 0,
            vehicle_kind: kind,
            current_waypoint: 0,
            updated_at: None,
            last_update: None,
        }
    }

    /// Derived, never stored: fresh until the last update ages out.
    pub fn stale(&self, now: Instant) -> bool {
        match self.last_update {
            Some(at) => now.duration_since(at) > STALE_AFTER,
            None => true,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_update = Some(Instant::now());
        self.updated_at = Some(Utc::now());
    }
}

/// Point-in-time view of the link for diagnostics, assembled from
/// [`LinkShared`] on demand.
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub connected: bool,
    pub port: String,
    pub baud: u32,
    pub target_system: u8,
    pub target_component: u8,
    pub heartbeat_age_ms: Option<u64>,
    pub bytes_read: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub packet_errors: u64,
}

/// Link state shared between the reader task, the periodic timers, and
/// callers: a few atomics plus the heartbeat clock. Addressing defaults to
/// zero until the first heartbeat teaches us who we are talking to.
#[derive(Debug, Default)]
pub struct LinkShared {
    pub connected: AtomicBool,
    pub target_system: AtomicU8,
    pub target_component: AtomicU8,
    last_heartbeat: RwLock<Option<Instant>>,
    pub bytes_read: AtomicU64,
    pub packets_received: AtomicU64,
    pub packets_sent: AtomicU64,
    pub packet_errors: AtomicU64,
}

impl LinkShared {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn heartbeat_seen(&self, at: Instant) {
        if let Ok(mut slot) = self.last_heartbeat.write() {
            *slot = Some(at);
        }
    }

    pub fn heartbeat_age(&self, now: Instant) -> Option<Duration> {
        self.last_heartbeat
            .read()
            .ok()
            .and_then(|slot| *slot)
            .map(|at| now.duration_since(at))
    }

    /// Liveness: connected and a heartbeat seen within the timeout window.
    pub fn is_alive(&self, now: Instant) -> bool {
        self.is_connected()
            && self
                .heartbeat_age(now)
                .map(|age| age < STALE_AFTER)
                .unwrap_or(false)
    }

    /// Forget learned addressing and the heartbeat clock (disconnect path).
    pub fn reset_session(&self) {
        self.target_system.store(0, Ordering::SeqCst);
        self.target_component.store(0, Ordering::SeqCst);
        if let Ok(mut slot) = self.last_heartbeat.write() {
            *slot = None;
        }
    }

    pub fn reset_counters(&self) {
        self.bytes_read.store(0, Ordering::Relaxed);
        self.packets_received.store(0, Ordering::Relaxed);
        self.packets_sent.store(0, Ordering::Relaxed);
        self.packet_errors.store(0, Ordering::Relaxed);
    }

    pub fn status(&self, port: &str, baud: u32) -> LinkStatus {
        LinkStatus {
            connected: self.is_connected(),
            port: port.to_string(),
            baud,
            target_system: self.target_system.load(Ordering::SeqCst),
            target_component: self.target_component.load(Ordering::SeqCst),
            heartbeat_age_ms: self
                .heartbeat_age(Instant::now())
                .map(|age| age.as_millis() as u64),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packet_errors: self.packet_errors.load(Ordering::Relaxed),
        }
    }
}
