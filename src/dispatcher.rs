//! Message dispatch: fold decoded frames into the telemetry snapshot and
//! raise typed events.
//!
//! Each message kind owns a disjoint slice of the snapshot; everything else
//! is carried over from the previous value. The new snapshot is published as
//! a whole, so readers never see a partial update.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use crate::events::LinkEvent;
use crate::modes::{self, VehicleProfile};
use crate::protocol::frame::RawFrame;
use crate::protocol::messages::MavMessage;
use crate::protocol::BASE_MODE_ARMED;
use crate::telemetry::{LinkShared, TelemetrySnapshot};

pub struct Dispatcher {
    profile: VehicleProfile,
    shared: Arc<LinkShared>,
    snapshot: watch::Sender<TelemetrySnapshot>,
    events: broadcast::Sender<LinkEvent>,
}

impl Dispatcher {
    pub fn new(
        profile: VehicleProfile,
        shared: Arc<LinkShared>,
        snapshot: watch::Sender<TelemetrySnapshot>,
        events: broadcast::Sender<LinkEvent>,
    ) -> Self {
        Self {
            profile,
            shared,
            snapshot,
            events,
        }
    }

    /// Decode one validated frame and publish the resulting snapshot.
    pub fn handle(&self, frame: &RawFrame) {
        let msg = MavMessage::decode(frame);
        trace!(id = frame.message_id, "dispatching {msg:?}");

        let mut next = self.snapshot.borrow().clone();
        match &msg {
            MavMessage::Heartbeat(hb) => {
                // First contact teaches us the outbound addressing.
                self.shared
                    .target_system
                    .store(frame.system_id, std::sync::atomic::Ordering::SeqCst);
                self.shared
                    .target_component
                    .store(frame.component_id, std::sync::atomic::Ordering::SeqCst);
                self.shared.heartbeat_seen(Instant::now());

                next.vehicle_kind =
                    modes::kind_from_mav_type(hb.mav_type).unwrap_or(self.profile.kind);
                next.armed = hb.base_mode & BASE_MODE_ARMED != 0;
                next.base_mode = hb.base_mode;
                next.custom_mode = hb.custom_mode;
                next.flight_mode = match modes::mode_name(next.vehicle_kind, hb.custom_mode) {
                    Some(name) => name.to_string(),
                    None => format!("Mode({})", hb.custom_mode),
                };
            }
            MavMessage::Attitude(att) => {
                next.roll_deg = att.roll.to_degrees();
                next.pitch_deg = att.pitch.to_degrees();
                next.yaw_deg = att.yaw.to_degrees();
            }
            MavMessage::GlobalPositionInt(pos) => {
                next.latitude = f64::from(pos.lat) / 1e7;
                next.longitude = f64::from(pos.lon) / 1e7;
                next.altitude_msl = pos.alt as f32 / 1000.0;
                next.altitude_rel = pos.relative_alt as f32 / 1000.0;
                if pos.hdg != u16::MAX {
                    next.heading_deg = f32::from(pos.hdg) / 100.0;
                }
            }
            MavMessage::VfrHud(hud) => {
                next.air_speed = hud.airspeed;
                next.ground_speed = hud.groundspeed;
                next.climb_rate = hud.climb;
                next.heading_deg = f32::from(hud.heading);
            }
            MavMessage::SysStatus(sys) => {
                next.battery_voltage = f32::from(sys.voltage_battery) / 1000.0;
                next.battery_current = f32::from(sys.current_battery) / 100.0;
                next.battery_percent = sys.battery_remaining;
            }
            MavMessage::GpsRawInt(gps) => {
                next.gps_fix_type = gps.fix_type;
                next.satellites_visible = gps.satellites_visible;
            }
            MavMessage::MissionCurrent { seq } => {
                next.current_waypoint = *seq;
            }
            MavMessage::StatusText { severity, text } => {
                debug!(severity = *severity, "vehicle status: {text}");
                self.emit(LinkEvent::StatusText {
                    severity: *severity,
                    text: text.clone(),
                });
            }
            MavMessage::CommandAck { command, result } => {
                debug!(command = *command, result = *result, "command acknowledged");
                self.emit(LinkEvent::CommandAck {
                    command: *command,
                    result: *result,
                });
            }
            MavMessage::MissionAck { result } => {
                self.emit(LinkEvent::MissionAck { result: *result });
            }
            MavMessage::MagCalProgress {
                compass_id,
                completion_pct,
            } => {
                self.emit(LinkEvent::CalibrationProgress {
                    compass_id: *compass_id,
                    completion_pct: *completion_pct,
                });
            }
            MavMessage::MagCalReport {
                compass_id,
                cal_status,
                fitness,
            } => {
                self.emit(LinkEvent::CalibrationReport {
                    compass_id: *compass_id,
                    cal_status: *cal_status,
                    fitness: *fitness,
                });
            }
            MavMessage::Unknown { id } => {
                trace!(id = *id, "ignoring unhandled message kind");
                return;
            }
        }

        next.touch();
        self.snapshot.send_replace(next);
    }

    /// Reset the published snapshot to its empty state (disconnect path).
    pub fn reset(&self) {
        self.snapshot
            .send_replace(TelemetrySnapshot::empty(self.profile.kind));
    }

    fn emit(&self, event: LinkEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::VehicleKind;
    use crate::protocol::msg_id;
    use byteorder::{ByteOrder, LittleEndian};
    use std::sync::atomic::Ordering;

    fn fixture() -> (Dispatcher, watch::Receiver<TelemetrySnapshot>, Arc<LinkShared>) {
        let profile = VehicleProfile::from_name("quad").unwrap();
        let shared = Arc::new(LinkShared::default());
        let (snap_tx, snap_rx) = watch::channel(TelemetrySnapshot::empty(profile.kind));
        let (event_tx, _) = broadcast::channel(16);
        (
            Dispatcher::new(profile, shared.clone(), snap_tx, event_tx),
            snap_rx,
            shared,
        )
    }

    fn raw(message_id: u32, payload: Vec<u8>) -> RawFrame {
        RawFrame {
            sequence: 0,
            system_id: 1,
            component_id: 1,
            message_id,
            payload,
        }
    }

    fn heartbeat_payload(custom_mode: u32, mav_type: u8, base_mode: u8) -> Vec<u8> {
        let mut p = vec![0u8; 9];
        LittleEndian::write_u32(&mut p[0..4], custom_mode);
        p[4] = mav_type;
        p[5] = 3;
        p[6] = base_mode;
        p[7] = 4;
        p[8] = 3;
        p
    }

    #[test]
    fn heartbeat_learns_addressing_and_resolves_mode() {
        let (dispatcher, rx, shared) = fixture();
        // Quad heartbeat, armed, custom mode 6 (rotorcraft RTL).
        dispatcher.handle(&raw(msg_id::HEARTBEAT, heartbeat_payload(6, 2, 0x80)));

        let snap = rx.borrow().clone();
        assert!(snap.armed);
        assert_eq!(snap.vehicle_kind, VehicleKind::Rotorcraft);
        assert_eq!(snap.flight_mode, "RTL");
        assert_eq!(shared.target_system.load(Ordering::SeqCst), 1);
        assert_eq!(shared.target_component.load(Ordering::SeqCst), 1);
        assert!(shared.heartbeat_age(Instant::now()).is_some());
    }

    #[test]
    fn attitude_only_touches_attitude_fields() {
        let (dispatcher, rx, _) = fixture();

        // Battery state first...
        let mut sys = vec![0u8; 31];
        LittleEndian::write_u16(&mut sys[14..16], 12_600);
        sys[30] = 77;
        dispatcher.handle(&raw(msg_id::SYS_STATUS, sys));

        // ...then an attitude update must leave it alone.
        let mut att = vec![0u8; 28];
        LittleEndian::write_f32(&mut att[4..8], std::f32::consts::FRAC_PI_2);
        dispatcher.handle(&raw(msg_id::ATTITUDE, att));

        let snap = rx.borrow().clone();
        assert!((snap.roll_deg - 90.0).abs() < 1e-3);
        assert!((snap.battery_voltage - 12.6).abs() < 1e-6);
        assert_eq!(snap.battery_percent, 77);
    }

    #[test]
    fn position_scaling() {
        let (dispatcher, rx, _) = fixture();
        let mut p = vec![0u8; 28];
        LittleEndian::write_i32(&mut p[4..8], 473_977_420);
        LittleEndian::write_i32(&mut p[8..12], -1_223_064_140);
        LittleEndian::write_i32(&mut p[12..16], 120_000);
        LittleEndian::write_i32(&mut p[16..20], 35_000);
        LittleEndian::write_u16(&mut p[26..28], 27_000);
        dispatcher.handle(&raw(msg_id::GLOBAL_POSITION_INT, p));

        let snap = rx.borrow().clone();
        assert!((snap.latitude - 47.397_742).abs() < 1e-6);
        assert!((snap.longitude + 122.306_414).abs() < 1e-6);
        assert!((snap.altitude_msl - 120.0).abs() < 1e-3);
        assert!((snap.altitude_rel - 35.0).abs() < 1e-3);
        assert!((snap.heading_deg - 270.0).abs() < 1e-3);
    }

    #[test]
    fn statustext_and_ack_raise_events() {
        let (dispatcher, _rx, _) = fixture();
        let mut events = dispatcher.events.subscribe();

        let mut text = vec![4u8];
        text.extend_from_slice(b"Throttle below failsafe");
        text.resize(51, 0);
        dispatcher.handle(&raw(msg_id::STATUSTEXT, text));

        let mut ack = vec![0u8; 3];
        LittleEndian::write_u16(&mut ack[0..2], 400);
        ack[2] = 0;
        dispatcher.handle(&raw(msg_id::COMMAND_ACK, ack));

        match events.try_recv().expect("status text event") {
            LinkEvent::StatusText { severity, text } => {
                assert_eq!(severity, 4);
                assert_eq!(text, "Throttle below failsafe");
            }
            other => panic!("unexpected event {other:?}"),
        }
        match events.try_recv().expect("ack event") {
            LinkEvent::CommandAck { command, result } => {
                assert_eq!(command, 400);
                assert_eq!(result, 0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_changes_nothing() {
        let (dispatcher, rx, _) = fixture();
        let before = rx.borrow().clone();
        dispatcher.handle(&raw(4242, vec![1, 2, 3]));
        let after = rx.borrow().clone();
        assert_eq!(after.updated_at, before.updated_at);
        assert!(after.last_update.is_none());
    }

    #[test]
    fn reset_returns_snapshot_to_empty() {
        let (dispatcher, rx, _) = fixture();
        dispatcher.handle(&raw(msg_id::HEARTBEAT, heartbeat_payload(0, 2, 0x80)));
        assert!(rx.borrow().armed);
        dispatcher.reset();
        let snap = rx.borrow().clone();
        assert!(!snap.armed);
        assert!(snap.last_update.is_none());
    }
}
