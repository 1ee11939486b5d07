//! Typed views of the MAVLink messages this link speaks.
//!
//! Decoding is total: a frame with an id outside the decode set becomes
//! [`MavMessage::Unknown`] and is ignored downstream. Payloads are
//! zero-extended before field extraction because v2 frames truncate trailing
//! zero bytes on the wire.

use byteorder::{ByteOrder, LittleEndian};

use super::frame::RawFrame;
use super::msg_id;

const MAX_PAYLOAD: usize = 255;

/// Inbound messages folded into the telemetry snapshot or surfaced as events.
#[derive(Debug, Clone, PartialEq)]
pub enum MavMessage {
    Heartbeat(Heartbeat),
    SysStatus(SysStatus),
    GpsRawInt(GpsRawInt),
    Attitude(Attitude),
    GlobalPositionInt(GlobalPositionInt),
    VfrHud(VfrHud),
    MissionCurrent { seq: u16 },
    MissionAck { result: u8 },
    StatusText { severity: u8, text: String },
    CommandAck { command: u16, result: u8 },
    MagCalProgress { compass_id: u8, completion_pct: u8 },
    MagCalReport { compass_id: u8, cal_status: u8, fitness: f32 },
    Unknown { id: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SysStatus {
    /// Battery voltage, millivolts.
    pub voltage_battery: u16,
    /// Battery current, 10 mA units, -1 when unknown.
    pub current_battery: i16,
    /// Remaining charge percent, -1 when unknown.
    pub battery_remaining: i8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsRawInt {
    pub fix_type: u8,
    pub satellites_visible: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attitude {
    /// Radians on the wire.
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalPositionInt {
    /// Degrees * 1e7.
    pub lat: i32,
    pub lon: i32,
    /// MSL altitude, millimeters.
    pub alt: i32,
    /// Altitude above home, millimeters.
    pub relative_alt: i32,
    /// Heading, centidegrees, u16::MAX when unknown.
    pub hdg: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VfrHud {
    pub airspeed: f32,
    pub groundspeed: f32,
    pub climb: f32,
    pub heading: i16,
}

impl MavMessage {
    pub fn decode(frame: &RawFrame) -> Self {
        // Zero-extend so fixed offsets are always in range.
        let mut buf = [0u8; MAX_PAYLOAD];
        let len = frame.payload.len().min(MAX_PAYLOAD);
        buf[..len].copy_from_slice(&frame.payload[..len]);
        let p = &buf[..];

        match frame.message_id {
            msg_id::HEARTBEAT => MavMessage::Heartbeat(Heartbeat {
                custom_mode: LittleEndian::read_u32(&p[0..4]),
                mav_type: p[4],
                autopilot: p[5],
                base_mode: p[6],
                system_status: p[7],
            }),
            msg_id::SYS_STATUS => MavMessage::SysStatus(SysStatus {
                voltage_battery: LittleEndian::read_u16(&p[14..16]),
                current_battery: LittleEndian::read_i16(&p[16..18]),
                battery_remaining: p[30] as i8,
            }),
            msg_id::GPS_RAW_INT => MavMessage::GpsRawInt(GpsRawInt {
                fix_type: p[28],
                satellites_visible: p[29],
            }),
            msg_id::ATTITUDE => MavMessage::Attitude(Attitude {
                roll: LittleEndian::read_f32(&p[4..8]),
                pitch: LittleEndian::read_f32(&p[8..12]),
                yaw: LittleEndian::read_f32(&p[12..16]),
            }),
            msg_id::GLOBAL_POSITION_INT => MavMessage::GlobalPositionInt(GlobalPositionInt {
                lat: LittleEndian::read_i32(&p[4..8]),
                lon: LittleEndian::read_i32(&p[8..12]),
                alt: LittleEndian::read_i32(&p[12..16]),
                relative_alt: LittleEndian::read_i32(&p[16..20]),
                hdg: LittleEndian::read_u16(&p[26..28]),
            }),
            msg_id::VFR_HUD => MavMessage::VfrHud(VfrHud {
                airspeed: LittleEndian::read_f32(&p[0..4]),
                groundspeed: LittleEndian::read_f32(&p[4..8]),
                climb: LittleEndian::read_f32(&p[12..16]),
                heading: LittleEndian::read_i16(&p[16..18]),
            }),
            msg_id::MISSION_CURRENT => MavMessage::MissionCurrent {
                seq: LittleEndian::read_u16(&p[0..2]),
            },
            msg_id::MISSION_ACK => MavMessage::MissionAck { result: p[2] },
            msg_id::STATUSTEXT => MavMessage::StatusText {
                severity: p[0],
                text: fixed_str(&p[1..51]),
            },
            msg_id::COMMAND_ACK => MavMessage::CommandAck {
                command: LittleEndian::read_u16(&p[0..2]),
                result: p[2],
            },
            msg_id::MAG_CAL_PROGRESS => MavMessage::MagCalProgress {
                compass_id: p[12],
                completion_pct: p[16],
            },
            msg_id::MAG_CAL_REPORT => MavMessage::MagCalReport {
                fitness: LittleEndian::read_f32(&p[0..4]),
                compass_id: p[40],
                cal_status: p[42],
            },
            id => MavMessage::Unknown { id },
        }
    }
}

/// NUL-padded fixed-width text field to owned string.
fn fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Outbound messages built by the command encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Heartbeat {
        mav_type: u8,
    },
    CommandLong {
        target_system: u8,
        target_component: u8,
        command: u16,
        confirmation: u8,
        params: [f32; 7],
    },
    SetMode {
        target_system: u8,
        base_mode: u8,
        custom_mode: u32,
    },
    RequestDataStream {
        target_system: u8,
        target_component: u8,
        stream_id: u8,
        rate_hz: u16,
        start: bool,
    },
    MissionCount {
        target_system: u8,
        target_component: u8,
        count: u16,
    },
    MissionItem {
        target_system: u8,
        target_component: u8,
        seq: u16,
        frame: u8,
        command: u16,
        current: u8,
        autocontinue: u8,
        params: [f32; 4],
        x: f32,
        y: f32,
        z: f32,
    },
    MissionClearAll {
        target_system: u8,
        target_component: u8,
    },
    MissionSetCurrent {
        target_system: u8,
        target_component: u8,
        seq: u16,
    },
}

impl Outbound {
    pub fn message_id(&self) -> u8 {
        let id = match self {
            Outbound::Heartbeat { .. } => msg_id::HEARTBEAT,
            Outbound::CommandLong { .. } => msg_id::COMMAND_LONG,
            Outbound::SetMode { .. } => msg_id::SET_MODE,
            Outbound::RequestDataStream { .. } => msg_id::REQUEST_DATA_STREAM,
            Outbound::MissionCount { .. } => msg_id::MISSION_COUNT,
            Outbound::MissionItem { .. } => msg_id::MISSION_ITEM,
            Outbound::MissionClearAll { .. } => msg_id::MISSION_CLEAR_ALL,
            Outbound::MissionSetCurrent { .. } => msg_id::MISSION_SET_CURRENT,
        };
        id as u8
    }

    pub fn payload(&self) -> Vec<u8> {
        match *self {
            Outbound::Heartbeat { mav_type } => {
                let mut p = vec![0u8; 9];
                // custom_mode stays 0; a GCS heartbeat only declares identity.
                p[4] = mav_type;
                p[5] = 8; // MAV_AUTOPILOT_INVALID
                p[7] = 4; // MAV_STATE_ACTIVE
                p[8] = 3; // protocol version
                p
            }
            Outbound::CommandLong {
                target_system,
                target_component,
                command,
                confirmation,
                params,
            } => {
                let mut p = vec![0u8; 33];
                for (i, v) in params.iter().enumerate() {
                    LittleEndian::write_f32(&mut p[i * 4..i * 4 + 4], *v);
                }
                LittleEndian::write_u16(&mut p[28..30], command);
                p[30] = target_system;
                p[31] = target_component;
                p[32] = confirmation;
                p
            }
            Outbound::SetMode {
                target_system,
                base_mode,
                custom_mode,
            } => {
                let mut p = vec![0u8; 6];
                LittleEndian::write_u32(&mut p[0..4], custom_mode);
                p[4] = target_system;
                p[5] = base_mode;
                p
            }
            Outbound::RequestDataStream {
                target_system,
                target_component,
                stream_id,
                rate_hz,
                start,
            } => {
                let mut p = vec![0u8; 6];
                LittleEndian::write_u16(&mut p[0..2], rate_hz);
                p[2] = target_system;
                p[3] = target_component;
                p[4] = stream_id;
                p[5] = start as u8;
                p
            }
            Outbound::MissionCount {
                target_system,
                target_component,
                count,
            } => {
                let mut p = vec![0u8; 4];
                LittleEndian::write_u16(&mut p[0..2], count);
                p[2] = target_system;
                p[3] = target_component;
                p
            }
            Outbound::MissionItem {
                target_system,
                target_component,
                seq,
                frame,
                command,
                current,
                autocontinue,
                params,
                x,
                y,
                z,
            } => {
                let mut p = vec![0u8; 37];
                for (i, v) in params.iter().enumerate() {
                    LittleEndian::write_f32(&mut p[i * 4..i * 4 + 4], *v);
                }
                LittleEndian::write_f32(&mut p[16..20], x);
                LittleEndian::write_f32(&mut p[20..24], y);
                LittleEndian::write_f32(&mut p[24..28], z);
                LittleEndian::write_u16(&mut p[28..30], seq);
                LittleEndian::write_u16(&mut p[30..32], command);
                p[32] = target_system;
                p[33] = target_component;
                p[34] = frame;
                p[35] = current;
                p[36] = autocontinue;
                p
            }
            Outbound::MissionClearAll {
                target_system,
                target_component,
            } => vec![target_system, target_component],
            Outbound::MissionSetCurrent {
                target_system,
                target_component,
                seq,
            } => {
                let mut p = vec![0u8; 4];
                LittleEndian::write_u16(&mut p[0..2], seq);
                p[2] = target_system;
                p[3] = target_component;
                p
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{encode_v1, FrameDecoder};

    fn roundtrip(msg: &Outbound) -> RawFrame {
        let bytes = encode_v1(0, 255, 190, msg.message_id(), &msg.payload());
        let mut dec = FrameDecoder::new();
        dec.push(&bytes);
        dec.next_frame().expect("encoded frame must decode")
    }

    #[test]
    fn heartbeat_decodes_armed_bit_and_type() {
        let payload = [4, 0, 0, 0, 2, 3, 0x80 | 0x01, 4, 3];
        let frame = RawFrame {
            sequence: 0,
            system_id: 1,
            component_id: 1,
            message_id: msg_id::HEARTBEAT,
            payload: payload.to_vec(),
        };
        match MavMessage::decode(&frame) {
            MavMessage::Heartbeat(hb) => {
                assert_eq!(hb.custom_mode, 4);
                assert_eq!(hb.mav_type, 2);
                assert_eq!(hb.base_mode & 0x80, 0x80);
            }
            other => panic!("expected heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn truncated_v2_payload_is_zero_extended() {
        // A v2 sender may strip trailing zeros; custom_mode=0 heartbeat
        // shrinks to its non-zero prefix.
        let frame = RawFrame {
            sequence: 0,
            system_id: 1,
            component_id: 1,
            message_id: msg_id::HEARTBEAT,
            payload: vec![0, 0, 0, 0, 2, 3],
        };
        match MavMessage::decode(&frame) {
            MavMessage::Heartbeat(hb) => {
                assert_eq!(hb.mav_type, 2);
                assert_eq!(hb.base_mode, 0);
                assert_eq!(hb.system_status, 0);
            }
            other => panic!("expected heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn statustext_trims_nul_padding() {
        let mut payload = vec![3u8];
        payload.extend_from_slice(b"PreArm: check fence");
        payload.resize(51, 0);
        let frame = RawFrame {
            sequence: 0,
            system_id: 1,
            component_id: 1,
            message_id: msg_id::STATUSTEXT,
            payload,
        };
        assert_eq!(
            MavMessage::decode(&frame),
            MavMessage::StatusText {
                severity: 3,
                text: "PreArm: check fence".to_string()
            }
        );
    }

    #[test]
    fn unknown_id_decodes_to_unknown() {
        let frame = RawFrame {
            sequence: 0,
            system_id: 1,
            component_id: 1,
            message_id: 9999,
            payload: vec![1, 2, 3],
        };
        assert_eq!(MavMessage::decode(&frame), MavMessage::Unknown { id: 9999 });
    }

    #[test]
    fn command_long_layout() {
        let msg = Outbound::CommandLong {
            target_system: 1,
            target_component: 1,
            command: 400,
            confirmation: 0,
            params: [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        };
        let p = msg.payload();
        assert_eq!(p.len(), 33);
        assert_eq!(LittleEndian::read_f32(&p[0..4]), 1.0);
        assert_eq!(LittleEndian::read_u16(&p[28..30]), 400);
        assert_eq!(p[30], 1);

        let frame = roundtrip(&msg);
        assert_eq!(frame.message_id, msg_id::COMMAND_LONG);
    }

    #[test]
    fn mission_item_layout() {
        let msg = Outbound::MissionItem {
            target_system: 1,
            target_component: 1,
            seq: 3,
            frame: 3,
            command: 16,
            current: 0,
            autocontinue: 1,
            params: [0.0; 4],
            x: 47.5,
            y: -122.3,
            z: 30.0,
        };
        let p = msg.payload();
        assert_eq!(p.len(), 37);
        assert_eq!(LittleEndian::read_f32(&p[16..20]), 47.5);
        assert_eq!(LittleEndian::read_u16(&p[28..30]), 3);
        assert_eq!(LittleEndian::read_u16(&p[30..32]), 16);
        assert_eq!(p[36], 1);
    }

    #[test]
    fn set_mode_layout() {
        let msg = Outbound::SetMode {
            target_system: 0,
            base_mode: 1,
            custom_mode: 11,
        };
        let p = msg.payload();
        assert_eq!(p, vec![11, 0, 0, 0, 0, 1]);
    }
}
