//! Wire protocol: MAVLink framing and the message subset this link speaks.

pub mod frame;
pub mod messages;

/// Message ids decoded or encoded by this crate (common + ArduPilot dialect).
pub mod msg_id {
    pub const HEARTBEAT: u32 = 0;
    pub const SYS_STATUS: u32 = 1;
    pub const SET_MODE: u32 = 11;
    pub const PARAM_VALUE: u32 = 22;
    pub const GPS_RAW_INT: u32 = 24;
    pub const RAW_IMU: u32 = 27;
    pub const SCALED_PRESSURE: u32 = 29;
    pub const ATTITUDE: u32 = 30;
    pub const LOCAL_POSITION_NED: u32 = 32;
    pub const GLOBAL_POSITION_INT: u32 = 33;
    pub const RC_CHANNELS_RAW: u32 = 35;
    pub const SERVO_OUTPUT_RAW: u32 = 36;
    pub const MISSION_ITEM: u32 = 39;
    pub const MISSION_REQUEST: u32 = 40;
    pub const MISSION_SET_CURRENT: u32 = 41;
    pub const MISSION_CURRENT: u32 = 42;
    pub const MISSION_COUNT: u32 = 44;
    pub const MISSION_CLEAR_ALL: u32 = 45;
    pub const MISSION_ACK: u32 = 47;
    pub const NAV_CONTROLLER_OUTPUT: u32 = 62;
    pub const RC_CHANNELS: u32 = 65;
    pub const REQUEST_DATA_STREAM: u32 = 66;
    pub const DATA_STREAM: u32 = 67;
    pub const VFR_HUD: u32 = 74;
    pub const COMMAND_LONG: u32 = 76;
    pub const COMMAND_ACK: u32 = 77;
    pub const BATTERY_STATUS: u32 = 147;
    pub const MAG_CAL_PROGRESS: u32 = 191;
    pub const MAG_CAL_REPORT: u32 = 192;
    pub const STATUSTEXT: u32 = 253;
}

/// MAV_CMD codes used by the command surface and the mission item table.
pub mod mav_cmd {
    pub const NAV_WAYPOINT: u16 = 16;
    pub const NAV_LOITER_UNLIM: u16 = 17;
    pub const NAV_LOITER_TURNS: u16 = 18;
    pub const NAV_LOITER_TIME: u16 = 19;
    pub const NAV_RETURN_TO_LAUNCH: u16 = 20;
    pub const NAV_LAND: u16 = 21;
    pub const NAV_TAKEOFF: u16 = 22;
    pub const CONDITION_DELAY: u16 = 112;
    pub const DO_CHANGE_SPEED: u16 = 178;
    pub const DO_SET_HOME: u16 = 179;
    pub const PREFLIGHT_CALIBRATION: u16 = 241;
    pub const COMPONENT_ARM_DISARM: u16 = 400;
    pub const DO_START_MAG_CAL: u16 = 42424;
}

/// MAV_DATA_STREAM ids for REQUEST_DATA_STREAM.
pub mod data_stream {
    pub const RAW_SENSORS: u8 = 1;
    pub const EXTENDED_STATUS: u8 = 2;
    pub const POSITION: u8 = 6;
    pub const EXTRA1: u8 = 10;
    pub const EXTRA2: u8 = 11;
}

/// MAV_MODE_FLAG_SAFETY_ARMED in the heartbeat base mode.
pub const BASE_MODE_ARMED: u8 = 0x80;
/// MAV_MODE_FLAG_CUSTOM_MODE_ENABLED, set when commanding a custom mode.
pub const BASE_MODE_CUSTOM_ENABLED: u8 = 0x01;

/// Per-message CRC seed byte, folded into the frame checksum so that both
/// sides must agree on the message layout. Ids without an entry cannot be
/// checksum-verified and are treated as framing noise.
pub fn crc_extra(message_id: u32) -> Option<u8> {
    use msg_id::*;
    let extra = match message_id {
        HEARTBEAT => 50,
        SYS_STATUS => 124,
        SET_MODE => 89,
        PARAM_VALUE => 220,
        GPS_RAW_INT => 24,
        RAW_IMU => 144,
        SCALED_PRESSURE => 115,
        ATTITUDE => 39,
        LOCAL_POSITION_NED => 185,
        GLOBAL_POSITION_INT => 104,
        RC_CHANNELS_RAW => 244,
        SERVO_OUTPUT_RAW => 222,
        MISSION_ITEM => 254,
        MISSION_REQUEST => 230,
        MISSION_SET_CURRENT => 28,
        MISSION_CURRENT => 28,
        MISSION_COUNT => 221,
        MISSION_CLEAR_ALL => 232,
        MISSION_ACK => 153,
        NAV_CONTROLLER_OUTPUT => 183,
        RC_CHANNELS => 118,
        REQUEST_DATA_STREAM => 148,
        DATA_STREAM => 21,
        VFR_HUD => 20,
        COMMAND_LONG => 152,
        COMMAND_ACK => 143,
        BATTERY_STATUS => 154,
        MAG_CAL_PROGRESS => 92,
        MAG_CAL_REPORT => 36,
        STATUSTEXT => 83,
        _ => return None,
    };
    Some(extra)
}
