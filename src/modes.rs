//! Vehicle kinds and flight-mode name tables.
//!
//! The autopilot reports a raw custom-mode number whose meaning depends on
//! the airframe family, so mode names resolve through a closed per-kind
//! table. The profile is injected into the link at construction; the
//! dispatcher refines the kind from the vehicle's own heartbeat when one
//! arrives.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleKind {
    Rotorcraft,
    FixedWing,
    Rover,
}

/// Which vehicle this ground station is talking to: the mode-number family
/// and the MAV_TYPE code advertised in our own keep-alive heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleProfile {
    pub kind: VehicleKind,
    pub mav_type: u8,
}

impl VehicleProfile {
    /// Profile from a configured airframe name, e.g. `"quad"` or `"plane"`.
    pub fn from_name(name: &str) -> Option<Self> {
        let (kind, mav_type) = match name {
            "quad" => (VehicleKind::Rotorcraft, 2),
            "heli" => (VehicleKind::Rotorcraft, 4),
            "hexa" => (VehicleKind::Rotorcraft, 13),
            "octo" => (VehicleKind::Rotorcraft, 14),
            "tri" => (VehicleKind::Rotorcraft, 15),
            "plane" => (VehicleKind::FixedWing, 1),
            "vtol" => (VehicleKind::FixedWing, 21),
            "rover" => (VehicleKind::Rover, 10),
            "boat" => (VehicleKind::Rover, 11),
            _ => return None,
        };
        Some(Self { kind, mav_type })
    }
}

/// Kind implied by a heartbeat's MAV_TYPE, when it maps to a family we know.
pub fn kind_from_mav_type(mav_type: u8) -> Option<VehicleKind> {
    match mav_type {
        2 | 3 | 4 | 13 | 14 | 15 => Some(VehicleKind::Rotorcraft),
        1 | 19..=25 => Some(VehicleKind::FixedWing),
        10 | 11 => Some(VehicleKind::Rover),
        _ => None,
    }
}

// ArduPilot custom-mode numbering per airframe family.
const ROTORCRAFT_MODES: &[(u32, &str)] = &[
    (0, "Stabilize"),
    (1, "Acro"),
    (2, "AltHold"),
    (3, "Auto"),
    (4, "Guided"),
    (5, "Loiter"),
    (6, "RTL"),
    (7, "Circle"),
    (9, "Land"),
    (11, "Drift"),
    (13, "Sport"),
    (14, "Flip"),
    (15, "AutoTune"),
    (16, "PosHold"),
    (17, "Brake"),
];

const FIXED_WING_MODES: &[(u32, &str)] = &[
    (0, "Manual"),
    (1, "Circle"),
    (2, "Stabilize"),
    (3, "Training"),
    (4, "Acro"),
    (5, "FBWA"),
    (6, "FBWB"),
    (7, "Cruise"),
    (8, "AutoTune"),
    (10, "Auto"),
    (11, "RTL"),
    (12, "Loiter"),
    (15, "Guided"),
];

const ROVER_MODES: &[(u32, &str)] = &[
    (0, "Manual"),
    (1, "Acro"),
    (3, "Steering"),
    (4, "Hold"),
    (10, "Auto"),
    (11, "RTL"),
    (15, "Guided"),
];

fn table(kind: VehicleKind) -> &'static [(u32, &'static str)] {
    match kind {
        VehicleKind::Rotorcraft => ROTORCRAFT_MODES,
        VehicleKind::FixedWing => FIXED_WING_MODES,
        VehicleKind::Rover => ROVER_MODES,
    }
}

/// Display name for a raw custom mode, or `None` for numbers the table
/// does not cover.
pub fn mode_name(kind: VehicleKind, custom_mode: u32) -> Option<&'static str> {
    table(kind)
        .iter()
        .find(|(num, _)| *num == custom_mode)
        .map(|(_, name)| *name)
}

/// Inverse lookup, case-insensitive, for `set_flight_mode("RTL")`-style calls.
pub fn mode_number(kind: VehicleKind, name: &str) -> Option<u32> {
    table(kind)
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(num, _)| *num)
}
