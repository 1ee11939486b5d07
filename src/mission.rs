//! Missions: waypoint lists, the wire command table, and the store holding
//! the planned (locally edited) and active (last known on vehicle) lists.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::protocol::mav_cmd;

/// One mission entry. The kind tag carries the per-type parameters; anything
/// the wire table does not know collapses to a plain waypoint on upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude above home, meters.
    pub altitude: f32,
    pub kind: WaypointKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaypointKind {
    Waypoint,
    LoiterUnlimited { radius_m: f32 },
    LoiterTime { seconds: f32 },
    LoiterTurns { turns: f32 },
    ReturnToLaunch,
    Land,
    Takeoff,
    Delay { seconds: f32 },
    ChangeSpeed { speed_m_s: f32 },
    SetHome,
}

impl WaypointKind {
    /// MAV_CMD code for this entry.
    pub fn command_id(&self) -> u16 {
        match self {
            WaypointKind::Waypoint => mav_cmd::NAV_WAYPOINT,
            WaypointKind::LoiterUnlimited { .. } => mav_cmd::NAV_LOITER_UNLIM,
            WaypointKind::LoiterTime { .. } => mav_cmd::NAV_LOITER_TIME,
            WaypointKind::LoiterTurns { .. } => mav_cmd::NAV_LOITER_TURNS,
            WaypointKind::ReturnToLaunch => mav_cmd::NAV_RETURN_TO_LAUNCH,
            WaypointKind::Land => mav_cmd::NAV_LAND,
            WaypointKind::Takeoff => mav_cmd::NAV_TAKEOFF,
            WaypointKind::Delay { .. } => mav_cmd::CONDITION_DELAY,
            WaypointKind::ChangeSpeed { .. } => mav_cmd::DO_CHANGE_SPEED,
            WaypointKind::SetHome => mav_cmd::DO_SET_HOME,
        }
    }

    /// param1..param4 of the mission item for this entry.
    pub fn item_params(&self) -> [f32; 4] {
        match *self {
            WaypointKind::LoiterUnlimited { radius_m } => [0.0, 0.0, radius_m, 0.0],
            WaypointKind::LoiterTime { seconds } => [seconds, 0.0, 0.0, 0.0],
            WaypointKind::LoiterTurns { turns } => [turns, 0.0, 0.0, 0.0],
            WaypointKind::Delay { seconds } => [seconds, 0.0, 0.0, 0.0],
            // DO_CHANGE_SPEED: param1 = speed type (ground), param2 = m/s
            WaypointKind::ChangeSpeed { speed_m_s } => [1.0, speed_m_s, 0.0, 0.0],
            _ => [0.0; 4],
        }
    }
}

/// Holder for the two mission lists. Lists are replaced wholesale, never
/// edited in place; handed to the link at construction so there is exactly
/// one owner per application.
#[derive(Debug, Default)]
pub struct MissionStore {
    planned: RwLock<Vec<Waypoint>>,
    active: RwLock<Vec<Waypoint>>,
}

impl MissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the locally edited mission.
    pub fn set_planned(&self, waypoints: Vec<Waypoint>) {
        if let Ok(mut slot) = self.planned.write() {
            *slot = waypoints;
        }
    }

    pub fn planned(&self) -> Vec<Waypoint> {
        self.planned.read().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn clear_planned(&self) {
        self.set_planned(Vec::new());
    }

    /// Record the mission now believed to live on the vehicle (display only).
    pub fn set_active(&self, waypoints: Vec<Waypoint>) {
        if let Ok(mut slot) = self.active.write() {
            *slot = waypoints;
        }
    }

    pub fn active(&self) -> Vec<Waypoint> {
        self.active.read().map(|w| w.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_table_is_closed() {
        assert_eq!(WaypointKind::Waypoint.command_id(), 16);
        assert_eq!(
            WaypointKind::LoiterUnlimited { radius_m: 40.0 }.command_id(),
            17
        );
        assert_eq!(WaypointKind::LoiterTurns { turns: 2.0 }.command_id(), 18);
        assert_eq!(WaypointKind::LoiterTime { seconds: 15.0 }.command_id(), 19);
        assert_eq!(WaypointKind::ReturnToLaunch.command_id(), 20);
        assert_eq!(WaypointKind::Land.command_id(), 21);
        assert_eq!(WaypointKind::Takeoff.command_id(), 22);
        assert_eq!(WaypointKind::Delay { seconds: 5.0 }.command_id(), 112);
        assert_eq!(
            WaypointKind::ChangeSpeed { speed_m_s: 12.0 }.command_id(),
            178
        );
        assert_eq!(WaypointKind::SetHome.command_id(), 179);
    }

    #[test]
    fn per_kind_params_land_in_the_right_slots() {
        assert_eq!(
            WaypointKind::LoiterUnlimited { radius_m: 40.0 }.item_params(),
            [0.0, 0.0, 40.0, 0.0]
        );
        assert_eq!(
            WaypointKind::LoiterTime { seconds: 15.0 }.item_params(),
            [15.0, 0.0, 0.0, 0.0]
        );
        assert_eq!(
            WaypointKind::ChangeSpeed { speed_m_s: 12.0 }.item_params(),
            [1.0, 12.0, 0.0, 0.0]
        );
    }

    #[test]
    fn store_replaces_lists_wholesale() {
        let store = MissionStore::new();
        assert!(store.planned().is_empty());

        let first = vec![Waypoint {
            latitude: 1.0,
            longitude: 2.0,
            altitude: 30.0,
            kind: WaypointKind::Waypoint,
        }];
        store.set_planned(first.clone());
        assert_eq!(store.planned(), first);

        let second = vec![Waypoint {
            latitude: 3.0,
            longitude: 4.0,
            altitude: 50.0,
            kind: WaypointKind::Land,
        }];
        store.set_planned(second.clone());
        assert_eq!(store.planned(), second);

        store.clear_planned();
        assert!(store.planned().is_empty());
        assert!(store.active().is_empty());
    }
}
