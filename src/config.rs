use std::time::Duration;

use anyhow::{anyhow, Result};
use config;
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::link::LinkConfig;
use crate::modes::VehicleProfile;

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

#[derive(Debug, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub link: LinkSection,
    pub vehicle: VehicleSection,
    pub timing: TimingSection,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkSection {
    pub port: String,
    pub baud: u32,
    pub system_id: u8,
    pub component_id: u8,
}

#[derive(Debug, Deserialize)]
pub struct VehicleSection {
    /// Airframe name: quad, heli, hexa, octo, tri, plane, vtol, rover, boat.
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct TimingSection {
    pub heartbeat_interval_ms: u64,
    pub stream_refresh_ms: u64,
    pub mission_item_delay_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env = std::env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let config_path = format!("config/{}.toml", env);
        let fallback_path = format!("/etc/groundlink/{}.toml", env);

        let config_builder = config::Config::builder();
        let config_builder = if std::path::Path::new(&config_path).exists() {
            config_builder.add_source(config::File::with_name(&config_path))
        } else {
            config_builder.add_source(config::File::with_name(&fallback_path))
        };

        let settings = config_builder.build()?;
        let config = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            system_id: self.link.system_id,
            component_id: self.link.component_id,
            heartbeat_interval: Duration::from_millis(self.timing.heartbeat_interval_ms),
            stream_refresh: Duration::from_millis(self.timing.stream_refresh_ms),
            item_delay: Duration::from_millis(self.timing.mission_item_delay_ms),
        }
    }

    pub fn vehicle_profile(&self) -> Result<VehicleProfile> {
        VehicleProfile::from_name(&self.vehicle.kind)
            .ok_or_else(|| anyhow!("unknown vehicle kind {:?}", self.vehicle.kind))
    }
}
