use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use groundlink::config::CONFIG;
use groundlink::link::DroneLink;
use groundlink::mission::MissionStore;
use groundlink::transport;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    info!("Ground station link starting...");

    let ports = transport::available_ports();
    info!("Serial ports present: {:?}", ports);

    let profile = CONFIG.vehicle_profile()?;
    let missions = Arc::new(MissionStore::new());
    let link = Arc::new(DroneLink::new(profile, missions, CONFIG.link_config()));

    link.connect(&CONFIG.link.port, CONFIG.link.baud).await?;

    // Log every link event as it happens.
    let event_task = {
        let mut events = link.subscribe_events();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => info!("event: {json}"),
                    Err(e) => error!("failed to serialize event: {e}"),
                }
            }
        })
    };

    // Periodic one-line telemetry summary.
    let summary_task = {
        let link = link.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(2));
            loop {
                interval.tick().await;
                let snap = link.telemetry();
                let status = link.status();
                info!(
                    "alive={} mode={} armed={} pos=({:.6},{:.6}) alt={:.1}m batt={:.1}V sats={} rx={} err={}",
                    link.is_alive(),
                    snap.flight_mode,
                    snap.armed,
                    snap.latitude,
                    snap.longitude,
                    snap.altitude_rel,
                    snap.battery_voltage,
                    snap.satellites_visible,
                    status.packets_received,
                    status.packet_errors,
                );
            }
        })
    };

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, closing link..."),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }

    link.disconnect().await;
    event_task.abort();
    summary_task.abort();

    info!("Link closed, shutting down");
    Ok(())
}

fn setup_logging() {
    let level: Level = CONFIG
        .general
        .log_level
        .parse()
        .unwrap_or(Level::INFO);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .expect("Failed to initialize logging");
}
