//! The drone link: connection lifecycle, background reader, keep-alive
//! timers, outbound command encoding, and the mission upload handshake.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::events::LinkEvent;
use crate::mission::{MissionStore, Waypoint};
use crate::modes::{self, VehicleProfile};
use crate::protocol::frame::{encode_v1, FrameDecoder};
use crate::protocol::messages::Outbound;
use crate::protocol::{data_stream, mav_cmd, BASE_MODE_CUSTOM_ENABLED};
use crate::telemetry::{LinkShared, LinkStatus, TelemetrySnapshot};
use crate::transport::{self, LinkRead, LinkWrite};

/// Telemetry stream subscriptions, re-requested periodically because some
/// firmware stacks silently stop streaming otherwise. Rates in Hz.
const STREAM_REQUESTS: &[(u8, u16)] = &[
    (data_stream::POSITION, 3),
    (data_stream::EXTRA1, 10),
    (data_stream::EXTRA2, 5),
    (data_stream::RAW_SENSORS, 2),
    (data_stream::EXTENDED_STATUS, 2),
];

/// Magic param2 of COMPONENT_ARM_DISARM that overrides arming checks.
const FORCE_ARM_MAGIC: f32 = 21196.0;

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Our own system id on the wire.
    pub system_id: u8,
    /// Our own component id on the wire.
    pub component_id: u8,
    pub heartbeat_interval: Duration,
    pub stream_refresh: Duration,
    /// Pause between mission upload steps so the vehicle's receive buffer
    /// is not overrun.
    pub item_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            system_id: 255,
            component_id: 190,
            heartbeat_interval: Duration::from_secs(1),
            stream_refresh: Duration::from_secs(5),
            item_delay: Duration::from_millis(100),
        }
    }
}

/// Mission upload progress, for logging. At most one upload is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadPhase {
    CountSent,
    HomeSent,
    ItemSent(u16),
    Done,
}

/// State shared with the background tasks: everything needed to encode and
/// write a message, plus the session atomics.
struct LinkCore {
    config: LinkConfig,
    profile: VehicleProfile,
    shared: Arc<LinkShared>,
    writer: Mutex<Option<Box<dyn LinkWrite>>>,
    seq: AtomicU8,
    events: broadcast::Sender<LinkEvent>,
    endpoint: RwLock<(String, u32)>,
}

impl LinkCore {
    fn target(&self) -> (u8, u8) {
        (
            self.shared.target_system.load(Ordering::SeqCst),
            self.shared.target_component.load(Ordering::SeqCst),
        )
    }

    fn report_error(&self, message: String) {
        error!("{message}");
        let _ = self.events.send(LinkEvent::Error { message });
    }

    /// Encode and write one message. Fire-and-forget for the caller: any
    /// acknowledgement arrives later through the reader as a normal message.
    fn send_message(&self, msg: &Outbound) -> Result<()> {
        if !self.shared.is_connected() {
            let message = format!("not connected, dropping outbound message {:?}", msg);
            self.report_error(message.clone());
            bail!(message);
        }

        let mut guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("transport writer lock poisoned"))?;
        let writer = match guard.as_mut() {
            Some(writer) => writer,
            None => {
                let message = "transport writer missing while connected".to_string();
                self.report_error(message.clone());
                bail!(message);
            }
        };

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let bytes = encode_v1(
            seq,
            self.config.system_id,
            self.config.component_id,
            msg.message_id(),
            &msg.payload(),
        );
        if let Err(e) = writer.write_frame(&bytes) {
            let message = format!("transport write failed: {e}");
            self.report_error(message.clone());
            bail!(message);
        }
        self.shared.packets_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Ground-station end of the vehicle link.
///
/// Construct once with an injected vehicle profile and mission store, then
/// `connect`/`disconnect` per session. All command methods are safe from any
/// task; writes are serialized internally.
pub struct DroneLink {
    core: Arc<LinkCore>,
    dispatcher: Arc<Dispatcher>,
    missions: Arc<MissionStore>,
    snapshot_rx: watch::Receiver<TelemetrySnapshot>,
    running: Arc<AtomicBool>,
    shutdown: Mutex<Option<broadcast::Sender<()>>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    uploading: AtomicBool,
}

impl DroneLink {
    pub fn new(profile: VehicleProfile, missions: Arc<MissionStore>, config: LinkConfig) -> Self {
        let shared = Arc::new(LinkShared::default());
        let (events, _) = broadcast::channel(64);
        let (snapshot_tx, snapshot_rx) = watch::channel(TelemetrySnapshot::empty(profile.kind));
        let dispatcher = Arc::new(Dispatcher::new(
            profile,
            shared.clone(),
            snapshot_tx,
            events.clone(),
        ));
        Self {
            core: Arc::new(LinkCore {
                config,
                profile,
                shared,
                writer: Mutex::new(None),
                seq: AtomicU8::new(0),
                events,
                endpoint: RwLock::new((String::new(), 0)),
            }),
            dispatcher,
            missions,
            snapshot_rx,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(None),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            uploading: AtomicBool::new(false),
        }
    }

    // ---- lifecycle ----

    /// Open the serial port and start the session.
    pub async fn connect(&self, port: &str, baud: u32) -> Result<()> {
        if self.is_connected() {
            warn!("connect called while already connected to {}", self.status().port);
            return Ok(());
        }
        let (reader, writer) = match transport::open_serial(port, baud) {
            Ok(pair) => pair,
            Err(e) => {
                self.core.report_error(format!("connect failed: {e:#}"));
                return Err(e);
            }
        };
        self.attach(reader, writer, port, baud).await
    }

    /// Start a session over an already-open transport. `connect` uses this
    /// with the serial halves; tests drive it directly with fakes.
    pub async fn attach(
        &self,
        reader: Box<dyn LinkRead>,
        writer: Box<dyn LinkWrite>,
        port: &str,
        baud: u32,
    ) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        if let Ok(mut endpoint) = self.core.endpoint.write() {
            *endpoint = (port.to_string(), baud);
        }
        self.core.shared.reset_counters();
        self.core.shared.reset_session();
        if let Ok(mut slot) = self.core.writer.lock() {
            *slot = Some(writer);
        }

        self.running.store(true, Ordering::SeqCst);
        self.core.shared.connected.store(true, Ordering::SeqCst);

        let (shutdown_tx, _) = broadcast::channel(1);
        if let Ok(mut slot) = self.shutdown.lock() {
            *slot = Some(shutdown_tx.clone());
        }

        let reader_task = {
            let dispatcher = self.dispatcher.clone();
            let shared = self.core.shared.clone();
            let running = self.running.clone();
            tokio::task::spawn_blocking(move || read_loop(reader, dispatcher, shared, running))
        };
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            self.core.clone(),
            shutdown_tx.subscribe(),
        ));
        let stream_task = tokio::spawn(stream_request_loop(
            self.core.clone(),
            shutdown_tx.subscribe(),
        ));

        let mut tasks = self.tasks.lock().await;
        tasks.push(reader_task);
        tasks.push(heartbeat_task);
        tasks.push(stream_task);

        info!("link up on {port} at {baud} baud");
        let _ = self.core.events.send(LinkEvent::Connected {
            port: port.to_string(),
            baud,
        });
        Ok(())
    }

    /// Tear the session down: stop the reader, stop the timers, close the
    /// transport, reset state. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);

        let shutdown = self.shutdown.lock().ok().and_then(|mut slot| slot.take());
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("link task join error: {e}");
            }
        }

        if let Ok(mut writer) = self.core.writer.lock() {
            *writer = None;
        }

        let was_connected = self.core.shared.connected.swap(false, Ordering::SeqCst);
        self.core.shared.reset_session();
        self.dispatcher.reset();
        if was_connected {
            info!("link closed");
            let _ = self.core.events.send(LinkEvent::Disconnected);
        }
    }

    // ---- observation ----

    pub fn is_connected(&self) -> bool {
        self.core.shared.is_connected()
    }

    /// Connected and heard a heartbeat recently.
    pub fn is_alive(&self) -> bool {
        self.core.shared.is_alive(Instant::now())
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Change-notified snapshot stream; `changed()` fires per processed
    /// message.
    pub fn subscribe_telemetry(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.core.events.subscribe()
    }

    pub fn status(&self) -> LinkStatus {
        let (port, baud) = self
            .core
            .endpoint
            .read()
            .map(|e| e.clone())
            .unwrap_or_default();
        self.core.shared.status(&port, baud)
    }

    // ---- commands ----

    pub fn arm(&self) -> Result<()> {
        self.command(mav_cmd::COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    pub fn disarm(&self) -> Result<()> {
        self.command(mav_cmd::COMPONENT_ARM_DISARM, [0.0; 7])
    }

    /// Arm while overriding the vehicle's arming checks.
    pub fn force_arm(&self) -> Result<()> {
        self.command(
            mav_cmd::COMPONENT_ARM_DISARM,
            [1.0, FORCE_ARM_MAGIC, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    pub fn takeoff(&self, altitude_m: f32) -> Result<()> {
        self.command(
            mav_cmd::NAV_TAKEOFF,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude_m],
        )
    }

    pub fn land(&self) -> Result<()> {
        self.command(mav_cmd::NAV_LAND, [0.0; 7])
    }

    pub fn return_to_launch(&self) -> Result<()> {
        self.command(mav_cmd::NAV_RETURN_TO_LAUNCH, [0.0; 7])
    }

    pub fn start_compass_calibration(&self) -> Result<()> {
        self.command(mav_cmd::DO_START_MAG_CAL, [0.0; 7])
    }

    /// Raw escape hatch: send any COMMAND_LONG.
    pub fn command(&self, command: u16, params: [f32; 7]) -> Result<()> {
        let (target_system, target_component) = self.core.target();
        self.core.send_message(&Outbound::CommandLong {
            target_system,
            target_component,
            command,
            confirmation: 0,
            params,
        })
    }

    /// Command a raw custom mode number.
    pub fn set_mode(&self, custom_mode: u32) -> Result<()> {
        let (target_system, _) = self.core.target();
        self.core.send_message(&Outbound::SetMode {
            target_system,
            base_mode: BASE_MODE_CUSTOM_ENABLED,
            custom_mode,
        })
    }

    /// Command a mode by display name, resolved against the vehicle kind
    /// (learned from its heartbeat, falling back to the configured profile).
    pub fn set_flight_mode(&self, name: &str) -> Result<()> {
        let kind = self.snapshot_rx.borrow().vehicle_kind;
        match modes::mode_number(kind, name) {
            Some(custom_mode) => self.set_mode(custom_mode),
            None => {
                let message = format!("unknown flight mode {name:?} for {kind:?}");
                self.core.report_error(message.clone());
                bail!(message)
            }
        }
    }

    /// Fly to a point in guided mode (mission item with the "guided goto"
    /// current flag; not stored in the onboard mission).
    pub fn goto(&self, latitude: f64, longitude: f64, altitude_m: f32) -> Result<()> {
        let (target_system, target_component) = self.core.target();
        self.core.send_message(&Outbound::MissionItem {
            target_system,
            target_component,
            seq: 0,
            frame: 3, // GLOBAL_RELATIVE_ALT
            command: mav_cmd::NAV_WAYPOINT,
            current: 2,
            autocontinue: 1,
            params: [0.0; 4],
            x: latitude as f32,
            y: longitude as f32,
            z: altitude_m,
        })
    }

    pub fn set_current_waypoint(&self, seq: u16) -> Result<()> {
        let (target_system, target_component) = self.core.target();
        self.core.send_message(&Outbound::MissionSetCurrent {
            target_system,
            target_component,
            seq,
        })
    }

    // ---- missions ----

    /// Replace the locally planned mission without touching the vehicle.
    pub fn save_planned_mission(&self, waypoints: Vec<Waypoint>) {
        self.missions.set_planned(waypoints);
    }

    pub fn planned_mission(&self) -> Vec<Waypoint> {
        self.missions.planned()
    }

    /// Mission last known to be on the vehicle.
    pub fn active_mission(&self) -> Vec<Waypoint> {
        self.missions.active()
    }

    /// Push a mission to the vehicle: clear, count, home slot, then each
    /// waypoint, paced by a short delay per step.
    ///
    /// This is a pipelined best-effort push: items are not individually
    /// acknowledged before the next is sent, and success means every write
    /// completed, not that the vehicle stored every item. Callers wanting
    /// certainty should read the mission back.
    pub async fn upload_mission(&self, waypoints: Vec<Waypoint>) -> Result<()> {
        if waypoints.is_empty() {
            let message = "refusing to upload an empty mission".to_string();
            self.core.report_error(message.clone());
            bail!(message);
        }
        if !self.is_connected() {
            let message = "mission upload requires an open link".to_string();
            self.core.report_error(message.clone());
            bail!(message);
        }
        if self
            .uploading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let message = "mission upload already in flight".to_string();
            self.core.report_error(message.clone());
            bail!(message);
        }

        let result = self.run_upload(&waypoints).await;
        self.uploading.store(false, Ordering::SeqCst);
        match &result {
            Ok(()) => {
                info!("mission upload complete ({} waypoints)", waypoints.len());
                self.missions.set_active(waypoints);
            }
            Err(e) => warn!("mission upload aborted: {e:#}"),
        }
        result
    }

    async fn run_upload(&self, waypoints: &[Waypoint]) -> Result<()> {
        let (target_system, target_component) = self.core.target();
        let pace = self.core.config.item_delay;

        self.core.send_message(&Outbound::MissionClearAll {
            target_system,
            target_component,
        })?;
        sleep(pace).await;

        // The vehicle keeps an implicit home slot at sequence 0.
        let count = waypoints.len() as u16 + 1;
        self.core.send_message(&Outbound::MissionCount {
            target_system,
            target_component,
            count,
        })?;
        let mut phase = UploadPhase::CountSent;
        debug!(?phase, count, "mission upload");
        sleep(pace).await;

        let home = &waypoints[0];
        self.core.send_message(&Outbound::MissionItem {
            target_system,
            target_component,
            seq: 0,
            frame: 0, // GLOBAL; home is an absolute position
            command: mav_cmd::NAV_WAYPOINT,
            current: 1,
            autocontinue: 1,
            params: [0.0; 4],
            x: home.latitude as f32,
            y: home.longitude as f32,
            z: home.altitude,
        })?;
        phase = UploadPhase::HomeSent;
        debug!(?phase, "mission upload");
        sleep(pace).await;

        for (index, wp) in waypoints.iter().enumerate() {
            let seq = index as u16 + 1;
            self.core.send_message(&Outbound::MissionItem {
                target_system,
                target_component,
                seq,
                frame: 3, // GLOBAL_RELATIVE_ALT
                command: wp.kind.command_id(),
                current: 0,
                autocontinue: 1,
                params: wp.kind.item_params(),
                x: wp.latitude as f32,
                y: wp.longitude as f32,
                z: wp.altitude,
            })?;
            phase = UploadPhase::ItemSent(seq);
            debug!(?phase, "mission upload");
            sleep(pace).await;
        }

        phase = UploadPhase::Done;
        debug!(?phase, "mission upload");
        Ok(())
    }
}

/// Background read loop: transport bytes in, decoded frames dispatched.
/// Every per-iteration failure is logged and counted; only the running flag
/// ends the loop.
fn read_loop(
    mut reader: Box<dyn LinkRead>,
    dispatcher: Arc<Dispatcher>,
    shared: Arc<LinkShared>,
    running: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 1024];
    let mut bad_seen = 0u64;

    while running.load(Ordering::SeqCst) {
        match reader.read_bytes(&mut chunk) {
            Ok(0) => {
                // No data inside the poll timeout; back off briefly.
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(n) => {
                shared.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
                decoder.push(&chunk[..n]);
                while let Some(frame) = decoder.next_frame() {
                    shared.packets_received.fetch_add(1, Ordering::Relaxed);
                    dispatcher.handle(&frame);
                }
                let bad = decoder.stats().bad_frames;
                if bad > bad_seen {
                    shared
                        .packet_errors
                        .fetch_add(bad - bad_seen, Ordering::Relaxed);
                    bad_seen = bad;
                }
            }
            Err(e) => {
                warn!("transport read error: {e}");
                shared.packet_errors.fetch_add(1, Ordering::Relaxed);
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
    debug!("reader loop stopped");
}

/// Keep-alive: our own heartbeat, advertising the configured vehicle kind.
async fn heartbeat_loop(core: Arc<LinkCore>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(core.config.heartbeat_interval);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("heartbeat timer stopped");
                break;
            }
            _ = interval.tick() => {
                if !core.shared.is_connected() {
                    continue;
                }
                let _ = core.send_message(&Outbound::Heartbeat {
                    mav_type: core.profile.mav_type,
                });
            }
        }
    }
}

/// Periodic re-request of the telemetry streams, each category at its own
/// rate.
async fn stream_request_loop(core: Arc<LinkCore>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(core.config.stream_refresh);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("stream request timer stopped");
                break;
            }
            _ = interval.tick() => {
                if !core.shared.is_connected() {
                    continue;
                }
                let (target_system, target_component) = core.target();
                for &(stream_id, rate_hz) in STREAM_REQUESTS {
                    let _ = core.send_message(&Outbound::RequestDataStream {
                        target_system,
                        target_component,
                        stream_id,
                        rate_hz,
                        start: true,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::VehicleProfile;
    use std::io;
    use std::sync::Mutex as StdMutex;

    struct NullReader;
    impl LinkRead for NullReader {
        fn read_bytes(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            Ok(0)
        }
    }

    #[derive(Clone, Default)]
    struct SinkWriter(Arc<StdMutex<Vec<u8>>>);
    impl LinkWrite for SinkWriter {
        fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }
    }

    fn link() -> DroneLink {
        DroneLink::new(
            VehicleProfile::from_name("quad").unwrap(),
            Arc::new(MissionStore::new()),
            LinkConfig {
                item_delay: Duration::from_millis(1),
                ..LinkConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn send_while_disconnected_is_rejected_with_event() {
        let link = link();
        let mut events = link.subscribe_events();
        assert!(link.arm().is_err());
        match events.try_recv().expect("error event") {
            LinkEvent::Error { message } => assert!(message.contains("not connected")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_mission_upload_is_rejected_without_io() {
        let link = link();
        let sink = SinkWriter::default();
        link.attach(Box::new(NullReader), Box::new(sink.clone()), "mock", 57_600)
            .await
            .unwrap();

        assert!(link.upload_mission(Vec::new()).await.is_err());
        link.disconnect().await;
        // Only heartbeat/stream traffic may be in the sink, never mission
        // messages.
        let bytes = sink.0.lock().unwrap().clone();
        let mut dec = FrameDecoder::new();
        dec.push(&bytes);
        while let Some(frame) = dec.next_frame() {
            assert!(
                frame.message_id != crate::protocol::msg_id::MISSION_COUNT
                    && frame.message_id != crate::protocol::msg_id::MISSION_CLEAR_ALL
            );
        }
    }

    #[tokio::test]
    async fn only_one_upload_in_flight() {
        let link = link();
        link.uploading.store(true, Ordering::SeqCst);
        let sink = SinkWriter::default();
        link.attach(Box::new(NullReader), Box::new(sink), "mock", 57_600)
            .await
            .unwrap();

        let wp = vec![Waypoint {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 10.0,
            kind: crate::mission::WaypointKind::Waypoint,
        }];
        let err = link.upload_mission(wp).await.expect_err("guard must hold");
        assert!(err.to_string().contains("already in flight"));
        link.disconnect().await;
    }

    #[tokio::test]
    async fn sequence_counter_wraps() {
        let link = link();
        let sink = SinkWriter::default();
        link.attach(Box::new(NullReader), Box::new(sink.clone()), "mock", 57_600)
            .await
            .unwrap();
        link.core.seq.store(255, Ordering::SeqCst);

        link.land().unwrap();
        link.land().unwrap();
        link.disconnect().await;

        let bytes = sink.0.lock().unwrap().clone();
        let mut dec = FrameDecoder::new();
        dec.push(&bytes);
        let mut seqs = Vec::new();
        while let Some(frame) = dec.next_frame() {
            if frame.message_id == crate::protocol::msg_id::COMMAND_LONG {
                seqs.push(frame.sequence);
            }
        }
        assert_eq!(seqs, vec![255, 0]);
    }
}
