//! Byte transport boundary.
//!
//! The link engine only ever sees these two traits; the serial
//! implementation lives here, tests supply in-memory fakes. Read and write
//! halves are separate objects so the background reader owns its half
//! outright while command senders share the writer behind a lock.

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

/// Polling timeout for the blocking read loop. Short enough that a stop
/// request is honored promptly.
const READ_TIMEOUT: Duration = Duration::from_millis(25);

/// Read half. `read_bytes` returns `Ok(0)` on poll timeout, which the read
/// loop treats as "no data yet", not end-of-stream.
pub trait LinkRead: Send {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Write half. One whole frame per call; implementations flush.
pub trait LinkWrite: Send {
    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()>;
}

struct SerialReader(Box<dyn serialport::SerialPort>);

impl LinkRead for SerialReader {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use io::Read;
        match self.0.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}

struct SerialWriter(Box<dyn serialport::SerialPort>);

impl LinkWrite for SerialWriter {
    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        use io::Write;
        self.0.write_all(bytes)?;
        self.0.flush()
    }
}

/// Open a serial port and split it into independently owned halves.
pub fn open_serial(port: &str, baud: u32) -> Result<(Box<dyn LinkRead>, Box<dyn LinkWrite>)> {
    let reader = serialport::new(port, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .with_context(|| format!("failed to open serial port {port} at {baud} baud"))?;
    let writer = reader
        .try_clone()
        .with_context(|| format!("failed to clone serial port {port} for writing"))?;
    info!("opened {port} at {baud} baud");
    Ok((
        Box::new(SerialReader(reader)),
        Box::new(SerialWriter(writer)),
    ))
}

/// Names of serial ports present on this machine.
pub fn available_ports() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default()
}
