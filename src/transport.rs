//! Byte-stream transport to the device.
//!
//! The driver only needs two capabilities: send a command and read up to N
//! bytes with a timeout. Both take `&self` so the decode loop can block in a
//! read while the controlling thread sends `stop`.

use std::io::{Read, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, info};
use serialport::{SerialPort, SerialPortType};

use crate::errors::{DriverError, Result};

/// DATAQ Instruments USB vendor id.
pub const DATAQ_VENDOR_ID: u16 = 0x0683;

/// Baud rate used in CDC mode (ignored by the device, required by the API).
const BAUD_RATE: u32 = 115_200;

/// Initial read timeout; every receive sets its own.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Input flush bounds: per-read wait, read size, read count and total time.
const FLUSH_POLL: Duration = Duration::from_millis(20);
const FLUSH_READ_LEN: usize = 256;
const FLUSH_MAX_READS: usize = 64;
const FLUSH_MAX_TIME: Duration = Duration::from_millis(200);

/// Transport capability the driver is written against.
pub trait Transport: Send + Sync {
    /// Write all of `bytes` to the device.
    fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Read at most `max_len` bytes, waiting up to `timeout`.
    ///
    /// Returns an empty vector when nothing arrived in time. Never blocks
    /// indefinitely.
    fn receive(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Discard whatever is waiting in the input buffer.
    ///
    /// Stops at the first empty read, after 64 reads or after 200 ms.
    /// Returns the number of bytes dropped.
    fn flush_input(&self) -> Result<usize> {
        let start = Instant::now();
        let mut dropped = 0;
        for _ in 0..FLUSH_MAX_READS {
            let chunk = self.receive(FLUSH_READ_LEN, FLUSH_POLL)?;
            if chunk.is_empty() {
                break;
            }
            dropped += chunk.len();
            if start.elapsed() > FLUSH_MAX_TIME {
                break;
            }
        }
        if dropped > 0 {
            debug!("flushed {} stale input bytes", dropped);
        }
        Ok(dropped)
    }
}

// ============================================================================
// Serial (CDC) transport
// ============================================================================

/// Transport over the device's USB CDC serial interface.
///
/// Reader and writer are separate handles on the same port, each behind its
/// own lock.
pub struct SerialTransport {
    path: String,
    reader: Mutex<Box<dyn SerialPort>>,
    writer: Mutex<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn open(path: &str) -> Result<Self> {
        let writer = serialport::new(path, BAUD_RATE)
            .timeout(DEFAULT_TIMEOUT)
            .open()?;
        let reader = writer.try_clone()?;
        info!("opened serial transport: path={}", path);
        Ok(Self {
            path: path.to_string(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }

    /// Open the first attached DATAQ device.
    pub fn open_first() -> Result<Self> {
        let path = find_device_port()?.ok_or_else(|| {
            DriverError::Protocol("no DATAQ device found on any serial port".into())
        })?;
        Self::open(&path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock<'a>(
        port: &'a Mutex<Box<dyn SerialPort>>,
    ) -> Result<std::sync::MutexGuard<'a, Box<dyn SerialPort>>> {
        port.lock()
            .map_err(|_| DriverError::Protocol("serial port lock poisoned".into()))
    }
}

impl Transport for SerialTransport {
    fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut port = Self::lock(&self.writer)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn receive(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut port = Self::lock(&self.reader)?;
        port.set_timeout(timeout)?;

        let mut buf = vec![0u8; max_len];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Path of the first serial port that belongs to a DATAQ USB device.
pub fn find_device_port() -> Result<Option<String>> {
    let ports = serialport::available_ports()?;
    let found = ports.into_iter().find_map(|p| match p.port_type {
        SerialPortType::UsbPort(usb) if usb.vid == DATAQ_VENDOR_ID => {
            debug!(
                "found DATAQ device: port={}, pid={:#06x}, serial={:?}",
                p.port_name, usb.pid, usb.serial_number
            );
            Some(p.port_name)
        }
        _ => None,
    });
    Ok(found)
}

// ============================================================================
// In-memory transport for tests
// ============================================================================
