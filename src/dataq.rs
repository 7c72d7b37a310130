//! DATAQ device driver: configuration, scan lifecycle and the background
//! decode loop.
//!
//! # Scan lifecycle
//!
//! The driver is either Idle or Scanning. Configuration may only change while
//! Idle. [`Dataq::start_scanning`] sends the configuration, flips the state to
//! Scanning and spawns one worker thread that reads packets and feeds decoded
//! records to the consumer callback. The scan ends when:
//!
//! - the caller invokes [`Dataq::stop_scanning`], or
//! - the consumer returns `false`, in which case the worker sends `stop`
//!   itself and returns the driver to Idle.
//!
//! The worker polls the state between reads. Reads wait at most
//! [`READ_POLL_INTERVAL`], so a stop issued by the controller is picked up
//! within that interval even when the decode timeout is minutes long.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::channels::{ChannelConfiguration, RateRange};
use crate::decoder::PacketDecoder;
use crate::errors::{DriverError, Result};
use crate::protocol::{configuration_sequence, Command, CommandSender, LedColor};
use crate::rate::{self, FilterMode, PacketSize, RateAndFraming};
use crate::record::SampleRecord;
use crate::scan_list::{build_scan_list, ScanListEntry};
use crate::transport::{SerialTransport, Transport};

/// Longest single read the decode worker makes before rechecking the state.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Scan State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

impl ScanState {
    fn as_u8(self) -> u8 {
        match self {
            ScanState::Idle => 0,
            ScanState::Scanning => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        if value == 0 {
            ScanState::Idle
        } else {
            ScanState::Scanning
        }
    }
}

/// Scan state shared between the controller and the decode worker.
#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn new() -> Self {
        Self(AtomicU8::new(ScanState::Idle.as_u8()))
    }

    fn get(&self) -> ScanState {
        ScanState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Atomically move `from` -> `to`. Returns `false` if the state was not
    /// `from`, leaving it untouched.
    fn transition(&self, from: ScanState, to: ScanState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Why a decode worker ended.
#[derive(Debug)]
pub enum ScanExit {
    /// The consumer returned `false`; the worker stopped the device.
    ConsumerStopped,
    /// `stop_scanning` was called.
    ControllerStopped,
    /// Transport failure, or the worker's own stop found the driver already
    /// Idle.
    Fault(DriverError),
}

impl ScanExit {
    pub fn is_fault(&self) -> bool {
        matches!(self, ScanExit::Fault(_))
    }
}

// ============================================================================
// Driver
// ============================================================================

/// DATAQ acquisition device.
///
/// # Example
/// ```ignore
/// let mut dev = Dataq::connect_first()?;
/// dev.enable_analog(0)?;
/// dev.enable_digital(2)?;
/// let achieved = dev.set_sample_rate(500.0)?;
/// dev.start_scanning(move |record| {
///     println!("{:?}", record.voltage(0));
///     record.packet_number < 1000
/// })?;
/// dev.wait_scan();
/// ```
pub struct Dataq {
    transport: Arc<dyn Transport>,
    channels: ChannelConfiguration,
    framing: RateAndFraming,
    verify_echo: bool,
    state: Arc<SharedState>,
    scan_list: Arc<[ScanListEntry]>,
    worker: Option<JoinHandle<ScanExit>>,
}

impl Dataq {
    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::from_shared(Arc::new(transport))
    }

    pub fn from_shared(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            channels: ChannelConfiguration::new(),
            framing: RateAndFraming::default(),
            verify_echo: true,
            state: Arc::new(SharedState::new()),
            scan_list: Arc::from(Vec::new()),
            worker: None,
        }
    }

    /// Open the device on a known serial port path (e.g. `/dev/ttyACM0`).
    pub fn connect_serial(path: &str) -> Result<Self> {
        Ok(Self::new(SerialTransport::open(path)?))
    }

    /// Open the first DATAQ device found on the USB bus.
    pub fn connect_first() -> Result<Self> {
        Ok(Self::new(SerialTransport::open_first()?))
    }

    // ------------------------------------------------------------------------
    // Channel configuration
    // ------------------------------------------------------------------------

    pub fn enable_analog(&mut self, channel: usize) -> Result<()> {
        self.ensure_idle()?;
        self.channels.enable_analog(channel)
    }

    pub fn disable_analog(&mut self, channel: usize) -> Result<()> {
        self.ensure_idle()?;
        self.channels.disable_analog(channel)
    }

    /// Sample digital line `index` (it becomes an input).
    pub fn enable_digital(&mut self, index: usize) -> Result<()> {
        self.ensure_idle()?;
        self.channels.enable_digital(index)
    }

    /// Stop sampling digital line `index` (it becomes an output).
    pub fn disable_digital(&mut self, index: usize) -> Result<()> {
        self.ensure_idle()?;
        self.channels.disable_digital(index)
    }

    pub fn enable_rate(&mut self, range: RateRange) -> Result<()> {
        self.ensure_idle()?;
        self.channels.enable_rate(range);
        Ok(())
    }

    pub fn disable_rate(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.channels.disable_rate();
        Ok(())
    }

    pub fn enable_count(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.channels.enable_count();
        Ok(())
    }

    pub fn disable_count(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.channels.disable_count();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Rate and framing
    // ------------------------------------------------------------------------

    /// Set the scan rate. Returns the rate the device will actually run at.
    ///
    /// Inputs must be enabled first.
    pub fn set_sample_rate(&mut self, hertz: f64) -> Result<f64> {
        self.ensure_idle()?;
        let register = rate::scan_rate_register(hertz, self.channels.count_enabled_inputs())?;
        self.framing.scan_rate_register = register;
        let achieved = rate::achieved_rate_hz(register);
        debug!(
            "sample rate: requested={}Hz, register={}, achieved={:.3}Hz",
            hertz, register, achieved
        );
        Ok(achieved)
    }

    pub fn set_decimation(&mut self, factor: u32) -> Result<()> {
        self.ensure_idle()?;
        if factor == 0 {
            return Err(DriverError::InvalidDecimation);
        }
        self.framing.decimation = factor;
        Ok(())
    }

    pub fn set_filter_mode(&mut self, mode: FilterMode) -> Result<()> {
        self.ensure_idle()?;
        self.framing.filter_mode = mode;
        Ok(())
    }

    pub fn set_packet_size(&mut self, size: PacketSize) -> Result<()> {
        self.ensure_idle()?;
        self.framing.packet_size = size;
        Ok(())
    }

    /// Whether configuration commands wait for and check the device echo.
    pub fn set_verify_echo(&mut self, verify: bool) -> Result<()> {
        self.ensure_idle()?;
        self.verify_echo = verify;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Immediate device commands
    // ------------------------------------------------------------------------

    /// Drive the digital lines that are configured as outputs.
    pub fn set_digital_outputs(&mut self, mask: u8) -> Result<()> {
        if mask > crate::channels::ALL_DIGITAL_OUTPUTS {
            return Err(DriverError::InvalidDigitalOutputMask(mask));
        }
        self.immediate(Command::DigitalOutput(mask))
    }

    pub fn set_led(&mut self, color: LedColor) -> Result<()> {
        self.immediate(Command::Led(color))
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn state(&self) -> ScanState {
        self.state.get()
    }

    pub fn is_scanning(&self) -> bool {
        self.state() == ScanState::Scanning
    }

    pub fn channels(&self) -> &ChannelConfiguration {
        &self.channels
    }

    pub fn framing(&self) -> RateAndFraming {
        self.framing
    }

    /// Scan list of the current or most recent scan.
    pub fn scan_list(&self) -> &[ScanListEntry] {
        &self.scan_list
    }

    pub fn achieved_rate_hz(&self) -> f64 {
        self.framing.achieved_rate_hz()
    }

    pub fn records_per_packet(&self) -> f64 {
        rate::records_per_packet(
            self.framing.packet_size.word_count(),
            self.channels.count_enabled_inputs(),
        )
    }

    /// Read timeout the decode loop uses with the current settings.
    pub fn decode_timeout(&self) -> Duration {
        rate::decode_timeout(
            self.framing.data_rate_hz(),
            self.framing.packet_size.word_count(),
            self.channels.count_enabled_inputs(),
        )
    }

    // ------------------------------------------------------------------------
    // Scan lifecycle
    // ------------------------------------------------------------------------

    /// Configure the device and start streaming into `consumer`.
    ///
    /// `consumer` runs on the decode thread, once per completed scan list
    /// cycle. Returning `false` stops the scan.
    pub fn start_scanning<F>(&mut self, consumer: F) -> Result<()>
    where
        F: FnMut(SampleRecord) -> bool + Send + 'static,
    {
        self.ensure_idle()?;
        let inputs = self.channels.count_enabled_inputs();
        if inputs == 0 {
            return Err(DriverError::NoInputsConfigured);
        }

        // the previous worker may still be winding down after a consumer stop
        self.reap_worker();

        let scan_list: Arc<[ScanListEntry]> = build_scan_list(&self.channels).into();
        debug!(
            "scan list: [{}]",
            scan_list
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.transport.flush_input()?;
        let commands = configuration_sequence(&self.channels, &scan_list, &self.framing);
        let mismatches =
            CommandSender::new(self.transport.as_ref(), self.verify_echo).send_all(&commands)?;
        if mismatches > 0 {
            warn!(
                "{} of {} configuration commands were not echoed correctly, starting anyway",
                mismatches,
                commands.len()
            );
        }

        self.scan_list = Arc::clone(&scan_list);
        if !self.state.transition(ScanState::Idle, ScanState::Scanning) {
            return Err(DriverError::CannotConfigureWhileScanning);
        }

        let worker = ScanWorker {
            transport: Arc::clone(&self.transport),
            state: Arc::clone(&self.state),
            decoder: PacketDecoder::new(scan_list, self.channels.rate_range()),
            read_len: self.framing.packet_size.byte_count(),
            timeout: self.decode_timeout(),
        };
        let spawned = thread::Builder::new()
            .name("dataq-scan".into())
            .spawn(move || worker.run(consumer));

        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                self.state.transition(ScanState::Scanning, ScanState::Idle);
                if let Err(stop_err) = self.transport.send(&Command::Stop.to_bytes()) {
                    warn!("failed to stop device after spawn failure: {}", stop_err);
                }
                return Err(e.into());
            }
        }

        info!(
            "scan started: inputs={}, rate={:.3}Hz, dec={}, packet={} words, {:.2} records/packet",
            inputs,
            self.achieved_rate_hz(),
            self.framing.decimation,
            self.framing.packet_size.word_count(),
            self.records_per_packet()
        );
        Ok(())
    }

    /// Stop the scan and wait for the decode thread to finish.
    ///
    /// Fails with `NotScanning` if the scan already ended; callers should
    /// treat that as "already stopped". When called from inside the consumer
    /// the join is skipped.
    ///
    /// Blocks for up to [`READ_POLL_INTERVAL`] while the worker finishes its
    /// current read, plus the time the consumer takes to return. Packets the
    /// device sent before it saw `stop` are discarded.
    pub fn stop_scanning(&mut self) -> Result<()> {
        if !self.state.transition(ScanState::Scanning, ScanState::Idle) {
            return Err(DriverError::NotScanning);
        }
        let sent = CommandSender::new(self.transport.as_ref(), false).send(Command::Stop);
        info!("scan stopped by controller");

        if let Some(exit) = self.join_worker() {
            match exit {
                ScanExit::Fault(e) => error!("decode loop ended with fault: {}", e),
                other => debug!("decode loop ended: {:?}", other),
            }
        }
        if let Err(e) = self.transport.flush_input() {
            warn!("failed to flush input after stop: {}", e);
        }
        sent.map(|_| ())
    }

    /// Block until the current decode thread ends and return why it did.
    ///
    /// Returns `None` if there is no worker to wait for.
    pub fn wait_scan(&mut self) -> Option<ScanExit> {
        self.join_worker()
    }

    fn join_worker(&mut self) -> Option<ScanExit> {
        let handle = self.worker.take()?;
        if handle.thread().id() == thread::current().id() {
            // called from the consumer; the worker exits after it returns
            return None;
        }
        match handle.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                error!("decode thread panicked");
                Some(ScanExit::Fault(DriverError::Protocol(
                    "decode thread panicked".into(),
                )))
            }
        }
    }

    fn reap_worker(&mut self) {
        if let Some(exit) = self.join_worker() {
            debug!("previous decode loop ended: {:?}", exit);
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.state() {
            ScanState::Idle => Ok(()),
            ScanState::Scanning => Err(DriverError::CannotConfigureWhileScanning),
        }
    }

    fn immediate(&mut self, command: Command) -> Result<()> {
        // while streaming the echo would land in the sample data
        let verify = self.verify_echo && !self.is_scanning();
        CommandSender::new(self.transport.as_ref(), verify)
            .send(command)
            .map(|_| ())
    }
}

impl Drop for Dataq {
    fn drop(&mut self) {
        if self.is_scanning() {
            if let Err(e) = self.stop_scanning() {
                warn!("failed to stop scan on drop: {}", e);
            }
        }
    }
}

// ============================================================================
// Decode Worker
// ============================================================================

struct ScanWorker {
    transport: Arc<dyn Transport>,
    state: Arc<SharedState>,
    decoder: PacketDecoder,
    read_len: usize,
    timeout: Duration,
}

impl ScanWorker {
    fn run<F>(mut self, mut consumer: F) -> ScanExit
    where
        F: FnMut(SampleRecord) -> bool,
    {
        debug!(
            "decode loop running: read_len={} bytes, timeout={:?}",
            self.read_len, self.timeout
        );
        let poll = self.timeout.min(READ_POLL_INTERVAL);
        let mut last_data = Instant::now();
        loop {
            if self.state.get() != ScanState::Scanning {
                debug!(
                    "decode loop saw Idle after {} records",
                    self.decoder.records_decoded()
                );
                return ScanExit::ControllerStopped;
            }

            let bytes = match self.transport.receive(self.read_len, poll) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("transport read failed, decode loop exiting: {}", e);
                    return ScanExit::Fault(e);
                }
            };
            if bytes.is_empty() {
                if last_data.elapsed() >= self.timeout {
                    warn!("no data for {:?}, still waiting", self.timeout);
                    last_data = Instant::now();
                } else {
                    trace!("read timed out with no data, retrying");
                }
                continue;
            }
            last_data = Instant::now();

            if !self.decoder.decode(&bytes, &mut consumer) {
                return self.stop_for_consumer();
            }
        }
    }

    fn stop_for_consumer(&self) -> ScanExit {
        if !self.state.transition(ScanState::Scanning, ScanState::Idle) {
            error!("consumer requested stop but the driver was not scanning");
            return ScanExit::Fault(DriverError::ForcedStopRejected);
        }
        if let Err(e) = self.transport.send(&Command::Stop.to_bytes()) {
            error!("failed to send stop: {}", e);
            return ScanExit::Fault(e);
        }
        info!(
            "scan stopped by consumer after {} records",
            self.decoder.records_decoded()
        );
        ScanExit::ConsumerStopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn device(mock: &MockTransport) -> Dataq {
        let mut dev = Dataq::new(mock.clone());
        dev.set_verify_echo(false).unwrap();
        dev
    }

    #[test]
    fn start_requires_inputs() {
        let mock = MockTransport::new();
        let mut dev = device(&mock);
        assert!(matches!(
            dev.start_scanning(|_| true),
            Err(DriverError::NoInputsConfigured)
        ));
        assert!(mock.sent().is_empty());
        assert_eq!(dev.state(), ScanState::Idle);
    }

    #[test]
    fn sample_rate_requires_inputs() {
        let mock = MockTransport::new();
        let mut dev = device(&mock);
        assert!(matches!(
            dev.set_sample_rate(1000.0),
            Err(DriverError::NoInputsConfigured)
        ));
        dev.enable_analog(0).unwrap();
        assert_eq!(dev.set_sample_rate(1000.0).unwrap(), 1000.0);
        assert_eq!(dev.framing().scan_rate_register, 60_000);
    }

    #[test]
    fn configuration_is_locked_while_scanning() {
        let mock = MockTransport::new();
        let mut dev = device(&mock);
        dev.enable_analog(1).unwrap();
        dev.start_scanning(|_| true).unwrap();
        assert!(dev.is_scanning());

        assert!(matches!(
            dev.enable_analog(2),
            Err(DriverError::CannotConfigureWhileScanning)
        ));
        assert!(matches!(
            dev.disable_digital(0),
            Err(DriverError::CannotConfigureWhileScanning)
        ));
        assert!(matches!(
            dev.enable_rate(RateRange::Hz100),
            Err(DriverError::CannotConfigureWhileScanning)
        ));
        assert!(matches!(
            dev.enable_count(),
            Err(DriverError::CannotConfigureWhileScanning)
        ));
        assert!(matches!(
            dev.set_sample_rate(500.0),
            Err(DriverError::CannotConfigureWhileScanning)
        ));
        assert!(matches!(
            dev.start_scanning(|_| true),
            Err(DriverError::CannotConfigureWhileScanning)
        ));

        dev.stop_scanning().unwrap();
        assert_eq!(dev.state(), ScanState::Idle);
        assert!(matches!(dev.stop_scanning(), Err(DriverError::NotScanning)));
        assert_eq!(mock.sent_count("stop"), 1);

        dev.enable_analog(2).unwrap();
    }

    #[test]
    fn start_sends_configuration_in_order() {
        let mock = MockTransport::new();
        let mut dev = device(&mock);
        dev.enable_analog(0).unwrap();
        dev.enable_digital(3).unwrap();
        dev.set_sample_rate(2000.0).unwrap();
        dev.set_packet_size(PacketSize::Words16).unwrap();
        dev.start_scanning(|_| true).unwrap();
        dev.stop_scanning().unwrap();

        assert_eq!(
            mock.sent(),
            vec![
                "slist 0 0",
                "endo 119",
                "slist 1 8",
                "srate 30000",
                "filter * 0",
                "dec 1",
                "ps 1",
                "start 0",
                "stop",
            ]
        );
        assert_eq!(
            dev.scan_list(),
            &[ScanListEntry::Analog(0), ScanListEntry::Digitals]
        );
    }

    #[test]
    fn single_analog_channel_end_to_end() {
        let mock = MockTransport::new();
        mock.push_words(&[10, 20, 30, 40]);
        mock.push_words(&[50, 60]);

        let mut dev = device(&mock);
        dev.enable_analog(0).unwrap();

        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);
        dev.start_scanning(move |r| {
            let mut out = sink.lock().unwrap();
            out.push(r);
            out.len() < 6
        })
        .unwrap();

        let exit = dev.wait_scan().unwrap();
        assert!(matches!(exit, ScanExit::ConsumerStopped));

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 6);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.packet_number, i as u64);
            assert_eq!(r.analog_count(0), Some(10 * (i as i16 + 1)));
            assert!((1..8).all(|ch| r.analog_count(ch).is_none()));
            assert_eq!(r.digital, None);
            assert_eq!(r.rate, None);
            assert_eq!(r.count, None);
        }
    }

    #[test]
    fn consumer_stop_sends_one_stop_and_goes_idle() {
        let mock = MockTransport::new();
        mock.push_words(&[1, 2, 3, 4, 5, 6, 7, 8]);
        mock.push_words(&[9, 10, 11, 12]);

        let mut dev = device(&mock);
        dev.enable_count().unwrap();
        dev.enable_analog(4).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        dev.start_scanning(move |_| seen.fetch_add(1, Ordering::SeqCst) + 1 < 2)
            .unwrap();

        let exit = dev.wait_scan().unwrap();
        assert!(matches!(exit, ScanExit::ConsumerStopped));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dev.state(), ScanState::Idle);
        assert_eq!(mock.sent_count("stop"), 1);
        assert_eq!(mock.sent().last().map(String::as_str), Some("stop"));

        // the scan already ended
        assert!(matches!(dev.stop_scanning(), Err(DriverError::NotScanning)));
        assert_eq!(mock.sent_count("stop"), 1);
    }

    #[test]
    fn restart_after_consumer_stop() {
        let mock = MockTransport::new();
        mock.push_words(&[7]);

        let mut dev = device(&mock);
        dev.enable_analog(0).unwrap();
        dev.start_scanning(|_| false).unwrap();
        assert!(matches!(dev.wait_scan(), Some(ScanExit::ConsumerStopped)));

        mock.clear_sent();
        mock.push_words(&[8, 9]);
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        dev.start_scanning(move |r| {
            sink.lock().unwrap().push(r.packet_number);
            false
        })
        .unwrap();
        assert!(matches!(dev.wait_scan(), Some(ScanExit::ConsumerStopped)));
        // numbering restarts with every scan
        assert_eq!(*got.lock().unwrap(), vec![0]);
        assert_eq!(mock.sent().first().map(String::as_str), Some("slist 0 0"));
    }

    #[test]
    fn transport_fault_keeps_scanning_until_stopped() {
        let mock = MockTransport::new();
        mock.fail_reads();

        let mut dev = device(&mock);
        dev.enable_analog(0).unwrap();
        dev.start_scanning(|_| true).unwrap();

        let exit = dev.wait_scan().unwrap();
        assert!(exit.is_fault());
        assert!(dev.is_scanning());

        dev.stop_scanning().unwrap();
        assert_eq!(dev.state(), ScanState::Idle);
        assert_eq!(mock.sent_count("stop"), 1);
    }

    #[test]
    fn echo_verified_configuration_then_streaming() {
        let mock = MockTransport::with_echo();
        mock.push_words(&[i16::from_le_bytes([0x00, 0x05]), -16384]);

        let mut dev = Dataq::new(mock.clone());
        dev.enable_digital(0).unwrap();
        dev.enable_digital(2).unwrap();
        dev.enable_rate(RateRange::Hz1000).unwrap();

        let got = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&got);
        dev.start_scanning(move |r| {
            *sink.lock().unwrap() = Some(r);
            false
        })
        .unwrap();
        assert!(matches!(dev.wait_scan(), Some(ScanExit::ConsumerStopped)));

        let record = got.lock().unwrap().take().unwrap();
        assert_eq!(record.digital, Some(0x05));
        assert_eq!(record.digital_line(2), Some(true));
        assert_eq!(record.frequency(), Some(250.0));
    }

    #[test]
    fn immediate_commands() {
        let mock = MockTransport::new();
        let mut dev = device(&mock);
        dev.set_led(LedColor::Yellow).unwrap();
        dev.set_digital_outputs(0x41).unwrap();
        assert!(matches!(
            dev.set_digital_outputs(0x80),
            Err(DriverError::InvalidDigitalOutputMask(0x80))
        ));
        assert_eq!(mock.sent(), vec!["led 6", "dout 65"]);
    }

    #[test]
    fn decimation_must_be_positive() {
        let mock = MockTransport::new();
        let mut dev = device(&mock);
        assert!(matches!(
            dev.set_decimation(0),
            Err(DriverError::InvalidDecimation)
        ));
        dev.set_decimation(16).unwrap();
        assert_eq!(dev.framing().decimation, 16);
    }

    #[test]
    fn stale_input_is_flushed_before_configuring() {
        let mock = MockTransport::with_echo();
        mock.push_stale(&[0x11; 101]);
        mock.push_words(&[100, 200, 300]);

        let mut dev = Dataq::new(mock.clone());
        dev.enable_analog(0).unwrap();

        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        dev.start_scanning(move |r| {
            let mut out = sink.lock().unwrap();
            out.push(r.analog_count(0));
            out.len() < 3
        })
        .unwrap();
        assert!(matches!(dev.wait_scan(), Some(ScanExit::ConsumerStopped)));
        assert_eq!(*got.lock().unwrap(), vec![Some(100), Some(200), Some(300)]);
    }

    #[test]
    fn reads_are_capped_so_stop_is_prompt() {
        let mock = MockTransport::new();
        let mut dev = device(&mock);
        dev.enable_analog(0).unwrap();
        dev.set_sample_rate(100.0).unwrap();
        dev.set_decimation(10).unwrap();
        dev.set_packet_size(PacketSize::Words1024).unwrap();
        assert_eq!(dev.decode_timeout(), Duration::from_millis(307_200));

        dev.start_scanning(|_| true).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        dev.stop_scanning().unwrap();

        assert!(mock.longest_timeout() <= READ_POLL_INTERVAL);
    }

    #[test]
    fn consumer_stop_after_controller_stop_is_a_fault() {
        let mock = MockTransport::new();
        mock.begin_stream();
        mock.push_words(&[1, 2]);

        let state = Arc::new(SharedState::new());
        assert!(state.transition(ScanState::Idle, ScanState::Scanning));
        let list: Arc<[ScanListEntry]> = Arc::from(vec![ScanListEntry::Analog(0)]);
        let worker = ScanWorker {
            transport: Arc::new(mock.clone()),
            state: Arc::clone(&state),
            decoder: PacketDecoder::new(list, RateRange::default()),
            read_len: 16,
            timeout: Duration::from_millis(10),
        };

        // the controller wins the race while the consumer is running
        let racing = Arc::clone(&state);
        let exit = worker.run(move |_| {
            racing.transition(ScanState::Scanning, ScanState::Idle);
            false
        });

        assert!(matches!(
            exit,
            ScanExit::Fault(DriverError::ForcedStopRejected)
        ));
        assert_eq!(state.get(), ScanState::Idle);
        assert_eq!(mock.sent_count("stop"), 0);
    }

    #[test]
    fn drop_stops_active_scan() {
        let mock = MockTransport::new();
        {
            let mut dev = device(&mock);
            dev.enable_analog(0).unwrap();
            dev.start_scanning(|_| true).unwrap();
        }
        assert_eq!(mock.sent_count("stop"), 1);
    }
}
