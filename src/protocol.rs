//! ASCII command protocol.
//!
//! Commands are short CR-terminated tokens. While the device is idle it
//! echoes every command back, which is how configuration is verified.
//! The firmware applies them in order, so the configuration sequence below
//! must not be reordered.

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::channels::ChannelConfiguration;
use crate::errors::Result;
use crate::rate::{FilterMode, PacketSize, RateAndFraming};
use crate::scan_list::ScanListEntry;
use crate::transport::Transport;

/// Command terminator.
const TERMINATOR: u8 = b'\r';

/// How long to wait for a command echo.
const ECHO_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Commands
// ============================================================================

/// Device status LED colour (`led <code>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedColor {
    Black,
    Blue,
    #[default]
    Green,
    Cyan,
    Red,
    Magenta,
    Yellow,
    White,
}

impl LedColor {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `slist <slot> <source>`
    ScanList { slot: usize, source: u32 },
    /// `endo <mask>`: set bits are outputs.
    DigitalDirection(u8),
    /// `srate <register>`
    ScanRate(u32),
    /// `filter * <mode>`: applies to every analog channel.
    Filter(FilterMode),
    /// `dec <n>`
    Decimation(u32),
    /// `ps <code>`
    PacketSize(PacketSize),
    /// `start 0`
    Start,
    /// `stop`
    Stop,
    /// `dout <mask>`
    DigitalOutput(u8),
    /// `led <code>`
    Led(LedColor),
}

impl Command {
    /// Wire form including the terminator.
    pub fn to_bytes(self) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        bytes.push(TERMINATOR);
        bytes
    }

    /// `start` switches the device to streaming, so whatever follows is
    /// sample data, not an echo.
    pub fn expects_echo(self) -> bool {
        !matches!(self, Command::Start | Command::Stop)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ScanList { slot, source } => write!(f, "slist {slot} {source}"),
            Command::DigitalDirection(mask) => write!(f, "endo {mask}"),
            Command::ScanRate(register) => write!(f, "srate {register}"),
            Command::Filter(mode) => write!(f, "filter * {}", mode.code()),
            Command::Decimation(n) => write!(f, "dec {n}"),
            Command::PacketSize(size) => write!(f, "ps {}", size.code()),
            Command::Start => f.write_str("start 0"),
            Command::Stop => f.write_str("stop"),
            Command::DigitalOutput(mask) => write!(f, "dout {mask}"),
            Command::Led(color) => write!(f, "led {}", color.code()),
        }
    }
}

/// Full command sequence that configures the device and starts streaming.
///
/// Analog `slist` entries come first, then `endo`, then the remaining scan
/// list entries, rate and framing, and finally `start 0`. `filter` and `dec`
/// are only sent when an analog channel is in the scan list.
pub fn configuration_sequence(
    channels: &ChannelConfiguration,
    scan_list: &[ScanListEntry],
    framing: &RateAndFraming,
) -> Vec<Command> {
    let mut commands = Vec::with_capacity(scan_list.len() + 6);
    let slot_command = |(slot, entry): (usize, &ScanListEntry)| Command::ScanList {
        slot,
        source: entry.source_code(),
    };

    let analog_len = scan_list.iter().take_while(|e| e.is_analog()).count();
    commands.extend(scan_list[..analog_len].iter().enumerate().map(slot_command));
    commands.push(Command::DigitalDirection(channels.digital_direction_mask()));
    commands.extend(
        scan_list
            .iter()
            .enumerate()
            .skip(analog_len)
            .map(slot_command),
    );

    commands.push(Command::ScanRate(framing.scan_rate_register));
    if analog_len > 0 {
        commands.push(Command::Filter(framing.filter_mode));
        commands.push(Command::Decimation(framing.decimation));
    }
    commands.push(Command::PacketSize(framing.packet_size));
    commands.push(Command::Start);
    commands
}

// ============================================================================
// Sending
// ============================================================================

/// Sends commands and optionally checks the device's echo.
pub struct CommandSender<'a> {
    transport: &'a dyn Transport,
    verify_echo: bool,
}

impl<'a> CommandSender<'a> {
    pub fn new(transport: &'a dyn Transport, verify_echo: bool) -> Self {
        Self {
            transport,
            verify_echo,
        }
    }

    /// Send one command.
    ///
    /// Transport failures are returned. A missing or wrong echo is only
    /// logged, and `Ok(false)` is returned so callers can count mismatches.
    pub fn send(&self, command: Command) -> Result<bool> {
        let bytes = command.to_bytes();
        debug!("-> {}", command);
        self.transport.send(&bytes)?;

        if !(self.verify_echo && command.expects_echo()) {
            return Ok(true);
        }

        let echo = self.read_echo(bytes.len())?;
        if echo_matches(&bytes, &echo) {
            Ok(true)
        } else {
            warn!(
                "echo mismatch for '{}': got {:?}",
                command,
                String::from_utf8_lossy(&echo)
            );
            Ok(false)
        }
    }

    /// Send every command in order, returning how many echoes mismatched.
    pub fn send_all(&self, commands: &[Command]) -> Result<usize> {
        let mut mismatches = 0;
        for &command in commands {
            if !self.send(command)? {
                mismatches += 1;
            }
        }
        Ok(mismatches)
    }

    /// Collect up to `expected + 1` bytes of echo.
    fn read_echo(&self, expected: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + ECHO_TIMEOUT;
        let mut echo = Vec::with_capacity(expected + 1);
        while echo.len() < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let chunk = self
                .transport
                .receive(expected + 1 - echo.len(), remaining)?;
            echo.extend_from_slice(&chunk);
        }
        Ok(echo)
    }
}

/// The echo must be the command itself, possibly with one extra
/// line-ending byte.
fn echo_matches(sent: &[u8], echo: &[u8]) -> bool {
    let len_ok = echo.len() == sent.len() || echo.len() == sent.len() + 1;
    let body = &sent[..sent.len().saturating_sub(1)];
    len_ok && echo.starts_with(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::RateRange;
    use crate::scan_list::build_scan_list;
    use crate::transport::mock::MockTransport;

    fn render(commands: &[Command]) -> Vec<String> {
        commands.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn command_wire_format() {
        assert_eq!(
            Command::ScanList { slot: 2, source: 7 }.to_bytes(),
            b"slist 2 7\r".to_vec()
        );
        assert_eq!(Command::Filter(FilterMode::CicFilter).to_string(), "filter * 1");
        assert_eq!(Command::PacketSize(PacketSize::Words1024).to_string(), "ps 7");
        assert_eq!(Command::Led(LedColor::Red).to_string(), "led 4");
        assert_eq!(Command::DigitalOutput(0x05).to_string(), "dout 5");
        assert_eq!(Command::Start.to_string(), "start 0");
        assert!(!Command::Start.expects_echo());
    }

    #[test]
    fn full_sequence_order() {
        let mut cfg = ChannelConfiguration::new();
        cfg.enable_analog(0).unwrap();
        cfg.enable_analog(3).unwrap();
        cfg.enable_digital(1).unwrap();
        cfg.enable_rate(RateRange::Hz1000);
        cfg.enable_count();
        let list = build_scan_list(&cfg);
        let framing = RateAndFraming {
            scan_rate_register: 6000,
            decimation: 4,
            filter_mode: FilterMode::Maximum,
            packet_size: PacketSize::Words128,
        };

        let seq = configuration_sequence(&cfg, &list, &framing);
        assert_eq!(
            render(&seq),
            vec![
                "slist 0 0",
                "slist 1 3",
                "endo 125",
                "slist 2 8",
                "slist 3 1545",
                "slist 4 10",
                "srate 6000",
                "filter * 2",
                "dec 4",
                "ps 4",
                "start 0",
            ]
        );
    }

    #[test]
    fn endo_sent_without_digitals_and_filter_skipped_without_analog() {
        let mut cfg = ChannelConfiguration::new();
        cfg.enable_count();
        let list = build_scan_list(&cfg);
        let seq = configuration_sequence(&cfg, &list, &RateAndFraming::default());
        assert_eq!(
            render(&seq),
            vec!["endo 127", "slist 0 10", "srate 60000", "ps 3", "start 0"]
        );
    }

    #[test]
    fn echo_is_verified() {
        let mock = MockTransport::with_echo();
        let sender = CommandSender::new(&mock, true);
        assert!(sender.send(Command::ScanRate(6000)).unwrap());
        assert_eq!(mock.sent(), vec!["srate 6000"]);
    }

    #[test]
    fn echo_mismatch_is_not_fatal() {
        let mock = MockTransport::new();
        mock.garble_echo();
        let sender = CommandSender::new(&mock, true);
        let commands = [Command::DigitalDirection(127), Command::ScanRate(6000)];
        assert_eq!(sender.send_all(&commands).unwrap(), 2);
        assert_eq!(mock.sent(), vec!["endo 127", "srate 6000"]);
    }

    #[test]
    fn echo_length_rule() {
        assert!(echo_matches(b"ps 3\r", b"ps 3\r"));
        assert!(echo_matches(b"ps 3\r", b"ps 3\r\n"));
        assert!(!echo_matches(b"ps 3\r", b"ps 3\r\n\n"));
        assert!(!echo_matches(b"ps 3\r", b"ps 4\r"));
    }
}
