//! Sample-rate and packet-framing arithmetic.
//!
//! The device derives its scan rate from a 60 MHz clock divided by the
//! `srate` register, so the achieved rate is usually not exactly the
//! requested one. Callers get the achieved value back and should use it.

use std::time::Duration;

use serde::Deserialize;

use crate::errors::{DriverError, Result};

/// Base clock the `srate` register divides.
pub const SCAN_RATE_CLOCK_HZ: f64 = 60_000_000.0;

/// Smallest accepted `srate` register value (fastest scan).
pub const SCAN_RATE_REGISTER_MIN: u32 = 375;

/// Largest accepted `srate` register value (slowest scan).
pub const SCAN_RATE_REGISTER_MAX: u32 = 655_356;

/// Floor for the decode-loop read timeout.
const MIN_DECODE_TIMEOUT_MS: u64 = 5000;

/// Three packet periods, in milliseconds once divided by the packet rate.
const DECODE_TIMEOUT_BUDGET_MS: f64 = 3000.0;

// ============================================================================
// Data Types
// ============================================================================

/// How the device reduces `dec` raw samples of an analog channel to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    LastPoint,
    CicFilter,
    Maximum,
    Minimum,
}

impl FilterMode {
    /// Code sent with `filter * <code>`.
    pub fn code(self) -> u8 {
        match self {
            FilterMode::LastPoint => 0,
            FilterMode::CicFilter => 1,
            FilterMode::Maximum => 2,
            FilterMode::Minimum => 3,
        }
    }
}

/// Words per transport packet, selected with `ps <code>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketSize {
    Words8 = 0,
    Words16 = 1,
    Words32 = 2,
    #[default]
    Words64 = 3,
    Words128 = 4,
    Words256 = 5,
    Words512 = 6,
    Words1024 = 7,
}

impl PacketSize {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => PacketSize::Words8,
            1 => PacketSize::Words16,
            2 => PacketSize::Words32,
            3 => PacketSize::Words64,
            4 => PacketSize::Words128,
            5 => PacketSize::Words256,
            6 => PacketSize::Words512,
            7 => PacketSize::Words1024,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn word_count(self) -> usize {
        packet_word_count(self.code())
    }

    /// Bytes per transport read.
    pub fn byte_count(self) -> usize {
        self.word_count() * 2
    }
}

/// Rate and framing settings sent on every scan start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateAndFraming {
    pub scan_rate_register: u32,
    pub decimation: u32,
    pub filter_mode: FilterMode,
    pub packet_size: PacketSize,
}

impl Default for RateAndFraming {
    fn default() -> Self {
        Self {
            // 1 kHz
            scan_rate_register: 60_000,
            decimation: 1,
            filter_mode: FilterMode::LastPoint,
            packet_size: PacketSize::default(),
        }
    }
}

impl RateAndFraming {
    /// Scan rate the device actually runs at.
    pub fn achieved_rate_hz(&self) -> f64 {
        achieved_rate_hz(self.scan_rate_register)
    }

    /// Rate at which sample words leave the device once decimation applies.
    pub fn data_rate_hz(&self) -> f64 {
        self.achieved_rate_hz() / f64::from(self.decimation.max(1))
    }
}

// ============================================================================
// Arithmetic
// ============================================================================

/// Translate a requested scan rate into an `srate` register value.
///
/// The register is `round(60 MHz / hertz)`. A rate that needs more than
/// [`SCAN_RATE_REGISTER_MAX`] fails with `DataRateAboveMaximum`, one that
/// needs less than [`SCAN_RATE_REGISTER_MIN`] with `DataRateBelowMinimum`.
pub fn scan_rate_register(hertz: f64, input_count: usize) -> Result<u32> {
    if input_count == 0 {
        return Err(DriverError::NoInputsConfigured);
    }

    let register = (SCAN_RATE_CLOCK_HZ / hertz).round();
    // NaN and +inf (hertz == 0) land here as well
    if register.is_nan() || register > f64::from(SCAN_RATE_REGISTER_MAX) {
        return Err(DriverError::DataRateAboveMaximum {
            hertz,
            register,
            max: SCAN_RATE_REGISTER_MAX,
        });
    }
    if register < f64::from(SCAN_RATE_REGISTER_MIN) {
        return Err(DriverError::DataRateBelowMinimum {
            hertz,
            register,
            min: SCAN_RATE_REGISTER_MIN,
        });
    }

    Ok(register as u32)
}

pub fn achieved_rate_hz(register: u32) -> f64 {
    SCAN_RATE_CLOCK_HZ / f64::from(register)
}

/// Words per packet for a `ps` code: `8 << code`.
pub fn packet_word_count(code: u8) -> usize {
    8usize << code
}

/// Complete scan-list cycles per packet; fractional when the cycle does not
/// divide the packet evenly.
pub fn records_per_packet(word_count: usize, input_count: usize) -> f64 {
    if input_count == 0 {
        return 0.0;
    }
    word_count as f64 / input_count as f64
}

/// How long a single decode-loop read may wait for a packet.
///
/// Three packet periods, but never less than five seconds.
pub fn decode_timeout(data_rate_hz: f64, packet_words: usize, input_count: usize) -> Duration {
    let packet_hz = data_rate_hz * input_count as f64 / packet_words as f64;
    if !(packet_hz.is_finite() && packet_hz > 0.0) {
        return Duration::from_millis(MIN_DECODE_TIMEOUT_MS);
    }
    let ms = (DECODE_TIMEOUT_BUDGET_MS / packet_hz).round() as u64;
    Duration::from_millis(ms.max(MIN_DECODE_TIMEOUT_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rounds_to_nearest() {
        assert_eq!(scan_rate_register(1000.0, 1).unwrap(), 60_000);
        // 60e6 / 7000 = 8571.43
        assert_eq!(scan_rate_register(7000.0, 2).unwrap(), 8571);
        let achieved = achieved_rate_hz(8571);
        assert!((achieved - 7000.35).abs() < 0.01);
        assert_ne!(achieved, 7000.0);
    }

    #[test]
    fn register_limits() {
        let at_max = SCAN_RATE_CLOCK_HZ / 655_356.0;
        assert_eq!(scan_rate_register(at_max, 1).unwrap(), 655_356);

        let past_max = SCAN_RATE_CLOCK_HZ / 655_357.0;
        assert!(matches!(
            scan_rate_register(past_max, 1),
            Err(DriverError::DataRateAboveMaximum { .. })
        ));

        assert_eq!(scan_rate_register(160_000.0, 1).unwrap(), 375);

        let past_min = SCAN_RATE_CLOCK_HZ / 374.0;
        assert!(matches!(
            scan_rate_register(past_min, 1),
            Err(DriverError::DataRateBelowMinimum { .. })
        ));

        assert!(matches!(
            scan_rate_register(0.0, 1),
            Err(DriverError::DataRateAboveMaximum { .. })
        ));
    }

    #[test]
    fn register_requires_inputs() {
        assert!(matches!(
            scan_rate_register(1000.0, 0),
            Err(DriverError::NoInputsConfigured)
        ));
    }

    #[test]
    fn register_decreases_as_rate_increases() {
        let mut last = u32::MAX;
        let mut hz = 100.0;
        while hz <= 160_000.0 {
            let reg = scan_rate_register(hz, 3).unwrap();
            assert!(reg <= last, "register rose at {hz} Hz");
            last = reg;
            hz *= 1.37;
        }
    }

    #[test]
    fn packet_words_and_records() {
        assert_eq!(packet_word_count(0), 8);
        assert_eq!(packet_word_count(7), 1024);
        assert_eq!(PacketSize::Words256.word_count(), 256);
        assert_eq!(PacketSize::Words32.byte_count(), 64);
        assert_eq!(PacketSize::from_code(4), Some(PacketSize::Words128));
        assert_eq!(PacketSize::from_code(8), None);

        assert_eq!(records_per_packet(64, 4), 16.0);
        assert!((records_per_packet(64, 3) - 21.333).abs() < 0.001);
        assert_eq!(records_per_packet(64, 0), 0.0);
    }

    #[test]
    fn decode_timeout_has_five_second_floor() {
        // 1 kHz, 1 input, 64 words: 15.6 packets/s -> 192 ms, floored
        assert_eq!(decode_timeout(1000.0, 64, 1), Duration::from_millis(5000));
        // 10 Hz, 1 input, 1024 words: ~0.0098 packets/s -> 307200 ms
        assert_eq!(
            decode_timeout(10.0, 1024, 1),
            Duration::from_millis(307_200)
        );
        assert_eq!(decode_timeout(1000.0, 64, 0), Duration::from_millis(5000));
    }

    #[test]
    fn data_rate_accounts_for_decimation() {
        let framing = RateAndFraming {
            decimation: 10,
            ..RateAndFraming::default()
        };
        assert_eq!(framing.achieved_rate_hz(), 1000.0);
        assert_eq!(framing.data_rate_hz(), 100.0);
    }
}
