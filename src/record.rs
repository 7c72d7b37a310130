//! Decoded sample records and count conversions.

use crate::channels::{RateRange, ANALOG_CHANNELS};

/// Analog full scale in volts (±10 V).
pub const ANALOG_FULL_SCALE_VOLTS: f64 = 10.0;

/// Counts per full scale of a signed 16-bit word.
const COUNTS_PER_FULL_SCALE: f64 = 32768.0;

/// Convert a raw analog count to volts: `10 * count / 32768`.
pub fn count_to_voltage(count: i32) -> f64 {
    ANALOG_FULL_SCALE_VOLTS * f64::from(count) / COUNTS_PER_FULL_SCALE
}

/// Convert a raw rate count to hertz: `(count + 32768) * range / 65536`.
pub fn rate_count_to_frequency(count: i32, range: RateRange) -> f64 {
    (f64::from(count) + 32768.0) * f64::from(range.hertz()) / 65536.0
}

/// One complete pass over the scan list.
///
/// Fields for inputs that were not in the scan list are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    /// Sequential record number, starting at 0 for every scan.
    pub packet_number: u64,
    /// Raw analog counts, indexed by channel.
    pub analog: [Option<i16>; ANALOG_CHANNELS],
    /// Digital input state, one bit per line.
    pub digital: Option<u8>,
    /// Raw rate count.
    pub rate: Option<i16>,
    /// Raw counter value.
    pub count: Option<i16>,
    /// Range the rate input was configured with.
    pub rate_range: RateRange,
}

impl SampleRecord {
    pub fn analog_count(&self, channel: usize) -> Option<i16> {
        self.analog.get(channel).copied().flatten()
    }

    /// Voltage on `channel`, or `None` if it was not scanned.
    pub fn voltage(&self, channel: usize) -> Option<f64> {
        self.analog_count(channel)
            .map(|c| count_to_voltage(i32::from(c)))
    }

    /// Voltages for all eight channels.
    pub fn voltages(&self) -> [Option<f64>; ANALOG_CHANNELS] {
        std::array::from_fn(|ch| self.voltage(ch))
    }

    /// State of a single digital line.
    pub fn digital_line(&self, line: usize) -> Option<bool> {
        if line >= 8 {
            return None;
        }
        self.digital.map(|bits| bits & (1 << line) != 0)
    }

    /// Rate input frequency in hertz.
    pub fn frequency(&self) -> Option<f64> {
        self.rate
            .map(|c| rate_count_to_frequency(i32::from(c), self.rate_range))
    }
}
