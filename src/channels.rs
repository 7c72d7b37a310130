//! Channel configuration: which analog, digital, rate and count inputs the
//! device should place in its scan list.
//!
//! This is plain in-memory state. Whether a mutation is allowed at all
//! (Idle vs. Scanning) is decided by the driver in [`crate::dataq`].

use crate::errors::{DriverError, Result};

/// Number of analog input channels (A0-A7).
pub const ANALOG_CHANNELS: usize = 8;

/// Number of digital lines (D0-D6).
pub const DIGITAL_LINES: usize = 7;

/// `endo` mask with every digital line set as output.
pub const ALL_DIGITAL_OUTPUTS: u8 = 0x7F;

// ============================================================================
// Rate Range
// ============================================================================

/// Full-scale frequency range of the rate input.
///
/// The rate input reports a signed count where -32768 maps to 0 Hz and
/// +32767 maps to (almost) the full-scale frequency of the selected range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateRange {
    Hz50000,
    Hz20000,
    #[default]
    Hz10000,
    Hz5000,
    Hz2000,
    Hz1000,
    Hz500,
    Hz200,
    Hz100,
    Hz50,
    Hz20,
    Hz10,
}

impl RateRange {
    pub const ALL: [RateRange; 12] = [
        RateRange::Hz50000,
        RateRange::Hz20000,
        RateRange::Hz10000,
        RateRange::Hz5000,
        RateRange::Hz2000,
        RateRange::Hz1000,
        RateRange::Hz500,
        RateRange::Hz200,
        RateRange::Hz100,
        RateRange::Hz50,
        RateRange::Hz20,
        RateRange::Hz10,
    ];

    /// Range code as used in the `slist` rate entry (1 = 50 kHz ... 12 = 10 Hz).
    pub fn code(self) -> u32 {
        self as u32 + 1
    }

    /// Full-scale frequency of this range.
    pub fn hertz(self) -> u32 {
        match self {
            RateRange::Hz50000 => 50_000,
            RateRange::Hz20000 => 20_000,
            RateRange::Hz10000 => 10_000,
            RateRange::Hz5000 => 5_000,
            RateRange::Hz2000 => 2_000,
            RateRange::Hz1000 => 1_000,
            RateRange::Hz500 => 500,
            RateRange::Hz200 => 200,
            RateRange::Hz100 => 100,
            RateRange::Hz50 => 50,
            RateRange::Hz20 => 20,
            RateRange::Hz10 => 10,
        }
    }

    /// Look up the range whose full scale is exactly `hertz`.
    pub fn from_hertz(hertz: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.hertz() == hertz)
    }
}

// ============================================================================
// Channel Configuration
// ============================================================================

/// Enabled inputs of the device.
///
/// Digital lines double as direction flags: an enabled line is an input and
/// is sampled, a disabled line is an output driven by `dout`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConfiguration {
    analog: [bool; ANALOG_CHANNELS],
    digital: [bool; DIGITAL_LINES],
    rate_enabled: bool,
    rate_range: RateRange,
    count_enabled: bool,
}

impl ChannelConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_analog(&mut self, channel: usize) -> Result<()> {
        *self.analog_slot(channel)? = true;
        Ok(())
    }

    pub fn disable_analog(&mut self, channel: usize) -> Result<()> {
        *self.analog_slot(channel)? = false;
        Ok(())
    }

    pub fn enable_digital(&mut self, index: usize) -> Result<()> {
        *self.digital_slot(index)? = true;
        Ok(())
    }

    pub fn disable_digital(&mut self, index: usize) -> Result<()> {
        *self.digital_slot(index)? = false;
        Ok(())
    }

    pub fn enable_rate(&mut self, range: RateRange) {
        self.rate_enabled = true;
        self.rate_range = range;
    }

    pub fn disable_rate(&mut self) {
        self.rate_enabled = false;
    }

    pub fn enable_count(&mut self) {
        self.count_enabled = true;
    }

    pub fn disable_count(&mut self) {
        self.count_enabled = false;
    }

    pub fn is_analog_enabled(&self, channel: usize) -> bool {
        self.analog.get(channel).copied().unwrap_or(false)
    }

    pub fn is_digital_enabled(&self, index: usize) -> bool {
        self.digital.get(index).copied().unwrap_or(false)
    }

    pub fn is_rate_enabled(&self) -> bool {
        self.rate_enabled
    }

    /// Last range passed to [`enable_rate`](Self::enable_rate).
    pub fn rate_range(&self) -> RateRange {
        self.rate_range
    }

    pub fn is_count_enabled(&self) -> bool {
        self.count_enabled
    }

    /// Enabled analog channels in ascending order.
    pub fn enabled_analog(&self) -> impl Iterator<Item = usize> + '_ {
        self.analog
            .iter()
            .enumerate()
            .filter_map(|(ch, &on)| on.then_some(ch))
    }

    pub fn any_digital_enabled(&self) -> bool {
        self.digital.iter().any(|&on| on)
    }

    /// `endo` direction mask: bit clear for an input line, set for an output.
    pub fn digital_direction_mask(&self) -> u8 {
        self.digital
            .iter()
            .enumerate()
            .fold(0u8, |mask, (bit, &input)| {
                if input {
                    mask
                } else {
                    mask | (1 << bit)
                }
            })
    }

    /// Number of scan list slots the current configuration occupies.
    ///
    /// All digital lines share one slot.
    pub fn count_enabled_inputs(&self) -> usize {
        let analog = self.analog.iter().filter(|&&on| on).count();
        analog
            + usize::from(self.any_digital_enabled())
            + usize::from(self.rate_enabled)
            + usize::from(self.count_enabled)
    }

    fn analog_slot(&mut self, channel: usize) -> Result<&mut bool> {
        self.analog
            .get_mut(channel)
            .ok_or(DriverError::InvalidAnalogIndex(channel))
    }

    fn digital_slot(&mut self, index: usize) -> Result<&mut bool> {
        self.digital
            .get_mut(index)
            .ok_or(DriverError::InvalidDigitalIndex(index))
    }
}

/// A sweep of configurations with the input count each should report.
///
/// Analog and digital bitmasks are sampled; rate and count are exhaustive.
#[cfg(test)]
pub(crate) fn sample_configurations() -> Vec<(ChannelConfiguration, usize)> {
    let mut out = Vec::new();
    for analog_bits in [0u8, 0x01, 0x80, 0x5A, 0xFF] {
        for digital_bits in [0u8, 0x01, 0x40, 0x7F] {
            for rate in [false, true] {
                for count in [false, true] {
                    let mut cfg = ChannelConfiguration::new();
                    for ch in 0..ANALOG_CHANNELS {
                        if analog_bits & (1 << ch) != 0 {
                            cfg.analog[ch] = true;
                        }
                    }
                    for line in 0..DIGITAL_LINES {
                        if digital_bits & (1 << line) != 0 {
                            cfg.digital[line] = true;
                        }
                    }
                    if rate {
                        cfg.enable_rate(RateRange::Hz1000);
                    }
                    if count {
                        cfg.enable_count();
                    }

                    let expected = analog_bits.count_ones() as usize
                        + usize::from(digital_bits != 0)
                        + usize::from(rate)
                        + usize::from(count);
                    out.push((cfg, expected));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_indices() {
        let mut cfg = ChannelConfiguration::new();
        assert!(matches!(
            cfg.enable_analog(8),
            Err(DriverError::InvalidAnalogIndex(8))
        ));
        assert!(matches!(
            cfg.disable_analog(100),
            Err(DriverError::InvalidAnalogIndex(100))
        ));
        assert!(matches!(
            cfg.enable_digital(7),
            Err(DriverError::InvalidDigitalIndex(7))
        ));
        assert!(matches!(
            cfg.disable_digital(9),
            Err(DriverError::InvalidDigitalIndex(9))
        ));
        assert_eq!(cfg, ChannelConfiguration::default());
    }

    #[test]
    fn counts_digitals_as_one_slot() {
        let mut cfg = ChannelConfiguration::new();
        assert_eq!(cfg.count_enabled_inputs(), 0);

        cfg.enable_digital(0).unwrap();
        cfg.enable_digital(3).unwrap();
        cfg.enable_digital(6).unwrap();
        assert_eq!(cfg.count_enabled_inputs(), 1);

        cfg.enable_analog(2).unwrap();
        cfg.enable_analog(7).unwrap();
        cfg.enable_rate(RateRange::Hz500);
        cfg.enable_count();
        assert_eq!(cfg.count_enabled_inputs(), 5);

        cfg.disable_rate();
        cfg.disable_count();
        cfg.disable_analog(7).unwrap();
        assert_eq!(cfg.count_enabled_inputs(), 2);
    }

    #[test]
    fn input_count_matches_formula_for_every_combination() {
        for (cfg, expected) in sample_configurations() {
            assert_eq!(cfg.count_enabled_inputs(), expected, "{cfg:?}");
        }
    }

    #[test]
    fn direction_mask_is_complement_of_enabled_lines() {
        let mut cfg = ChannelConfiguration::new();
        assert_eq!(cfg.digital_direction_mask(), ALL_DIGITAL_OUTPUTS);

        cfg.enable_digital(0).unwrap();
        cfg.enable_digital(6).unwrap();
        assert_eq!(cfg.digital_direction_mask(), 0b011_1110);

        for line in 0..DIGITAL_LINES {
            cfg.enable_digital(line).unwrap();
        }
        assert_eq!(cfg.digital_direction_mask(), 0);
    }

    #[test]
    fn rate_range_codes_and_frequencies() {
        assert_eq!(RateRange::Hz50000.code(), 1);
        assert_eq!(RateRange::Hz10.code(), 12);
        assert_eq!(RateRange::Hz1000.hertz(), 1000);
        assert_eq!(RateRange::from_hertz(200), Some(RateRange::Hz200));
        assert_eq!(RateRange::from_hertz(300), None);
    }
}
