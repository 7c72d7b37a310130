//! Scan list: the order in which the device emits words within one cycle.

use std::fmt;

use crate::channels::{ChannelConfiguration, RateRange, ALL_DIGITAL_OUTPUTS};

/// `slist` source code for the digital inputs group.
pub const DIGITALS_SOURCE: u32 = 8;
/// `slist` source code for the rate input, before the range is folded in.
pub const RATE_SOURCE: u32 = 9;
/// `slist` source code for the counter input.
pub const COUNT_SOURCE: u32 = 10;

/// What one word position in a cycle carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanListEntry {
    Analog(u8),
    Digitals,
    Rate(RateRange),
    Count,
}

impl ScanListEntry {
    /// Source code sent as the second `slist` argument.
    pub fn source_code(self) -> u32 {
        match self {
            ScanListEntry::Analog(ch) => u32::from(ch),
            ScanListEntry::Digitals => DIGITALS_SOURCE,
            ScanListEntry::Rate(range) => RATE_SOURCE + (range.code() << 8),
            ScanListEntry::Count => COUNT_SOURCE,
        }
    }

    pub fn is_analog(self) -> bool {
        matches!(self, ScanListEntry::Analog(_))
    }
}

impl fmt::Display for ScanListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanListEntry::Analog(ch) => write!(f, "A{ch}"),
            ScanListEntry::Digitals => f.write_str("D"),
            ScanListEntry::Rate(range) => write!(f, "R({} Hz)", range.hertz()),
            ScanListEntry::Count => f.write_str("C"),
        }
    }
}

/// Build the scan list for `channels`: enabled analog channels ascending,
/// then the digitals group, rate and count.
///
/// The digitals group is included whenever the `endo` mask is not the
/// all-outputs sentinel.
pub fn build_scan_list(channels: &ChannelConfiguration) -> Vec<ScanListEntry> {
    let mut list: Vec<ScanListEntry> = channels
        .enabled_analog()
        .map(|ch| ScanListEntry::Analog(ch as u8))
        .collect();

    if channels.digital_direction_mask() != ALL_DIGITAL_OUTPUTS {
        list.push(ScanListEntry::Digitals);
    }
    if channels.is_rate_enabled() {
        list.push(ScanListEntry::Rate(channels.rate_range()));
    }
    if channels.is_count_enabled() {
        list.push(ScanListEntry::Count);
    }
    list
}
