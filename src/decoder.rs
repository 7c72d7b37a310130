//! Reassembles the interleaved word stream into [`SampleRecord`]s.
//!
//! The device sends one little-endian `i16` per scan list slot, slot after
//! slot, with no framing. A read may end in the middle of a cycle or even in
//! the middle of a word; the decoder keeps both positions across reads.

use std::sync::Arc;

use log::trace;

use crate::channels::{RateRange, ANALOG_CHANNELS};
use crate::record::SampleRecord;
use crate::scan_list::ScanListEntry;

#[derive(Debug, Clone, Copy, Default)]
struct PartialRecord {
    analog: [Option<i16>; ANALOG_CHANNELS],
    digital: Option<u8>,
    rate: Option<i16>,
    count: Option<i16>,
}

pub struct PacketDecoder {
    scan_list: Arc<[ScanListEntry]>,
    rate_range: RateRange,
    cursor: usize,
    partial: PartialRecord,
    carry: Option<u8>,
    next_packet: u64,
}

impl PacketDecoder {
    pub fn new(scan_list: Arc<[ScanListEntry]>, rate_range: RateRange) -> Self {
        Self {
            scan_list,
            rate_range,
            cursor: 0,
            partial: PartialRecord::default(),
            carry: None,
            next_packet: 0,
        }
    }

    /// Number of records handed out so far.
    pub fn records_decoded(&self) -> u64 {
        self.next_packet
    }

    /// Decode `bytes`, calling `consumer` once per completed cycle.
    ///
    /// Returns `false` as soon as the consumer does; the rest of `bytes` is
    /// dropped.
    pub fn decode<F>(&mut self, bytes: &[u8], consumer: &mut F) -> bool
    where
        F: FnMut(SampleRecord) -> bool,
    {
        let mut bytes = bytes;
        if let Some(low) = self.carry.take() {
            let Some((&high, rest)) = bytes.split_first() else {
                self.carry = Some(low);
                return true;
            };
            bytes = rest;
            if let Some(record) = self.push_word(i16::from_le_bytes([low, high])) {
                if !consumer(record) {
                    return false;
                }
            }
        }

        let mut words = bytes.chunks_exact(2);
        for pair in words.by_ref() {
            let word = i16::from_le_bytes([pair[0], pair[1]]);
            if let Some(record) = self.push_word(word) {
                if !consumer(record) {
                    return false;
                }
            }
        }
        if let [odd] = words.remainder() {
            trace!("carrying odd trailing byte into next read");
            self.carry = Some(*odd);
        }
        true
    }

    fn push_word(&mut self, word: i16) -> Option<SampleRecord> {
        let entry = *self.scan_list.get(self.cursor)?;
        match entry {
            ScanListEntry::Analog(ch) => {
                if let Some(slot) = self.partial.analog.get_mut(usize::from(ch)) {
                    *slot = Some(word);
                }
            }
            ScanListEntry::Digitals => self.partial.digital = Some(word.to_le_bytes()[1]),
            ScanListEntry::Rate(_) => self.partial.rate = Some(word),
            ScanListEntry::Count => self.partial.count = Some(word),
        }

        self.cursor += 1;
        if self.cursor < self.scan_list.len() {
            return None;
        }

        self.cursor = 0;
        let fields = std::mem::take(&mut self.partial);
        let record = SampleRecord {
            packet_number: self.next_packet,
            analog: fields.analog,
            digital: fields.digital,
            rate: fields.rate,
            count: fields.count,
            rate_range: self.rate_range,
        };
        self.next_packet += 1;
        Some(record)
    }
}
