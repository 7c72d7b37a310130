//! Scan settings loaded from a TOML file.
//!
//! ```toml
//! port = "/dev/ttyACM0"
//! analog = [0, 1]
//! digital = [0]
//! rate_range_hz = 1000
//! count = false
//! sample_rate_hz = 2000.0
//! decimation = 4
//! filter = "cic_filter"
//! packet_size = 3
//! verify_echo = true
//! led = "green"
//! ```

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::channels::RateRange;
use crate::dataq::Dataq;
use crate::protocol::LedColor;
use crate::rate::{FilterMode, PacketSize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanSettings {
    /// Serial port; the first DATAQ device is used when absent.
    pub port: Option<String>,
    pub analog: Vec<usize>,
    pub digital: Vec<usize>,
    /// Full-scale frequency of the rate input; disabled when absent.
    pub rate_range_hz: Option<u32>,
    pub count: bool,
    pub sample_rate_hz: f64,
    pub decimation: u32,
    pub filter: FilterMode,
    /// `ps` code, 0 (8 words) to 7 (1024 words).
    pub packet_size: u8,
    pub verify_echo: bool,
    pub led: Option<LedColor>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            port: None,
            analog: vec![0],
            digital: Vec::new(),
            rate_range_hz: None,
            count: false,
            sample_rate_hz: 1000.0,
            decimation: 1,
            filter: FilterMode::LastPoint,
            packet_size: PacketSize::default().code(),
            verify_echo: true,
            led: None,
        }
    }
}

impl ScanSettings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid scan settings")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn rate_range(&self) -> Result<Option<RateRange>> {
        self.rate_range_hz
            .map(|hz| {
                RateRange::from_hertz(hz).ok_or_else(|| {
                    anyhow!(
                        "unsupported rate range {hz} Hz (one of 50000, 20000, 10000, 5000, 2000, 1000, 500, 200, 100, 50, 20, 10)"
                    )
                })
            })
            .transpose()
    }

    /// Push these settings into an idle device.
    ///
    /// Channels are applied before the sample rate, which needs at least one
    /// input enabled. Returns the achieved sample rate.
    pub fn apply(&self, device: &mut Dataq) -> Result<f64> {
        for &ch in &self.analog {
            device.enable_analog(ch)?;
        }
        for &line in &self.digital {
            device.enable_digital(line)?;
        }
        if let Some(range) = self.rate_range()? {
            device.enable_rate(range)?;
        }
        if self.count {
            device.enable_count()?;
        }

        let packet_size = PacketSize::from_code(self.packet_size)
            .ok_or_else(|| anyhow!("packet_size must be 0-7, got {}", self.packet_size))?;
        device.set_packet_size(packet_size)?;
        device.set_decimation(self.decimation)?;
        device.set_filter_mode(self.filter)?;
        device.set_verify_echo(self.verify_echo)?;
        let achieved = device
            .set_sample_rate(self.sample_rate_hz)
            .with_context(|| format!("sample rate {} Hz", self.sample_rate_hz))?;

        if let Some(color) = self.led {
            device.set_led(color)?;
        }
        Ok(achieved)
    }
}
