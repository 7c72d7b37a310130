use std::path::PathBuf;
use std::process::exit;

use anyhow::{bail, Context, Result};
use clap::Parser;

mod channels;
mod config;
mod dataq;
mod decoder;
mod errors;
mod logging;
mod protocol;
mod rate;
mod record;
mod scan_list;
mod transport;

use crate::config::ScanSettings;
use crate::dataq::{Dataq, ScanExit};
use crate::rate::FilterMode;

#[derive(Parser, Debug)]
#[command(name = "dataq-demo", about = "Configure a DATAQ device and print decoded samples")]
struct Args {
    /// Serial port of the device (default: first DATAQ device found)
    #[arg(short, long)]
    port: Option<String>,
    /// TOML settings file; command-line options override its values
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Analog channels to scan, e.g. 0,1,5
    #[arg(short, long, value_delimiter = ',')]
    analog: Option<Vec<usize>>,
    /// Digital lines to sample as inputs, e.g. 0,2
    #[arg(short, long, value_delimiter = ',')]
    digital: Option<Vec<usize>>,
    /// Enable the rate input with this full-scale range in Hz
    #[arg(long)]
    rate_range: Option<u32>,
    /// Enable the counter input
    #[arg(long)]
    count: bool,
    /// Scan rate in Hz
    #[arg(short = 'r', long)]
    sample_rate: Option<f64>,
    /// Decimation factor
    #[arg(long)]
    decimation: Option<u32>,
    /// Decimation filter: last-point, cic, max or min
    #[arg(long, value_parser = parse_filter)]
    filter: Option<FilterMode>,
    /// Packet size code 0-7 (8 to 1024 words)
    #[arg(long)]
    packet_size: Option<u8>,
    /// Skip command echo verification
    #[arg(long)]
    no_echo: bool,
    /// Number of records to print before stopping
    #[arg(short = 'n', long, default_value_t = 100)]
    records: u64,
}

fn parse_filter(s: &str) -> std::result::Result<FilterMode, String> {
    match s {
        "last-point" | "last" => Ok(FilterMode::LastPoint),
        "cic" => Ok(FilterMode::CicFilter),
        "max" | "maximum" => Ok(FilterMode::Maximum),
        "min" | "minimum" => Ok(FilterMode::Minimum),
        other => Err(format!("unknown filter '{other}' (last-point, cic, max, min)")),
    }
}

fn main() {
    logging::init_rust_logging();
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn settings_from(args: &Args) -> Result<ScanSettings> {
    let mut settings = match &args.config {
        Some(path) => ScanSettings::load(path)?,
        None => ScanSettings::default(),
    };
    if let Some(port) = &args.port {
        settings.port = Some(port.clone());
    }
    if let Some(analog) = &args.analog {
        settings.analog = analog.clone();
    }
    if let Some(digital) = &args.digital {
        settings.digital = digital.clone();
    }
    if args.rate_range.is_some() {
        settings.rate_range_hz = args.rate_range;
    }
    if args.count {
        settings.count = true;
    }
    if let Some(hz) = args.sample_rate {
        settings.sample_rate_hz = hz;
    }
    if let Some(dec) = args.decimation {
        settings.decimation = dec;
    }
    if let Some(filter) = args.filter {
        settings.filter = filter;
    }
    if let Some(ps) = args.packet_size {
        settings.packet_size = ps;
    }
    if args.no_echo {
        settings.verify_echo = false;
    }
    Ok(settings)
}

fn run() -> Result<()> {
    let args = Args::parse();
    let settings = settings_from(&args)?;

    let mut device = match &settings.port {
        Some(path) => Dataq::connect_serial(path),
        None => Dataq::connect_first(),
    }
    .context("Failed to open device")?;

    let achieved = settings.apply(&mut device)?;
    println!(
        "Scanning {} inputs at {:.3} Hz ({:.2} records per packet)",
        device.channels().count_enabled_inputs(),
        achieved,
        device.records_per_packet()
    );

    let analog: Vec<usize> = device.channels().enabled_analog().collect();
    let limit = args.records;
    device.start_scanning(move |record| {
        let volts: Vec<String> = analog
            .iter()
            .filter_map(|&ch| record.voltage(ch).map(|v| format!("A{ch}={v:+.4}V")))
            .collect();
        let mut line = format!("[{:>6}] {}", record.packet_number, volts.join(" "));
        if let Some(bits) = record.digital {
            line.push_str(&format!(" D={bits:#09b}"));
        }
        if let Some(hz) = record.frequency() {
            line.push_str(&format!(" R={hz:.2}Hz"));
        }
        if let Some(count) = record.count {
            line.push_str(&format!(" C={count}"));
        }
        println!("{line}");
        record.packet_number + 1 < limit
    })?;

    match device.wait_scan() {
        Some(ScanExit::Fault(e)) => bail!("scan ended with an error: {e}"),
        Some(exit) => println!("Done ({exit:?})."),
        None => println!("Done."),
    }
    if device.is_scanning() {
        device.stop_scanning()?;
    }
    Ok(())
}
