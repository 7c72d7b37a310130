//! DATAQ data-acquisition driver with optional Python bindings.
//!
//! The device is configured with a scan list (which analog, digital, rate
//! and counter inputs to sample), a scan rate and a packet size, and then
//! streams interleaved 16-bit words over USB. This crate builds and sends
//! that configuration and decodes the stream into one [`SampleRecord`] per
//! scan list cycle, delivered to a callback on a background thread.
//!
//! # Example
//! ```ignore
//! use _core::{Dataq, ScanExit};
//!
//! let mut dev = Dataq::connect_first()?;
//! dev.enable_analog(0)?;
//! dev.enable_analog(1)?;
//! let achieved = dev.set_sample_rate(1000.0)?;
//!
//! dev.start_scanning(|record| {
//!     println!("#{} A0={:?} V", record.packet_number, record.voltage(0));
//!     record.packet_number < 999
//! })?;
//! assert!(matches!(dev.wait_scan(), Some(ScanExit::ConsumerStopped)));
//! ```

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

pub use channels::{ChannelConfiguration, RateRange, ANALOG_CHANNELS, DIGITAL_LINES};
pub use config::ScanSettings;
pub use dataq::{Dataq, ScanExit, ScanState, READ_POLL_INTERVAL};
pub use decoder::PacketDecoder;
pub use errors::*;
pub use logging::{init_rust_logging, init_rust_logging_with};
pub use protocol::{configuration_sequence, Command, LedColor};
pub use rate::{
    achieved_rate_hz, decode_timeout, packet_word_count, records_per_packet, scan_rate_register,
    FilterMode, PacketSize, RateAndFraming,
};
pub use record::{count_to_voltage, rate_count_to_frequency, SampleRecord};
pub use scan_list::{build_scan_list, ScanListEntry};
pub use transport::{find_device_port, SerialTransport, Transport};

// ============================================================================
// Python Bindings
// ============================================================================

#[cfg(feature = "python")]
mod python {
    use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use pyo3::types::PyDict;

    use super::*;

    fn to_py_err(e: DriverError) -> PyErr {
        match e {
            DriverError::InvalidAnalogIndex(_)
            | DriverError::InvalidDigitalIndex(_)
            | DriverError::InvalidDigitalOutputMask(_)
            | DriverError::InvalidDecimation
            | DriverError::DataRateAboveMaximum { .. }
            | DriverError::DataRateBelowMinimum { .. } => PyValueError::new_err(e.to_string()),
            DriverError::Io(_) | DriverError::Serial(_) => PyIOError::new_err(e.to_string()),
            _ => PyRuntimeError::new_err(e.to_string()),
        }
    }

    /// One decoded scan list cycle.
    ///
    /// Attributes:
    ///     packet_number: Sequential record number, from 0 for every scan.
    ///     analog: Raw counts for channels 0-7 (None when not scanned).
    ///     voltages: Analog values in volts (None when not scanned).
    ///     digital: Digital input bits, or None.
    ///     rate: Raw rate count, or None.
    ///     frequency: Rate input in Hz, or None.
    ///     count: Raw counter value, or None.
    #[pyclass(name = "Sample", frozen)]
    #[derive(Clone)]
    struct PySample {
        #[pyo3(get)]
        packet_number: u64,
        #[pyo3(get)]
        analog: Vec<Option<i16>>,
        #[pyo3(get)]
        voltages: Vec<Option<f64>>,
        #[pyo3(get)]
        digital: Option<u8>,
        #[pyo3(get)]
        rate: Option<i16>,
        #[pyo3(get)]
        frequency: Option<f64>,
        #[pyo3(get)]
        count: Option<i16>,
    }

    #[pymethods]
    impl PySample {
        fn __repr__(&self) -> String {
            format!(
                "Sample(packet_number={}, voltages={:?}, digital={:?}, frequency={:?}, count={:?})",
                self.packet_number, self.voltages, self.digital, self.frequency, self.count
            )
        }

        fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
            let dict = PyDict::new(py);
            dict.set_item("packet_number", self.packet_number)?;
            dict.set_item("analog", self.analog.clone())?;
            dict.set_item("voltages", self.voltages.clone())?;
            dict.set_item("digital", self.digital)?;
            dict.set_item("rate", self.rate)?;
            dict.set_item("frequency", self.frequency)?;
            dict.set_item("count", self.count)?;
            Ok(dict)
        }
    }

    impl From<SampleRecord> for PySample {
        fn from(r: SampleRecord) -> Self {
            PySample {
                packet_number: r.packet_number,
                analog: r.analog.to_vec(),
                voltages: r.voltages().to_vec(),
                digital: r.digital,
                rate: r.rate,
                frequency: r.frequency(),
                count: r.count,
            }
        }
    }

    /// DATAQ acquisition device.
    ///
    /// Example:
    ///     >>> dev = Dataq()                      # first DATAQ device found
    ///     >>> dev.enable_analog(0)
    ///     >>> dev.set_sample_rate(1000.0)
    ///     >>> dev.start(lambda s: s.packet_number < 999)
    ///     >>> dev.wait()
    #[pyclass(name = "Dataq", unsendable)]
    struct PyDataq {
        inner: Dataq,
    }

    #[pymethods]
    impl PyDataq {
        /// Open a device by serial port path, or the first DATAQ device found.
        #[new]
        #[pyo3(signature = (port=None))]
        fn new(port: Option<&str>) -> PyResult<Self> {
            let inner = match port {
                Some(path) => Dataq::connect_serial(path),
                None => Dataq::connect_first(),
            }
            .map_err(to_py_err)?;
            Ok(PyDataq { inner })
        }

        fn enable_analog(&mut self, channel: usize) -> PyResult<()> {
            self.inner.enable_analog(channel).map_err(to_py_err)
        }

        fn disable_analog(&mut self, channel: usize) -> PyResult<()> {
            self.inner.disable_analog(channel).map_err(to_py_err)
        }

        fn enable_digital(&mut self, index: usize) -> PyResult<()> {
            self.inner.enable_digital(index).map_err(to_py_err)
        }

        fn disable_digital(&mut self, index: usize) -> PyResult<()> {
            self.inner.disable_digital(index).map_err(to_py_err)
        }

        /// Enable the rate input with the given full-scale range in Hz
        /// (50000, 20000, 10000, 5000, 2000, 1000, 500, 200, 100, 50, 20 or 10).
        fn enable_rate(&mut self, range_hz: u32) -> PyResult<()> {
            let range = RateRange::from_hertz(range_hz).ok_or_else(|| {
                PyValueError::new_err(format!("unsupported rate range {range_hz} Hz"))
            })?;
            self.inner.enable_rate(range).map_err(to_py_err)
        }

        fn disable_rate(&mut self) -> PyResult<()> {
            self.inner.disable_rate().map_err(to_py_err)
        }

        fn enable_count(&mut self) -> PyResult<()> {
            self.inner.enable_count().map_err(to_py_err)
        }

        fn disable_count(&mut self) -> PyResult<()> {
            self.inner.disable_count().map_err(to_py_err)
        }

        /// Set the scan rate; returns the rate actually achieved.
        fn set_sample_rate(&mut self, hertz: f64) -> PyResult<f64> {
            self.inner.set_sample_rate(hertz).map_err(to_py_err)
        }

        fn set_decimation(&mut self, factor: u32) -> PyResult<()> {
            self.inner.set_decimation(factor).map_err(to_py_err)
        }

        /// Packet size code 0-7 (8 to 1024 words).
        fn set_packet_size(&mut self, code: u8) -> PyResult<()> {
            let size = PacketSize::from_code(code)
                .ok_or_else(|| PyValueError::new_err("packet size code must be 0-7"))?;
            self.inner.set_packet_size(size).map_err(to_py_err)
        }

        /// Decimation filter: "last_point", "cic_filter", "maximum" or "minimum".
        fn set_filter_mode(&mut self, mode: &str) -> PyResult<()> {
            let mode = match mode {
                "last_point" => FilterMode::LastPoint,
                "cic_filter" => FilterMode::CicFilter,
                "maximum" => FilterMode::Maximum,
                "minimum" => FilterMode::Minimum,
                other => {
                    return Err(PyValueError::new_err(format!("unknown filter mode '{other}'")))
                }
            };
            self.inner.set_filter_mode(mode).map_err(to_py_err)
        }

        /// LED colour code 0-7 (black, blue, green, cyan, red, magenta, yellow, white).
        fn set_led(&mut self, code: u8) -> PyResult<()> {
            let color = match code {
                0 => LedColor::Black,
                1 => LedColor::Blue,
                2 => LedColor::Green,
                3 => LedColor::Cyan,
                4 => LedColor::Red,
                5 => LedColor::Magenta,
                6 => LedColor::Yellow,
                7 => LedColor::White,
                _ => return Err(PyValueError::new_err("LED code must be 0-7")),
            };
            self.inner.set_led(color).map_err(to_py_err)
        }

        fn set_digital_outputs(&mut self, mask: u8) -> PyResult<()> {
            self.inner.set_digital_outputs(mask).map_err(to_py_err)
        }

        /// Start scanning. `callback(sample)` runs on a background thread and
        /// returns True to continue. An exception in the callback stops the scan.
        fn start(&mut self, py: Python<'_>, callback: Py<PyAny>) -> PyResult<()> {
            let inner = &mut self.inner;
            py.detach(|| {
                inner.start_scanning(move |record| {
                    Python::attach(|py| {
                        let sample = PySample::from(record);
                        match callback
                            .call1(py, (sample,))
                            .and_then(|ret| ret.bind(py).is_truthy())
                        {
                            Ok(keep_going) => keep_going,
                            Err(e) => {
                                log::error!("scan callback raised, stopping: {}", e);
                                e.print(py);
                                false
                            }
                        }
                    })
                })
            })
            .map_err(to_py_err)
        }

        /// Stop scanning. Raises RuntimeError if the scan already ended.
        fn stop(&mut self, py: Python<'_>) -> PyResult<()> {
            let inner = &mut self.inner;
            py.detach(|| inner.stop_scanning()).map_err(to_py_err)
        }

        /// Wait for the background scan to end. Returns a description of why
        /// it ended, or None if no scan was running.
        fn wait(&mut self, py: Python<'_>) -> Option<String> {
            let inner = &mut self.inner;
            py.detach(|| inner.wait_scan()).map(|exit| format!("{exit:?}"))
        }

        #[getter]
        fn scanning(&self) -> bool {
            self.inner.is_scanning()
        }

        #[getter]
        fn achieved_rate(&self) -> f64 {
            self.inner.achieved_rate_hz()
        }

        #[getter]
        fn input_count(&self) -> usize {
            self.inner.channels().count_enabled_inputs()
        }

        fn __repr__(&self) -> String {
            format!(
                "Dataq(inputs={}, rate={:.3}Hz, scanning={})",
                self.inner.channels().count_enabled_inputs(),
                self.inner.achieved_rate_hz(),
                self.inner.is_scanning()
            )
        }
    }

    impl Drop for PyDataq {
        fn drop(&mut self) {
            if !self.inner.is_scanning() {
                return;
            }
            // the decode thread may be waiting for the GIL inside the callback
            let inner = &mut self.inner;
            Python::attach(|py| {
                py.detach(|| {
                    if let Err(e) = inner.stop_scanning() {
                        log::warn!("failed to stop scan on drop: {}", e);
                    }
                })
            });
        }
    }

    /// Route driver logs into Python's `logging` module.
    #[pyfunction]
    #[pyo3(signature = (level=None))]
    fn init_logging(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
        logging::init_python_logging(py)?;
        logging::set_python_log_level_str(py, level)
    }

    /// The Python module definition
    #[pymodule]
    fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_class::<PyDataq>()?;
        m.add_class::<PySample>()?;
        m.add_function(wrap_pyfunction!(init_logging, m)?)?;

        m.add("ANALOG_CHANNELS", ANALOG_CHANNELS)?;
        m.add("DIGITAL_LINES", DIGITAL_LINES)?;
        m.add(
            "RATE_RANGES_HZ",
            RateRange::ALL.iter().map(|r| r.hertz()).collect::<Vec<_>>(),
        )?;

        Ok(())
    }
}
