use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("analog channel {0} out of range (must be 0-7)")]
    InvalidAnalogIndex(usize),
    #[error("digital line {0} out of range (must be 0-6)")]
    InvalidDigitalIndex(usize),
    #[error("digital output mask {0:#04x} out of range (7 bits)")]
    InvalidDigitalOutputMask(u8),
    #[error("decimation factor must be at least 1")]
    InvalidDecimation,
    #[error("cannot change configuration while scanning")]
    CannotConfigureWhileScanning,
    #[error("not scanning")]
    NotScanning,
    #[error("no inputs configured")]
    NoInputsConfigured,
    #[error("data rate {hertz} Hz gives scan rate register {register}, above the maximum of {max}")]
    DataRateAboveMaximum { hertz: f64, register: f64, max: u32 },
    #[error("data rate {hertz} Hz gives scan rate register {register}, below the minimum of {min}")]
    DataRateBelowMinimum { hertz: f64, register: f64, min: u32 },
    #[error("decode loop could not stop the scan: state machine was not scanning")]
    ForcedStopRejected,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// Validation and state-guard errors leave the driver usable; the caller
    /// can fix the request or change state and retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            DriverError::ForcedStopRejected | DriverError::Io(_) | DriverError::Serial(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_state_errors_are_recoverable() {
        assert!(DriverError::InvalidAnalogIndex(9).is_recoverable());
        assert!(DriverError::CannotConfigureWhileScanning.is_recoverable());
        assert!(DriverError::NotScanning.is_recoverable());
        assert!(DriverError::NoInputsConfigured.is_recoverable());
    }

    #[test]
    fn transport_and_forced_stop_errors_are_not() {
        assert!(!DriverError::ForcedStopRejected.is_recoverable());
        let io = io::Error::new(io::ErrorKind::BrokenPipe, "unplugged");
        assert!(!DriverError::from(io).is_recoverable());
    }
}
