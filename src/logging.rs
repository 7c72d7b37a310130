//! Logging setup.
//!
//! Binaries get an `env_logger` formatter on stderr. With the `python`
//! feature, records can instead be forwarded to Python's `logging` module so
//! driver messages show up next to the host application's own.

use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static RUST_LOG_ONCE: Once = Once::new();

/// Level from `DATAQ_LOG`, then `RUST_LOG`, defaulting to `info`.
fn env_level() -> LevelFilter {
    ["DATAQ_LOG", "RUST_LOG"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install the stderr logger. Later calls are no-ops.
pub fn init_rust_logging() {
    init_rust_logging_with(None);
}

/// Like [`init_rust_logging`], with an explicit level taking precedence
/// over the environment.
pub fn init_rust_logging_with(level: Option<LevelFilter>) {
    let level = level.unwrap_or_else(env_level);
    RUST_LOG_ONCE.call_once(|| {
        let env = Env::default().default_filter_or(level.as_str().to_ascii_lowercase());
        env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_target(true)
            .try_init()
            .ok();
    });
}

#[cfg(feature = "python")]
pub use python::{init_python_logging, set_python_log_level, set_python_log_level_str};

#[cfg(feature = "python")]
mod python {
    use std::collections::HashMap;
    use std::sync::{Mutex, Once};

    use log::{Level, LevelFilter, Log, Metadata, Record};
    use once_cell::sync::OnceCell;
    use pyo3::prelude::*;
    use pyo3::types::{PyModule, PyTuple};

    use super::env_level;

    static PY_LOG_ONCE: Once = Once::new();
    static BRIDGE: OnceCell<&'static PyBridge> = OnceCell::new();

    /// Python `logging` numeric level for a `log` level.
    fn py_level(level: Level) -> u32 {
        match level {
            Level::Error => 40,
            Level::Warn => 30,
            Level::Info => 20,
            Level::Debug => 10,
            Level::Trace => 5,
        }
    }

    struct PyBridge {
        max_level: Mutex<LevelFilter>,
        logging: Py<PyModule>,
        /// dotted target -> Python logger
        loggers: Mutex<HashMap<String, Py<PyAny>>>,
    }

    impl PyBridge {
        fn logger_for(&self, py: Python<'_>, target: &str) -> PyResult<Py<PyAny>> {
            let mut loggers = self
                .loggers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(logger) = loggers.get(target) {
                return Ok(logger.clone_ref(py));
            }
            let logger = self
                .logging
                .bind(py)
                .call_method1("getLogger", (target,))?
                .unbind();
            loggers.insert(target.to_string(), logger.clone_ref(py));
            Ok(logger)
        }

        fn emit(&self, py: Python<'_>, record: &Record) -> PyResult<()> {
            let target = record.target().replace("::", ".");
            let level = py_level(record.level());
            let logger = self.logger_for(py, &target)?;
            let logger = logger.bind(py);
            if !logger.call_method1("isEnabledFor", (level,))?.is_truthy()? {
                return Ok(());
            }
            let none = py.None();
            let py_record = logger.call_method1(
                "makeRecord",
                (
                    &target,
                    level,
                    record.file(),
                    record.line().unwrap_or_default(),
                    record.args().to_string(),
                    PyTuple::empty(py),
                    &none,
                    &none,
                    &none,
                ),
            )?;
            logger.call_method1("handle", (py_record,))?;
            Ok(())
        }

        fn current_max(&self) -> LevelFilter {
            *self
                .max_level
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    impl Log for PyBridge {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level().to_level_filter() <= self.current_max()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            Python::attach(|py| {
                if let Err(e) = self.emit(py, record) {
                    e.restore(py);
                }
            });
        }

        fn flush(&self) {}
    }

    /// Route `log` records into Python's `logging`. Safe to call repeatedly.
    pub fn init_python_logging(py: Python<'_>) -> PyResult<()> {
        let level = env_level();
        let mut result = Ok(());
        PY_LOG_ONCE.call_once(|| {
            let logging = match py.import("logging") {
                Ok(m) => m.unbind(),
                Err(e) => {
                    result = Err(e);
                    return;
                }
            };
            let bridge: &'static PyBridge = Box::leak(Box::new(PyBridge {
                max_level: Mutex::new(level),
                logging,
                loggers: Mutex::new(HashMap::new()),
            }));
            if log::set_logger(bridge).is_ok() {
                log::set_max_level(level);
                let _ = BRIDGE.set(bridge);
            }
        });
        result
    }

    /// Change the forwarded level and drop cached loggers so Python-side
    /// configuration changes are picked up.
    pub fn set_python_log_level(py: Python<'_>, level: LevelFilter) -> PyResult<()> {
        init_python_logging(py)?;
        if let Some(bridge) = BRIDGE.get() {
            *bridge
                .max_level
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = level;
            bridge
                .loggers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clear();
        }
        log::set_max_level(level);
        Ok(())
    }

    /// String form of [`set_python_log_level`]; unparsable input falls back
    /// to the environment level.
    pub fn set_python_log_level_str(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
        let parsed = level
            .and_then(|s| s.parse::<LevelFilter>().ok())
            .unwrap_or_else(env_level);
        set_python_log_level(py, parsed)
    }
}
