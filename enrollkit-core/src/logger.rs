//! Log routing for the signup engine.
//!
//! The engine never reaches for a process-global logger. Embedders hand an
//! `Arc<dyn Logger>` to [`crate::signup::SignupEngine::new`] and decide
//! where messages go: [`FacadeLogger`] forwards into the `log` crate for
//! hosts that already run env_logger or similar, [`NullLogger`] discards
//! everything, and [`CapturingLogger`] records messages so tests can assert
//! on them (including that secrets never appear).

use std::sync::{Arc, Mutex};

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Very low priority, extremely detailed messages.
    Trace,
    /// Debugging information.
    Debug,
    /// Progress of normal operation.
    Info,
    /// Potentially harmful situations.
    Warn,
    /// Errors that still allow the engine to continue.
    Error,
}

impl LogLevel {
    /// Maps to the equivalent `log` crate level.
    #[must_use]
    pub const fn to_log_level(self) -> log::Level {
        match self {
            Self::Trace => log::Level::Trace,
            Self::Debug => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Warn => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

/// A sink for engine log messages.
pub trait Logger: Send + Sync {
    /// Records one message at the given level.
    fn log(&self, level: LogLevel, message: String);
}

/// A shared log handle as injected into the engine.
pub type LogHandle = Arc<dyn Logger>;

/// Discards all messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _level: LogLevel, _message: String) {}
}

/// Forwards messages into the `log` crate facade.
///
/// Use this when the host application already routes `log` records
/// somewhere (env_logger, fern, a platform bridge).
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeLogger;

impl Logger for FacadeLogger {
    fn log(&self, level: LogLevel, message: String) {
        log::log!(target: "enrollkit", level.to_log_level(), "{message}");
    }
}

/// Records every message for later inspection.
#[derive(Debug, Default)]
pub struct CapturingLogger {
    messages: Mutex<Vec<(LogLevel, String)>>,
}

impl CapturingLogger {
    /// Creates an empty capturing logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded messages in order.
    ///
    /// # Panics
    /// Panics if a previous caller panicked while logging.
    #[must_use]
    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        self.messages.lock().unwrap().clone()
    }

    /// Returns `true` if any recorded message contains `needle`.
    ///
    /// # Panics
    /// Panics if a previous caller panicked while logging.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|(_, message)| message.contains(needle))
    }
}

impl Logger for CapturingLogger {
    fn log(&self, level: LogLevel, message: String) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, message));
        }
    }
}
