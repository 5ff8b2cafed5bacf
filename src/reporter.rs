//! Injectable reporting sink
//!
//! Pipeline components receive an `Arc<dyn Reporter>` at construction and
//! report through it, so tests can capture exactly which device or tool a
//! warning was about. Startup code and the low-level command runner log
//! through the `log` macros directly.

use log::Level;

/// Destination for diagnostic events raised by the pipeline
pub trait Reporter: Send + Sync {
    /// Record one event. `context` names the device, tool or component involved.
    fn report(&self, level: Level, context: &str, message: &str);

    fn debug(&self, context: &str, message: &str) {
        self.report(Level::Debug, context, message);
    }

    fn info(&self, context: &str, message: &str) {
        self.report(Level::Info, context, message);
    }

    fn warn(&self, context: &str, message: &str) {
        self.report(Level::Warn, context, message);
    }

    fn error(&self, context: &str, message: &str) {
        self.report(Level::Error, context, message);
    }
}

/// Reporter that forwards to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, level: Level, context: &str, message: &str) {
        log::log!(target: "hwmetrics", level, "[{}] {}", context, message);
    }
}
