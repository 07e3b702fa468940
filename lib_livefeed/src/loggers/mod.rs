/// Subscriber installation and log file rotation.
pub mod tracing_setup;

pub use tracing_setup::{init_logging, rotate_logs, LoggingError, LoggingGuard, LoggingOptions};
