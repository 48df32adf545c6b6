pub mod init;
pub mod structured;

pub use init::{build_filter, init_logging, LogFormat, LoggingConfig, LoggingError};
pub use structured::{LogEntry, LogEntryBuilder, LogLevel};
