//! Logging setup shared by hosts and tests

pub mod logging;

#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
