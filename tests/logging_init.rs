//! Global subscriber installation. Kept in its own test binary because it
//! sets the process-wide default.

use scope_adapters::config::{AppConfig, LogFormat};
use scope_adapters::logging::{self, LoggingConfig};
use tracing::Level;

#[test]
fn init_twice_is_ok() {
    let config = LoggingConfig::new(Level::WARN).with_format(LogFormat::Compact);
    logging::init(config.clone()).unwrap();

    logging::init(config.with_span_events(true)).unwrap();
    logging::init_from_config(&AppConfig::default()).unwrap();
}
