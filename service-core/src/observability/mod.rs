pub mod logging;
pub mod telemetry;

pub use logging::init_logging;
pub use telemetry::{Telemetry, TelemetrySpan, TracingConfig};
