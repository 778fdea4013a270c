mod sig_down;
mod telemetry;

pub use sig_down::SigDown;
pub use telemetry::{HttpTracing, Telemetry, TelemetryProviders};
