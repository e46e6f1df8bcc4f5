/*!
# ecolb DevKit - test helpers

- `TelemetryCapture`: loopback UDP receiver standing in for the controller
- `FakeSysfs`: throwaway `/proc/stat`, RAPL and hwmon trees for the sampler
- `init_test_logging`: tracing output routed to the test harness
*/

pub mod capture;
pub mod sysfs;

pub use capture::TelemetryCapture;
pub use sysfs::FakeSysfs;

use tracing_subscriber::EnvFilter;

/// Install a tracing subscriber that writes through the test harness.
/// Safe to call from every test; only the first call wins.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}
