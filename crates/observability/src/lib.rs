//! Logging setup shared by binaries and tests.

/// Initialize process-wide logging from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    logging::init(logging::LogFormat::from_env());
}

/// Install a subscriber that writes through the test harness' captured output.
pub fn init_for_tests() {
    logging::init_for_tests();
}

/// Log format selection and subscriber installation.
pub mod logging;
