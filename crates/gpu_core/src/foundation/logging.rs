//! Logging initialisation

use env_logger::Env;

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system with `default_level`, overridable through `RUST_LOG`
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_level: &str) {
    let result = env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .try_init();
    if result.is_ok() {
        log::debug!("Logging initialised (default level '{default_level}')");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init("debug");
        init("warn");
        log::info!("still logging");
    }
}
