//! Logging initialization

use env_logger::{Builder, Env};

/// Install env_logger with an `info` default, overridable through
/// `RUST_LOG`. Safe to call more than once.
///
/// ```
/// sandvox::core::logging::init();
/// log::info!("World core started");
/// ```
pub fn init() {
    let _ = builder("info").try_init();
}

/// Logger for long-running tools: millisecond timestamps and a quieter
/// default for the per-block generator chatter
pub fn init_tool() {
    let _ = builder("info,sandvox::generation=warn")
        .format_timestamp_millis()
        .try_init();
}

fn builder(default_filter: &str) -> Builder {
    Builder::from_env(Env::default().default_filter_or(default_filter))
}
