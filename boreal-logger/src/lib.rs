//! Tracing bootstrap.
//!
//! The library crates emit through `tracing` and never install a
//! subscriber; a process calls [`init`] once at startup. The base level
//! comes from the configuration and accepts full env-filter directives,
//! so per-target overrides work the usual way.

use tracing_subscriber::EnvFilter;

pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_new(&boreal_config::CONFIG.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_installs_the_global_subscriber_once() {
        init().expect("first init");
        assert!(init().is_err(), "second init must be rejected");
        tracing::info!("subscriber installed");
    }
}
