//! `tracing` subscriber bootstrap, shared by the server binary and tests.
//!
//! The filter is wrapped in a `reload::Layer` so the `--log-level`/config
//! value can be changed at runtime (the SIGHUP reload path in
//! `agentbridge-cli` calls [`TracingHandle::set_level`]) without tearing
//! down and re-installing the global subscriber, which `tracing` only
//! allows once per process.

use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use crate::error::{CommonError, Result};

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("agentbridge={level},tower_http=debug")))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// A handle onto the live `EnvFilter` layer, returned by
/// [`init_tracing_with_level`]. Cloning is cheap; every handle reloads the
/// same underlying filter.
#[derive(Clone)]
pub struct TracingHandle {
    reload: reload::Handle<EnvFilter, tracing_subscriber::Registry>,
}

impl TracingHandle {
    pub fn set_level(&self, level: &str) -> Result<()> {
        self.reload
            .reload(build_filter(level))
            .map_err(|err| CommonError::Config(format!("failed to reload log level: {err}")))
    }
}

pub fn init_tracing() -> Result<TracingHandle> {
    init_tracing_with_level("info")
}

pub fn init_tracing_with_level(level: &str) -> Result<TracingHandle> {
    let (filter, reload_handle) = reload::Layer::new(build_filter(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tracing initialized with level: {}", level);
    Ok(TracingHandle { reload: reload_handle })
}
