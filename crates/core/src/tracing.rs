//! Tracing subscriber setup for the simulator and its driver.
//!
//! Actor threads log inside a `node` span carrying the node id, so every
//! line emitted while handling a message can be attributed to its receiver.

#[cfg(feature = "trace")]
pub(crate) mod tracer {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::EnvFilter;

    pub fn init_tracer(level: Option<LevelFilter>) -> anyhow::Result<()> {
        let default_filter = if cfg!(any(test, debug_assertions)) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let default_filter = level.unwrap_or(default_filter);
        let filter_layer = EnvFilter::builder()
            .with_default_directive(default_filter.into())
            .from_env_lossy();

        let use_json = std::env::var("NETREPLAY_LOG_FORMAT")
            .map(|v| v.to_lowercase() == "json")
            .unwrap_or(false);
        let with_location = cfg!(any(test, debug_assertions));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter_layer)
            .with_level(true)
            .with_thread_names(true)
            .with_file(with_location)
            .with_line_number(with_location)
            .with_writer(std::io::stderr);

        let installed = if use_json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        installed.map_err(|e| anyhow::anyhow!(e))
    }
}
