use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

/// Default bounded wait of an actor's inbox dequeue.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(500);
/// Default bounded wait of a paused actor before it re-checks its state.
pub const DEFAULT_PAUSE_POLL: Duration = Duration::from_millis(100);
/// Default join wait is this many receive timeouts.
const JOIN_TIMEOUT_FACTOR: u32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed reading config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Timing knobs of a simulation run.
///
/// Read from TOML with durations given in milliseconds:
///
/// ```toml
/// recv_timeout_ms = 300
/// pause_poll_ms = 50
/// join_timeout_ms = 2000
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// How long an actor blocks on its inbox before re-checking control flags.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "recv_timeout_ms")]
    pub recv_timeout: Duration,
    /// How long a paused actor waits for a state change before re-checking.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "pause_poll_ms")]
    pub pause_poll: Duration,
    /// Upper bound on waiting for one actor to exit after stop. Derived from
    /// `recv_timeout` when unset.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "join_timeout_ms", skip_serializing_if = "Option::is_none")]
    pub join_timeout: Option<Duration>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            pause_poll: DEFAULT_PAUSE_POLL,
            join_timeout: None,
        }
    }
}

impl SimulationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn with_pause_poll(mut self, poll: Duration) -> Self {
        self.pause_poll = poll;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = Some(timeout);
        self
    }

    pub fn join_timeout(&self) -> Duration {
        self.join_timeout.unwrap_or_else(|| {
            self.recv_timeout
                .max(self.pause_poll)
                .saturating_mul(JOIN_TIMEOUT_FACTOR)
        })
    }
}

/// Installs the global tracing subscriber. Subsequent calls are no-ops.
pub fn set_logger(level: Option<tracing::level_filters::LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        use std::sync::atomic::{AtomicBool, Ordering};

        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(false, true, Ordering::Release, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Err(err) = crate::tracing::tracer::init_tracer(level) {
            eprintln!("failed tracing initialization: {err}");
        }
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_join_timeout() {
        let config = SimulationConfig::default();
        assert_eq!(config.recv_timeout, Duration::from_millis(500));
        assert_eq!(config.join_timeout(), Duration::from_secs(2));

        let fast = SimulationConfig::default().with_recv_timeout(Duration::from_millis(20));
        assert_eq!(fast.join_timeout(), Duration::from_millis(400));
    }

    #[test]
    fn parses_partial_toml() {
        let config = SimulationConfig::from_toml("recv_timeout_ms = 250").unwrap();
        assert_eq!(config.recv_timeout, Duration::from_millis(250));
        assert_eq!(config.pause_poll, DEFAULT_PAUSE_POLL);
        assert_eq!(config.join_timeout, None);

        let config = SimulationConfig::from_toml(
            "recv_timeout_ms = 100\npause_poll_ms = 10\njoin_timeout_ms = 900",
        )
        .unwrap();
        assert_eq!(config.pause_poll, Duration::from_millis(10));
        assert_eq!(config.join_timeout(), Duration::from_millis(900));
    }

    #[test]
    fn rejects_wrong_types() {
        let err = SimulationConfig::from_toml("recv_timeout_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.toml");
        std::fs::write(&path, "pause_poll_ms = 42\n").unwrap();
        let config = SimulationConfig::load(&path).unwrap();
        assert_eq!(config.pause_poll, Duration::from_millis(42));

        let err = SimulationConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
