//! Replay configuration files and logger setup.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::{
    clock::{ClockConfig, Time, VirtualClock},
    query::ReplayOptions,
};

/// Default number of ticks retained when tick tracing is enabled.
pub const DEFAULT_MAX_TRACED_TICKS: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML configuration")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON configuration")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration file extension: {0:?}")]
    UnsupportedFormat(PathBuf),
    #[error("invalid log level `{0}`")]
    InvalidLogLevel(String),
}

/// Settings shared by every query of a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Default period for periodic operators.
    pub period: Option<Time>,
    /// Keep a log of fired ticks on the clock.
    pub trace_ticks: bool,
    /// Bound of the tick log (0 = unlimited).
    pub max_traced_ticks: usize,
    /// Log level directive used when `RUST_LOG` is not set.
    pub log_level: Option<String>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            period: None,
            trace_ticks: false,
            max_traced_ticks: DEFAULT_MAX_TRACED_TICKS,
            log_level: None,
        }
    }
}

impl ReplayConfig {
    /// Reads a `.toml` or `.json` configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|ext| ext.to_str());
        if !matches!(ext, Some("toml" | "json")) {
            return Err(ConfigError::UnsupportedFormat(path.to_owned()));
        }
        tracing::debug!(path = ?path, "Reading configuration file");
        let io_err = |source| ConfigError::Io {
            path: path.to_owned(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let mut content = String::new();
        file.read_to_string(&mut content).map_err(io_err)?;
        match ext {
            Some("toml") => Ok(toml::from_str(&content)?),
            _ => Ok(serde_json::from_str(&content)?),
        }
    }

    pub fn clock_config(&self) -> ClockConfig {
        ClockConfig {
            trace_ticks: self.trace_ticks,
            max_traced_ticks: self.max_traced_ticks,
        }
    }

    pub fn log_level(&self) -> Result<Option<LevelFilter>, ConfigError> {
        self.log_level
            .as_deref()
            .map(|level| {
                LevelFilter::from_str(level)
                    .map_err(|_| ConfigError::InvalidLogLevel(level.to_owned()))
            })
            .transpose()
    }

    /// Fills in the options the caller left unset.
    pub fn apply<E: 'static, T: 'static>(&self, mut options: ReplayOptions<E, T>) -> ReplayOptions<E, T> {
        if options.period.is_none() {
            options.period = self.period;
        }
        if options.clock.is_none() {
            options.clock = Some(VirtualClock::with_config(self.clock_config()));
        }
        options
    }
}

/// Installs the global tracing subscriber once per process; later calls are no-ops.
pub fn set_logger(level: Option<LevelFilter>) -> anyhow::Result<()> {
    #[cfg(feature = "trace")]
    {
        use std::sync::atomic::AtomicBool;

        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::Release,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }

        crate::tracer::init_tracer(level)?;
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = level;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(name: &str, content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_toml() {
        let (_dir, path) = write_config(
            "replay.toml",
            "period = 15\ntrace_ticks = true\nlog_level = \"warn\"\n",
        );
        let config = ReplayConfig::load(&path).unwrap();
        assert_eq!(config.period, Some(15));
        assert!(config.trace_ticks);
        assert_eq!(config.max_traced_ticks, DEFAULT_MAX_TRACED_TICKS);
        assert_eq!(config.log_level().unwrap(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_load_json() {
        let (_dir, path) = write_config("replay.json", r#"{"max_traced_ticks": 3}"#);
        let config = ReplayConfig::load(&path).unwrap();
        assert_eq!(config.period, None);
        assert_eq!(config.clock_config().max_traced_ticks, 3);
    }

    #[test]
    fn test_load_errors() {
        let (_dir, path) = write_config("replay.yaml", "period: 1");
        assert!(matches!(
            ReplayConfig::load(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));

        let (_dir, path) = write_config("replay.toml", "period = \"soon\"");
        assert!(matches!(ReplayConfig::load(&path), Err(ConfigError::Toml(_))));

        let missing = tempfile::tempdir().unwrap().path().join("absent.json");
        assert!(matches!(ReplayConfig::load(missing), Err(ConfigError::Io { .. })));

        let config = ReplayConfig {
            log_level: Some("loud".into()),
            ..Default::default()
        };
        assert!(matches!(config.log_level(), Err(ConfigError::InvalidLogLevel(_))));
    }

    #[test]
    fn test_apply_keeps_explicit_options() {
        let config = ReplayConfig {
            period: Some(10),
            trace_ticks: true,
            ..Default::default()
        };
        let options = config.apply(ReplayOptions::<u8, u8>::new());
        assert_eq!(options.period(), Some(10));
        assert!(options.clock.is_some());

        let options = config.apply(ReplayOptions::<u8, u8>::new().with_period(3));
        assert_eq!(options.period(), Some(3));
    }
}
