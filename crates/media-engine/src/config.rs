use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Player tuning parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a single stream resolution.
    pub resolution_timeout_ms: u64,
    /// Minimum spacing between progress events.
    pub progress_interval_ms: u64,
    /// Volume applied before the host sets one, in `0.0..=1.0`.
    pub initial_volume: f32,
    /// Past this position, `previous` restarts the current track instead of stepping back.
    pub previous_restart_ms: u64,
    /// Fixed shuffle seed; random when unset.
    pub shuffle_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolution_timeout_ms: 5_000,
            progress_interval_ms: 250,
            initial_volume: 0.8,
            previous_restart_ms: 3_000,
            shuffle_seed: None,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file with these fields at the top level.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg =
            toml::from_str::<EngineConfig>(&raw).with_context(|| format!("parse config {:?}", path))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution_timeout_ms == 0 {
            bail!("resolution_timeout_ms must be greater than zero");
        }
        if self.progress_interval_ms == 0 {
            bail!("progress_interval_ms must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.initial_volume) {
            bail!("initial_volume must be within 0.0..=1.0, got {}", self.initial_volume);
        }
        Ok(())
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.resolution_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn previous_restart(&self) -> Duration {
        Duration::from_millis(self.previous_restart_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.resolution_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.progress_interval(), Duration::from_millis(250));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: EngineConfig = toml::from_str("initial_volume = 0.5\nshuffle_seed = 9\n").unwrap();
        assert_eq!(cfg.initial_volume, 0.5);
        assert_eq!(cfg.shuffle_seed, Some(9));
        assert_eq!(cfg.resolution_timeout_ms, 5_000);
    }

    #[test]
    fn rejects_out_of_range_volume() {
        let cfg = EngineConfig {
            initial_volume: 1.5,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("media-engine-config-{nanos}.toml"));
        std::fs::write(&path, "resolution_timeout_ms = \"soon\"").unwrap();

        let err = EngineConfig::load(&path).unwrap_err();

        assert!(format!("{err:#}").contains("parse config"));
        let _ = std::fs::remove_file(&path);
    }
}
