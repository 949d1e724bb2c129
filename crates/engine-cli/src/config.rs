use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use media_engine::EngineConfig;
use serde::Deserialize;

/// CLI configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub local: LocalConfig,
    pub sink: SinkConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directories searched by the local files plugin.
    pub library_dirs: Vec<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Track length the clock sink simulates and reports when the descriptor carries no duration.
    pub default_track_ms: u64,
    /// Position update period of the simulated clock.
    pub tick_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            default_track_ms: 10_000,
            tick_ms: 250,
        }
    }
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg =
            toml::from_str::<CliConfig>(&raw).with_context(|| format!("parse config {:?}", path))?;
        cfg.engine.validate().context("invalid [engine] section")?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn load_reads_sections() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("media-engine-cli-{nanos}.toml"));
        std::fs::write(
            &path,
            "[engine]\nresolution_timeout_ms = 2000\n\n[local]\nlibrary_dirs = [\"/music\"]\n\n[sink]\ntick_ms = 100\n",
        )
        .unwrap();

        let cfg = CliConfig::load(&path).unwrap();

        assert_eq!(cfg.engine.resolution_timeout_ms, 2000);
        assert_eq!(cfg.engine.progress_interval_ms, 250);
        assert_eq!(cfg.local.library_dirs, [PathBuf::from("/music")]);
        assert_eq!(cfg.sink.tick_ms, 100);
        assert_eq!(cfg.sink.default_track_ms, 10_000);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_rejects_invalid_engine_section() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("media-engine-cli-bad-{nanos}.toml"));
        std::fs::write(&path, "[engine]\ninitial_volume = 3.0\n").unwrap();

        let err = CliConfig::load(&path).unwrap_err();

        assert!(format!("{err:#}").contains("initial_volume"));
        let _ = std::fs::remove_file(&path);
    }
}
