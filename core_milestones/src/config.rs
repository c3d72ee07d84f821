use std::{
    collections::BTreeMap,
    env, fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_MILESTONE_CONFIG: &str = include_str!("data/peakwatch_config.json");

/// Raw on-disk shape of the milestone configuration. Threshold keys arrive as
/// strings so a single malformed key can be dropped without rejecting the
/// whole document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MilestoneConfigFile {
    thresholds: BTreeMap<String, Vec<String>>,
    hourly_announcement: String,
    persist_thresholds: bool,
    announce_period_secs: u64,
    command_bind: SocketAddr,
    directive_bind: SocketAddr,
}

impl Default for MilestoneConfigFile {
    fn default() -> Self {
        Self {
            thresholds: BTreeMap::new(),
            hourly_announcement: String::new(),
            persist_thresholds: true,
            announce_period_secs: 3600,
            command_bind: "127.0.0.1:42101".parse().expect("valid default bind"),
            directive_bind: "127.0.0.1:42102".parse().expect("valid default bind"),
        }
    }
}

/// Validated milestone configuration with the threshold table keyed by the
/// parsed online-count value, iterated in ascending numeric order.
#[derive(Debug, Clone)]
pub struct MilestoneConfig {
    pub thresholds: BTreeMap<u32, Vec<String>>,
    pub hourly_announcement: String,
    pub persist_thresholds: bool,
    pub announce_period_secs: u64,
    pub command_bind: SocketAddr,
    pub directive_bind: SocketAddr,
}

#[derive(Debug, Error)]
pub enum MilestoneConfigError {
    #[error("failed to parse milestone config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read milestone config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MilestoneConfig {
    pub fn builtin() -> Arc<Self> {
        let file: MilestoneConfigFile = serde_json::from_str(BUILTIN_MILESTONE_CONFIG)
            .expect("builtin milestone config should parse");
        Arc::new(Self::from_file_model(file))
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let file: MilestoneConfigFile = serde_json::from_str(json)?;
        Ok(Self::from_file_model(file))
    }

    pub fn from_file(path: &Path) -> Result<Self, MilestoneConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| MilestoneConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_json_str(&contents)?;
        Ok(config)
    }

    fn from_file_model(file: MilestoneConfigFile) -> Self {
        let mut thresholds = BTreeMap::new();
        for (key, actions) in file.thresholds {
            match key.trim().parse::<u32>() {
                Ok(value) => {
                    thresholds.insert(value, actions);
                }
                Err(_) => {
                    tracing::warn!(
                        target: "peakwatch::config",
                        key = %key,
                        "threshold.key_skipped=not_an_integer"
                    );
                }
            }
        }
        Self {
            thresholds,
            hourly_announcement: file.hourly_announcement,
            persist_thresholds: file.persist_thresholds,
            announce_period_secs: file.announce_period_secs,
            command_bind: file.command_bind,
            directive_bind: file.directive_bind,
        }
    }
}

/// Shared handle to the active configuration, swapped wholesale on reload so
/// systems never observe a partially updated table.
#[derive(Resource, Debug, Clone)]
pub struct MilestoneConfigHandle(Arc<MilestoneConfig>);

impl MilestoneConfigHandle {
    pub fn new(config: Arc<MilestoneConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<MilestoneConfig> {
        Arc::clone(&self.0)
    }

    pub fn config(&self) -> &MilestoneConfig {
        &self.0
    }

    pub fn replace(&mut self, config: Arc<MilestoneConfig>) {
        self.0 = config;
    }
}

/// Remembers where the active configuration came from so a reload can re-read
/// the same file. `None` means the builtin document is in effect.
#[derive(Resource, Debug, Clone)]
pub struct MilestoneConfigMetadata {
    path: Option<PathBuf>,
}

impl MilestoneConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

pub fn load_milestone_config_from_env() -> (Arc<MilestoneConfig>, MilestoneConfigMetadata) {
    let override_path = env::var("PEAKWATCH_CONFIG_PATH").ok().map(PathBuf::from);
    let default_path =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/peakwatch_config.json");

    let candidates: Vec<PathBuf> = match override_path {
        Some(ref path) => vec![path.clone()],
        None => vec![default_path.clone()],
    };

    for path in candidates {
        match MilestoneConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "peakwatch::config",
                    path = %path.display(),
                    thresholds = config.thresholds.len(),
                    "milestone_config.loaded=file"
                );
                return (Arc::new(config), MilestoneConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "peakwatch::config",
                    path = %path.display(),
                    error = %err,
                    "milestone_config.load_failed"
                );
            }
        }
    }

    let config = MilestoneConfig::builtin();
    tracing::info!(
        target: "peakwatch::config",
        "milestone_config.loaded=builtin"
    );
    (config, MilestoneConfigMetadata::new(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_config_parses() {
        let config = MilestoneConfig::builtin();
        assert!(!config.thresholds.is_empty());
        assert!(config.hourly_announcement.contains("%online%"));
        assert!(config.persist_thresholds);
        assert_eq!(config.announce_period_secs, 3600);
    }

    #[test]
    fn malformed_threshold_key_is_skipped() {
        let config = MilestoneConfig::from_json_str(
            r#"{
                "thresholds": {
                    "abc": ["say never"],
                    "10": ["say ten"],
                    "-3": ["say negative"],
                    "25": ["give @a emerald 1"]
                }
            }"#,
        )
        .expect("document itself is valid json");
        let keys: Vec<u32> = config.thresholds.keys().copied().collect();
        assert_eq!(keys, vec![10, 25]);
        assert_eq!(config.thresholds[&10], vec!["say ten".to_string()]);
    }

    #[test]
    fn thresholds_iterate_in_ascending_numeric_order() {
        let config = MilestoneConfig::from_json_str(
            r#"{ "thresholds": { "100": ["c"], "9": ["a"], "30": ["b"] } }"#,
        )
        .expect("valid json");
        let keys: Vec<u32> = config.thresholds.keys().copied().collect();
        assert_eq!(keys, vec![9, 30, 100]);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = MilestoneConfig::from_json_str("{}").expect("empty object is valid");
        assert!(config.thresholds.is_empty());
        assert!(config.persist_thresholds);
        assert_eq!(config.announce_period_secs, 3600);
    }
}
