use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::MilestoneState;

pub const DEFAULT_DATA_FILE: &str = "peakwatch_data.json";

/// Durable image of [`MilestoneState`]. The single named record this process
/// owns; nothing else reads or writes the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMilestones {
    pub record_online: u32,
    #[serde(default)]
    pub triggered: Vec<u32>,
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("failed to parse milestone state: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read milestone state from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write milestone state to {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Owns the durable state file location and the read/write mechanics.
#[derive(Resource, Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn from_env() -> Self {
        let path = env::var("PEAKWATCH_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_FILE));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted record, falling back to defaults when the file does
    /// not exist yet (first startup).
    pub fn load(&self) -> Result<PersistedMilestones, StateStoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(PersistedMilestones::default());
            }
            Err(source) => {
                return Err(StateStoreError::ReadFailed {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let persisted = serde_json::from_str(&contents)?;
        Ok(persisted)
    }

    /// Overwrite the durable record with the full current state.
    pub fn save(&self, state: &PersistedMilestones) -> Result<(), StateStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StateStoreError::WriteFailed {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        let contents =
            serde_json::to_string_pretty(state).expect("milestone state serialization failed");
        fs::write(&self.path, contents).map_err(|source| StateStoreError::WriteFailed {
            path: self.path.clone(),
            source,
        })
    }
}

/// Write-through policy for every state mutation: persist the full current
/// state, serializing the triggered set only while persistence is enabled.
/// With persistence disabled the set is ephemeral and always stored empty, so
/// a restart can never resurrect a cleared set. Failures are logged; the
/// in-memory state stays authoritative and the next write retries in full.
pub fn write_through(store: &StateStore, state: &MilestoneState, persist_triggered: bool) {
    let record = PersistedMilestones {
        record_online: state.record_online,
        triggered: if persist_triggered {
            state.triggered.iter().copied().collect()
        } else {
            Vec::new()
        },
    };
    if let Err(err) = store.save(&record) {
        tracing::warn!(
            target: "peakwatch::state",
            path = %store.path().display(),
            error = %err,
            "state.write_failed"
        );
    }
}

/// Load startup state, honoring the persistence flag: a disabled flag treats
/// whatever triggered set is on disk as stale and starts from an empty epoch.
pub fn load_or_default(store: &StateStore, persist_triggered: bool) -> MilestoneState {
    match store.load() {
        Ok(persisted) => {
            let triggered = if persist_triggered {
                persisted.triggered.into_iter().collect()
            } else {
                Default::default()
            };
            MilestoneState {
                record_online: persisted.record_online,
                triggered,
            }
        }
        Err(err) => {
            tracing::warn!(
                target: "peakwatch::state",
                path = %store.path().display(),
                error = %err,
                "state.load_failed=using_defaults"
            );
            MilestoneState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn temp_store(name: &str) -> StateStore {
        let mut path = env::temp_dir();
        path.push(format!(
            "peakwatch_persistence_{}_{}.json",
            std::process::id(),
            name
        ));
        let _ = fs::remove_file(&path);
        StateStore::new(path)
    }

    #[test]
    fn missing_file_loads_defaults() {
        let store = temp_store("missing");
        let persisted = store.load().expect("missing file is not an error");
        assert_eq!(persisted, PersistedMilestones::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = temp_store("round_trip");
        let record = PersistedMilestones {
            record_online: 42,
            triggered: vec![5, 10, 25],
        };
        store.save(&record).expect("save should succeed");
        assert_eq!(store.load().expect("load should succeed"), record);
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn disabled_persistence_ignores_stale_triggered_set() {
        let store = temp_store("stale");
        store
            .save(&PersistedMilestones {
                record_online: 30,
                triggered: vec![5, 10],
            })
            .expect("save should succeed");

        let state = load_or_default(&store, false);
        assert_eq!(state.record_online, 30);
        assert!(state.triggered.is_empty());

        let state = load_or_default(&store, true);
        assert_eq!(state.triggered, BTreeSet::from([5, 10]));
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn write_through_with_disabled_persistence_stores_empty_set() {
        let store = temp_store("ephemeral");
        let state = MilestoneState {
            record_online: 12,
            triggered: BTreeSet::from([5, 10]),
        };
        write_through(&store, &state, false);
        let persisted = store.load().expect("load should succeed");
        assert_eq!(persisted.record_online, 12);
        assert!(persisted.triggered.is_empty());
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn write_failure_is_reported_not_fatal() {
        // Parent path is an existing file, so creating the directory fails.
        let blocker = temp_store("blocker");
        blocker
            .save(&PersistedMilestones::default())
            .expect("save should succeed");
        let store = StateStore::new(blocker.path().join("nested.json"));

        let state = MilestoneState {
            record_online: 7,
            triggered: BTreeSet::from([5]),
        };
        write_through(&store, &state, true);
        assert_eq!(state.record_online, 7);
        assert_eq!(state.triggered, BTreeSet::from([5]));
        let _ = fs::remove_file(blocker.path());
    }
}
