//! TargetStateStore: the durable keyed collection of [`TargetState`] records.
//!
//! On disk the store is a JSON array of records ordered by target id,
//! overwritten wholesale on every save. Saving the same in-memory state
//! twice produces byte-identical files. The store also runs without a
//! backing file (for tests and single-shot runs).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use batch_core::TargetState;

use crate::error::{StateError, StateResult};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

#[derive(Debug, Clone, Default)]
pub struct TargetStateStore {
    path: Option<PathBuf>,
    states: BTreeMap<String, TargetState>,
}

impl TargetStateStore {
    /// Load the snapshot at `path`.
    ///
    /// A missing file yields an empty store. An unreadable or malformed file
    /// is logged and also yields an empty store; the next save overwrites it.
    pub fn load(path: &Path) -> Self {
        let states = match std::fs::read_to_string(path) {
            Ok(content) => match Self::parse(&content) {
                Ok(states) => states,
                Err(e) => {
                    warn!(?path, error = %e, "malformed target state snapshot, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(?path, error = %e, "unreadable target state snapshot, starting empty");
                BTreeMap::new()
            }
        };
        debug!(?path, targets = states.len(), "target state store loaded");
        Self {
            path: Some(path.to_path_buf()),
            states,
        }
    }

    /// A store with no backing file.
    pub fn open_in_memory() -> Self {
        Self::default()
    }

    fn parse(content: &str) -> StateResult<BTreeMap<String, TargetState>> {
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let records: Vec<TargetState> =
            serde_json::from_str(content).map_err(map_err!(Deserialize))?;
        // Later records overwrite earlier ones for the same target.
        Ok(records
            .into_iter()
            .map(|state| (state.target.clone(), state))
            .collect())
    }

    /// Serialize the whole collection.
    pub fn to_json(&self) -> StateResult<String> {
        let records: Vec<&TargetState> = self.states.values().collect();
        serde_json::to_string_pretty(&records).map_err(map_err!(Serialize))
    }

    /// Overwrite the backing file with the current collection.
    ///
    /// No-op for in-memory stores.
    pub fn save(&self) -> StateResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = self.to_json()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(map_err!(Write))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes()).map_err(map_err!(Write))?;
        std::fs::rename(&tmp, path).map_err(map_err!(Write))?;
        debug!(?path, targets = self.states.len(), "target state store saved");
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, target: &str) -> Option<&TargetState> {
        self.states.get(target)
    }

    pub fn get_mut(&mut self, target: &str) -> Option<&mut TargetState> {
        self.states.get_mut(target)
    }

    /// Insert or overwrite the record for `state.target`.
    pub fn put(&mut self, state: TargetState) {
        self.states.insert(state.target.clone(), state);
    }

    pub fn contains(&self, target: &str) -> bool {
        self.states.contains_key(target)
    }

    /// Records in target-id order.
    pub fn iter(&self) -> impl Iterator<Item = &TargetState> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch_core::Lifecycle;

    fn sample(target: &str, lifecycle: Lifecycle) -> TargetState {
        let mut state = TargetState::new(target);
        state.lifecycle = lifecycle;
        state.stages.extract.threads = 7;
        state.stages.extract.duration = 4000;
        state.refresh_total_threads();
        state
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TargetStateStore::load(&dir.path().join("absent.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("states.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(TargetStateStore::load(&path).is_empty());

        std::fs::write(&path, "{\"target\": \"x\"}").unwrap();
        assert!(TargetStateStore::load(&path).is_empty());
    }

    #[test]
    fn save_then_load_restores_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("states.json");

        let mut store = TargetStateStore::load(&path);
        store.put(sample("joesguns", Lifecycle::Batching));
        store.put(sample("n00dles", Lifecycle::Stabilizing));
        store.save().unwrap();

        let loaded = TargetStateStore::load(&path);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("joesguns").unwrap().lifecycle, Lifecycle::Batching);
        assert_eq!(loaded.get("n00dles").unwrap().total_threads, 7);
    }

    #[test]
    fn saving_twice_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("states.json");

        let mut store = TargetStateStore::load(&path);
        store.put(sample("n00dles", Lifecycle::Batching));
        store.put(sample("foodnstuff", Lifecycle::Uninitialized));
        store.put(sample("joesguns", Lifecycle::Stabilizing));

        store.save().unwrap();
        let first = std::fs::read(&path).unwrap();
        store.save().unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);

        // Reloading and saving again does not change the bytes either.
        TargetStateStore::load(&path).save().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn persisted_collection_is_a_flat_ordered_list() {
        let mut store = TargetStateStore::open_in_memory();
        store.put(sample("zer0", Lifecycle::Uninitialized));
        store.put(sample("alpha", Lifecycle::Uninitialized));

        let value: serde_json::Value = serde_json::from_str(&store.to_json().unwrap()).unwrap();
        let list = value.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["target"], "alpha");
        assert_eq!(list[1]["target"], "zer0");
    }

    #[test]
    fn put_overwrites_existing_entry() {
        let mut store = TargetStateStore::open_in_memory();
        store.put(sample("n00dles", Lifecycle::Uninitialized));
        store.put(sample("n00dles", Lifecycle::Batching));
        assert_eq!(store.len(), 1);
        assert!(store.get("n00dles").unwrap().is_batching());
    }

    #[test]
    fn in_memory_save_is_noop() {
        let store = TargetStateStore::open_in_memory();
        assert!(store.save().is_ok());
        assert!(store.path().is_none());
    }
}
