// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Run configuration, its storage port and the filesystem store.

use halo_core::{LatticeDims, LatticeModel};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key the driver stores its configuration under.
pub const RUN_CONFIG_KEY: &str = "halo-run";

/// Where `halo-run` keeps its saved settings, addressed by key.
pub trait ConfigStore {
    /// Bytes stored under `key`; [`ConfigError::NotFound`] when nothing was saved.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replaces whatever is stored under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Why a run configuration could not be read, written or used.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing stored under the key.
    #[error("no saved run configuration")]
    NotFound,
    /// The store's backing file could not be read or written.
    #[error("config file access failed: {0}")]
    Io(#[from] std::io::Error),
    /// The stored bytes are not a valid run configuration.
    #[error("malformed run configuration: {0}")]
    Serde(#[from] serde_json::Error),
    /// The values parse but cannot describe a run.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Reads and writes JSON run configurations through a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Wraps `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Value saved under `key`. A missing or empty entry is `Ok(None)`, so the
    /// caller falls back to defaults.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        let bytes = match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => return Ok(None),
            Ok(bytes) => bytes,
            Err(ConfigError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Writes `value` under `key` as pretty-printed JSON.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        self.store.save_raw(key, &serde_json::to_vec_pretty(value)?)
    }
}

/// One `<key>.json` file per key inside a directory.
pub struct FsConfigStore {
    dir: PathBuf,
}

impl FsConfigStore {
    /// Store over `dir`. The directory is only created when saving.
    pub fn at(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn file_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        fs::read(self.file_for(key)).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound,
            _ => ConfigError::Io(err),
        })
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.file_for(key), data)?;
        Ok(())
    }
}

/// Everything the driver needs to set up a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaloRunConfig {
    /// Lattice dimensions.
    pub dims: LatticeDims,
    /// Velocity set.
    pub model: LatticeModel,
    /// Number of worker threads.
    pub workers: usize,
    /// Dynamic exchanges after the static one.
    pub steps: u32,
    /// Ghost depth in sites along every lattice direction.
    pub halo_width: u32,
}

impl Default for HaloRunConfig {
    fn default() -> Self {
        Self {
            dims: LatticeDims::cube(8),
            model: LatticeModel::D3Q15,
            workers: 4,
            steps: 10,
            halo_width: 1,
        }
    }
}

impl HaloRunConfig {
    /// Rejects values no run can use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.halo_width == 0 {
            return Err(ConfigError::Invalid("halo_width must be at least 1".into()));
        }
        let LatticeDims { nx, ny, nz } = self.dims;
        match self.dims.site_count() {
            None => Err(ConfigError::Invalid(format!(
                "lattice {nx}x{ny}x{nz} has too many sites to number"
            ))),
            Some(0) => Err(ConfigError::Invalid(format!(
                "lattice {nx}x{ny}x{nz} has no sites"
            ))),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStore {
        data: RefCell<HashMap<String, Vec<u8>>>,
    }

    impl ConfigStore for MemoryStore {
        fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
            self.data
                .borrow()
                .get(key)
                .cloned()
                .ok_or(ConfigError::NotFound)
        }

        fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
            self.data.borrow_mut().insert(key.to_owned(), data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn missing_key_loads_as_none() {
        let service = ConfigService::new(MemoryStore::default());
        let got: Option<HaloRunConfig> = service.load(RUN_CONFIG_KEY).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn saved_config_loads_back() {
        let service = ConfigService::new(MemoryStore::default());
        let cfg = HaloRunConfig {
            model: LatticeModel::D3Q27,
            workers: 3,
            ..HaloRunConfig::default()
        };
        service.save(RUN_CONFIG_KEY, &cfg).unwrap();
        assert_eq!(service.load(RUN_CONFIG_KEY).unwrap(), Some(cfg));
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let store = MemoryStore::default();
        store
            .save_raw(RUN_CONFIG_KEY, br#"{ "workers": 2, "model": "D3Q19" }"#)
            .unwrap();
        let cfg: HaloRunConfig = ConfigService::new(store)
            .load(RUN_CONFIG_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.model, LatticeModel::D3Q19);
        assert_eq!(cfg.steps, HaloRunConfig::default().steps);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let cfg = HaloRunConfig {
            workers: 0,
            ..HaloRunConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn lattices_too_large_to_number_are_rejected() {
        let cfg = HaloRunConfig {
            dims: LatticeDims::cube(1 << 22),
            ..HaloRunConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("too many sites"));
    }

    #[test]
    fn malformed_json_is_reported() {
        let store = MemoryStore::default();
        store.save_raw(RUN_CONFIG_KEY, b"{ workers: ").unwrap();
        let err = ConfigService::new(store)
            .load::<HaloRunConfig>(RUN_CONFIG_KEY)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Serde(_)));
    }

    #[test]
    fn fs_store_round_trips_through_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let service = ConfigService::new(FsConfigStore::at(dir.path().join("nested")));
        service
            .save(RUN_CONFIG_KEY, &HaloRunConfig::default())
            .unwrap();
        assert!(dir.path().join("nested/halo-run.json").exists());
        let back: Option<HaloRunConfig> = service.load(RUN_CONFIG_KEY).unwrap();
        assert_eq!(back, Some(HaloRunConfig::default()));
    }
}
