use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store::StoreError;

/// Persistence settings. Loadable from a JSON file; missing keys take defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Save root holding `world.meta.json` and the `maps/` tree.
    pub root: PathBuf,
    /// zstd level used for quad files.
    pub compression_level: i32,
    /// Write quads on the rayon pool during a save.
    pub parallel_save: bool,
    /// Reject quad files whose checksum does not match.
    pub verify_checksums: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("save"),
            compression_level: 3,
            parallel_save: true,
            verify_checksums: true,
        }
    }
}

impl PersistConfig {
    /// Defaults with a different save root.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PersistConfig::default();
        assert_eq!(config.compression_level, 3);
        assert!(config.parallel_save);
        assert!(config.verify_checksums);
    }

    #[test]
    fn load_fills_missing_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("persist.json");
        std::fs::write(&path, r#"{ "root": "/tmp/world", "parallel_save": false }"#).unwrap();

        let config = PersistConfig::load(&path).unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp/world"));
        assert!(!config.parallel_save);
        assert_eq!(config.compression_level, 3);
    }

    #[test]
    fn load_reports_bad_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("persist.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(PersistConfig::load(&path), Err(StoreError::Json(_))));
    }
}
