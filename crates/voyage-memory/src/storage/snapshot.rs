use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, VoyageError};

/// Read a JSON snapshot, `Ok(None)` when the file does not exist
pub fn load_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        debug!("No snapshot at {}", path.display());
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        VoyageError::Storage(format!("Failed to read snapshot {}: {e}", path.display()))
    })?;
    let value = serde_json::from_str(&content).map_err(|e| {
        VoyageError::Serialization(format!("Failed to parse snapshot {}: {e}", path.display()))
    })?;
    Ok(Some(value))
}

/// Write a JSON snapshot, replacing any previous one atomically
pub fn save_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            VoyageError::Storage(format!(
                "Failed to create snapshot directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| {
        VoyageError::Storage(format!("Failed to write snapshot {}: {e}", tmp.display()))
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        VoyageError::Storage(format!("Failed to replace snapshot {}: {e}", path.display()))
    })?;

    debug!("Saved snapshot to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<HashMap<String, u32>> =
            load_snapshot(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut value = HashMap::new();
        value.insert("北京".to_string(), 3u32);

        save_snapshot(&path, &value).unwrap();
        let loaded: HashMap<String, u32> = load_snapshot(&path).unwrap().unwrap();
        assert_eq!(loaded, value);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_snapshot_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let result: Result<Option<HashMap<String, u32>>> = load_snapshot(&path);
        assert!(matches!(result, Err(VoyageError::Serialization(_))));
    }
}
