//! Named key/value file used to persist counters.
//!
//! One JSON object per store at `<dir>/<name>.json`. Writes go through a
//! temporary file and a rename, so a crash mid-write leaves the previous
//! dump intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::{GatewayError, Result};

/// File-backed `name → u64` table.
#[derive(Debug, Clone)]
pub struct KvStore {
    name: String,
    dir: PathBuf,
}

impl KvStore {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }

    /// Load the last dump.
    ///
    /// A missing file is an empty table. An unreadable or corrupt file is
    /// logged and also treated as empty.
    pub fn load(&self) -> BTreeMap<String, u64> {
        let path = self.path();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read counter store");
                return BTreeMap::new();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "corrupt counter store, starting empty");
            BTreeMap::new()
        })
    }

    /// Persist the whole table.
    pub fn dump(&self, values: &BTreeMap<String, u64>) -> Result<()> {
        let path = self.path();
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error("create", &self.dir, e))?;

        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(&tmp_path, json).map_err(|e| io_error("write", &tmp_path, e))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| io_error("rename", &tmp_path, e))
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> GatewayError {
    GatewayError::Configuration(format!(
        "counter store: failed to {action} {}: {e}",
        path.display()
    ))
}
