//! Recording storage - one pretty-printed JSON file per log

use crate::events::EventLog;
use autoclick_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

const EXTENSION: &str = "json";

pub struct RecordingStorage {
    dir: PathBuf,
}

impl RecordingStorage {
    /// `$DATA_DIR/autoclick/recordings`
    pub fn new() -> Result<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| Error::invalid_state("Could not determine the user data directory"))?;
        Self::with_dir(base.join("autoclick").join("recordings"))
    }

    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Save under a timestamped name in the storage directory
    pub fn save(&self, log: &EventLog) -> Result<PathBuf> {
        let ts = log.recorded_at.format("%Y%m%d_%H%M%S");
        let name = sanitize(log.label.as_deref().unwrap_or("recording"));
        let path = self.dir.join(format!("{}_{}.{}", name, ts, EXTENSION));
        Self::save_to(log, &path)?;
        Ok(path)
    }

    /// Save to an explicit path, creating parent directories
    pub fn save_to(log: &EventLog, path: &Path) -> Result<()> {
        if !log.is_sealed() {
            return Err(Error::invalid_state("Only a sealed recording can be saved"));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, log.to_json()?)?;
        tracing::info!(path = %path.display(), events = log.len(), "recording saved");
        Ok(())
    }

    /// Load by file name in the storage directory, or by path
    pub fn load(&self, name: &str) -> Result<EventLog> {
        Self::load_file(&self.resolve(name))
    }

    pub fn load_file(path: &Path) -> Result<EventLog> {
        let bytes = fs::read(path).map_err(|e| {
            Error::from(e).with_context(serde_json::json!({ "path": path.display().to_string() }))
        })?;
        let log = EventLog::from_slice(&bytes)?;
        tracing::info!(path = %path.display(), events = log.len(), "recording loaded");
        Ok(log)
    }

    /// File names of stored recordings, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        fs::remove_file(self.resolve(name))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn resolve(&self, name: &str) -> PathBuf {
        let direct = Path::new(name);
        if direct.components().count() > 1 || direct.is_absolute() {
            direct.to_path_buf()
        } else {
            self.dir.join(name)
        }
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
