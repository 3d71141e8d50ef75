//! Filesystem-backed script storage.
//!
//! Scripts are opaque text blobs stored as `<script_dir>/<id>.side`. Ids are
//! validated before touching the filesystem; nothing outside the configured
//! root is ever read or written.

use crate::error::{CoreError, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ScriptStore {
    root: PathBuf,
}

const SCRIPT_EXTENSION: &str = "side";

/// Reject ids that could escape the storage root or hide files.
pub fn sanitize_id(id: &str) -> Result<&str> {
    if id.is_empty()
        || id.starts_with('.')
        || id.contains('/')
        || id.contains('\\')
        || id.contains("..")
    {
        return Err(CoreError::InvalidId(id.to_string()));
    }
    Ok(id)
}

impl ScriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn script_path(&self, id: &str) -> Result<PathBuf> {
        let id = sanitize_id(id)?;
        Ok(self.root.join(format!("{}.{}", id, SCRIPT_EXTENSION)))
    }

    /// Store script text. Last writer wins.
    pub fn save(&self, id: &str, content: &str) -> Result<()> {
        let path = self.script_path(id)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<String> {
        let path = self.script_path(id)?;
        if !path.exists() {
            return Err(CoreError::NotFound(format!("script '{}'", id)));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// All stored ids, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(SCRIPT_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.script_path(id)?;
        if !path.exists() {
            return Err(CoreError::NotFound(format!("script '{}'", id)));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.script_path(id)?.exists())
    }
}
