use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "PREPPAL_DATA_DIR";

/// Root of every persisted artifact.
///
/// The vector index and the metadata log live side by side under `rag/` so
/// that backing up or restoring the root keeps them consistent.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The PREPPAL_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/preppal/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV_VAR) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("preppal")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_db(&self) -> PathBuf {
        self.root.join("catalog.redb")
    }

    /// Directory holding imported originals.
    pub fn materials_dir(&self) -> Result<PathBuf> {
        self.ensure_dir("materials")
    }

    pub fn rag_dir(&self) -> Result<PathBuf> {
        self.ensure_dir("rag")
    }

    pub fn vector_index(&self) -> Result<PathBuf> {
        Ok(self.rag_dir()?.join("vectors.idx"))
    }

    pub fn metadata_log(&self) -> Result<PathBuf> {
        Ok(self.rag_dir()?.join("meta.jsonl"))
    }

    fn ensure_dir(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}
