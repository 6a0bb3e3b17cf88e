use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    data_dir::DataDir,
    error::{Error, Result},
    retriever::{IndexOutcome, Retriever},
};

/// A source file copied into the materials directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedMaterial {
    pub path: PathBuf,
    pub title: String,
}

/// Title used when the caller gives none: the file name, or `material`.
fn default_title(source: &Path) -> String {
    source
        .file_name()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("material")
        .to_string()
}

/// Copy `source` into `<root>/materials/<uuid>_<file name>`.
pub fn import_material(
    data_dir: &DataDir,
    source: &Path,
    title: Option<&str>,
) -> Result<ImportedMaterial> {
    if !source.is_file() {
        return Err(Error::NotFound {
            kind: "file",
            name: source.display().to_string(),
        });
    }

    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_title(source));

    let file_name = source
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "material".to_string());
    let dest = data_dir
        .materials_dir()?
        .join(format!("{}_{file_name}", uuid::Uuid::new_v4()));

    std::fs::copy(source, &dest)?;
    debug!(source = %source.display(), dest = %dest.display(), "imported material");

    Ok(ImportedMaterial { path: dest, title })
}

/// Index one file, copying it into the materials directory first when
/// `import` is set.
pub fn add_file(
    retriever: &Retriever,
    source: &Path,
    title: Option<&str>,
    import: bool,
) -> Result<IndexOutcome> {
    let (path, title) = if import {
        let imported = import_material(retriever.data_dir(), source, title)?;
        (imported.path, imported.title)
    } else {
        if !source.is_file() {
            return Err(Error::NotFound {
                kind: "file",
                name: source.display().to_string(),
            });
        }
        let title = title
            .map(str::to_string)
            .unwrap_or_else(|| default_title(source));
        (source.to_path_buf(), title)
    };

    retriever.index_document(&title, &path)
}
