use std::path::{Path, PathBuf};

use crate::{error::Result, extract::DocumentKind};

/// A supported document found under a directory.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the walked root directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    pub kind: DocumentKind,
}

/// Recursively walk a directory and collect the files the extractor can
/// handle.
///
/// Skips hidden files/directories (names starting with `.`). Symlinked
/// files are followed; symlinked directories are not, so links can never
/// form a cycle.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            if resolved.is_file() {
                push_supported(root, &path, resolved, results);
            }
        } else if file_type.is_file() {
            let resolved = path.canonicalize()?;
            push_supported(root, &path, resolved, results);
        }
    }

    Ok(())
}

fn push_supported(
    root: &Path,
    original_path: &Path,
    absolute_path: PathBuf,
    results: &mut Vec<DiscoveredFile>,
) {
    let kind = DocumentKind::from_path(original_path);
    if !kind.is_supported() {
        return;
    }

    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    results.push(DiscoveredFile {
        relative_path,
        absolute_path,
        kind,
    });
}
