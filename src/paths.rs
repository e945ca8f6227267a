//! Filesystem lookup for the on-disk DataPack tree.
//!
//! The builder never walks the filesystem directly. Directory enumeration and existence checks go
//! through [`FileLookup`] so callers can substitute their own view of the tree; file contents are
//! read by the [`ContentStore`](crate::store::ContentStore).

use crate::{error::BuildError, properties::DATA_PACK_SUFFIX};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub trait FileLookup: Send + Sync {
    fn file_exists(&self, path: &Path) -> bool;

    /// Names of the directories below `path`. When `recursive` is set, nested directories are
    /// returned as `/`-joined paths relative to `path`.
    fn directories(&self, path: &Path, recursive: bool) -> Result<Vec<String>, BuildError>;

    /// Names of the regular files directly inside `path`.
    fn files(&self, path: &Path) -> Result<Vec<String>, BuildError>;
}

/// [`FileLookup`] over the local filesystem. Listings are sorted so sessions are reproducible.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileLookup;

impl FileLookup for LocalFileLookup {
    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn directories(&self, path: &Path, recursive: bool) -> Result<Vec<String>, BuildError> {
        let walker = WalkDir::new(path)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name();
        let mut dirs = Vec::new();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let relative = entry.path().strip_prefix(path)?;
            dirs.push(slash_path(relative));
        }
        Ok(dirs)
    }

    fn files(&self, path: &Path) -> Result<Vec<String>, BuildError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            if entry.file_type().is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(files)
    }
}

/// Join path components with `/` regardless of platform.
pub fn slash_path(path: &Path) -> String {
    let mut joined = String::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => joined.push_str(&prefix.as_os_str().to_string_lossy()),
            Component::RootDir => joined.push('/'),
            other => {
                if !joined.is_empty() && !joined.ends_with('/') {
                    joined.push('/');
                }
                joined.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    joined
}

/// Lexically normalize a path: drop `.` components and fold `..` into the preceding component.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                ) {
                    normalized.pop();
                } else {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Key under which file content is cached: the normalized path, `/`-joined and lowercased.
pub fn path_key(path: &Path) -> String {
    slash_path(&normalize_path(path)).to_lowercase()
}

/// Label of the DataPack stored in `dir`, i.e. `<Label>` of its `<Label>_DataPack.json`.
pub fn data_pack_label(lookup: &dyn FileLookup, dir: &Path) -> Option<String> {
    // A listing failure means the directory was deleted underneath us.
    let files = lookup.files(dir).ok()?;
    files
        .iter()
        .find_map(|name| name.strip_suffix(DATA_PACK_SUFFIX).map(str::to_string))
}
