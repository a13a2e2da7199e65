//! Path helpers shared by extraction and cleanup.

use std::path::{Path, PathBuf};

/// Deterministic sibling folder for an archive's extracted contents: the
/// archive's parent directory joined with `<stem>_<extension>`, e.g.
/// `dir/foo.zip -> dir/foo_zip`.
#[must_use]
pub fn folder_for_unpacked(file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = file
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = if extension.is_empty() {
        stem
    } else {
        format!("{stem}_{extension}")
    };
    file.parent().unwrap_or_else(|| Path::new("")).join(name)
}

/// Convert a path to one relative to `root` by stripping the root prefix.
/// Both sides are made absolute against the current directory first; a
/// path outside `root` is returned unchanged.
#[must_use]
pub fn relative_to(file: &Path, root: &Path) -> PathBuf {
    let file_abs = std::path::absolute(file).unwrap_or_else(|_| file.to_path_buf());
    let root_abs = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
    match file_abs.strip_prefix(&root_abs) {
        Ok(stripped) => stripped.to_path_buf(),
        Err(_) => file.to_path_buf(),
    }
}

/// Strip a single leading `./` or `.\` from a path string.
#[must_use]
pub fn strip_dot_prefix(name: &str) -> &str {
    name.strip_prefix("./")
        .or_else(|| name.strip_prefix(".\\"))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_folder_replaces_the_extension_dot() {
        assert_eq!(
            folder_for_unpacked(Path::new("dir/foo.zip")),
            PathBuf::from("dir/foo_zip")
        );
        assert_eq!(
            folder_for_unpacked(Path::new("archive.7z")),
            PathBuf::from("archive_7z")
        );
        assert_eq!(
            folder_for_unpacked(Path::new("dir/noext")),
            PathBuf::from("dir/noext")
        );
    }

    #[test]
    fn relative_paths_strip_the_root() {
        let root = Path::new("scratch");
        assert_eq!(
            relative_to(Path::new("scratch/a/b.bin"), root),
            PathBuf::from("a/b.bin")
        );
        // outside the root the input is returned untouched
        assert_eq!(
            relative_to(Path::new("elsewhere/b.bin"), root),
            PathBuf::from("elsewhere/b.bin")
        );
    }

    #[test]
    fn dot_prefixes_are_stripped_once() {
        assert_eq!(strip_dot_prefix("./a/b"), "a/b");
        assert_eq!(strip_dot_prefix(".\\a\\b"), "a\\b");
        assert_eq!(strip_dot_prefix("a/b"), "a/b");
    }
}
