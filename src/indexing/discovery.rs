use crate::core::error::{Error, Result};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Directory names never descended into
pub const SKIP_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    ".svn",
    "node_modules",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
    ".vs",
    "dist",
    "build",
    ".next",
];

/// Discover all indexable files under `root`, sorted by path.
///
/// Prunes [`SKIP_DIRS`] and every dotted directory or file, and skips
/// empty files and files larger than `max_file_size`.
pub fn discover_files(root: &Path, max_file_size: u64) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(Error::Config(format!(
            "Directory does not exist: {}",
            root.display()
        )));
    }

    if !root.is_dir() {
        return Err(Error::Config(format!(
            "Path is not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|entry| entry.depth() == 0 || !is_excluded_name(entry.file_name()))
        .build();

    for result in walker {
        match result {
            Ok(entry) => {
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                let path = entry.path();
                match entry.metadata() {
                    Ok(metadata) => {
                        let size = metadata.len();
                        if size == 0 || size > max_file_size {
                            continue;
                        }
                        files.push(path.to_path_buf());
                    }
                    Err(err) => warn!("Failed to stat {}: {}", path.display(), err),
                }
            }
            Err(err) => {
                // Log but continue - some files might be inaccessible
                warn!("Failed to access file: {}", err);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Whether a directory or file name is pruned from scans and watch events
pub fn is_excluded_name(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref())
}

/// Whether any component of `path` below `root` would have been pruned
pub fn is_excluded_below(path: &Path, root: &Path) -> bool {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .any(|c| is_excluded_name(c.as_os_str())),
        Err(_) => false,
    }
}

/// Whether a single file would be picked up by [`discover_files`]
pub fn is_indexable_file(path: &Path, max_file_size: u64) -> bool {
    if path.file_name().map_or(true, is_excluded_name) {
        return false;
    }
    match std::fs::metadata(path) {
        Ok(metadata) => metadata.is_file() && metadata.len() > 0 && metadata.len() <= max_file_size,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MAX: u64 = 50 * 1024 * 1024;

    fn names(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| {
                f.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn test_discover_files_basic() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::write(root.join("b.txt"), "two").unwrap();
        fs::write(root.join("a.md"), "# one").unwrap();
        fs::write(root.join("photo.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();

        let files = discover_files(root, MAX).unwrap();
        assert_eq!(names(root, &files), vec!["a.md", "b.txt", "photo.png"]);
    }

    #[test]
    fn test_discover_files_prunes_hidden_and_denied() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        for dir in ["node_modules", ".git", "build", "__pycache__", ".secret", "src"] {
            fs::create_dir_all(root.join(dir)).unwrap();
            fs::write(root.join(dir).join("file.txt"), "content").unwrap();
        }
        fs::write(root.join(".env"), "KEY=1").unwrap();

        let files = discover_files(root, MAX).unwrap();
        assert_eq!(names(root, &files), vec!["src/file.txt"]);
    }

    #[test]
    fn test_discover_files_skips_empty_and_oversized() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::write(root.join("empty.txt"), "").unwrap();
        fs::write(root.join("big.txt"), "x".repeat(100)).unwrap();
        fs::write(root.join("ok.txt"), "x".repeat(10)).unwrap();

        let files = discover_files(root, 50).unwrap();
        assert_eq!(names(root, &files), vec!["ok.txt"]);
    }

    #[test]
    fn test_discover_files_root_may_be_hidden() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join(".notes");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("todo.txt"), "milk").unwrap();

        let files = discover_files(&root, MAX).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_discover_files_nonexistent_directory() {
        let result = discover_files(Path::new("/nonexistent/directory"), MAX);
        assert!(result.is_err());
    }

    #[test]
    fn test_discover_files_file_instead_of_directory() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("file.txt");
        fs::write(&test_file, "content").unwrap();

        assert!(discover_files(&test_file, MAX).is_err());
    }

    #[test]
    fn test_is_excluded_below() {
        let root = Path::new("/home/me/.config/notes");
        assert!(!is_excluded_below(&root.join("a/b.txt"), root));
        assert!(is_excluded_below(&root.join("node_modules/x.js"), root));
        assert!(is_excluded_below(&root.join("a/.cache/x"), root));
        assert!(!is_excluded_below(Path::new("/elsewhere/x"), root));
    }

    #[test]
    fn test_is_indexable_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), "content").unwrap();
        fs::write(root.join(".hidden"), "content").unwrap();
        fs::write(root.join("empty.txt"), "").unwrap();

        assert!(is_indexable_file(&root.join("a.txt"), MAX));
        assert!(!is_indexable_file(&root.join(".hidden"), MAX));
        assert!(!is_indexable_file(&root.join("empty.txt"), MAX));
        assert!(!is_indexable_file(&root.join("missing.txt"), MAX));
        assert!(!is_indexable_file(root, MAX));
    }
}
