use crate::error::{Error, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Collects the `.rs` files of a project.
///
/// Skips `target`, hidden directories and any path containing one of the configured exclude
/// fragments. Files are returned in a stable (sorted) order so that repeated runs discover
/// routers in the same order.
///
/// # Example
///
/// ```no_run
/// use openapi_infer::scanner::SourceScanner;
/// use std::path::PathBuf;
///
/// let scanner = SourceScanner::new(PathBuf::from("./my-project"));
/// let result = scanner.scan().unwrap();
/// println!("Found {} Rust files", result.rust_files.len());
/// ```
pub struct SourceScanner {
    root_path: PathBuf,
    exclude: Vec<String>,
}

/// Result of a directory scan.
pub struct ScanResult {
    pub rust_files: Vec<PathBuf>,
    /// Entries that could not be read; scanning continued past them
    pub warnings: Vec<String>,
}

impl SourceScanner {
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            exclude: Vec::new(),
        }
    }

    pub fn with_exclude(mut self, exclude: &[String]) -> Self {
        self.exclude = exclude.to_vec();
        self
    }

    /// Walks the tree below the root path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the root is not a directory.
    pub fn scan(&self) -> Result<ScanResult> {
        if !self.root_path.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "not a directory: {}",
                self.root_path.display()
            )));
        }
        let mut rust_files = Vec::new();
        let mut warnings = Vec::new();

        let walker = WalkDir::new(&self.root_path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.path() == self.root_path {
                    return true;
                }
                let file_name = e.file_name().to_string_lossy();
                !file_name.starts_with('.') && file_name != "target"
            });
        for entry in walker {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if !entry.file_type().is_file()
                        || path.extension().and_then(|s| s.to_str()) != Some("rs")
                    {
                        continue;
                    }
                    if self.is_excluded(path) {
                        debug!("Excluded {}", path.display());
                        continue;
                    }
                    rust_files.push(path.to_path_buf());
                }
                Err(e) => {
                    let warning = format!("Failed to access path: {}", e);
                    warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }

        debug!("Scanned {} Rust files", rust_files.len());
        Ok(ScanResult {
            rust_files,
            warnings,
        })
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root_path).unwrap_or(path);
        let relative = relative.to_string_lossy().replace('\\', "/");
        self.exclude
            .iter()
            .any(|fragment| !fragment.is_empty() && relative.contains(fragment.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(result: &ScanResult, root: &Path) -> Vec<String> {
        result
            .rust_files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_scan_nested_directories_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src/models")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/models/user.rs"), "struct User {}").unwrap();
        fs::write(root.join("src/api.rs"), "fn api() {}").unwrap();
        fs::write(root.join("readme.md"), "# README").unwrap();

        let result = SourceScanner::new(root.to_path_buf()).scan().unwrap();

        assert_eq!(
            names(&result, root),
            vec!["src/api.rs", "src/main.rs", "src/models/user.rs"]
        );
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_scan_skips_target_hidden_and_excluded() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("target/debug")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("src/generated")).unwrap();
        fs::write(root.join("target/debug/build.rs"), "fn main() {}").unwrap();
        fs::write(root.join(".git/config.rs"), "// config").unwrap();
        fs::write(root.join("src/generated/proto.rs"), "// proto").unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();

        let result = SourceScanner::new(root.to_path_buf())
            .with_exclude(&["generated/".to_string()])
            .scan()
            .unwrap();

        assert_eq!(names(&result, root), vec!["src/main.rs"]);
    }

    #[test]
    fn test_scan_rejects_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let err = SourceScanner::new(missing).scan().err().unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
