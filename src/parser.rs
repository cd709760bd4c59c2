use crate::error::{Error, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Parses Rust source files into `syn` syntax trees.
pub struct SourceParser {
    /// Paths of parsed files are reported relative to this directory
    root: PathBuf,
}

/// A parsed source file
#[derive(Debug)]
pub struct ParsedFile {
    pub path: PathBuf,
    pub syntax_tree: syn::File,
}

impl SourceParser {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Reads and parses one file.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the file cannot be read, [`Error::Parse`] when it is not valid Rust.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedFile> {
        debug!("Parsing file: {}", path.display());
        let content = fs::read_to_string(path)?;
        let display_path = path.strip_prefix(&self.root).unwrap_or(path).to_path_buf();
        let syntax_tree = syn::parse_file(&content).map_err(|e| {
            let start = e.span().start();
            Error::Parse {
                file: display_path.clone(),
                message: format!("{} (line {}, column {})", e, start.line, start.column + 1),
            }
        })?;
        Ok(ParsedFile {
            path: display_path,
            syntax_tree,
        })
    }

    /// Parses every file. A program that does not fully parse is not analysed, so the first
    /// failure is returned after all failures have been logged.
    pub fn parse_files(&self, paths: &[PathBuf]) -> Result<Vec<ParsedFile>> {
        debug!("Parsing {} files", paths.len());
        let mut parsed = Vec::with_capacity(paths.len());
        let mut first_error = None;
        for path in paths {
            match self.parse_file(path) {
                Ok(file) => parsed.push(file),
                Err(e) => {
                    warn!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(parsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let file_path = dir.path().join(name);
        fs::write(&file_path, content).unwrap();
        file_path
    }

    #[test]
    fn test_parse_valid_file_relative_path() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = create_temp_file(
            &temp_dir,
            "valid.rs",
            "pub struct User { pub id: u32 }\npub fn get_user() -> Option<User> { None }",
        );
        let parser = SourceParser::new(temp_dir.path().to_path_buf());
        let parsed = parser.parse_file(&file_path).unwrap();

        assert_eq!(parsed.path, PathBuf::from("valid.rs"));
        assert_eq!(parsed.syntax_tree.items.len(), 2);
    }

    #[test]
    fn test_parse_invalid_file_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = create_temp_file(&temp_dir, "broken.rs", "fn broken( {\n let x = ;\n}");
        let parser = SourceParser::new(temp_dir.path().to_path_buf());

        match parser.parse_file(&file_path) {
            Err(Error::Parse { file, .. }) => assert_eq!(file, PathBuf::from("broken.rs")),
            other => panic!("expected parse error, got {:?}", other.map(|f| f.path)),
        }
    }

    #[test]
    fn test_parse_missing_file_is_io_error() {
        let parser = SourceParser::new(PathBuf::from("/"));
        let result = parser.parse_file(Path::new("/nonexistent/file.rs"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_parse_files_fails_on_any_broken_file() {
        let temp_dir = TempDir::new().unwrap();
        let good = create_temp_file(&temp_dir, "good.rs", "pub fn hello() {}");
        let bad = create_temp_file(&temp_dir, "bad.rs", "pub fn broken( {");
        let parser = SourceParser::new(temp_dir.path().to_path_buf());

        assert_eq!(parser.parse_files(&[good.clone()]).unwrap().len(), 1);
        assert!(parser.parse_files(&[good, bad]).is_err());
    }
}
