use std::path::PathBuf;

/// Result type alias for the core library
pub type Result<T> = std::result::Result<T, Error>;

/// Error types surfaced by the inference pipeline.
///
/// Facts that merely could not be resolved statically are not errors; they are reported as
/// [`crate::engine::Diagnostic`]s and the analysis carries on.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// A source file could not be parsed; no analysis runs on such a program.
    Parse { file: PathBuf, message: String },
    InvalidArgument(String),
    /// The configuration does not describe anything present in the analysed program.
    Configuration(String),
    /// Two distinct types asked for the same schema component name.
    ComponentCollision {
        name: String,
        existing: String,
        incoming: String,
    },
    Serialization(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Parse { file, message } => {
                write!(f, "Parse error in {}: {}", file.display(), message)
            }
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Error::ComponentCollision {
                name,
                existing,
                incoming,
            } => write!(
                f,
                "Schema component name '{}' is claimed by both {} and {}",
                name, existing, incoming
            ),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON serialization failed: {}", err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(format!("YAML serialization failed: {}", err))
    }
}

impl From<syn::Error> for Error {
    fn from(err: syn::Error) -> Self {
        Error::Parse {
            file: PathBuf::from("<unknown>"),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_message_names_both_types() {
        let err = Error::ComponentCollision {
            name: "User".to_string(),
            existing: "User (src/a.rs:3)".to_string(),
            incoming: "User (src/b.rs:9)".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("src/a.rs:3"));
        assert!(msg.contains("src/b.rs:9"));
    }

    #[test]
    fn test_io_error_has_source() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
