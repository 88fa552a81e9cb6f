//! Error taxonomy for builders.

use std::path::PathBuf;

use crate::build::BuilderId;
use crate::transform::TransformError;

/// Broad category of a [`BuildError`], independent of child tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid required option
    Configuration,
    /// Configured input missing at build time
    InputNotFound,
    /// External collaborator failure
    Transform,
    /// Failure while committing output
    Write,
    /// Lint results configured to block the build
    LintViolation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::InputNotFound => write!(f, "input-not-found"),
            ErrorKind::Transform => write!(f, "transform"),
            ErrorKind::Write => write!(f, "write"),
            ErrorKind::LintViolation => write!(f, "lint"),
        }
    }
}

/// Error raised by `write()`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WriteError {
    /// `write()` was called before a successful `build()`
    #[error("nothing to write: {0} has not been built successfully")]
    NotBuilt(BuilderId),
    /// I/O failure while writing an output file
    #[error("failed to write {}: {source}", path.display())]
    Io {
        /// File being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// Some outputs of a fan-out builder could not be written
    #[error("{} of {} outputs failed:\n{}", failures.len(), attempted, failures.iter().map(|f| format!("  - {}", f)).collect::<Vec<_>>().join("\n"))]
    Partial {
        /// Number of outputs attempted
        attempted: usize,
        /// One message per failed output
        failures: Vec<String>,
    },
}

/// Error raised by a builder operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /// Missing or invalid option passed to `setup()`
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Configured input does not exist
    #[error("input not found: {}", .0.display())]
    InputNotFound(PathBuf),
    /// External collaborator failed
    #[error("transform failed for {}: {source}", path.display())]
    Transform {
        /// Input the transform was run on
        path: PathBuf,
        /// Collaborator error
        #[source]
        source: TransformError,
    },
    /// Output could not be committed
    #[error(transparent)]
    Write(#[from] WriteError),
    /// Lint found blocking errors
    #[error("{count} lint error(s) in {}", path.display())]
    LintViolation {
        /// Input that was linted
        path: PathBuf,
        /// Number of error-severity diagnostics
        count: usize,
    },
    /// A child builder failed
    #[error("{child}: {source}")]
    Child {
        /// Identity of the failing child
        child: BuilderId,
        /// The child's own error, unchanged
        #[source]
        source: Box<BuildError>,
    },
}

impl BuildError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        BuildError::Configuration(message.into())
    }

    /// Shorthand for an I/O write error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Write(WriteError::Io { path: path.into(), source })
    }

    /// Tag this error with the identity of the child that raised it.
    pub fn in_child(self, child: &BuilderId) -> Self {
        BuildError::Child { child: child.clone(), source: Box::new(self) }
    }

    /// Taxonomy category, looking through child tagging.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Configuration(_) => ErrorKind::Configuration,
            BuildError::InputNotFound(_) => ErrorKind::InputNotFound,
            BuildError::Transform { .. } => ErrorKind::Transform,
            BuildError::Write(_) => ErrorKind::Write,
            BuildError::LintViolation { .. } => ErrorKind::LintViolation,
            BuildError::Child { source, .. } => source.kind(),
        }
    }

    /// The innermost error, with all child tags removed.
    pub fn root_cause(&self) -> &BuildError {
        match self {
            BuildError::Child { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Chain of child identities from the outermost tag inwards.
    pub fn child_path(&self) -> Vec<&BuilderId> {
        let mut path = Vec::new();
        let mut current = self;
        while let BuildError::Child { child, source } = current {
            path.push(child);
            current = source;
        }
        path
    }
}
