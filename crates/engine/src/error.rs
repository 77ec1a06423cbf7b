use std::path::PathBuf;

use thiserror::Error;

pub type FixtureResult<T> = Result<T, FixtureError>;

/// Failures of the operation itself. Data mismatches found by `verify` are
/// not errors; they come back as [`crate::Difference`] values.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// Missing or invalid construction parameter (connection identity, settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A schema script or LOB source file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The connection could not report primary keys or object existence.
    #[error("schema introspection failed: {0}")]
    SchemaIntrospection(String),

    /// Any execute/query failure reported by the connection.
    #[error("sql execution failed: {0}")]
    Sql(String),

    /// Malformed dataset document, schema script, or row specification.
    #[error("invalid dataset: {0}")]
    Dataset(String),
}

impl FixtureError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn sql(msg: impl std::fmt::Display) -> Self {
        Self::Sql(msg.to_string())
    }
}
