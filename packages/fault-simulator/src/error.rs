//! error.rs — crate-wide error type
//!
//! Only definition, loading, lookup and export problems surface as errors.
//! Bad telemetry during a run never does: the tick is skipped and logged.

use std::path::PathBuf;

use fault_types::DefinitionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown id passed to run / get.
    #[error("scenario not found: {0}")]
    ScenarioNotFound(String),

    /// Unknown fault_type / severity / axis, or malformed parameters.
    #[error("invalid fault definition '{id}': {source}")]
    InvalidFaultDefinition {
        id: String,
        #[source]
        source: DefinitionError,
    },

    /// Malformed JSON / CSV scenario source. Nothing from the source was loaded.
    #[error("failed to parse {}: {reason}", path.display())]
    SourceParse { path: PathBuf, reason: String },

    /// Report requested with an empty history or filter.
    #[error("No test results found")]
    NoResultsAvailable,

    #[error("a scenario run is already in progress ({0})")]
    RunInProgress(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::SourceParse { path: path.into(), reason: reason.to_string() }
    }
}
