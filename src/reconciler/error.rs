use std::fmt;
use std::io;
use std::time::Duration;

use crate::accessor::AccessorError;
use crate::builder::BuildError;
use crate::models::{ObjectKey, SourceKind};
use crate::storage::StorageError;

/// Why a reconciliation pass failed
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to load object: {0}")]
    Load(#[source] AccessorError),

    #[error("failed to get source {kind} '{key}': {source}")]
    SourceUnavailable {
        kind: SourceKind,
        key: ObjectKey,
        #[source]
        source: AccessorError,
    },

    #[error("no artifact available for {kind} source '{key}'")]
    NoSourceArtifact { kind: SourceKind, key: ObjectKey },

    #[error("{0}")]
    InvalidChartName(String),

    #[error("failed to create temporary working directory: {0}")]
    Workspace(#[source] io::Error),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("garbage collection failed: {0}")]
    GarbageCollection(#[source] StorageError),

    #[error("failed to {op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("failed to patch object: {0}")]
    Patch(#[source] AccessorError),

    #[error("reconciliation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{}", AggregateDisplay(.0))]
    Aggregate(Vec<ReconcileError>),
}

struct AggregateDisplay<'a>(&'a [ReconcileError]);

impl fmt::Display for AggregateDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.0 {
            return write!(f, "{}", only);
        }
        write!(f, "[")?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        write!(f, "]")
    }
}

impl ReconcileError {
    /// Combine two errors without masking either
    pub fn aggregate(self, other: ReconcileError) -> ReconcileError {
        let mut errors = match self {
            ReconcileError::Aggregate(errors) => errors,
            err => vec![err],
        };
        match other {
            ReconcileError::Aggregate(more) => errors.extend(more),
            err => errors.push(err),
        }
        ReconcileError::Aggregate(errors)
    }

    /// Returns true if any part of the error is a stale-write conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcileError::Patch(e) | ReconcileError::Load(e) => e.is_conflict(),
            ReconcileError::Aggregate(errors) => errors.iter().any(ReconcileError::is_conflict),
            _ => false,
        }
    }
}
