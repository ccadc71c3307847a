use std::fmt;

use crate::{
    certs::CertError,
    cluster::{ApiError, QualifiedName},
};

/// The API verb that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// The error type returned by resource operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to {op} {kind} {name}: {source}")]
    Api {
        op: Op,
        kind: String,
        name: QualifiedName,
        #[source]
        source: ApiError,
    },
    #[error("failed to issue TLS material: {0}")]
    Certificate(#[from] CertError),
    #[error("rollout of Deployment {name} did not complete: {source}")]
    Rollout {
        name: QualifiedName,
        #[source]
        source: ApiError,
    },
}

impl Error {
    /// The underlying API error, if this error came from a cluster call.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api { source, .. } | Self::Rollout { source, .. } => Some(source),
            Self::Certificate(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.api_error(), Some(ApiError::Cancelled))
    }
}
