// rust/seqview-core/src/error.rs

use std::sync::Arc;
use thiserror::Error;

/// Shared, clonable cause attached to an error.
pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum SeqError {

    #[error("index {index} out of range for view of length {len}")]
    Index {
        index: usize,
        len: usize,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    #[error("transform failed at index {index}: {source}")]
    Transform {
        index: usize,
        #[source]
        source: Cause,
    },

    #[error("worker error{}: {message}", fmt_index(.index))]
    Worker {
        index: Option<usize>,
        message: String,
    },

    #[error("group {group} holds {actual} items, expected {expected}")]
    Shape {
        group: usize,
        expected: usize,
        actual: usize,
    },
}

fn fmt_index(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" at index {i}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, SeqError>;

/// Coarse classification of a [`SeqError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Index,
    Configuration,
    Transform,
    Worker,
    Shape,
}

/// An error raised in another process, carried back as text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// Convenience constructors
impl SeqError {

    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        Self::Index { index, len }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn transform(
        index: usize,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Transform {
            index,
            source: Arc::from(source.into()),
        }
    }

    pub fn worker(index: impl Into<Option<usize>>, message: impl Into<String>) -> Self {
        Self::Worker {
            index: index.into(),
            message: message.into(),
        }
    }

    pub fn shape(group: usize, expected: usize, actual: usize) -> Self {
        Self::Shape {
            group,
            expected,
            actual,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Index { .. } => ErrorKind::Index,
            Self::Config { .. } => ErrorKind::Configuration,
            Self::Transform { .. } => ErrorKind::Transform,
            Self::Worker { .. } => ErrorKind::Worker,
            Self::Shape { .. } => ErrorKind::Shape,
        }
    }

    /// The index the error is attached to, when there is one.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Index { index, .. } | Self::Transform { index, .. } => Some(*index),
            Self::Worker { index, .. } => *index,
            Self::Config { .. } | Self::Shape { .. } => None,
        }
    }
}

/// Fails with [`SeqError::Index`] unless `index < len`.
pub(crate) fn check_index(index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(SeqError::index_out_of_range(index, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_transform_error_keeps_cause() {
        let err = SeqError::transform(7, "decode failed");
        assert_eq!(err.kind(), ErrorKind::Transform);
        assert_eq!(err.index(), Some(7));
        assert!(err.to_string().contains("index 7"));
        assert_eq!(err.source().unwrap().to_string(), "decode failed");
    }

    #[test]
    fn test_clone_shares_cause() {
        let err = SeqError::transform(1, RemoteError::new("boom"));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn test_worker_error_display() {
        assert_eq!(
            SeqError::worker(3, "crashed").to_string(),
            "worker error at index 3: crashed"
        );
        assert_eq!(
            SeqError::worker(None, "spawn failed").to_string(),
            "worker error: spawn failed"
        );
    }

    #[test]
    fn test_check_index() {
        assert!(check_index(0, 1).is_ok());
        let err = check_index(4, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Index);
        assert_eq!(err.index(), Some(4));
    }
}
