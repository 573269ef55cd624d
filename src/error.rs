//! Error types for cronflight

use std::fmt;
use thiserror::Error;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, CronError>;

/// Scheduler errors
#[derive(Debug, Error)]
pub enum CronError {
    /// Job was registered without a name
    #[error("job name has to be specified")]
    MissingJobName,

    /// Job was registered without a schedule expression
    #[error("job schedule has to be specified")]
    MissingSchedule,

    /// Job was registered without a work function
    #[error("job work function has to be specified")]
    MissingWorkFn,

    /// A job with the same name is already registered
    #[error("job with name {0} already exists")]
    DuplicateJob(String),

    /// Invalid schedule expression
    #[error("invalid schedule expression: {0}")]
    InvalidExpression(String),

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ordered accumulator for steps that should not short-circuit on the first
/// failure, such as the persistence writes around a single job run.
///
/// An empty group combines to "no error" via [`ErrorGroup::into_err`], so call
/// sites can unconditionally ask whether anything went wrong.
#[derive(Debug, Default)]
pub struct ErrorGroup {
    errors: Vec<CronError>,
}

impl ErrorGroup {
    /// Create an empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error to the group
    pub fn add(&mut self, err: CronError) {
        self.errors.push(err);
    }

    /// Append the error of a result, if any. `Ok` is a no-op.
    pub fn add_result(&mut self, result: Result<()>) {
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    /// Number of accumulated errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True if nothing was accumulated
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Individual errors, in insertion order
    pub fn errors(&self) -> &[CronError] {
        &self.errors
    }

    /// Collapse the group: `None` if nothing was accumulated, otherwise the
    /// group itself, usable as a single `std::error::Error`.
    pub fn into_err(self) -> Option<Self> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for ErrorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{}", joined)
    }
}

impl std::error::Error for ErrorGroup {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_ok_is_noop() {
        let mut group = ErrorGroup::new();
        group.add_result(Ok(()));
        group.add_result(Ok(()));
        group.add_result(Ok(()));

        assert_eq!(group.len(), 0);
        assert!(group.is_empty());
    }

    #[test]
    fn test_empty_group_combines_to_none() {
        let group = ErrorGroup::new();
        assert!(group.into_err().is_none());
    }

    #[test]
    fn test_messages_joined_in_insertion_order() {
        let mut group = ErrorGroup::new();
        group.add(CronError::Storage("first error".to_string()));
        group.add(CronError::Storage("second error".to_string()));

        let err = group.into_err().unwrap();
        assert_eq!(
            err.to_string(),
            "storage error: first error; storage error: second error"
        );
    }

    #[test]
    fn test_mixed_results() {
        let mut group = ErrorGroup::new();
        group.add_result(Ok(()));
        group.add_result(Err(CronError::Storage("boom".to_string())));
        group.add_result(Ok(()));

        assert_eq!(group.len(), 1);
        let err = group.into_err().unwrap();
        assert_eq!(err.to_string(), "storage error: boom");
    }

    #[test]
    fn test_single_error_has_no_separator() {
        let mut group = ErrorGroup::new();
        group.add(CronError::MissingJobName);

        let err = group.into_err().unwrap();
        assert!(!err.to_string().contains(';'));
    }
}
