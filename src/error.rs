use std::{error::Error, fmt};

/// The reason a task submission was rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitErrorKind {
    /// The pool has not been started yet.
    NotStarted,
    /// The pool has been stopped.
    Stopped,
}

/// An error returned when a task could not be submitted to a pool.
///
/// Contains the original task, so the caller can retry the submission later
/// or run the task some other way.
pub struct SubmitError<T> {
    task: T,
    kind: SubmitErrorKind,
}

impl<T> SubmitError<T> {
    pub(crate) fn not_started(task: T) -> Self {
        Self {
            task,
            kind: SubmitErrorKind::NotStarted,
        }
    }

    pub(crate) fn stopped(task: T) -> Self {
        Self {
            task,
            kind: SubmitErrorKind::Stopped,
        }
    }

    /// Get the reason the submission was rejected.
    pub fn kind(&self) -> SubmitErrorKind {
        self.kind
    }

    /// Extracts the task that could not be submitted.
    pub fn into_task(self) -> T {
        self.task
    }
}

impl<T> Error for SubmitError<T> {}

impl<T> fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubmitError").field(&self.kind).finish()
    }
}

impl<T> fmt::Display for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SubmitErrorKind::NotStarted => f.write_str("worker pool has not been started"),
            SubmitErrorKind::Stopped => f.write_str("worker pool has been stopped"),
        }
    }
}
