/// Errors returned by [`KMutex`](crate::KMutex) and [`Context`](crate::Context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The context was cancelled explicitly.
    #[error("context canceled")]
    Cancelled,
    /// The context deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    /// Unlock was called for a key that nobody holds.
    #[error("unlock of a key that is not locked")]
    NotLocked,
}

impl Error {
    /// Returns `true` if the error means the caller's context is done.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

/// A `Result` alias with [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
