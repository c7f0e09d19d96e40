use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cancellation signal passed to [`KMutex::lock`](crate::KMutex::lock).
///
/// A context is done once it, or any of its ancestors, has been cancelled, or
/// once its deadline has passed. Contexts are only ever polled: nothing wakes a
/// thread that is parked when its context becomes done.
///
/// Clones share the same state, so cancelling a clone cancels the original.
///
/// # Examples
/// ```
/// use kmutex::{Context, Error};
/// use std::time::Duration;
///
/// let root = Context::background();
/// let ctx = Context::with_timeout(&root, Duration::from_secs(60));
/// assert!(!ctx.is_done());
///
/// root.cancel();
/// assert_eq!(ctx.err(), Some(Error::Cancelled));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    parent: Option<Arc<Inner>>,
    cancelled: AtomicBool,
    /// Earliest deadline along the ancestor chain.
    deadline: Option<Instant>,
}

impl Context {
    /// Returns a context that is never done unless cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a child of `parent` that can be cancelled on its own.
    pub fn with_cancel(parent: &Context) -> Self {
        Self::child(parent, parent.inner.deadline)
    }

    /// Returns a child of `parent` that is done once `deadline` has passed.
    ///
    /// If the parent's deadline is earlier, the child keeps the parent's.
    pub fn with_deadline(parent: &Context, deadline: Instant) -> Self {
        let deadline = match parent.inner.deadline {
            Some(d) => d.min(deadline),
            None => deadline,
        };
        Self::child(parent, Some(deadline))
    }

    /// Returns a child of `parent` that is done after `timeout` from now.
    pub fn with_timeout(parent: &Context, timeout: Duration) -> Self {
        Self::with_deadline(parent, Instant::now() + timeout)
    }

    fn child(parent: &Context, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                parent: Some(parent.inner.clone()),
                cancelled: AtomicBool::new(false),
                deadline,
            }),
        }
    }

    /// Cancels this context and all contexts derived from it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Returns the effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns `true` once the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Returns why the context is done, or `None` if it is not.
    ///
    /// Cancellation wins over an elapsed deadline.
    pub fn err(&self) -> Option<Error> {
        let mut node = Some(&self.inner);
        while let Some(inner) = node {
            if inner.cancelled.load(Ordering::Acquire) {
                return Some(Error::Cancelled);
            }
            node = inner.parent.as_ref();
        }

        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Checkpoint form of [`Context::err`] for use with `?`.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
