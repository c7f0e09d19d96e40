use crate::futex::{Condvar, Mutex};
use crate::{Context, Error, Result};
use foldhash::fast::RandomState;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

type WaitObserver<K> = Box<dyn Fn(&K) + Send + Sync>;

/// A mutex keyed by an arbitrary value, `String` by default.
///
/// Only the keys currently held are stored. A key enters the set on a
/// successful [`lock`](KMutex::lock) and leaves it on [`unlock`](KMutex::unlock);
/// nothing about it is remembered afterwards.
///
/// All keys share one guard and one wake signal: every unlock wakes every
/// parked locker, and those whose key is still held park again.
pub struct KMutex<K = String> {
    held: Mutex<HashSet<K, RandomState>>,
    wake: Condvar,
    observer: Option<WaitObserver<K>>,
}

impl<K: Eq + Hash + Debug> Default for KMutex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Debug> KMutex<K> {
    /// Creates an empty `KMutex`.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty `KMutex` with room for `capacity` held keys.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            held: Mutex::new(HashSet::with_capacity_and_hasher(
                capacity,
                RandomState::default(),
            )),
            wake: Condvar::new(),
            observer: None,
        }
    }

    /// Creates an empty `KMutex` that calls `observer` with the key every time
    /// a locker is about to park on it.
    ///
    /// The observer runs while the internal guard is held, so it must not call
    /// back into this `KMutex`. It is meant for tests and instrumentation that
    /// need to know a locker is blocked.
    pub fn with_wait_observer<F>(observer: F) -> Self
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        Self::with_capacity_and_wait_observer(0, observer)
    }

    /// Like [`KMutex::with_wait_observer`], with room for `capacity` held keys.
    pub fn with_capacity_and_wait_observer<F>(capacity: usize, observer: F) -> Self
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        Self {
            observer: Some(Box::new(observer)),
            ..Self::with_capacity(capacity)
        }
    }

    /// Locks `key`, blocking until it is free.
    ///
    /// Returns the context's error without acquiring the key if `ctx` is done
    /// when the call starts, even if the key is free.
    ///
    /// **Cancellation behaviour:** `ctx` is checked on entry and every time the
    /// caller wakes up. A context that becomes done while the caller is parked
    /// does not wake it; the error is returned only after the next
    /// [`unlock`](KMutex::unlock) of *any* key. With no further unlocks the call
    /// stays blocked.
    ///
    /// **Locking behaviour:** Deadlock if called when already holding `key`.
    ///
    /// # Examples
    /// ```
    /// use kmutex::{Context, Error, KMutex};
    ///
    /// let km = KMutex::new();
    /// let ctx = Context::background();
    /// km.lock(&ctx, "a".to_string()).unwrap();
    /// km.lock(&ctx, "b".to_string()).unwrap(); // distinct keys don't block
    ///
    /// let cancelled = Context::with_cancel(&ctx);
    /// cancelled.cancel();
    /// assert_eq!(km.lock(&cancelled, "c".to_string()), Err(Error::Cancelled));
    ///
    /// km.unlock("a").unwrap();
    /// km.unlock("b").unwrap();
    /// ```
    pub fn lock(&self, ctx: &Context, key: K) -> Result<()> {
        let mut held = self.held.lock();
        loop {
            if let Err(err) = ctx.check() {
                tracing::debug!(key = ?key, %err, "abandon lock");
                return Err(err);
            }

            if !held.contains(&key) {
                tracing::trace!(key = ?key, "acquire");
                held.insert(key);
                return Ok(());
            }

            if let Some(observer) = &self.observer {
                observer(&key);
            }
            tracing::trace!(key = ?key, "park");
            held = self.wake.wait(held);
        }
    }

    /// Locks `key` and returns a guard that unlocks it when dropped.
    ///
    /// Same blocking and cancellation behaviour as [`KMutex::lock`].
    ///
    /// # Examples
    /// ```
    /// use kmutex::{Context, KMutex};
    ///
    /// let km = KMutex::new();
    /// let ctx = Context::background();
    /// {
    ///     let guard = km.lock_guard(&ctx, "key".to_string()).unwrap();
    ///     assert_eq!(guard.key(), "key");
    ///     // the key is unlocked here
    /// }
    /// let guard = km.lock_guard(&ctx, "key".to_string()).unwrap();
    /// guard.unlock().unwrap();
    /// ```
    pub fn lock_guard(&self, ctx: &Context, key: K) -> Result<KeyGuard<'_, K>>
    where
        K: Clone,
    {
        self.lock(ctx, key.clone())?;
        Ok(KeyGuard {
            kmutex: self,
            key,
            armed: true,
        })
    }

    /// Unlocks `key` and wakes every parked locker.
    ///
    /// Returns [`Error::NotLocked`] and changes nothing if `key` is not held.
    /// That is a bug in the caller: only keys it successfully locked may be
    /// unlocked.
    pub fn unlock<Q>(&self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + Debug + ?Sized,
    {
        let mut held = self.held.lock();
        if !held.remove(key) {
            tracing::warn!(key = ?key, "unlock of a key that is not locked");
            return Err(Error::NotLocked);
        }
        tracing::trace!(key = ?key, "release");
        self.wake.notify_all();
        Ok(())
    }
}

/// An RAII guard holding one key of a [`KMutex`].
///
/// When dropped, the key is unlocked. Use [`KeyGuard::unlock`] to release it
/// early and observe the result.
pub struct KeyGuard<'a, K: Eq + Hash + Debug = String> {
    kmutex: &'a KMutex<K>,
    key: K,
    armed: bool,
}

impl<K: Eq + Hash + Debug> KeyGuard<'_, K> {
    /// The key this guard holds.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Unlocks the key now and returns the result of [`KMutex::unlock`].
    pub fn unlock(mut self) -> Result<()> {
        self.armed = false;
        self.kmutex.unlock(&self.key)
    }
}

impl<K: Eq + Hash + Debug> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.kmutex.unlock(&self.key);
        }
    }
}
