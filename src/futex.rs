// Modified from https://github.com/rust-lang/rust/blob/master/library/std/src/sys/sync/mutex/futex.rs
// and https://github.com/rust-lang/rust/blob/master/library/std/src/sys/sync/condvar/futex.rs
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{
    AtomicU32,
    Ordering::{Acquire, Relaxed, Release},
};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1; // locked, no other threads waiting
const CONTENDED: u32 = 2; // locked, and other threads waiting (contended)

/// A futex-based mutex owning the data it protects.
///
/// Unlike `std::sync::Mutex` there is no poisoning: a panic while the lock is
/// held releases it normally when the guard unwinds.
pub struct Mutex<T> {
    futex: AtomicU32,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is serialized by `futex`.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            futex: AtomicU32::new(UNLOCKED),
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        if self
            .futex
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            self.lock_contended();
        }
        MutexGuard { mutex: self }
    }

    #[cold]
    fn lock_contended(&self) {
        let mut state = self.spin();

        // Unlocked after spinning: take it without marking it as contended.
        if state == UNLOCKED {
            match self
                .futex
                .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            {
                Ok(_) => return,
                Err(s) => state = s,
            }
        }

        loop {
            // Skip the write if it is already CONTENDED, friendlier for the caches.
            if state != CONTENDED && self.futex.swap(CONTENDED, Acquire) == UNLOCKED {
                // UNLOCKED -> CONTENDED, so we own it now.
                return;
            }

            atomic_wait::wait(&self.futex, CONTENDED);

            state = self.spin();
        }
    }

    fn spin(&self) -> u32 {
        let mut spin = 100;
        loop {
            // Only `load` while spinning.
            let state = self.futex.load(Relaxed);

            if state != LOCKED || spin == 0 {
                return state;
            }

            std::hint::spin_loop();
            spin -= 1;
        }
    }

    #[inline]
    fn unlock(&self) {
        if self.futex.swap(UNLOCKED, Release) == CONTENDED {
            // Wake one thread; it marks the lock CONTENDED again when it takes it,
            // so the rest are woken eventually.
            atomic_wait::wake_one(&self.futex);
        }
    }
}

/// Exclusive access to the data of a [`Mutex`], released on drop.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard proves the lock is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard proves the lock is held, and `&mut self` makes it unique.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// A futex-based condition variable paired with [`Mutex`].
///
/// The futex word is a sequence number bumped by every notification. A waiter
/// reads it while still holding the mutex, so a notification issued after the
/// mutex is released always changes the word before the waiter parks on it.
pub struct Condvar {
    futex: AtomicU32,
}

impl Condvar {
    #[inline]
    pub const fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
        }
    }

    /// Releases `guard`, parks until notified, then reacquires the mutex.
    ///
    /// Spurious wakeups are possible; callers re-check their condition in a loop.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = guard.mutex;
        let seq = self.futex.load(Relaxed);
        drop(guard);

        atomic_wait::wait(&self.futex, seq);

        mutex.lock()
    }

    /// Wakes every thread parked in [`Condvar::wait`].
    pub fn notify_all(&self) {
        self.futex.fetch_add(1, Relaxed);
        atomic_wait::wake_all(&self.futex);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_futex() {
        let lock = Arc::new(Mutex::new(0usize));
        let current = Arc::new(AtomicU32::new(0));
        const N: usize = 8;
        const M: usize = 1 << 16;

        let mut tasks = vec![];
        for _ in 0..N {
            let lock = lock.clone();
            let current = current.clone();
            tasks.push(std::thread::spawn(move || {
                for _ in 0..M {
                    let mut count = lock.lock();
                    assert_eq!(current.fetch_add(1, Acquire), 0);
                    *count += 1;
                    current.fetch_sub(1, Acquire);
                }
            }));
        }
        for task in tasks {
            task.join().unwrap();
        }
        assert_eq!(*lock.lock(), N * M);
    }

    #[test]
    fn test_concurrent() {
        let lock = Arc::new(Mutex::new(0u32));
        const THREAD_COUNT: usize = 4;
        const ITERATIONS: usize = 10000;

        let handles = (0..THREAD_COUNT)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        let mut value = lock.lock();
                        let v = *value;
                        std::thread::yield_now(); // Force a context switch to increase contention
                        *value = v + 1;
                        drop(value);

                        std::thread::yield_now();
                    }
                })
            })
            .collect::<Vec<_>>();
        handles.into_iter().for_each(|h| h.join().unwrap());

        assert_eq!(*lock.lock(), (THREAD_COUNT * ITERATIONS) as u32);
    }

    #[test]
    fn test_no_poisoning() {
        let lock = Arc::new(Mutex::new(1u32));
        let result = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                let _guard = lock.lock();
                panic!("panic while holding the lock");
            })
            .join()
        };
        assert!(result.is_err());
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn test_condvar_notify_all() {
        const N: usize = 4;
        let pair = Arc::new((Mutex::new(false), Condvar::new()));

        let waiters = (0..N)
            .map(|_| {
                let pair = pair.clone();
                std::thread::spawn(move || {
                    let (lock, cond) = &*pair;
                    let mut ready = lock.lock();
                    while !*ready {
                        ready = cond.wait(ready);
                    }
                })
            })
            .collect::<Vec<_>>();

        std::thread::sleep(Duration::from_millis(20));
        {
            let (lock, cond) = &*pair;
            *lock.lock() = true;
            cond.notify_all();
        }
        waiters.into_iter().for_each(|w| w.join().unwrap());
    }

    #[test]
    fn test_condvar_notify_before_park_is_not_lost() {
        let pair = Arc::new((Mutex::new(0u32), Condvar::new()));

        let notifier = {
            let pair = pair.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    let (lock, cond) = &*pair;
                    *lock.lock() += 1;
                    cond.notify_all();
                }
            })
        };

        let (lock, cond) = &*pair;
        let mut count = lock.lock();
        while *count < 1000 {
            count = cond.wait(count);
        }
        drop(count);
        notifier.join().unwrap();
    }
}
