//! Write lock serializing multi-byte writes into the outbound ring.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

/// A single-bit lock. Contenders park on a condvar instead of spinning.
#[derive(Default)]
pub struct WriteLock {
    locked: AtomicBool,
    gate: Mutex<()>,
    released: Condvar,
}

impl WriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn try_lock_raw(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquire the lock, blocking until it is free.
    ///
    /// The lock is released when the guard drops, on every exit path.
    pub fn acquire(&self) -> WriteGuard<'_> {
        if !self.try_lock_raw() {
            let mut gate = self.gate.lock();
            while !self.try_lock_raw() {
                self.released.wait(&mut gate);
            }
        }
        WriteGuard { lock: self }
    }

    /// Acquire the lock if nobody holds it.
    pub fn try_acquire(&self) -> Option<WriteGuard<'_>> {
        self.try_lock_raw().then_some(WriteGuard { lock: self })
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
        let _gate = self.gate.lock();
        self.released.notify_one();
    }
}

impl std::fmt::Debug for WriteLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Scoped ownership of the [`WriteLock`].
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a WriteLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
