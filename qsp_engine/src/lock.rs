use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

/// Mutual exclusion that the owning thread may acquire again without
/// blocking.
///
/// Every successful `lock`/`try_lock` on the owning thread increments the
/// re-entry depth by one and every dropped guard decrements it; the lock is
/// released to other threads only when the depth returns to zero. Guards are
/// `!Send` so the release always happens on the acquiring thread.
#[derive(Debug, Default)]
pub struct ReentrantLock {
    owner: Mutex<Owner>,
    released: Condvar,
}

impl ReentrantLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> ReentrantGuard<'_> {
        let me = thread::current().id();
        let mut owner = self.owner();
        loop {
            match owner.thread {
                None => {
                    owner.thread = Some(me);
                    owner.depth = 1;
                    break;
                }
                Some(current) if current == me => {
                    owner.depth += 1;
                    break;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        ReentrantGuard::new(self)
    }

    pub fn try_lock(&self) -> Option<ReentrantGuard<'_>> {
        let me = thread::current().id();
        let mut owner = self.owner();
        match owner.thread {
            None => {
                owner.thread = Some(me);
                owner.depth = 1;
            }
            Some(current) if current == me => owner.depth += 1,
            Some(_) => return None,
        }
        drop(owner);
        Some(ReentrantGuard::new(self))
    }

    /// Non-blocking check: is any thread currently holding the lock.
    pub fn is_locked(&self) -> bool {
        self.owner().thread.is_some()
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner().thread == Some(thread::current().id())
    }

    /// Re-entry depth of the current holder, zero when unlocked.
    pub fn depth(&self) -> usize {
        self.owner().depth
    }

    fn owner(&self) -> MutexGuard<'_, Owner> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut owner = self.owner();
        owner.depth = owner.depth.saturating_sub(1);
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            self.released.notify_one();
        }
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ReentrantGuard<'a> {
    fn new(lock: &'a ReentrantLock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
