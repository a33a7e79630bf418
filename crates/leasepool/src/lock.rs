//! Lock strategies guarding pool state.
//!
//! A pool is generic over how its state is protected. [`Threaded`] puts the
//! state behind a `parking_lot` mutex so leases can be taken from any
//! thread. [`Cooperative`] stores it in a `RefCell`, skipping
//! synchronisation entirely; the resulting pool is `!Sync`, so the compiler
//! keeps it on the one thread that runs a cooperative scheduler.
//!
//! Critical sections are short and never perform connection I/O.

use std::cell::RefCell;

use parking_lot::Mutex;

/// Interior-mutable container for pool state.
pub trait StateLock<T> {
    /// Wrap `value`.
    fn new(value: T) -> Self;

    /// Run `f` with exclusive access to the state.
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

/// Selects the [`StateLock`] a pool uses.
pub trait LockStrategy: 'static {
    /// Container type for state of type `T`.
    type Lock<T>: StateLock<T>;
}

/// Mutex-guarded state, for pools shared between threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Threaded;

/// Unsynchronised state, for single-threaded cooperative scheduling.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cooperative;

impl LockStrategy for Threaded {
    type Lock<T> = Mutex<T>;
}

impl LockStrategy for Cooperative {
    type Lock<T> = RefCell<T>;
}

impl<T> StateLock<T> for Mutex<T> {
    fn new(value: T) -> Self {
        Mutex::new(value)
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }
}

impl<T> StateLock<T> for RefCell<T> {
    fn new(value: T) -> Self {
        RefCell::new(value)
    }

    // Callers never re-enter the pool while holding the borrow.
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump<S: LockStrategy>() -> u32 {
        let lock = <S::Lock<u32> as StateLock<u32>>::new(1);
        lock.with(|n| *n += 1);
        lock.with(|n| *n)
    }

    #[test]
    fn test_threaded_lock() {
        assert_eq!(bump::<Threaded>(), 2);
    }

    #[test]
    fn test_cooperative_lock() {
        assert_eq!(bump::<Cooperative>(), 2);
    }

    #[test]
    fn test_threaded_lock_is_shared_across_threads() {
        let lock = <Mutex<u32> as StateLock<u32>>::new(0);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        lock.with(|n| *n += 1);
                    }
                });
            }
        });
        assert_eq!(lock.with(|n| *n), 4000);
    }
}
