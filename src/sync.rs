//! Poison-tolerant access to std locks
//!
//! The store never leaves its state half-mutated across a panic point, so a
//! poisoned lock is recovered instead of propagated.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) trait MutexExt<T> {
    fn lock_recovered(&self) -> MutexGuard<'_, T>;
}

pub(crate) trait RwLockExt<T> {
    fn read_recovered(&self) -> RwLockReadGuard<'_, T>;

    fn write_recovered(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    fn lock_recovered(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| {
            log::warn!("Mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl<T> RwLockExt<T> for RwLock<T> {
    fn read_recovered(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|poisoned| {
            log::warn!("RwLock was poisoned (read), recovering");
            poisoned.into_inner()
        })
    }

    fn write_recovered(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|poisoned| {
            log::warn!("RwLock was poisoned (write), recovering");
            poisoned.into_inner()
        })
    }
}
