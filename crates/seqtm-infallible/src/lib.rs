// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

//! Sync primitives whose guards are obtained infallibly.
//!
//! Lock poisoning means a thread panicked while holding the lock; every
//! caller in this workspace treats that as an unrecoverable bug, so the
//! wrappers panic at the lock site instead of returning a `Result` that
//! would be `unwrap()`ed everywhere.

use std::sync::{
    Mutex as StdMutex, MutexGuard, RwLock as StdRwLock, RwLockReadGuard, RwLockWriteGuard,
    TryLockError,
};

/// A Mutex which panics when a lock operation observes poisoning.
#[derive(Debug, Default)]
pub struct Mutex<T>(StdMutex<T>);

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self(StdMutex::new(value))
    }

    /// Lock the mutex, panicking if a previous holder panicked.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0
            .lock()
            .expect("seqtm_infallible::Mutex lock observed poisoning")
    }

    /// Attempt the lock without blocking. `None` means the lock is
    /// currently held elsewhere; poisoning still panics.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        match self.0.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(_)) => {
                panic!("seqtm_infallible::Mutex try_lock observed poisoning")
            }
        }
    }

    pub fn into_inner(self) -> T {
        self.0
            .into_inner()
            .expect("seqtm_infallible::Mutex into_inner observed poisoning")
    }
}

/// An RwLock which panics when a lock operation observes poisoning.
#[derive(Debug, Default)]
pub struct RwLock<T>(StdRwLock<T>);

impl<T> RwLock<T> {
    pub fn new(value: T) -> Self {
        Self(StdRwLock::new(value))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0
            .read()
            .expect("seqtm_infallible::RwLock read observed poisoning")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0
            .write()
            .expect("seqtm_infallible::RwLock write observed poisoning")
    }

    pub fn into_inner(self) -> T {
        self.0
            .into_inner()
            .expect("seqtm_infallible::RwLock into_inner observed poisoning")
    }
}
