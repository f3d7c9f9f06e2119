// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Cross-core mutual exclusion and busy-wait helpers.
//!
//! The SCMI channels are shared between cores at a boot stage where the
//! usability of read-modify-write atomics is not guaranteed, so the channel
//! lock is a Lamport bakery: fair, and built from plain loads and stores
//! only. Tickets are cleaned/invalidated around every access because cache
//! coherency between cores is not guaranteed either.

use crate::arch;
use core::{
    hint::spin_loop,
    sync::atomic::{AtomicU32, Ordering},
};

/// A fair bakery lock with one ticket slot per core.
pub struct BakeryLock<const CORES: usize> {
    number: [AtomicU32; CORES],
    entering: [AtomicU32; CORES],
}

impl<const CORES: usize> BakeryLock<CORES> {
    /// Creates an unlocked bakery lock.
    pub const fn new() -> Self {
        Self {
            number: [const { AtomicU32::new(0) }; CORES],
            entering: [const { AtomicU32::new(0) }; CORES],
        }
    }

    /// Acquires the lock on behalf of `core`, spinning until every core with
    /// an older ticket has released it.
    ///
    /// The returned guard releases the lock on drop.
    pub fn lock(&self, core: usize) -> BakeryGuard<'_, CORES> {
        assert!(core < CORES);

        self.entering[core].store(1, Ordering::SeqCst);
        self.flush();

        let mut max = 0;
        for slot in &self.number {
            self.inval();
            max = max.max(slot.load(Ordering::SeqCst));
        }
        self.number[core].store(max + 1, Ordering::SeqCst);
        self.entering[core].store(0, Ordering::SeqCst);
        self.flush();

        let my_ticket = (max + 1, core);
        for other in 0..CORES {
            if other == core {
                continue;
            }
            loop {
                self.inval();
                if self.entering[other].load(Ordering::SeqCst) != 0 {
                    spin_loop();
                    continue;
                }
                let ticket = self.number[other].load(Ordering::SeqCst);
                if ticket != 0 && (ticket, other) < my_ticket {
                    spin_loop();
                    continue;
                }
                break;
            }
        }

        BakeryGuard { lock: self, core }
    }

    fn flush(&self) {
        arch::flush_dcache_range(self as *const Self as usize, size_of::<Self>());
    }

    fn inval(&self) {
        arch::inval_dcache_range(self as *const Self as usize, size_of::<Self>());
    }
}

impl<const CORES: usize> Default for BakeryLock<CORES> {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a [`BakeryLock`] until dropped.
pub struct BakeryGuard<'a, const CORES: usize> {
    lock: &'a BakeryLock<CORES>,
    core: usize,
}

impl<const CORES: usize> Drop for BakeryGuard<'_, CORES> {
    fn drop(&mut self) {
        self.lock.number[self.core].store(0, Ordering::SeqCst);
        self.lock.flush();
    }
}

/// Spins until `done` returns true, or until the optional `budget` of
/// iterations is exhausted.
///
/// Waiting at this trust level means busy-polling memory-mapped state: there
/// is no scheduler to yield to. With `budget == None` the wait is unbounded,
/// matching the platform's historical behavior of letting a hung remote unit
/// hang the caller. Returns whether `done` was observed.
pub fn poll_until(budget: Option<u32>, mut done: impl FnMut() -> bool) -> bool {
    match budget {
        None => {
            while !done() {
                spin_loop();
            }
            true
        }
        Some(limit) => {
            for _ in 0..limit {
                if done() {
                    return true;
                }
                spin_loop();
            }
            done()
        }
    }
}
