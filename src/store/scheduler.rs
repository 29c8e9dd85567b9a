//! Single-flight save gate
//!
//! At most one physical write runs per store. Requests arriving while a
//! write is in flight collapse into a single `pending` flag, and exactly one
//! follow-up write runs when the current one finishes, so a burst of N
//! requests costs at most one extra write.

use crate::error::{Error, Result};
use crate::sync::MutexExt;
use log::{debug, warn};
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::Notify;

/// What a save request turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// This caller drove the physical write(s).
    Written,
    /// A write was already in flight; this request was folded into its follow-up.
    Coalesced,
}

#[derive(Debug, Default)]
struct Gate {
    in_flight: bool,
    pending: bool,
    /// Message of the last cycle's final write failure, read by waiting flushers
    last_error: Option<String>,
}

/// Single-flight, single-slot save executor.
#[derive(Debug, Default)]
pub struct SaveScheduler {
    gate: Mutex<Gate>,
    idle: Notify,
}

impl SaveScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a write cycle is currently running.
    pub fn is_in_flight(&self) -> bool {
        self.gate.lock_recovered().in_flight
    }

    /// Run `write` now, or mark a follow-up if a write is already running.
    ///
    /// `write` is called once per physical write and must capture the state
    /// current at the time it is called.
    pub async fn request<F, Fut>(&self, write: F) -> Result<SaveOutcome>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        {
            let mut gate = self.gate.lock_recovered();
            if gate.in_flight {
                gate.pending = true;
                debug!("Save already in flight, coalescing");
                return Ok(SaveOutcome::Coalesced);
            }
            gate.in_flight = true;
        }
        self.drive(write).await.map(|()| SaveOutcome::Written)
    }

    /// Like [`request`](Self::request), but when a write is already running
    /// this waits for the whole cycle (including the follow-up that will carry
    /// the caller's changes) and reports its result.
    pub async fn flush<F, Fut>(&self, write: F) -> Result<SaveOutcome>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let idle = self.idle.notified();
        tokio::pin!(idle);
        let must_wait = {
            let mut gate = self.gate.lock_recovered();
            if gate.in_flight {
                gate.pending = true;
                // Register before releasing the gate so the wake-up cannot be missed.
                idle.as_mut().enable();
                true
            } else {
                gate.in_flight = true;
                false
            }
        };
        if !must_wait {
            return self.drive(write).await.map(|()| SaveOutcome::Written);
        }

        idle.await;
        match self.gate.lock_recovered().last_error.clone() {
            Some(message) => Err(Error::SaveFailed(message)),
            None => Ok(SaveOutcome::Coalesced),
        }
    }

    async fn drive<F, Fut>(&self, write: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut guard = InFlight {
            scheduler: self,
            completed: false,
        };
        loop {
            let result = write().await;

            let mut gate = self.gate.lock_recovered();
            if gate.pending {
                gate.pending = false;
                drop(gate);
                if let Err(e) = &result {
                    warn!("Save failed, retrying with newer state: {e}");
                }
                continue;
            }

            gate.last_error = result.as_ref().err().map(ToString::to_string);
            drop(gate);
            guard.completed = true;
            drop(guard);
            return result;
        }
    }
}

/// Releases the gate when a write cycle ends, including when the driving
/// future is dropped mid-write.
struct InFlight<'a> {
    scheduler: &'a SaveScheduler,
    completed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut gate = self.scheduler.gate.lock_recovered();
        gate.in_flight = false;
        gate.pending = false;
        if !self.completed {
            gate.last_error = Some("save was cancelled before completing".into());
        }
        drop(gate);
        self.scheduler.idle.notify_waiters();
    }
}
