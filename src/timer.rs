//! # Timer Service
//!
//! A fixed array of named one-shot timers, one slot per [`TimerId`], all driven
//! by one shared [`Scheduler`].
//!
//! Each slot is either empty (never started, or deleted) or holds a record that
//! owns exactly one substrate registration:
//!
//! ```text
//!           start                    expire | stop
//! Empty ──────────▶ Armed ◀────────────────────────▶ Unarmed
//!   ▲                 │   start (restart)              │
//!   └──── delete ─────┴────────────────────────────────┘
//! ```
//!
//! Restarting reuses the registration: the pending expiry is cancelled and the
//! same handle is rescheduled with the new delay. The registration always fires
//! a trampoline that reads the slot's current binding, so the callback and name
//! passed to the latest `start` are the ones used, without re-registering.
//!
//! The substrate never fires before the armed delay, so an expiry arriving
//! ahead of the slot's deadline belongs to an arm that a restart replaced. It
//! still runs the current callback but leaves the new arm in place.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use strum::{EnumCount, IntoEnumIterator};
use thiserror::Error;
use tracing::{debug, error, instrument, trace, warn};

use crate::scheduler::{ScheduledCallback, Scheduler};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumCount,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum TimerId {
    /// Re-sends an unanswered job or data request.
    Request,
    /// Bounds how long a freshly booted image may stay in self test.
    SelfTest,
    /// Back-off before retrying a failed connection or transfer.
    Retry,
}

impl TimerId {
    fn index(self) -> usize {
        self as usize
    }
}

/// Invoked with the id of the timer that expired, on the scheduler's worker.
pub type TimerCallback = Arc<dyn Fn(TimerId) + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("Failed to start timer {id}: {message}")]
    CreateFailed { id: TimerId, message: String },
    #[error("Tried to stop un-started timer {id}")]
    StopFailed { id: TimerId },
    #[error("Tried to delete un-started timer {id}")]
    DeleteFailed { id: TimerId },
}

pub type TimerResult<T> = Result<T, TimerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arm {
    Unarmed,
    Until(Instant),
    /// Armed with a delay too large to be represented as an `Instant`.
    Unbounded,
}

impl Arm {
    fn after(delay: Duration) -> Self {
        Instant::now()
            .checked_add(delay)
            .map_or(Arm::Unbounded, Arm::Until)
    }

    fn is_due(self, now: Instant) -> bool {
        matches!(self, Arm::Until(deadline) if deadline <= now)
    }

    fn remaining(self, now: Instant) -> Option<Duration> {
        match self {
            Arm::Unarmed => None,
            Arm::Until(deadline) => Some(deadline.saturating_duration_since(now)),
            Arm::Unbounded => Some(Duration::MAX),
        }
    }
}

struct Binding {
    name: String,
    callback: TimerCallback,
    arm: Arm,
}

struct TimerRecord<H> {
    handle: H,
    binding: Arc<Mutex<Binding>>,
}

pub struct TimerService<S: Scheduler> {
    scheduler: S,
    records: Mutex<[Option<TimerRecord<S::Handle>>; TimerId::COUNT]>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn trampoline(id: TimerId, binding: &Arc<Mutex<Binding>>) -> ScheduledCallback {
    let binding = binding.clone();
    Arc::new(move || {
        let callback = {
            let mut binding = lock(&binding);
            if binding.arm.is_due(Instant::now()) {
                binding.arm = Arm::Unarmed;
            } else {
                trace!(%id, "Expiry of a replaced arm, keeping the current one.");
            }
            binding.callback.clone()
        };
        debug!(%id, "OTA timer expired.");
        callback(id);
    })
}

impl<S: Scheduler> TimerService<S> {
    pub fn new(scheduler: S) -> Self {
        Self {
            scheduler,
            records: Mutex::new(std::array::from_fn(|_| None)),
        }
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Arms `id` to fire once after `delay`.
    ///
    /// The first start registers with the scheduler. Later starts restart the
    /// timer on the same registration and rebind `name` and `callback`.
    #[instrument(skip(self, callback))]
    pub fn start(
        &self,
        id: TimerId,
        name: &str,
        delay: Duration,
        callback: TimerCallback,
    ) -> TimerResult<()> {
        let arm = Arm::after(delay);
        let mut records = lock(&self.records);
        let slot = &mut records[id.index()];

        match slot {
            Some(record) => {
                {
                    let mut binding = lock(&record.binding);
                    binding.name = name.to_string();
                    binding.callback = callback;
                    binding.arm = arm;
                }
                self.scheduler.cancel(&mut record.handle);
                if let Err(e) = self.scheduler.reschedule(&mut record.handle, delay) {
                    lock(&record.binding).arm = Arm::Unarmed;
                    error!(%id, error = %e, "Failed to restart OTA timer.");
                    return Err(TimerError::CreateFailed {
                        id,
                        message: e.to_string(),
                    });
                }
                debug!(%id, ?delay, "OTA timer restarted.");
            }
            None => {
                let binding = Arc::new(Mutex::new(Binding {
                    name: name.to_string(),
                    callback,
                    arm,
                }));
                let handle = self
                    .scheduler
                    .register(delay, trampoline(id, &binding))
                    .map_err(|e| {
                        error!(%id, error = %e, "Failed to create OTA timer.");
                        TimerError::CreateFailed {
                            id,
                            message: e.to_string(),
                        }
                    })?;
                *slot = Some(TimerRecord { handle, binding });
                debug!(%id, ?delay, "OTA timer started.");
            }
        }
        Ok(())
    }

    /// Cancels a pending expiry. The registration is kept for the next start.
    #[instrument(skip(self))]
    pub fn stop(&self, id: TimerId) -> TimerResult<()> {
        let mut records = lock(&self.records);
        let Some(record) = records[id.index()].as_mut() else {
            warn!(%id, "Try to stop un-started timer.");
            return Err(TimerError::StopFailed { id });
        };
        self.scheduler.cancel(&mut record.handle);
        lock(&record.binding).arm = Arm::Unarmed;
        debug!(%id, "OTA timer stopped.");
        Ok(())
    }

    /// Cancels any pending expiry and releases the registration.
    #[instrument(skip(self))]
    pub fn delete(&self, id: TimerId) -> TimerResult<()> {
        let record = lock(&self.records)[id.index()].take();
        let Some(TimerRecord { mut handle, .. }) = record else {
            warn!(%id, "Try to delete un-started timer.");
            return Err(TimerError::DeleteFailed { id });
        };
        self.scheduler.cancel(&mut handle);
        self.scheduler.release(handle);
        debug!(%id, "OTA timer deleted.");
        Ok(())
    }

    /// Deletes every started timer. Returns how many were released.
    pub fn delete_all(&self) -> usize {
        TimerId::iter()
            .filter(|id| self.is_registered(*id) && self.delete(*id).is_ok())
            .count()
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.remaining(id).is_some()
    }

    /// `true` while a substrate registration exists for `id`.
    pub fn is_registered(&self, id: TimerId) -> bool {
        lock(&self.records)[id.index()].is_some()
    }

    /// Time left until the pending expiry, `None` when unarmed.
    /// [`Duration::MAX`] when the delay has no representable deadline.
    pub fn remaining(&self, id: TimerId) -> Option<Duration> {
        let records = lock(&self.records);
        let record = records[id.index()].as_ref()?;
        let arm = lock(&record.binding).arm;
        arm.remaining(Instant::now())
    }

    pub fn name(&self, id: TimerId) -> Option<String> {
        let records = lock(&self.records);
        let record = records[id.index()].as_ref()?;
        let name = lock(&record.binding).name.clone();
        Some(name)
    }
}

impl<S: Scheduler> Drop for TimerService<S> {
    fn drop(&mut self) {
        let released = self.delete_all();
        if released > 0 {
            debug!(released, "Released OTA timers on drop.");
        }
    }
}
