//! # Event Mailbox
//!
//! A bounded FIFO queue of fixed-size messages delivering control events from
//! any number of producers to the single agent loop.
//!
//! ## Features
//!
//! - **Bounded memory**: all `capacity` slots are reserved when the mailbox is
//!   initialized and the ring never grows past them
//! - **Back-pressure**: `send` waits for a free slot instead of growing or dropping
//! - **Blocking receive with timeout**: the idle poll of the agent loop
//! - **Explicit lifecycle**: `Uninitialized -> Ready -> Uninitialized`, with a
//!   guarded re-initialization path that rebuilds the queue and logs a warning
//!
//! A timeout of [`Duration::ZERO`] never blocks. A timeout too large to be
//! represented as a deadline waits indefinitely.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailboxError {
    #[error("Mailbox is not initialized")]
    NotInitialized,
    #[error("Failed to send event: out of mailbox slots after {timeout:?}")]
    SendTimeout { timeout: Duration },
    #[error("Failed to receive event: mailbox empty after {timeout:?}")]
    ReceiveTimeout { timeout: Duration },
}

impl MailboxError {
    /// `true` for the two expected timeout outcomes, which callers handle by
    /// retrying or idling rather than treating as a fault.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            MailboxError::SendTimeout { .. } | MailboxError::ReceiveTimeout { .. }
        )
    }
}

pub type MailboxResult<T> = Result<T, MailboxError>;

enum Lifecycle<M> {
    Uninitialized,
    Ready { queue: VecDeque<M>, generation: u64 },
}

struct Inner<M> {
    lifecycle: Lifecycle<M>,
    // bumped on every init so that waiters parked on a torn-down queue give up
    generations: u64,
}

/// Fixed-capacity, multi-producer event queue with blocking send and receive.
pub struct EventMailbox<M> {
    capacity: usize,
    inner: Mutex<Inner<M>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<M: Copy + Send> EventMailbox<M> {
    /// Creates an uninitialized mailbox holding at most `capacity` messages.
    /// Call [`EventMailbox::init`] before sending or receiving.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::Uninitialized,
                generations: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Constructs the queue.
    ///
    /// Calling this on a mailbox that was never deinitialized releases the
    /// previous queue first, discarding any pending messages, and logs a
    /// warning. Waiters parked on the previous queue fail with
    /// [`MailboxError::NotInitialized`].
    pub fn init(&self) {
        let mut inner = self.lock();
        if let Lifecycle::Ready { queue, .. } = &inner.lifecycle {
            warn!(
                pending = queue.len(),
                "Mailbox un-deinited but reused for new session. Deinit for previous session first."
            );
        }
        inner.generations += 1;
        let generation = inner.generations;
        inner.lifecycle = Lifecycle::Ready {
            queue: VecDeque::with_capacity(self.capacity),
            generation,
        };
        drop(inner);
        self.wake_all();
        debug!(capacity = self.capacity, "OTA event queue created.");
    }

    /// Destroys the queue. Pending messages are dropped.
    pub fn deinit(&self) -> MailboxResult<()> {
        let mut inner = self.lock();
        if let Lifecycle::Uninitialized = inner.lifecycle {
            warn!("Deinit requested on a mailbox that is not initialized.");
            return Err(MailboxError::NotInitialized);
        }
        inner.lifecycle = Lifecycle::Uninitialized;
        drop(inner);
        self.wake_all();
        debug!("OTA event queue deleted.");
        Ok(())
    }

    /// Copies `message` into a free slot, waiting up to `timeout` for one.
    ///
    /// The caller keeps its own copy, so a timed out send can be retried as is.
    pub fn send(&self, message: M, timeout: Duration) -> MailboxResult<()> {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.lock();
        let generation = Self::ready_generation(&inner)?;

        loop {
            match &mut inner.lifecycle {
                Lifecycle::Ready {
                    queue,
                    generation: current,
                } if *current == generation => {
                    if queue.len() < self.capacity {
                        queue.push_back(message);
                        let occupancy = queue.len();
                        drop(inner);
                        self.not_empty.notify_one();
                        debug!(occupancy, "OTA event sent.");
                        return Ok(());
                    }
                }
                _ => return Err(MailboxError::NotInitialized),
            }

            inner = match Self::remaining(deadline) {
                Some(Some(remaining)) => self
                    .not_full
                    .wait_timeout(inner, remaining)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| e.into_inner().0),
                Some(None) => {
                    error!(
                        ?timeout,
                        "Failed to send event to OTA event queue: out of mail pool"
                    );
                    return Err(MailboxError::SendTimeout { timeout });
                }
                None => self
                    .not_full
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Removes and returns the oldest message, waiting up to `timeout` for one.
    ///
    /// An empty mailbox is the normal outcome of an idle poll, so the timeout is
    /// only logged at debug level.
    pub fn receive(&self, timeout: Duration) -> MailboxResult<M> {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.lock();
        let generation = Self::ready_generation(&inner)?;

        loop {
            match &mut inner.lifecycle {
                Lifecycle::Ready {
                    queue,
                    generation: current,
                } if *current == generation => {
                    if let Some(message) = queue.pop_front() {
                        let occupancy = queue.len();
                        drop(inner);
                        self.not_full.notify_one();
                        debug!(occupancy, "OTA event received.");
                        return Ok(message);
                    }
                }
                _ => return Err(MailboxError::NotInitialized),
            }

            inner = match Self::remaining(deadline) {
                Some(Some(remaining)) => self
                    .not_empty
                    .wait_timeout(inner, remaining)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| e.into_inner().0),
                Some(None) => {
                    debug!(?timeout, "Failed to receive OTA event: possibly mailbox empty");
                    return Err(MailboxError::ReceiveTimeout { timeout });
                }
                None => self
                    .not_empty
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current occupancy. Zero while uninitialized.
    pub fn len(&self) -> usize {
        match &self.lock().lifecycle {
            Lifecycle::Ready { queue, .. } => queue.len(),
            Lifecycle::Uninitialized => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.lock().lifecycle, Lifecycle::Ready { .. })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<M>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_all(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn ready_generation(inner: &Inner<M>) -> MailboxResult<u64> {
        match inner.lifecycle {
            Lifecycle::Ready { generation, .. } => Ok(generation),
            Lifecycle::Uninitialized => Err(MailboxError::NotInitialized),
        }
    }

    /// `None` means wait without a deadline; `Some(None)` means the deadline passed.
    fn remaining(deadline: Option<Instant>) -> Option<Option<Duration>> {
        deadline.map(|deadline| {
            let now = Instant::now();
            (deadline > now).then(|| deadline - now)
        })
    }
}
