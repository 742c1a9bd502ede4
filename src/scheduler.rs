//! # Scheduling Substrate
//!
//! The reactor that actually advances time and fires timer callbacks. The
//! timer service only talks to it through the [`Scheduler`] trait:
//!
//! ```text
//! register(delay, cb) ─▶ handle ─┬─▶ reschedule(handle, delay)
//!                                ├─▶ cancel(handle)
//!                                └─▶ release(handle)
//! ```
//!
//! A callback fires at most once per `register`/`reschedule`, no earlier than
//! `delay`, on the substrate's own worker.
//!
//! [`TokioScheduler`] is the production substrate. Every armed registration is
//! a sleeping task; on expiry it forwards the callback to a single dispatcher
//! task which runs callbacks one at a time. Cancelling bumps the registration's
//! generation, so an expiry that was already queued but not yet started is
//! dropped by the dispatcher. A callback that has started always completes.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle as ThreadHandle},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

pub type ScheduledCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler exhausted: {limit} registrations already live")]
    Exhausted { limit: usize },
    #[error("Scheduler worker unavailable: {0}")]
    WorkerUnavailable(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[mockall::automock(type Handle = u64;)]
pub trait Scheduler: Send + Sync {
    type Handle: Send + 'static;

    /// Creates a registration bound to `callback` and arms it for `delay`.
    fn register(&self, delay: Duration, callback: ScheduledCallback)
        -> SchedulerResult<Self::Handle>;

    /// Re-arms an existing registration. A pending expiry is replaced.
    fn reschedule(&self, handle: &mut Self::Handle, delay: Duration) -> SchedulerResult<()>;

    /// Cancels the pending expiry, if any. The registration stays usable.
    fn cancel(&self, handle: &mut Self::Handle);

    /// Cancels and gives the registration back to the substrate.
    fn release(&self, handle: Self::Handle);
}

struct Expiry {
    generation: Arc<AtomicU64>,
    armed: u64,
    callback: ScheduledCallback,
}

pub struct TokioTimerHandle {
    callback: ScheduledCallback,
    generation: Arc<AtomicU64>,
    sleeper: Option<JoinHandle<()>>,
}

impl TokioTimerHandle {
    pub fn is_pending(&self) -> bool {
        self.sleeper
            .as_ref()
            .is_some_and(|sleeper| !sleeper.is_finished())
    }
}

struct Worker {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<ThreadHandle<()>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            // dropping the scheduler from one of its own callbacks must not self-join
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

pub struct TokioScheduler {
    runtime: Handle,
    dispatch: mpsc::UnboundedSender<Expiry>,
    live: Arc<AtomicUsize>,
    limit: Option<usize>,
    _worker: Option<Worker>,
}

impl TokioScheduler {
    /// Attaches to an existing runtime. Callbacks run on one dispatcher task
    /// spawned on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        let (dispatch, rx) = mpsc::unbounded_channel();
        runtime.spawn(Self::dispatch_loop(rx));
        Self {
            runtime,
            dispatch,
            live: Arc::new(AtomicUsize::new(0)),
            limit: None,
            _worker: None,
        }
    }

    /// Owns a current-thread runtime driven by a dedicated worker thread called
    /// `name`. Usable from callers that are not running inside tokio.
    pub fn dedicated(name: &str) -> SchedulerResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| SchedulerError::WorkerUnavailable(e.to_string()))?;
        let handle = runtime.handle().clone();
        let (shutdown, stopped) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = stopped.await;
                });
            })
            .map_err(|e| SchedulerError::WorkerUnavailable(e.to_string()))?;
        debug!(worker = name, "Scheduler worker started.");

        let mut scheduler = Self::new(handle);
        scheduler._worker = Some(Worker {
            shutdown: Some(shutdown),
            thread: Some(thread),
        });
        Ok(scheduler)
    }

    /// Caps the number of live registrations; `register` fails with
    /// [`SchedulerError::Exhausted`] beyond it.
    pub fn with_registration_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn live_registrations(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    async fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Expiry>) {
        while let Some(expiry) = rx.recv().await {
            if expiry.generation.load(Ordering::SeqCst) != expiry.armed {
                trace!("Dropping expiry cancelled before dispatch.");
                continue;
            }
            (expiry.callback)();
        }
    }

    fn arm(&self, handle: &mut TokioTimerHandle, delay: Duration) -> SchedulerResult<()> {
        if self.dispatch.is_closed() {
            return Err(SchedulerError::WorkerUnavailable(
                "dispatcher stopped".to_string(),
            ));
        }
        let armed = handle.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let expiry = Expiry {
            generation: handle.generation.clone(),
            armed,
            callback: handle.callback.clone(),
        };
        let dispatch = self.dispatch.clone();
        handle.sleeper = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = dispatch.send(expiry);
        }));
        Ok(())
    }
}

impl Scheduler for TokioScheduler {
    type Handle = TokioTimerHandle;

    fn register(
        &self,
        delay: Duration,
        callback: ScheduledCallback,
    ) -> SchedulerResult<TokioTimerHandle> {
        let live = self.live.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.limit {
            if live >= limit {
                self.live.fetch_sub(1, Ordering::SeqCst);
                warn!(limit, "Scheduler has no free registrations.");
                return Err(SchedulerError::Exhausted { limit });
            }
        }

        let mut handle = TokioTimerHandle {
            callback,
            generation: Arc::new(AtomicU64::new(0)),
            sleeper: None,
        };
        if let Err(e) = self.arm(&mut handle, delay) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }
        Ok(handle)
    }

    fn reschedule(&self, handle: &mut TokioTimerHandle, delay: Duration) -> SchedulerResult<()> {
        self.cancel(handle);
        self.arm(handle, delay)
    }

    fn cancel(&self, handle: &mut TokioTimerHandle) {
        handle.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(sleeper) = handle.sleeper.take() {
            sleeper.abort();
        }
    }

    fn release(&self, mut handle: TokioTimerHandle) {
        self.cancel(&mut handle);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
