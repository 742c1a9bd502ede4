//! # OTA OS Context
//!
//! [`OtaOs`] bundles the event mailbox and the timer service the update agent
//! needs from its platform. It is created once at startup and shared by `Arc`
//! with every producer, the agent loop and the timer owners.
//!
//! ```rust,no_run
//! # use std::{sync::Arc, time::Duration};
//! # use ota_os::{OtaOs, OsConfig, OtaEvent, TimerId};
//! # fn example() -> ota_os::OsResult<()> {
//! let os = Arc::new(OtaOs::dedicated(OsConfig::default())?);
//!
//! // timer expiry becomes an ordinary event for the agent loop
//! let on_expiry = os.timer_event_callback(OtaEvent::RequestTimer);
//! os.timers()
//!     .start(TimerId::Request, "request", Duration::from_secs(5), on_expiry)?;
//!
//! let msg = os.receive_event()?;
//! assert_eq!(msg.event_id, OtaEvent::RequestTimer);
//! # Ok(())
//! # }
//! ```

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::{
    config::OsConfig,
    event::{OtaEvent, OtaEventMsg},
    mailbox::EventMailbox,
    scheduler::{Scheduler, TokioScheduler},
    timer::{TimerCallback, TimerService},
    OsResult,
};

pub struct OtaOs<S: Scheduler = TokioScheduler> {
    config: OsConfig,
    mailbox: EventMailbox<OtaEventMsg>,
    timers: TimerService<S>,
}

impl OtaOs<TokioScheduler> {
    /// Timers run on a dedicated worker thread named after
    /// [`OsConfig::timer_worker_name`].
    pub fn dedicated(config: OsConfig) -> OsResult<Self> {
        config.validate()?;
        let scheduler = TokioScheduler::dedicated(&config.timer_worker_name)?;
        Self::new(config, scheduler)
    }

    /// Timers run on an existing tokio runtime.
    pub fn with_runtime(config: OsConfig, runtime: Handle) -> OsResult<Self> {
        Self::new(config, TokioScheduler::new(runtime))
    }
}

impl<S: Scheduler> OtaOs<S> {
    /// Validates `config` and initializes the mailbox. An error here leaves the
    /// agent with nothing to run on, so callers treat it as fatal.
    pub fn new(config: OsConfig, scheduler: S) -> OsResult<Self> {
        config.validate()?;
        let mailbox = EventMailbox::new(config.mailbox_capacity);
        mailbox.init();
        info!(
            capacity = config.mailbox_capacity,
            "OTA OS context initialized."
        );
        Ok(Self {
            config,
            mailbox,
            timers: TimerService::new(scheduler),
        })
    }

    pub fn config(&self) -> &OsConfig {
        &self.config
    }

    pub fn mailbox(&self) -> &EventMailbox<OtaEventMsg> {
        &self.mailbox
    }

    pub fn timers(&self) -> &TimerService<S> {
        &self.timers
    }

    /// Sends with the configured send timeout.
    pub fn send_event(&self, msg: impl Into<OtaEventMsg>) -> OsResult<()> {
        Ok(self.mailbox.send(msg.into(), self.config.send_timeout)?)
    }

    /// Receives with the configured idle-poll timeout.
    pub fn receive_event(&self) -> OsResult<OtaEventMsg> {
        Ok(self.mailbox.receive(self.config.receive_timeout)?)
    }

    /// Builds the canonical timer callback: a non-blocking send of `event`.
    ///
    /// A full mailbox drops the event with a warning; the agent re-arms on its
    /// next tick. The callback holds the context weakly, so a timer never keeps
    /// the context alive.
    pub fn timer_event_callback(self: &Arc<Self>, event: OtaEvent) -> TimerCallback
    where
        S: 'static,
    {
        let os: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |id| {
            let Some(os) = os.upgrade() else {
                debug!(%id, "Timer fired after OTA OS context was dropped.");
                return;
            };
            if let Err(e) = os.mailbox.send(OtaEventMsg::new(event), Duration::ZERO) {
                warn!(%id, %event, error = %e, "Timer event dropped.");
            }
        })
    }

    /// Deletes every timer and destroys the mailbox.
    pub fn shutdown(&self) -> OsResult<()> {
        let released = self.timers.delete_all();
        self.mailbox.deinit()?;
        info!(released, "OTA OS context shut down.");
        Ok(())
    }
}
