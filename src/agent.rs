//! Consumer side of the mailbox: the agent's processing loop.
//!
//! [`EventLoop`] blocks on the mailbox for up to its poll timeout, hands each
//! message to an [`EventHandler`], and calls [`EventHandler::on_idle`] when a
//! poll comes back empty. What the agent does with an event is up to the
//! handler.

use std::time::Duration;

use tracing::{debug, trace};

use crate::{
    event::OtaEventMsg,
    mailbox::{EventMailbox, MailboxError},
    OsResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Exit,
}

#[mockall::automock]
pub trait EventHandler: Send {
    fn handle(&mut self, msg: OtaEventMsg) -> Control;

    /// Idle-time bookkeeping after a poll that timed out.
    fn on_idle(&mut self) -> Control {
        Control::Continue
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub dispatched: usize,
    pub idle_polls: usize,
}

pub struct EventLoop<'a> {
    mailbox: &'a EventMailbox<OtaEventMsg>,
    poll_timeout: Duration,
}

impl<'a> EventLoop<'a> {
    pub fn new(mailbox: &'a EventMailbox<OtaEventMsg>, poll_timeout: Duration) -> Self {
        Self {
            mailbox,
            poll_timeout,
        }
    }

    /// Runs until the handler returns [`Control::Exit`].
    ///
    /// Fails only if the mailbox is torn down underneath the loop.
    pub fn run<H: EventHandler + ?Sized>(&self, handler: &mut H) -> OsResult<LoopStats> {
        let mut stats = LoopStats::default();
        loop {
            let control = match self.mailbox.receive(self.poll_timeout) {
                Ok(msg) => {
                    trace!(event = %msg.event_id, "Dispatching OTA event.");
                    stats.dispatched += 1;
                    handler.handle(msg)
                }
                Err(MailboxError::ReceiveTimeout { .. }) => {
                    stats.idle_polls += 1;
                    handler.on_idle()
                }
                Err(e) => return Err(e.into()),
            };
            if control == Control::Exit {
                debug!(?stats, "Agent event loop exited.");
                return Ok(stats);
            }
        }
    }
}
