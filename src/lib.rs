//! # ota-os
//!
//! Platform layer for an over-the-air update agent: a bounded event mailbox
//! feeding the agent loop and a set of named one-shot timers whose expiries are
//! delivered back through the mailbox.
//!
//! ```text
//! ┌──────────┐  send   ┌─────────────┐ receive ┌────────────┐
//! │Producers │────────▶│EventMailbox │────────▶│ EventLoop  │
//! └──────────┘         └─────────────┘         └─────┬──────┘
//!                             ▲ send(…, 0)           │ start/stop/delete
//!                      ┌──────┴───────┐        ┌─────▼──────┐
//!                      │  Scheduler   │◀───────│TimerService│
//!                      └──────────────┘        └────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod mailbox;
pub mod os;
pub mod scheduler;
pub mod timer;

// Re-exports
pub use agent::{Control, EventHandler, EventLoop, LoopStats};
pub use config::{ConfigError, OsConfig};
pub use error::*;
pub use event::{BufferIndex, OtaEvent, OtaEventMsg};
pub use mailbox::{EventMailbox, MailboxError};
pub use os::OtaOs;
pub use scheduler::{Scheduler, SchedulerError, TokioScheduler};
pub use timer::{TimerCallback, TimerError, TimerId, TimerService};
