use thiserror::Error;

use crate::config::ConfigError;
use crate::mailbox::MailboxError;
use crate::scheduler::SchedulerError;
use crate::timer::TimerError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),
    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type OsResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }

    /// Expected back-pressure or idle outcomes of the mailbox.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Mailbox(e) if e.is_timeout())
    }
}
