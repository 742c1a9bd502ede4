//! Event messages exchanged between producers and the agent loop.
//!
//! Messages are plain `Copy` values of fixed size. Payload buffers stay owned
//! by the agent and are referenced by index, so a message in flight never owns
//! heap memory.

use serde::{Deserialize, Serialize};

/// Events understood by the update agent's state machine.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum OtaEvent {
    Start,
    StartSelfTest,
    RequestJobDocument,
    ReceivedJobDocument,
    CreateFile,
    RequestFileBlock,
    ReceivedFileBlock,
    RequestTimer,
    CloseFile,
    Suspend,
    Resume,
    UserAbort,
    Shutdown,
}

/// Index of an agent-owned payload buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferIndex(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaEventMsg {
    pub event_id: OtaEvent,
    /// Buffer holding a received file block.
    pub data_event: Option<BufferIndex>,
    /// Buffer holding a received job document.
    pub job_event: Option<BufferIndex>,
}

impl OtaEventMsg {
    pub fn new(event_id: OtaEvent) -> Self {
        Self {
            event_id,
            data_event: None,
            job_event: None,
        }
    }

    pub fn with_data(mut self, buffer: BufferIndex) -> Self {
        self.data_event = Some(buffer);
        self
    }

    pub fn with_job(mut self, buffer: BufferIndex) -> Self {
        self.job_event = Some(buffer);
        self
    }
}

impl From<OtaEvent> for OtaEventMsg {
    fn from(event_id: OtaEvent) -> Self {
        Self::new(event_id)
    }
}
