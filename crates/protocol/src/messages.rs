//! Protocol message definitions
//!
//! A report stream is one `Hello`, any number of `Event`s, then `End`.
//! A stream that stops before `End` was cut short (linger expired or the
//! helper crashed).

use crate::event::ReportEvent;
use crate::version::{CURRENT_VERSION, ProtocolVersion};
use serde::{Deserialize, Serialize};

/// Top-level message envelope
///
/// Every frame carries the protocol version and the job id so a collector
/// multiplexing several helpers can route frames without connection state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version of this message
    pub version: ProtocolVersion,
    /// Job the helper was started for
    pub job_id: String,
    /// Message payload
    pub payload: MessagePayload,
}

/// All message types in the protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    /// First frame on a fresh connection
    Hello {
        /// Name of the sending program
        agent: String,
    },

    /// A status event
    Event(ReportEvent),

    /// Sender is done; no more frames follow
    End,
}

impl Message {
    pub fn new(job_id: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            version: CURRENT_VERSION,
            job_id: job_id.into(),
            payload,
        }
    }

    pub fn hello(job_id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self::new(
            job_id,
            MessagePayload::Hello {
                agent: agent.into(),
            },
        )
    }

    pub fn event(job_id: impl Into<String>, event: ReportEvent) -> Self {
        Self::new(job_id, MessagePayload::Event(event))
    }

    pub fn end(job_id: impl Into<String>) -> Self {
        Self::new(job_id, MessagePayload::End)
    }

    /// The event carried by this message, if any
    pub fn as_event(&self) -> Option<&ReportEvent> {
        match &self.payload {
            MessagePayload::Event(event) => Some(event),
            _ => None,
        }
    }
}
