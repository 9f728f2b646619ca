//! Report protocol for lxc-hotplug
//!
//! This crate defines the structured status events the hotplug helper sends
//! to a remote job-log collector, the message envelope they travel in, and
//! the length-prefixed postcard framing used on the wire.
//!
//! # Example
//!
//! ```
//! use protocol::{Level, Message, ReportEvent};
//! use protocol::{decode_framed, encode_framed};
//!
//! let event = ReportEvent::new(Level::Info, "device /dev/bus/usb/001/002 added", "udev_trigger-lxc-12:00:00");
//! let msg = Message::event("job-42", event);
//!
//! let framed = encode_framed(&msg).unwrap();
//! let decoded = decode_framed(&framed).unwrap();
//! assert_eq!(decoded.job_id, "job-42");
//! ```

pub mod codec;
pub mod error;
pub mod event;
pub mod messages;
pub mod time;
pub mod version;

pub use codec::{
    MAX_FRAME_SIZE, decode_framed, decode_message, encode_framed, encode_message, read_framed,
    write_framed,
};

#[cfg(feature = "async")]
pub use codec::{read_framed_async, write_framed_async};
pub use error::{ProtocolError, Result};
pub use event::{Level, MAX_MESSAGE_LEN, ReportEvent};
pub use messages::{Message, MessagePayload};
pub use version::{CURRENT_VERSION, ProtocolVersion};
