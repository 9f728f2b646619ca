//! Common utilities for lxc-hotplug
//!
//! This crate provides functionality shared by the helper binary and its
//! tests: error handling, tracing setup, the local syslog mirror, and test
//! fixtures for the report protocol.

pub mod error;
pub mod logging;
pub mod syslog;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use syslog::{DEFAULT_SYSLOG_SOCKET, SyslogMirror};
