//! Container device hotplug helper
//!
//! Attaches one host device node to a running LXC container and reports the
//! outcome to a remote job-log collector before exiting:
//!
//! 1. [`device::PathResolver`] maps the node onto host and container paths
//! 2. [`device::BindLinker`] links USB nodes into the container's tree
//! 3. [`attach::AttachExecutor`] runs the runtime's attach command
//! 4. [`report::ReportChannel`] delivers status events with a bounded drain
//!
//! [`orchestrator::Orchestrator`] sequences the steps and picks the exit code.

pub mod attach;
pub mod config;
pub mod device;
pub mod error;
pub mod orchestrator;
pub mod report;

pub use attach::{AttachExecutor, AttachOutcome, ExitInfo};
pub use config::HelperConfig;
pub use device::{BindLinker, DeviceEvent, LinkStatus, PathResolver, ResolvedPath, UsbAddress};
pub use error::{BindError, ReportError, ResolveError};
pub use orchestrator::{HelperExit, Orchestrator, correlation_tag};
pub use report::{ChannelConfig, DrainOutcome, ReportChannel};

/// Name announced to the collector and used as the syslog tag
pub const PROGRAM_NAME: &str = "lxc-hotplug-attach";
