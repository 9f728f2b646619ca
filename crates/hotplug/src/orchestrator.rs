//! Resolve, link, attach, report
//!
//! Every path through [`Orchestrator::run`] ends with the report channel
//! being closed, including a panic in the attach sequence.

use crate::attach::{AttachExecutor, AttachOutcome};
use crate::device::{BindLinker, DeviceEvent, LinkStatus, PathResolver, ResolvedPath};
use crate::report::{DEFAULT_LINGER, DrainOutcome, ReportChannel};
use protocol::{Level, ReportEvent};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info};

/// Process exit status of the helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperExit {
    /// Device attached, or nothing to attach
    Success,
    /// Bind link or attach command failed
    OperationalFailure,
    /// Bad input, setup failure or an unexpected error
    Fatal,
}

impl HelperExit {
    pub fn code(self) -> u8 {
        match self {
            HelperExit::Success => 0,
            HelperExit::OperationalFailure => 2,
            HelperExit::Fatal => 3,
        }
    }
}

impl From<HelperExit> for ExitCode {
    fn from(exit: HelperExit) -> Self {
        ExitCode::from(exit.code())
    }
}

/// `udev_trigger-<container>-HH:MM:SS`, shared by every event of one run
pub fn correlation_tag(container: &str, unix_secs: u64) -> String {
    format!(
        "udev_trigger-{}-{}",
        container,
        protocol::time::clock_time(unix_secs)
    )
}

pub struct Orchestrator<'a> {
    event: DeviceEvent,
    resolver: PathResolver,
    linker: BindLinker,
    executor: AttachExecutor,
    channel: &'a mut ReportChannel,
    correlation_id: String,
    linger: Duration,
}

impl<'a> Orchestrator<'a> {
    /// `channel` must already be open; events emitted on an unopened
    /// channel are only logged locally
    pub fn new(
        event: DeviceEvent,
        resolver: PathResolver,
        executor: AttachExecutor,
        channel: &'a mut ReportChannel,
    ) -> Self {
        let correlation_id = correlation_tag(&event.container_name, protocol::time::unix_now());
        Self {
            event,
            resolver,
            linker: BindLinker::new(),
            executor,
            channel,
            correlation_id,
            linger: DEFAULT_LINGER,
        }
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Handle the event and close the channel; returns the exit status
    pub fn run(mut self) -> HelperExit {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.attach_device()));

        let exit = match result {
            Ok(exit) => exit,
            Err(payload) => {
                self.report(
                    Level::Error,
                    format!("unexpected error: {}", panic_message(payload.as_ref())),
                );
                HelperExit::Fatal
            }
        };

        match self.channel.close(self.linger) {
            DrainOutcome::Flushed | DrainOutcome::LocalOnly => {}
            outcome => debug!("Report drain ended with {:?}", outcome),
        }

        exit
    }

    fn attach_device(&self) -> HelperExit {
        let container = self.event.container_name.as_str();

        let resolved = match self.resolver.resolve(&self.event.device_node) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.report(Level::Error, e.to_string());
                return HelperExit::Fatal;
            }
        };

        if resolved.requires_bind() {
            match self.linker.ensure_bind_link(&resolved) {
                Ok(status) => self.report(
                    Level::Debug,
                    format!(
                        "bind link {} -> {} {}",
                        resolved.bind_target.display(),
                        resolved.host_path.display(),
                        match status {
                            LinkStatus::Created => "created",
                            LinkStatus::AlreadyPresent => "already present",
                            LinkStatus::NotRequired => "not required",
                        }
                    ),
                ),
                Err(e) => {
                    self.report(Level::Error, format!("failed to create bind link: {}", e));
                    self.report(
                        Level::Error,
                        format!("Tried: {}", self.linker.describe(&resolved)),
                    );
                    return HelperExit::OperationalFailure;
                }
            }
        }

        if !resolved.host_path.exists() {
            return self.device_absent(&resolved);
        }

        match self.executor.attach(container, &resolved.host_path) {
            AttachOutcome::Success { output } => {
                if !output.trim().is_empty() {
                    self.report(Level::Debug, output);
                }
                self.report(
                    Level::Info,
                    format!("device {} added", resolved.host_path.display()),
                );
                HelperExit::Success
            }
            AttachOutcome::DeviceAbsent => self.device_absent(&resolved),
            AttachOutcome::CommandFailed { exit, output } => {
                self.report(
                    Level::Error,
                    format!(
                        "failed to add device {} ({}): {}",
                        resolved.host_path.display(),
                        exit,
                        output
                    ),
                );
                self.report(
                    Level::Error,
                    format!(
                        "Tried: {}",
                        self.executor.describe(container, &resolved.host_path)
                    ),
                );
                HelperExit::OperationalFailure
            }
            AttachOutcome::UnexpectedError(detail) => {
                self.report(
                    Level::Error,
                    format!(
                        "unexpected error adding device {}: {}",
                        resolved.host_path.display(),
                        detail
                    ),
                );
                HelperExit::Fatal
            }
        }
    }

    fn device_absent(&self, resolved: &ResolvedPath) -> HelperExit {
        self.report(
            Level::Debug,
            format!(
                "device {} not present, nothing to add",
                resolved.host_path.display()
            ),
        );
        HelperExit::Success
    }

    /// Log locally and send to the collector
    fn report(&self, level: Level, message: impl Into<String>) {
        let event = ReportEvent::new(level, message, &self.correlation_id);
        match level {
            Level::Debug => debug!("{}", event),
            Level::Info => info!("{}", event),
            Level::Error => error!("{}", event),
        }

        if let Err(e) = self.channel.emit(event) {
            debug!("Event not queued for the collector: {}", e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
