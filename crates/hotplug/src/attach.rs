//! Container device-attach primitive
//!
//! Runs `<program> [args...] -n <container> add <host_path>` once and
//! classifies the result. The program is `lxc-device` unless configured
//! otherwise.

use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use tracing::debug;

pub const DEFAULT_ATTACH_PROGRAM: &str = "lxc-device";

/// How the attach program terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit status {}", code),
            (None, Some(sig)) => match signal_name(sig) {
                Some(name) => write!(f, "killed by signal {} ({})", sig, name),
                None => write!(f, "killed by signal {}", sig),
            },
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

#[cfg(target_os = "linux")]
fn signal_name(sig: i32) -> Option<&'static str> {
    nix::sys::signal::Signal::try_from(sig)
        .ok()
        .map(|s| s.as_str())
}

#[cfg(not(target_os = "linux"))]
fn signal_name(_sig: i32) -> Option<&'static str> {
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    Success { output: String },
    /// The host node does not exist; nothing to attach
    DeviceAbsent,
    CommandFailed { exit: ExitInfo, output: String },
    /// The program could not be run at all
    UnexpectedError(String),
}

#[derive(Debug, Clone)]
pub struct AttachExecutor {
    program: String,
    args: Vec<String>,
}

impl Default for AttachExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_ATTACH_PROGRAM)
    }
}

impl AttachExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before `-n <container> add <path>`
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Attach `host_path` to `container`
    pub fn attach(&self, container: &str, host_path: &Path) -> AttachOutcome {
        match host_path.try_exists() {
            Ok(true) => {}
            Ok(false) => return AttachOutcome::DeviceAbsent,
            Err(e) => {
                return AttachOutcome::UnexpectedError(format!(
                    "cannot stat {}: {}",
                    host_path.display(),
                    e
                ));
            }
        }

        debug!("Running: {}", self.describe(container, host_path));

        let result = Command::new(&self.program)
            .args(&self.args)
            .arg("-n")
            .arg(container)
            .arg("add")
            .arg(host_path)
            .stdin(Stdio::null())
            .output();

        let output = match result {
            Ok(output) => output,
            Err(e) => return AttachOutcome::UnexpectedError(launch_error(&self.program, &e)),
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            AttachOutcome::Success { output: combined }
        } else {
            AttachOutcome::CommandFailed {
                exit: ExitInfo::from(output.status),
                output: combined,
            }
        }
    }

    /// The command line `attach` runs, for reports
    pub fn describe(&self, container: &str, host_path: &Path) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 5);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.push("-n".to_string());
        parts.push(container.to_string());
        parts.push("add".to_string());
        parts.push(host_path.display().to_string());
        parts.join(" ")
    }
}

fn launch_error(program: &str, e: &io::Error) -> String {
    match e.kind() {
        io::ErrorKind::NotFound => format!("{} not found", program),
        io::ErrorKind::PermissionDenied => format!("permission denied running {}", program),
        _ => format!("failed to run {}: {}", program, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> AttachExecutor {
        AttachExecutor::new("/bin/sh").with_args(["-c", script, "sh"])
    }

    #[test]
    fn test_describe() {
        let executor = AttachExecutor::default();
        assert_eq!(
            executor.describe("c1", Path::new("/dev/bus/usb/001/002")),
            "lxc-device -n c1 add /dev/bus/usb/001/002"
        );
    }

    #[test]
    fn test_absent_device() {
        let outcome = AttachExecutor::default().attach("c1", Path::new("/nonexistent/node"));
        assert_eq!(outcome, AttachOutcome::DeviceAbsent);
    }

    #[test]
    fn test_arguments_passed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("node");
        std::fs::write(&node, b"").unwrap();

        let outcome = sh("echo \"$1 $2 $3 $4\"").attach("c1", &node);
        assert_eq!(
            outcome,
            AttachOutcome::Success {
                output: format!("-n c1 add {}\n", node.display())
            }
        );
    }

    #[test]
    fn test_failure_captures_stdout_then_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("node");
        std::fs::write(&node, b"").unwrap();

        let outcome = sh("echo err >&2; echo out; exit 4").attach("c1", &node);
        match outcome {
            AttachOutcome::CommandFailed { exit, output } => {
                assert_eq!(exit.code, Some(4));
                assert_eq!(output, "out\nerr\n");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_killed_by_signal() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("node");
        std::fs::write(&node, b"").unwrap();

        let outcome = sh("kill -9 $$").attach("c1", &node);
        match outcome {
            AttachOutcome::CommandFailed { exit, .. } => {
                assert_eq!(exit.code, None);
                assert_eq!(exit.signal, Some(9));
                assert!(exit.to_string().starts_with("killed by signal 9"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("node");
        std::fs::write(&node, b"").unwrap();

        let outcome = AttachExecutor::new("/nonexistent/lxc-device").attach("c1", &node);
        assert!(matches!(outcome, AttachOutcome::UnexpectedError(ref d) if d.contains("not found")));
    }

    #[test]
    fn test_exit_info_display() {
        let info = ExitInfo {
            code: Some(1),
            signal: None,
        };
        assert_eq!(info.to_string(), "exit status 1");
    }
}
