//! Best-effort local syslog mirror
//!
//! Every status line the helper reports is also written to the local syslog
//! socket so an operator on the host can follow hotplug activity without the
//! remote collector. The mirror is a duplicate for local debugging only:
//! failures to reach syslog are swallowed after a debug log.
//!
//! Datagrams use RFC 3164 framing with facility `user`:
//!
//! ```text
//! <PRI>ident[pid]: [job_id] message
//! ```

use protocol::Level;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Standard syslog socket on Linux
pub const DEFAULT_SYSLOG_SOCKET: &str = "/dev/log";

/// Syslog facility `user` (1), shifted into the PRI field
const FACILITY_USER: u8 = 1 << 3;

/// Echoes status lines to the local syslog daemon, tagged with the job id
#[derive(Debug)]
pub struct SyslogMirror {
    socket: Option<UnixDatagram>,
    path: PathBuf,
    ident: String,
    job_id: String,
}

impl SyslogMirror {
    /// Create a mirror writing to the syslog socket at `path`
    ///
    /// Never fails: if no socket can be created the mirror stays silent.
    pub fn new(path: impl AsRef<Path>, ident: impl Into<String>, job_id: impl Into<String>) -> Self {
        let socket = match UnixDatagram::unbound() {
            Ok(socket) => Some(socket),
            Err(e) => {
                debug!("Syslog mirror unavailable: {}", e);
                None
            }
        };

        Self {
            socket,
            path: path.as_ref().to_path_buf(),
            ident: ident.into(),
            job_id: job_id.into(),
        }
    }

    /// A mirror that drops everything, for runs with syslog disabled
    pub fn disabled(job_id: impl Into<String>) -> Self {
        Self {
            socket: None,
            path: PathBuf::new(),
            ident: String::new(),
            job_id: job_id.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.socket.is_some()
    }

    /// Send one line, prefixed with `[job_id]`
    pub fn log(&self, level: Level, message: &str) {
        let Some(socket) = &self.socket else {
            return;
        };

        let datagram = self.format(level, message);
        if let Err(e) = socket.send_to(datagram.as_bytes(), &self.path) {
            debug!("Syslog mirror write to {} failed: {}", self.path.display(), e);
        }
    }

    fn format(&self, level: Level, message: &str) -> String {
        format!(
            "<{}>{}[{}]: [{}] {}",
            FACILITY_USER | severity(level),
            self.ident,
            std::process::id(),
            self.job_id,
            message
        )
    }
}

/// RFC 5424 severity for a report level
fn severity(level: Level) -> u8 {
    match level {
        Level::Error => 3,
        Level::Info => 6,
        Level::Debug => 7,
    }
}
