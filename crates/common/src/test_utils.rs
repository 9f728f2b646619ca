//! Test utilities for lxc-hotplug
//!
//! Provides a mock report collector and a syslog capture socket for use
//! across crates.
//!
//! # Example
//!
//! ```no_run
//! use common::test_utils::MockCollector;
//!
//! let collector = MockCollector::start().unwrap();
//! println!("point the helper at {}", collector.url());
//! let messages = collector.finish();
//! ```

use protocol::{Message, MessagePayload, ReportEvent, read_framed};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A one-connection report collector listening on loopback
///
/// Accepts the first connection within [`DEFAULT_TEST_TIMEOUT`] and records
/// every frame until the peer closes the stream.
pub struct MockCollector {
    addr: SocketAddr,
    handle: JoinHandle<Vec<Message>>,
}

impl MockCollector {
    pub fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let handle = thread::spawn(move || {
            let mut received = Vec::new();
            let deadline = Instant::now() + DEFAULT_TEST_TIMEOUT;

            let mut stream = loop {
                match listener.accept() {
                    Ok((stream, _)) => break stream,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        if Instant::now() >= deadline {
                            return received;
                        }
                        thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => return received,
                }
            };

            if stream.set_nonblocking(false).is_err()
                || stream.set_read_timeout(Some(DEFAULT_TEST_TIMEOUT)).is_err()
            {
                return received;
            }

            while let Ok(message) = read_framed(&mut stream) {
                received.push(message);
            }
            received
        });

        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Endpoint URL in the form the helper expects
    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Wait for the stream to end and return every message received
    pub fn finish(self) -> Vec<Message> {
        self.handle.join().unwrap_or_default()
    }
}

/// Events carried by a list of messages, in order
pub fn events_of(messages: &[Message]) -> Vec<ReportEvent> {
    messages.iter().filter_map(|m| m.as_event().cloned()).collect()
}

/// Whether the stream was terminated with an `End` frame
pub fn ended_cleanly(messages: &[Message]) -> bool {
    matches!(messages.last(), Some(m) if m.payload == MessagePayload::End)
}

/// A bound datagram socket standing in for `/dev/log`
pub struct SyslogCapture {
    socket: UnixDatagram,
    path: PathBuf,
}

impl SyslogCapture {
    pub fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let socket = UnixDatagram::bind(&path)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drain every datagram received so far
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        while let Ok(n) = self.socket.recv(&mut buf) {
            lines.push(String::from_utf8_lossy(&buf[..n]).into_owned());
        }
        lines
    }
}
