//! One-shot status channel to the job-log collector
//!
//! The channel owns a single-worker Tokio runtime. `emit` mirrors the event
//! to syslog and pushes it onto an unbounded queue; a delivery task connects,
//! sends `Hello`, streams the queue and shuts the connection down once the
//! queue is closed. `close` waits for that task for at most the linger.

use super::transport::{Connector, Endpoint, TcpConnector};
use crate::PROGRAM_NAME;
use crate::error::ReportError;
use async_channel::{Receiver, Sender};
use common::SyslogMirror;
use protocol::{Message, ReportEvent, encode_framed, write_framed_async};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Drain bound used when the channel is closed implicitly
pub const DEFAULT_LINGER: Duration = Duration::from_millis(10_000);

/// Runtime teardown allowance after the linger has elapsed
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Where and how to deliver reports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    /// `tcp://<host>:<port>`; `None` reports locally only
    pub endpoint_url: Option<String>,
    /// Trust root for the collector certificate
    pub server_cert: Option<PathBuf>,
    /// PEM certificate chain followed by the private key
    pub client_cert: Option<PathBuf>,
    pub enable_ipv6: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unopened,
    Open,
    Draining,
    Closed,
}

/// What happened to queued events at close
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every queued event was written and the stream shut down
    Flushed,
    /// No collector configured
    LocalOnly,
    /// Linger expired; the delivery task was aborted
    TimedOut,
    Failed(String),
    /// The channel was never opened or is already closed
    NotOpen,
}

struct Delivery {
    runtime: Runtime,
    queue: Sender<Message>,
    worker: JoinHandle<Result<usize, ReportError>>,
    peer: String,
}

pub struct ReportChannel {
    job_id: String,
    mirror: SyslogMirror,
    state: ChannelState,
    delivery: Option<Delivery>,
}

impl ReportChannel {
    pub fn new(job_id: impl Into<String>, mirror: SyslogMirror) -> Self {
        Self {
            job_id: job_id.into(),
            mirror,
            state: ChannelState::Unopened,
            delivery: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn mirror(&self) -> &SyslogMirror {
        &self.mirror
    }

    pub fn is_remote(&self) -> bool {
        self.delivery.is_some()
    }

    /// Open the channel according to `config`
    ///
    /// On error the channel stays `Unopened`.
    pub fn open(&mut self, config: &ChannelConfig) -> Result<(), ReportError> {
        if self.state != ChannelState::Unopened {
            return Err(ReportError::AlreadyOpen);
        }

        let Some(url) = &config.endpoint_url else {
            debug!("No logging URL configured, reporting locally");
            self.state = ChannelState::Open;
            return Ok(());
        };

        let endpoint = Endpoint::parse(url)?;
        let connector = match (&config.server_cert, &config.client_cert) {
            (Some(server_cert), Some(client_cert)) => {
                for path in [server_cert, client_cert] {
                    if !path.is_file() {
                        return Err(ReportError::MissingCredentials(format!(
                            "{} not found",
                            path.display()
                        )));
                    }
                }
                TcpConnector::mutual_tls(endpoint, config.enable_ipv6, server_cert, client_cert)?
            }
            (Some(only), None) | (None, Some(only)) => {
                return Err(ReportError::MissingCredentials(format!(
                    "both server and client certificates are required, only {} was given",
                    only.display()
                )));
            }
            (None, None) => TcpConnector::plain(endpoint, config.enable_ipv6),
        };

        self.open_with(Arc::new(connector))
    }

    /// Open the channel over an arbitrary connector
    pub fn open_with(&mut self, connector: Arc<dyn Connector>) -> Result<(), ReportError> {
        if self.state != ChannelState::Unopened {
            return Err(ReportError::AlreadyOpen);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("report-delivery")
            .enable_all()
            .build()?;

        let peer = connector.describe();
        let (queue, receiver) = async_channel::unbounded();
        let worker = runtime.spawn(deliver(connector, self.job_id.clone(), receiver));

        debug!("Report channel opened to {}", peer);
        self.delivery = Some(Delivery {
            runtime,
            queue,
            worker,
            peer,
        });
        self.state = ChannelState::Open;
        Ok(())
    }

    /// Mirror `event` to syslog and queue it for delivery
    pub fn emit(&self, event: ReportEvent) -> Result<(), ReportError> {
        if self.state != ChannelState::Open {
            return Err(ReportError::NotOpen);
        }

        self.mirror.log(event.level, &event.message);

        match &self.delivery {
            Some(delivery) => delivery
                .queue
                .try_send(Message::event(&self.job_id, event))
                .map_err(|_| ReportError::QueueClosed),
            None => {
                match serde_json::to_string(&event) {
                    Ok(line) => eprintln!("{}", line),
                    Err(e) => debug!("Could not encode event: {}", e),
                }
                Ok(())
            }
        }
    }

    /// Flush queued events for at most `linger`, then release the transport
    ///
    /// Closing twice is a no-op returning [`DrainOutcome::NotOpen`].
    pub fn close(&mut self, linger: Duration) -> DrainOutcome {
        if self.state != ChannelState::Open {
            debug!("Report channel close ignored in state {:?}", self.state);
            return DrainOutcome::NotOpen;
        }

        self.state = ChannelState::Draining;
        let outcome = match self.delivery.take() {
            None => DrainOutcome::LocalOnly,
            Some(delivery) => drain(&self.job_id, delivery, linger),
        };
        self.state = ChannelState::Closed;
        outcome
    }
}

impl Drop for ReportChannel {
    fn drop(&mut self) {
        if self.state == ChannelState::Open {
            warn!("Report channel dropped while open, draining");
            self.close(DEFAULT_LINGER);
        }
    }
}

fn drain(job_id: &str, delivery: Delivery, linger: Duration) -> DrainOutcome {
    let Delivery {
        runtime,
        queue,
        mut worker,
        peer,
    } = delivery;

    if queue.try_send(Message::end(job_id)).is_err() {
        debug!("Delivery task already stopped");
    }
    queue.close();
    drop(queue);

    let result = runtime.block_on(async { tokio::time::timeout(linger, &mut worker).await });

    let outcome = match result {
        Ok(Ok(Ok(delivered))) => {
            info!("Delivered {} event(s) to {}", delivered, peer);
            DrainOutcome::Flushed
        }
        Ok(Ok(Err(e))) => {
            warn!("Report delivery to {} failed: {}", peer, e);
            DrainOutcome::Failed(e.to_string())
        }
        Ok(Err(e)) => {
            warn!("Report delivery task ended abnormally: {}", e);
            DrainOutcome::Failed(e.to_string())
        }
        Err(_) => {
            warn!(
                "Report delivery to {} did not finish within {} ms",
                peer,
                linger.as_millis()
            );
            worker.abort();
            DrainOutcome::TimedOut
        }
    };

    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    outcome
}

/// Connect, greet, then write queued messages until the queue closes
async fn deliver(
    connector: Arc<dyn Connector>,
    job_id: String,
    queue: Receiver<Message>,
) -> Result<usize, ReportError> {
    let mut stream = connector.connect().await?;

    let hello = encode_framed(&Message::hello(&job_id, PROGRAM_NAME))?;
    write_framed_async(&mut stream, &hello).await?;

    let mut delivered = 0;
    while let Ok(message) = queue.recv().await {
        let frame = match encode_framed(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unencodable report message: {}", e);
                continue;
            }
        };
        write_framed_async(&mut stream, &frame).await?;
        if message.as_event().is_some() {
            delivered += 1;
        }
    }

    stream.flush().await?;
    stream.shutdown().await?;
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> ReportChannel {
        ReportChannel::new("job-1", SyslogMirror::disabled("job-1"))
    }

    #[test]
    fn test_emit_before_open() {
        let ch = channel();
        let result = ch.emit(ReportEvent::info("x", "tag"));
        assert!(matches!(result, Err(ReportError::NotOpen)));
    }

    #[test]
    fn test_local_lifecycle() {
        let mut ch = channel();
        ch.open(&ChannelConfig::default()).unwrap();
        assert_eq!(ch.state(), ChannelState::Open);
        assert!(!ch.is_remote());

        ch.emit(ReportEvent::debug("local only", "tag")).unwrap();
        assert_eq!(ch.close(Duration::from_millis(10)), DrainOutcome::LocalOnly);
        assert_eq!(ch.state(), ChannelState::Closed);

        assert!(matches!(
            ch.emit(ReportEvent::info("late", "tag")),
            Err(ReportError::NotOpen)
        ));
        assert_eq!(ch.close(Duration::from_millis(10)), DrainOutcome::NotOpen);
    }

    #[test]
    fn test_open_twice() {
        let mut ch = channel();
        ch.open(&ChannelConfig::default()).unwrap();
        assert!(matches!(
            ch.open(&ChannelConfig::default()),
            Err(ReportError::AlreadyOpen)
        ));
    }

    #[test]
    fn test_close_unopened() {
        let mut ch = channel();
        assert_eq!(ch.close(Duration::from_millis(10)), DrainOutcome::NotOpen);
        assert_eq!(ch.state(), ChannelState::Unopened);
    }

    #[test]
    fn test_invalid_url_keeps_channel_unopened() {
        let mut ch = channel();
        let config = ChannelConfig {
            endpoint_url: Some("http://collector".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            ch.open(&config),
            Err(ReportError::InvalidEndpoint { .. })
        ));
        assert_eq!(ch.state(), ChannelState::Unopened);
    }
}
