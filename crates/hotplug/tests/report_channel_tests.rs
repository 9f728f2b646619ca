//! Report channel delivery tests
//!
//! The channel owns its own runtime, so these are plain `#[test]`s.
//!
//! Run with: `cargo test -p hotplug --test report_channel_tests`

use common::SyslogMirror;
use common::test_utils::{MockCollector, SyslogCapture, ended_cleanly, events_of};
use hotplug::report::{
    ChannelConfig, ChannelState, ConnectFuture, Connector, DrainOutcome, ReportChannel,
    ReportStream,
};
use hotplug::{PROGRAM_NAME, ReportError};
use protocol::{Level, MAX_FRAME_SIZE, MessagePayload, ReportEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TAG: &str = "udev_trigger-c1-12:00:00";

fn channel(job_id: &str) -> ReportChannel {
    ReportChannel::new(job_id, SyslogMirror::disabled(job_id))
}

fn remote(url: String) -> ChannelConfig {
    ChannelConfig {
        endpoint_url: Some(url),
        ..Default::default()
    }
}

/// Never finishes connecting
struct StalledConnector;

impl Connector for StalledConnector {
    fn connect(&self) -> ConnectFuture<'_> {
        Box::pin(std::future::pending::<Result<ReportStream, ReportError>>())
    }

    fn describe(&self) -> String {
        "stalled".to_string()
    }
}

/// Fails immediately
struct RefusingConnector;

impl Connector for RefusingConnector {
    fn connect(&self) -> ConnectFuture<'_> {
        Box::pin(async {
            Err::<ReportStream, _>(ReportError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )))
        })
    }

    fn describe(&self) -> String {
        "refusing".to_string()
    }
}

// ============================================================================
// Delivery
// ============================================================================

#[test]
fn test_events_delivered_in_order_between_hello_and_end() {
    let collector = MockCollector::start().unwrap();
    let mut ch = channel("job-42");
    ch.open(&remote(collector.url())).unwrap();
    assert!(ch.is_remote());

    ch.emit(ReportEvent::debug("bind link created", TAG)).unwrap();
    ch.emit(ReportEvent::info("device /dev/bus/usb/001/002 added", TAG))
        .unwrap();

    assert_eq!(ch.close(Duration::from_secs(5)), DrainOutcome::Flushed);
    assert_eq!(ch.state(), ChannelState::Closed);

    let messages = collector.finish();
    assert_eq!(messages.len(), 4);
    assert_eq!(
        messages[0].payload,
        MessagePayload::Hello {
            agent: PROGRAM_NAME.to_string()
        }
    );
    assert!(messages.iter().all(|m| m.job_id == "job-42"));
    assert!(ended_cleanly(&messages));

    let events = events_of(&messages);
    assert_eq!(events[0].level, Level::Debug);
    assert_eq!(events[1].message, "device /dev/bus/usb/001/002 added");
    assert!(events.iter().all(|e| e.correlation_id == TAG));
}

#[test]
fn test_unencodable_event_skipped_not_fatal() {
    let collector = MockCollector::start().unwrap();
    let mut ch = channel("job-43");
    ch.open(&remote(collector.url())).unwrap();

    let huge = ReportEvent {
        message: "x".repeat(MAX_FRAME_SIZE + 1),
        ..ReportEvent::error("placeholder", TAG)
    };
    ch.emit(huge).unwrap();
    ch.emit(ReportEvent::error("Tried: lxc-device -n c1 add /dev/ttyUSB0", TAG))
        .unwrap();

    assert_eq!(ch.close(Duration::from_secs(5)), DrainOutcome::Flushed);

    let messages = collector.finish();
    assert!(ended_cleanly(&messages));
    let events = events_of(&messages);
    assert_eq!(events.len(), 1);
    assert!(events[0].message.starts_with("Tried: "));
}

#[test]
fn test_drop_while_open_still_delivers() {
    let collector = MockCollector::start().unwrap();
    {
        let mut ch = channel("job-1");
        ch.open(&remote(collector.url())).unwrap();
        ch.emit(ReportEvent::error("unexpected error: boom", TAG))
            .unwrap();
    }

    let messages = collector.finish();
    assert!(ended_cleanly(&messages));
    assert_eq!(events_of(&messages).len(), 1);
}

#[test]
fn test_emit_mirrors_to_syslog() {
    let dir = tempfile::tempdir().unwrap();
    let capture = SyslogCapture::bind(dir.path().join("log")).unwrap();
    let mirror = SyslogMirror::new(capture.path(), PROGRAM_NAME, "job-3");

    let mut ch = ReportChannel::new("job-3", mirror);
    ch.open(&ChannelConfig::default()).unwrap();
    ch.emit(ReportEvent::info("device added", TAG)).unwrap();
    assert_eq!(ch.close(Duration::from_millis(100)), DrainOutcome::LocalOnly);

    let lines = capture.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("[job-3] device added"));
}

// ============================================================================
// Shutdown bounds
// ============================================================================

#[test]
fn test_close_bounded_by_linger_when_transport_stalls() {
    let mut ch = channel("job-1");
    ch.open_with(Arc::new(StalledConnector)).unwrap();
    ch.emit(ReportEvent::info("never delivered", TAG)).unwrap();

    let linger = Duration::from_millis(200);
    let started = Instant::now();
    let outcome = ch.close(linger);
    let elapsed = started.elapsed();

    assert_eq!(outcome, DrainOutcome::TimedOut);
    assert!(elapsed >= linger);
    assert!(elapsed < linger + Duration::from_secs(1), "close took {elapsed:?}");
}

#[test]
fn test_connect_failure_reported_at_close() {
    let mut ch = channel("job-1");
    ch.open_with(Arc::new(RefusingConnector)).unwrap();

    // Queue may already be gone; either way emit must not block or panic
    let _ = ch.emit(ReportEvent::info("lost", TAG));

    match ch.close(Duration::from_secs(2)) {
        DrainOutcome::Failed(reason) => assert!(reason.contains("IO error")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_second_close_is_noop() {
    let collector = MockCollector::start().unwrap();
    let mut ch = channel("job-1");
    ch.open(&remote(collector.url())).unwrap();

    assert_eq!(ch.close(Duration::from_secs(5)), DrainOutcome::Flushed);
    assert_eq!(ch.close(Duration::from_secs(5)), DrainOutcome::NotOpen);

    let messages = collector.finish();
    assert_eq!(messages.len(), 2);
    assert!(ended_cleanly(&messages));
}

// ============================================================================
// Credentials
// ============================================================================

#[test]
fn test_missing_certificate_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut ch = channel("job-1");
    let config = ChannelConfig {
        endpoint_url: Some("tcp://127.0.0.1:5555".to_string()),
        server_cert: Some(dir.path().join("collector.crt")),
        client_cert: Some(dir.path().join("helper.pem")),
        enable_ipv6: false,
    };

    let result = ch.open(&config);
    assert!(matches!(result, Err(ReportError::MissingCredentials(_))));
    assert_eq!(ch.state(), ChannelState::Unopened);
    assert!(matches!(
        ch.emit(ReportEvent::info("x", TAG)),
        Err(ReportError::NotOpen)
    ));
}

#[test]
fn test_single_certificate_is_not_downgraded() {
    let dir = tempfile::tempdir().unwrap();
    let server_cert = dir.path().join("collector.crt");
    std::fs::write(&server_cert, "placeholder").unwrap();

    let mut ch = channel("job-1");
    let config = ChannelConfig {
        endpoint_url: Some("tcp://127.0.0.1:5555".to_string()),
        server_cert: Some(server_cert),
        client_cert: None,
        enable_ipv6: false,
    };

    assert!(matches!(
        ch.open(&config),
        Err(ReportError::MissingCredentials(_))
    ));
    assert_eq!(ch.state(), ChannelState::Unopened);
}
