//! Mutual TLS delivery against a loopback collector
//!
//! Certificates live in `tests/fixtures/tls`: `ca.pem` signs the collector
//! (`server.pem`, valid for 127.0.0.1) and the helper (`client.pem`, chain
//! followed by key). `rogue-ca.pem` signed `rogue-client.pem` and nothing
//! else.
//!
//! Run with: `cargo test -p hotplug --test tls_tests`

use common::SyslogMirror;
use common::test_utils::{DEFAULT_TEST_TIMEOUT, ended_cleanly, events_of};
use hotplug::PROGRAM_NAME;
use hotplug::report::{ChannelConfig, DrainOutcome, ReportChannel};
use protocol::{Message, MessagePayload, ReportEvent, decode_framed, read_framed_async};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

const TAG: &str = "udev_trigger-c1-12:00:00";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/tls")
        .join(name)
}

fn load_certs(name: &str) -> Vec<CertificateDer<'static>> {
    let mut reader = BufReader::new(File::open(fixture(name)).unwrap());
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn load_key(name: &str) -> PrivateKeyDer<'static> {
    let mut reader = BufReader::new(File::open(fixture(name)).unwrap());
    rustls_pemfile::private_key(&mut reader).unwrap().unwrap()
}

/// Collector config that requires a client certificate signed by `ca.pem`
///
/// Pinned to TLS 1.2 so a rejected client certificate fails the client's
/// handshake rather than its first write.
fn collector_config() -> Arc<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    for cert in load_certs("ca.pem") {
        roots.add(cert).unwrap();
    }
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .unwrap();

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12])
        .unwrap()
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs("server.pem"), load_key("server.key"))
        .unwrap();
    Arc::new(config)
}

/// One-connection collector terminating mutual TLS
///
/// Yields every frame read until EOF, or the handshake error.
struct TlsCollector {
    addr: SocketAddr,
    handle: JoinHandle<Result<Vec<Message>, String>>,
}

impl TlsCollector {
    fn start() -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = TlsAcceptor::from(collector_config());

        let handle = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| e.to_string())?;

            runtime.block_on(async move {
                let listener = TcpListener::from_std(listener).map_err(|e| e.to_string())?;
                let (tcp, _) = timeout(DEFAULT_TEST_TIMEOUT, listener.accept())
                    .await
                    .map_err(|_| "no connection".to_string())?
                    .map_err(|e| e.to_string())?;

                let mut stream = acceptor.accept(tcp).await.map_err(|e| e.to_string())?;

                let mut received = Vec::new();
                while let Ok(Ok(frame)) =
                    timeout(DEFAULT_TEST_TIMEOUT, read_framed_async(&mut stream)).await
                {
                    received.push(decode_framed(&frame).map_err(|e| e.to_string())?);
                }
                Ok(received)
            })
        });

        Self { addr, handle }
    }

    fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    fn finish(self) -> Result<Vec<Message>, String> {
        self.handle.join().unwrap()
    }
}

fn tls_config(url: String, client_cert: &str) -> ChannelConfig {
    ChannelConfig {
        endpoint_url: Some(url),
        server_cert: Some(fixture("ca.pem")),
        client_cert: Some(fixture(client_cert)),
        enable_ipv6: false,
    }
}

fn channel() -> ReportChannel {
    ReportChannel::new("job-77", SyslogMirror::disabled("job-77"))
}

#[test]
fn test_events_delivered_over_mutual_tls() {
    let collector = TlsCollector::start();
    let mut ch = channel();
    ch.open(&tls_config(collector.url(), "client.pem")).unwrap();
    assert!(ch.is_remote());

    ch.emit(ReportEvent::debug("bind link created", TAG)).unwrap();
    ch.emit(ReportEvent::info("device /dev/bus/usb/001/002 added", TAG))
        .unwrap();

    assert_eq!(ch.close(Duration::from_secs(5)), DrainOutcome::Flushed);

    let messages = collector.finish().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(
        messages[0].payload,
        MessagePayload::Hello {
            agent: PROGRAM_NAME.to_string()
        }
    );
    assert!(messages.iter().all(|m| m.job_id == "job-77"));
    assert!(ended_cleanly(&messages));

    let events = events_of(&messages);
    assert_eq!(events[0].message, "bind link created");
    assert_eq!(events[1].message, "device /dev/bus/usb/001/002 added");
}

#[test]
fn test_untrusted_client_certificate_fails_delivery() {
    let collector = TlsCollector::start();
    let mut ch = channel();
    ch.open(&tls_config(collector.url(), "rogue-client.pem")).unwrap();

    ch.emit(ReportEvent::error("never seen by the collector", TAG))
        .unwrap();

    let outcome = ch.close(Duration::from_secs(5));
    assert!(
        matches!(&outcome, DrainOutcome::Failed(reason) if reason.contains("handshake")),
        "unexpected outcome {outcome:?}"
    );
    assert!(collector.finish().is_err());
}

#[test]
fn test_collector_not_signed_by_trust_root_fails_delivery() {
    let collector = TlsCollector::start();
    let mut ch = channel();
    ch.open(&ChannelConfig {
        server_cert: Some(fixture("rogue-ca.pem")),
        ..tls_config(collector.url(), "client.pem")
    })
    .unwrap();

    let outcome = ch.close(Duration::from_secs(5));
    assert!(matches!(outcome, DrainOutcome::Failed(_)));
    assert!(collector.finish().is_err());
}
