//! HTTP delivery of engagement snapshots.
//!
//! [`HttpTransport`] POSTs each payload to a collection endpoint. Inside a
//! tokio runtime the request is spawned and `send` returns immediately;
//! outside one it falls back to a blocking POST with a short timeout.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use eg_core::{Transport, TransportError};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use url::Url;

/// Default request timeout for snapshot delivery.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Transport construction errors.
#[derive(Debug, Error)]
pub enum HttpTransportError {
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    /// Only `http` and `https` endpoints are supported.
    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Outcome of waiting for spawned deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Outcomes of spawned deliveries not yet reported by a drain.
#[derive(Debug, Default)]
struct Outcomes {
    delivered: AtomicUsize,
    failed: AtomicUsize,
}

impl Outcomes {
    fn record(&self, delivered: bool) {
        let counter = if delivered {
            &self.delivered
        } else {
            &self.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn take(&self) -> DeliveryReport {
        DeliveryReport {
            delivered: self.delivered.swap(0, Ordering::Relaxed),
            failed: self.failed.swap(0, Ordering::Relaxed),
        }
    }
}

/// POSTs snapshots to a collection endpoint.
///
/// Handles of finished deliveries are pruned on every send, so a host that
/// never drains only holds the requests still in flight.
pub struct HttpTransport {
    endpoint: Url,
    timeout: Duration,
    client: reqwest::Client,
    blocking: OnceLock<reqwest::blocking::Client>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    outcomes: Arc<Outcomes>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout", &self.timeout)
            .field("in_flight", &self.pending())
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Creates a transport for `endpoint` with [`DEFAULT_TIMEOUT`].
    pub fn new(endpoint: &str) -> Result<Self, HttpTransportError> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, HttpTransportError> {
        let endpoint = Url::parse(endpoint)?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(HttpTransportError::UnsupportedScheme(
                endpoint.scheme().to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(HttpTransportError::ClientBuild)?;

        Ok(Self {
            endpoint,
            timeout,
            client,
            blocking: OnceLock::new(),
            in_flight: Mutex::new(Vec::new()),
            outcomes: Arc::new(Outcomes::default()),
        })
    }

    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Number of spawned deliveries whose handles are still held.
    pub fn pending(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits for every spawned delivery to finish and reports the outcomes
    /// recorded since the previous drain.
    ///
    /// Hosts that are about to exit call this so queued POSTs are not cut off.
    pub async fn drain(&self) -> DeliveryReport {
        let tasks = std::mem::take(
            &mut *self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let mut aborted = 0;
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(%err, "delivery task did not complete");
                aborted += 1;
            }
        }
        let mut report = self.outcomes.take();
        report.failed += aborted;
        report
    }

    fn spawn(&self, handle: &Handle, payload: String) {
        let request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(payload);

        let outcomes = Arc::clone(&self.outcomes);
        let task = handle.spawn(async move {
            let delivered = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(status = %response.status(), "snapshot delivered");
                    true
                }
                Ok(response) => {
                    tracing::warn!(status = %response.status(), "endpoint rejected snapshot");
                    false
                }
                Err(err) => {
                    tracing::warn!(%err, "snapshot POST failed");
                    false
                }
            };
            outcomes.record(delivered);
        });

        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        in_flight.retain(|task| !task.is_finished());
        in_flight.push(task);
    }

    fn send_blocking(&self, payload: &str) -> Result<(), TransportError> {
        let client = if let Some(client) = self.blocking.get() {
            client
        } else {
            let client = reqwest::blocking::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|err| {
                    TransportError::Unavailable(format!("failed to build HTTP client: {err}"))
                })?;
            self.blocking.get_or_init(|| client)
        };

        let response = client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(payload.to_owned())
            .send()
            .map_err(|err| TransportError::Failed(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Failed(format!(
                "endpoint returned status {status}"
            )));
        }
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn send(&self, payload: &str) -> Result<(), TransportError> {
        if let Ok(handle) = Handle::try_current() {
            self.spawn(&handle, payload.to_owned());
            Ok(())
        } else {
            tracing::debug!("no async runtime, sending snapshot synchronously");
            self.send_blocking(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    const PAYLOAD: &str = r#"{"clientId":"acme","timeSpent":1.5}"#;

    /// Accepts one request, answers with `status` and returns the raw request.
    fn one_shot_server(status: &str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/collect", listener.local_addr().unwrap());
        let status = status.to_string();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap();
                raw.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&raw) {
                    break;
                }
            }
            let response =
                format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8(raw).unwrap()
        });

        (url, server)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        raw.len() >= header_end + 4 + content_length
    }

    #[test]
    fn rejects_invalid_endpoints() {
        assert!(matches!(
            HttpTransport::new("not a url"),
            Err(HttpTransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            HttpTransport::new("ftp://example.com/collect"),
            Err(HttpTransportError::UnsupportedScheme(scheme)) if scheme == "ftp"
        ));
    }

    #[test]
    fn debug_shows_endpoint() {
        let transport = HttpTransport::new("https://collect.example.com/v1").unwrap();
        let debug = format!("{transport:?}");
        assert!(debug.contains("https://collect.example.com/v1"));
        assert!(debug.contains("in_flight: 0"));
    }

    #[test]
    fn posts_synchronously_outside_runtime() {
        let (url, server) = one_shot_server("204 No Content");
        let transport = HttpTransport::new(&url).unwrap();

        transport.send(PAYLOAD).unwrap();
        assert_eq!(transport.pending(), 0);

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /collect HTTP/1.1"));
        assert!(
            request
                .to_ascii_lowercase()
                .contains("content-type: application/json; charset=utf-8")
        );
        assert!(request.ends_with(PAYLOAD));
    }

    #[test]
    fn synchronous_failure_is_reported() {
        let transport =
            HttpTransport::with_timeout("http://127.0.0.1:1/collect", Duration::from_secs(2))
                .unwrap();
        assert!(matches!(
            transport.send(PAYLOAD),
            Err(TransportError::Failed(_))
        ));
    }

    #[test]
    fn synchronous_rejection_is_reported() {
        let (url, server) = one_shot_server("500 Internal Server Error");
        let transport = HttpTransport::new(&url).unwrap();

        let err = transport.send(PAYLOAD).unwrap_err();
        assert!(err.to_string().contains("500"));
        server.join().unwrap();
    }

    #[tokio::test]
    async fn spawns_post_inside_runtime() {
        let (url, server) = one_shot_server("204 No Content");
        let transport = HttpTransport::new(&url).unwrap();

        transport.send(PAYLOAD).unwrap();
        assert_eq!(transport.pending(), 1);

        let report = transport.drain().await;
        assert_eq!(
            report,
            DeliveryReport {
                delivered: 1,
                failed: 0
            }
        );
        assert_eq!(transport.pending(), 0);

        let request = server.join().unwrap();
        assert!(request.ends_with(PAYLOAD));
    }

    #[tokio::test]
    async fn finished_deliveries_are_pruned_without_drain() {
        let transport = HttpTransport::with_timeout(
            "http://127.0.0.1:1/collect",
            Duration::from_secs(2),
        )
        .unwrap();

        for _ in 0..3 {
            transport.send(PAYLOAD).unwrap();
            for _ in 0..200 {
                if transport.pending() == 0 || all_finished(&transport) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        // the last send pruned the two finished ones before it
        assert_eq!(transport.pending(), 1);

        let report = transport.drain().await;
        assert_eq!(report.failed, 3);
        assert_eq!(transport.drain().await, DeliveryReport::default());
    }

    fn all_finished(transport: &HttpTransport) -> bool {
        transport
            .in_flight
            .lock()
            .unwrap()
            .iter()
            .all(JoinHandle::is_finished)
    }

    #[tokio::test]
    async fn spawned_failure_is_counted() {
        let transport = HttpTransport::with_timeout(
            "http://127.0.0.1:1/collect",
            Duration::from_secs(2),
        )
        .unwrap();

        assert!(transport.send(PAYLOAD).is_ok());
        let report = transport.drain().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 0);
    }
}
