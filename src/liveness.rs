//! Liveness monitoring.
//!
//! While the session is online a [`LivenessMonitor`] probes the server at a
//! fixed interval. The first failed probe invokes the failure callback once and
//! ends the monitor; the session answers by forcing a reconnect.
//!
//! Two probes are shipped:
//! - [`HttpStatusProbe`]: `GET /status` on the server host, which also reports
//!   when the server process started. A start time later than the one
//!   recorded at connect time means the server restarted underneath us.
//! - [`RpcPingProbe`]: the `externalServicePing` remote call.

use crate::{
    config::SessionConfig,
    error::{LinkError, Result},
    models::{PingResponse, StatusResponse},
    protocol::{METHOD_SERVICE_PING, STATUS_PATH},
    timeouts::LinkTimeouts,
    transport::Transport,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Server start time, as reported by the status endpoint.
pub type Epoch = DateTime<Utc>;

/// Outcome of a single probe that completed in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Whether the server reports itself healthy.
    pub alive: bool,
    /// Server start time, when the probe carries one.
    pub up_since: Option<Epoch>,
}

impl ProbeReport {
    pub fn alive() -> Self {
        Self {
            alive: true,
            up_since: None,
        }
    }

    pub fn with_up_since(mut self, up_since: Epoch) -> Self {
        self.up_since = Some(up_since);
        self
    }
}

/// A way of asking the server whether it is still there.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Run one probe.
    async fn probe(&self) -> Result<ProbeReport>;

    /// Epoch to compare later probes against, read once per connection.
    /// Probes without an epoch return `Ok(None)`.
    async fn baseline(&self) -> Result<Option<Epoch>> {
        Ok(None)
    }
}

/// Why a probe counted as failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LivenessFailure {
    #[error("Liveness probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("Liveness probe failed: {0}")]
    ProbeError(LinkError),

    #[error("Server reported itself not alive")]
    NegativeSignal,

    #[error("Server restarted (up since {up_since}, connected against {baseline})")]
    ServerRestarted { baseline: Epoch, up_since: Epoch },
}

/// Verdict on one probe report.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeVerdict {
    Alive,
    Failed(LivenessFailure),
}

/// Judge a probe report against the connection's baseline epoch.
pub fn assess(report: &ProbeReport, baseline: Option<Epoch>) -> ProbeVerdict {
    if !report.alive {
        return ProbeVerdict::Failed(LivenessFailure::NegativeSignal);
    }
    match (baseline, report.up_since) {
        (Some(baseline), Some(up_since)) if up_since > baseline => {
            ProbeVerdict::Failed(LivenessFailure::ServerRestarted { baseline, up_since })
        },
        _ => ProbeVerdict::Alive,
    }
}

/// Periodic probe task.
///
/// Dropping the monitor stops it.
pub struct LivenessMonitor {
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl LivenessMonitor {
    /// Start probing. The first probe runs one `interval` after start; each
    /// probe is abandoned after `timeout` (zero waits indefinitely).
    /// `on_failed` runs at most once.
    ///
    /// `interval` must be non-zero.
    pub fn start<F>(
        probe: Arc<dyn LivenessProbe>,
        baseline: Option<Epoch>,
        interval: Duration,
        timeout: Duration,
        on_failed: F,
    ) -> Self
    where
        F: FnOnce(LivenessFailure) + Send + 'static,
    {
        let stopped = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(monitor_task(
            probe,
            baseline,
            interval,
            timeout,
            stopped.clone(),
            on_failed,
        ));
        Self { stopped, task }
    }

    /// Stop probing. No failure is reported after this returns.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            log::debug!("[liveness] Monitor stopped");
        }
        self.task.abort();
    }

    /// Whether the monitor has stopped, by request or after a failure.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

async fn monitor_task<F>(
    probe: Arc<dyn LivenessProbe>,
    baseline: Option<Epoch>,
    interval: Duration,
    timeout: Duration,
    stopped: Arc<AtomicBool>,
    on_failed: F,
) where
    F: FnOnce(LivenessFailure) + Send + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if stopped.load(Ordering::SeqCst) {
            return;
        }

        let outcome = if LinkTimeouts::is_no_timeout(timeout) {
            Ok(probe.probe().await)
        } else {
            tokio::time::timeout(timeout, probe.probe()).await
        };
        let verdict = match outcome {
            Ok(Ok(report)) => assess(&report, baseline),
            Ok(Err(e)) => ProbeVerdict::Failed(LivenessFailure::ProbeError(e)),
            Err(_) => ProbeVerdict::Failed(LivenessFailure::Timeout(timeout)),
        };

        match verdict {
            ProbeVerdict::Alive => {
                log::debug!("[liveness] Probe ok");
            },
            ProbeVerdict::Failed(failure) => {
                if !stopped.swap(true, Ordering::SeqCst) {
                    log::warn!("[liveness] {}", failure);
                    on_failed(failure);
                }
                return;
            },
        }
    }
}

/// URL of the status endpoint for a socket address: same host and port,
/// `https` for `https`/`wss` addresses and `http` otherwise.
pub fn status_url(socket_url: &Url) -> Result<Url> {
    let scheme = match socket_url.scheme() {
        "https" | "wss" => "https",
        _ => "http",
    };
    let host = socket_url.host_str().ok_or_else(|| {
        LinkError::ConfigurationError(format!("socketAddress '{}' has no host", socket_url))
    })?;
    let authority = match socket_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let raw = format!("{}://{}{}", scheme, authority, STATUS_PATH);
    Url::parse(&raw)
        .map_err(|e| LinkError::ConfigurationError(format!("Invalid status URL '{}': {}", raw, e)))
}

/// Probe backed by the HTTP status endpoint.
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    client: reqwest::Client,
    url: Url,
}

impl HttpStatusProbe {
    /// Probe the status endpoint derived from `socket_url`.
    pub fn new(socket_url: &Url, timeout: Duration) -> Result<Self> {
        let url = status_url(socket_url)?;
        let mut builder = reqwest::Client::builder();
        if !LinkTimeouts::is_no_timeout(timeout) {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self { client, url })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        Self::new(&config.socket_url()?, config.timeouts.probe_timeout)
    }

    /// Status endpoint being probed.
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn fetch(&self) -> Result<StatusResponse> {
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LinkError::HttpError(format!(
                "GET {} returned {}",
                self.url, status
            )));
        }
        Ok(response.json::<StatusResponse>().await?)
    }
}

#[async_trait]
impl LivenessProbe for HttpStatusProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        let status = self.fetch().await?;
        Ok(ProbeReport {
            alive: status.is_up(),
            up_since: status.up_since(),
        })
    }

    async fn baseline(&self) -> Result<Option<Epoch>> {
        let up_since = self.fetch().await?.up_since();
        log::debug!("[liveness] Server up since {:?}", up_since);
        Ok(up_since)
    }
}

/// Probe backed by the `externalServicePing` remote call.
pub struct RpcPingProbe {
    transport: Arc<dyn Transport>,
}

impl RpcPingProbe {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl LivenessProbe for RpcPingProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        let value = self.transport.call(METHOD_SERVICE_PING, Vec::new()).await?;
        let ping: PingResponse = serde_json::from_value(value)?;
        Ok(ProbeReport {
            alive: ping.connection_established,
            up_since: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn epoch(ms: i64) -> Epoch {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    /// Probe that never answers.
    struct SilentProbe;

    #[async_trait]
    impl LivenessProbe for SilentProbe {
        async fn probe(&self) -> Result<ProbeReport> {
            std::future::pending().await
        }
    }

    /// Probe answering from a script, then healthy forever.
    struct ScriptedProbe {
        replies: Mutex<VecDeque<Result<ProbeReport>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProbe {
        fn new(replies: Vec<Result<ProbeReport>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl LivenessProbe for ScriptedProbe {
        async fn probe(&self) -> Result<ProbeReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ProbeReport::alive()))
        }
    }

    #[test]
    fn test_assess_alive_without_epoch() {
        assert_eq!(assess(&ProbeReport::alive(), None), ProbeVerdict::Alive);
        assert_eq!(assess(&ProbeReport::alive(), Some(epoch(1_000))), ProbeVerdict::Alive);
    }

    #[test]
    fn test_assess_negative_signal() {
        let report = ProbeReport {
            alive: false,
            up_since: None,
        };
        assert_eq!(
            assess(&report, None),
            ProbeVerdict::Failed(LivenessFailure::NegativeSignal)
        );
    }

    #[test]
    fn test_assess_epoch_staleness() {
        let baseline = epoch(1_000);

        let same = ProbeReport::alive().with_up_since(epoch(1_000));
        assert_eq!(assess(&same, Some(baseline)), ProbeVerdict::Alive);

        let older = ProbeReport::alive().with_up_since(epoch(500));
        assert_eq!(assess(&older, Some(baseline)), ProbeVerdict::Alive);

        let restarted = ProbeReport::alive().with_up_since(epoch(2_000));
        assert_eq!(
            assess(&restarted, Some(baseline)),
            ProbeVerdict::Failed(LivenessFailure::ServerRestarted {
                baseline,
                up_since: epoch(2_000),
            })
        );
    }

    #[test]
    fn test_status_url_scheme_mapping() {
        let cases = [
            ("wss://catalogue.example.org", "https://catalogue.example.org/status"),
            ("https://catalogue.example.org/app", "https://catalogue.example.org/status"),
            ("ws://127.0.0.1:3000", "http://127.0.0.1:3000/status"),
            ("http://localhost:8080/x/y", "http://localhost:8080/status"),
        ];
        for (input, expected) in cases {
            let url = status_url(&Url::parse(input).unwrap()).unwrap();
            assert_eq!(url.as_str(), expected, "input {}", input);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_probe_fails_once_within_interval_plus_timeout() {
        let interval = Duration::from_secs(60);
        let timeout = Duration::from_secs(60);
        let failures = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel();

        let started = Instant::now();
        let counter = failures.clone();
        let _monitor = LivenessMonitor::start(Arc::new(SilentProbe), None, interval, timeout, move |f| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(f);
        });

        let failure = tokio::time::timeout(interval + timeout + Duration::from_secs(1), rx)
            .await
            .expect("monitor should fail in time")
            .unwrap();
        assert_eq!(failure, LivenessFailure::Timeout(timeout));
        assert!(started.elapsed() <= interval + timeout + Duration::from_millis(10));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_probes_keep_running_until_failure() {
        let probe = Arc::new(ScriptedProbe::new(vec![
            Ok(ProbeReport::alive()),
            Ok(ProbeReport::alive()),
            Err(LinkError::HttpError("connection refused".into())),
        ]));
        let calls = probe.calls.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let monitor = LivenessMonitor::start(
            probe,
            None,
            Duration::from_secs(10),
            Duration::from_secs(5),
            move |f| {
                let _ = tx.send(f);
            },
        );

        let failure = rx.await.unwrap();
        assert!(matches!(failure, LivenessFailure::ProbeError(LinkError::HttpError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(monitor.is_stopped());

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_probes_and_callbacks() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        let monitor = LivenessMonitor::start(
            Arc::new(SilentProbe),
            None,
            Duration::from_secs(60),
            Duration::from_secs(60),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        // stop while the first probe is in flight
        tokio::time::sleep(Duration::from_secs(90)).await;
        monitor.stop();
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(failures.load(Ordering::SeqCst), 0);
        assert!(monitor.is_stopped());
    }

    #[tokio::test]
    async fn test_http_status_probe_reads_status_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"value": "up", "upSince": 1_700_000_000_000i64})),
            )
            .mount(&server)
            .await;

        let socket = Url::parse(&server.uri().replacen("http://", "ws://", 1)).unwrap();
        let probe = HttpStatusProbe::new(&socket, Duration::from_secs(5)).unwrap();
        assert_eq!(probe.url().scheme(), "http");
        assert_eq!(probe.url().path(), "/status");

        let report = probe.probe().await.unwrap();
        assert!(report.alive);
        assert_eq!(report.up_since, Some(epoch(1_700_000_000_000)));
        assert_eq!(probe.baseline().await.unwrap(), Some(epoch(1_700_000_000_000)));
    }

    #[tokio::test]
    async fn test_http_status_probe_reports_down_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": "starting"})))
            .mount(&server)
            .await;

        let socket = Url::parse(&server.uri()).unwrap();
        let probe = HttpStatusProbe::new(&socket, Duration::from_secs(5)).unwrap();

        let report = probe.probe().await.unwrap();
        assert_eq!(
            assess(&report, None),
            ProbeVerdict::Failed(LivenessFailure::NegativeSignal)
        );
    }

    #[tokio::test]
    async fn test_http_status_probe_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let socket = Url::parse(&server.uri()).unwrap();
        let probe = HttpStatusProbe::new(&socket, Duration::from_secs(5)).unwrap();

        assert!(matches!(probe.probe().await, Err(LinkError::HttpError(_))));
    }
}
