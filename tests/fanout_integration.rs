//! End-to-end tests for the fan-out/fan-in engine
//!
//! Tests the complete flow: dispatch → per-host sessions → bounded queue →
//! aggregation against the deadline → cancellation of abandoned hosts.
//! Time is virtual (`start_paused`), so latencies are exact.

use async_trait::async_trait;
use sshfan::banner::{footer, header, TIMEOUT_NOTICE};
use sshfan::credential::Credential;
use sshfan::error::ExecError;
use sshfan::executors::SessionClient;
use sshfan::models::{parse_targets, RemoteOutput, Target, EXIT_OK, EXIT_TIMED_OUT};
use sshfan::runner::{RunConfig, Runner};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DEADLINE: Duration = Duration::from_secs(120);

/// Session client with per-host latency and output, honouring cancellation
#[derive(Default)]
struct ScriptedClient {
    latencies: HashMap<String, Duration>,
    outputs: HashMap<String, Vec<u8>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    cancelled: AtomicUsize,
    cancel_seen: Notify,
}

impl ScriptedClient {
    fn with_latencies(pairs: &[(&str, u64)]) -> Self {
        Self {
            latencies: pairs
                .iter()
                .map(|(host, secs)| (host.to_string(), Duration::from_secs(*secs)))
                .collect(),
            ..Default::default()
        }
    }

    fn with_output(mut self, host: &str, output: &[u8]) -> Self {
        self.outputs.insert(host.to_string(), output.to_vec());
        self
    }
}

#[async_trait]
impl SessionClient for ScriptedClient {
    async fn execute(
        &self,
        _command: &str,
        target: &Target,
        _credential: Arc<Credential>,
        cancel: &CancellationToken,
    ) -> Result<RemoteOutput, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .latencies
            .get(target.as_str())
            .copied()
            .unwrap_or(Duration::ZERO);
        let stdout = self
            .outputs
            .get(target.as_str())
            .cloned()
            .unwrap_or_else(|| format!("hello from {}\n", target).into_bytes());

        let outcome = tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(RemoteOutput {
                stdout,
                ..Default::default()
            }),
            _ = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                self.cancel_seen.notify_one();
                Err(ExecError::Cancelled)
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn credential() -> Result<Arc<Credential>, sshfan::error::CredentialError> {
    Ok(Arc::new(Credential::Agent {
        socket: PathBuf::from("/tmp/agent.sock"),
    }))
}

fn runner(client: Arc<ScriptedClient>, config: RunConfig) -> Runner {
    Runner::new(client, credential(), "uptime", config)
}

fn deadline_config() -> RunConfig {
    RunConfig {
        deadline: DEADLINE,
        ..Default::default()
    }
}

fn block_count(text: &str) -> usize {
    text.matches("########### ").count()
}

#[tokio::test(start_paused = true)]
async fn test_all_hosts_report_before_deadline() {
    let client = Arc::new(ScriptedClient::with_latencies(&[
        ("h1", 3),
        ("h2", 1),
        ("h3", 7),
        ("h4", 2),
        ("h5", 5),
    ]));
    let targets = parse_targets("h1 h2 h3 h4 h5");

    let start = Instant::now();
    let mut out = Vec::new();
    let summary = runner(client, deadline_config())
        .run(&targets, &mut out)
        .await
        .unwrap();

    assert_eq!(summary.received, 5);
    assert_eq!(summary.failed, 0);
    assert!(!summary.timed_out);
    assert_eq!(summary.exit_code(), EXIT_OK);
    assert!(start.elapsed() < DEADLINE);

    let text = String::from_utf8(out).unwrap();
    assert_eq!(block_count(&text), 5);
    assert!(!text.contains(TIMEOUT_NOTICE));
}

#[tokio::test(start_paused = true)]
async fn test_completion_order_and_deadline() {
    let client = Arc::new(ScriptedClient::with_latencies(&[
        ("slow", 200),
        ("second", 2),
        ("first", 1),
    ]));
    let targets = parse_targets("slow second first");

    let start = Instant::now();
    let mut out = Vec::new();
    let summary = runner(client.clone(), deadline_config())
        .run(&targets, &mut out)
        .await
        .unwrap();

    // Ends at the deadline, not earlier and not materially later
    assert!(start.elapsed() >= DEADLINE);
    assert!(start.elapsed() < DEADLINE + Duration::from_secs(1));

    assert_eq!(summary.received, 2);
    assert!(summary.timed_out);
    assert_eq!(summary.exit_code(), EXIT_TIMED_OUT);

    let text = String::from_utf8(out).unwrap();
    assert_eq!(block_count(&text), 2);
    let first = text.find(&header(&Target::new("first"))).unwrap();
    let second = text.find(&header(&Target::new("second"))).unwrap();
    assert!(first < second);
    assert!(!text.contains(&header(&Target::new("slow"))));
    assert_eq!(text.matches(TIMEOUT_NOTICE).count(), 1);
    assert!(text.ends_with("Timed out!\n"));

    // The abandoned session is told to stop
    tokio::time::timeout(Duration::from_secs(1), client.cancel_seen.notified())
        .await
        .expect("abandoned host should observe cancellation");
    assert_eq!(client.cancelled.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_host_does_not_block_others() {
    let client = Arc::new(ScriptedClient::with_latencies(&[("stuck", 100_000)]));
    let targets = parse_targets("a stuck b c");

    let mut out = Vec::new();
    let summary = runner(client, deadline_config())
        .run(&targets, &mut out)
        .await
        .unwrap();

    assert_eq!(summary.received, 3);
    assert!(summary.timed_out);

    let text = String::from_utf8(out).unwrap();
    for host in ["a", "b", "c"] {
        assert!(text.contains(&format!("hello from {}\n", host)));
    }
    assert_eq!(text.matches(TIMEOUT_NOTICE).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_hosts() {
    let client = Arc::new(ScriptedClient::default());

    let start = Instant::now();
    let mut out = Vec::new();
    let summary = runner(client.clone(), deadline_config())
        .run(&[], &mut out)
        .await
        .unwrap();

    assert_eq!(summary.expected, 0);
    assert_eq!(summary.received, 0);
    assert!(!summary.timed_out);
    assert!(out.is_empty());
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_hosts_are_independent() {
    let client = Arc::new(ScriptedClient::default());
    let targets = parse_targets("a a b");

    let mut out = Vec::new();
    let summary = runner(client.clone(), deadline_config())
        .run(&targets, &mut out)
        .await
        .unwrap();

    assert_eq!(summary.received, 3);
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);

    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches(&header(&Target::new("a"))).count(), 2);
    assert_eq!(text.matches(&header(&Target::new("b"))).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_output_passed_through_verbatim() {
    let tricky = format!("line one\n{}line two", footer());
    let client = Arc::new(
        ScriptedClient::default()
            .with_output("empty", b"")
            .with_output("tricky", tricky.as_bytes()),
    );
    let targets = parse_targets("empty tricky");

    let mut out = Vec::new();
    runner(client, deadline_config())
        .run(&targets, &mut out)
        .await
        .unwrap();

    let text = String::from_utf8(out).unwrap();
    let empty_block = format!("{}{}", header(&Target::new("empty")), footer());
    let tricky_block = format!("{}{}{}", header(&Target::new("tricky")), tricky, footer());
    assert!(text.contains(&empty_block));
    assert!(text.contains(&tricky_block));
}

#[tokio::test(start_paused = true)]
async fn test_worker_pool_bounds_in_flight_sessions() {
    let pairs: Vec<(String, u64)> = (0..6).map(|i| (format!("h{}", i), 10)).collect();
    let borrowed: Vec<(&str, u64)> = pairs.iter().map(|(h, s)| (h.as_str(), *s)).collect();
    let client = Arc::new(ScriptedClient::with_latencies(&borrowed));
    let targets: Vec<Target> = pairs.iter().map(|(h, _)| Target::new(h.as_str())).collect();

    let config = RunConfig {
        deadline: DEADLINE,
        max_parallel: 2,
        ..Default::default()
    };

    let start = Instant::now();
    let mut out = Vec::new();
    let summary = runner(client.clone(), config)
        .run(&targets, &mut out)
        .await
        .unwrap();

    assert_eq!(summary.received, 6);
    assert!(!summary.timed_out);
    assert_eq!(client.peak.load(Ordering::SeqCst), 2);
    // Three waves of two hosts each
    assert!(start.elapsed() >= Duration::from_secs(30));
    assert!(start.elapsed() < Duration::from_secs(31));
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_pool_runs_everything_at_once() {
    let pairs: Vec<(String, u64)> = (0..20).map(|i| (format!("h{}", i), 10)).collect();
    let borrowed: Vec<(&str, u64)> = pairs.iter().map(|(h, s)| (h.as_str(), *s)).collect();
    let client = Arc::new(ScriptedClient::with_latencies(&borrowed));
    let targets: Vec<Target> = pairs.iter().map(|(h, _)| Target::new(h.as_str())).collect();

    let config = RunConfig {
        deadline: DEADLINE,
        max_parallel: 0,
        ..Default::default()
    };

    let mut out = Vec::new();
    let summary = runner(client.clone(), config)
        .run(&targets, &mut out)
        .await
        .unwrap();

    assert_eq!(summary.received, 20);
    assert_eq!(client.peak.load(Ordering::SeqCst), 20);
}
