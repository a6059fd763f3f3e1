use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::error::TransportError;
use crate::expiry::{self, Disposition};
use crate::registry::{ServiceEntry, ServiceSpec};
use crate::reload::ReloadDispatcher;
use crate::store::StoreClient;
use crate::transport::{RetryPolicy, RetryingTransport};

// ---------------------------------------------------------------------------
// RotationOutcome / RotationSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStatus {
    /// Certificate issued and the service reloaded.
    Success,
    /// Certificate issued but the reload failed — the new certificate exists
    /// in the store and is not yet active.
    Partial,
    Failed,
}

/// Per-service result record, produced exactly once per service per pass.
#[derive(Debug, Clone, Serialize)]
pub struct RotationOutcome {
    pub service: String,
    pub status: RotationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// A service whose certificate was still comfortably valid.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedService {
    pub service: String,
    pub days_left: i64,
}

/// Aggregate over one rotation pass. Finalized only after every dispatched
/// task has joined; `outcomes.len() + skipped.len() == total`.
#[derive(Debug, Clone, Serialize)]
pub struct RotationSummary {
    /// Entries submitted to the pass.
    pub total: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub outcomes: Vec<RotationOutcome>,
    pub skipped: Vec<SkippedService>,
}

impl RotationSummary {
    fn new(total: usize, outcomes: Vec<RotationOutcome>, skipped: Vec<SkippedService>) -> Self {
        let count = |status| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            total,
            succeeded: count(RotationStatus::Success),
            partial: count(RotationStatus::Partial),
            failed: count(RotationStatus::Failed),
            outcomes,
            skipped,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

// ---------------------------------------------------------------------------
// RotationOrchestrator
// ---------------------------------------------------------------------------

/// Drives one full pass over a batch of service entries: selection by
/// expiry (or `force`), concurrent rotation under a bounded worker pool,
/// and aggregation into a [`RotationSummary`].
///
/// A pass always runs to completion — errors inside one rotation become
/// that service's outcome and never abort or delay the others.
pub struct RotationOrchestrator {
    store: Arc<StoreClient>,
    dispatcher: Arc<ReloadDispatcher>,
    lead_time_days: i64,
    max_workers: usize,
    force: bool,
}

impl RotationOrchestrator {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let transport = RetryingTransport::new(
            RetryPolicy {
                max_retries: config.max_retries,
                base_delay: config.base_delay,
            },
            config.request_timeout,
        )?;
        let store = StoreClient::new(transport.clone(), &config.store, config.dry_run);
        let dispatcher = ReloadDispatcher::new(
            transport,
            config.request_timeout,
            config.dry_run,
            config.commands.clone(),
        );
        Ok(Self {
            store: Arc::new(store),
            dispatcher: Arc::new(dispatcher),
            lead_time_days: config.lead_time_days,
            max_workers: config.max_workers.max(1),
            force: config.force,
        })
    }

    /// Run one rotation pass. Every submitted entry is accounted for: either
    /// as an outcome or as a skipped (not yet due) service.
    pub async fn run(&self, entries: Vec<ServiceEntry>) -> RotationSummary {
        let total = entries.len();
        tracing::info!(total, force = self.force, "checking services for certificate rotation");

        let mut outcomes = Vec::new();
        let mut skipped = Vec::new();
        let mut selected = Vec::new();

        for entry in entries {
            match entry {
                ServiceEntry::Rejected(err) => {
                    tracing::error!(service = %err.name, error = %err, "rejected service entry");
                    outcomes.push(RotationOutcome {
                        service: err.name.clone(),
                        status: RotationStatus::Failed,
                        error: Some(err.to_string()),
                        duration_ms: 0,
                    });
                }
                ServiceEntry::Ready(spec) => match self.select(spec).await {
                    Selection::Rotate(spec) => selected.push(spec),
                    Selection::Skip(entry) => skipped.push(entry),
                    Selection::ReadFailed(outcome) => outcomes.push(outcome),
                },
            }
        }

        if selected.is_empty() {
            tracing::info!("no services require certificate rotation");
            return RotationSummary::new(total, outcomes, skipped);
        }

        tracing::info!(count = selected.len(), "starting rotation");
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::with_capacity(selected.len());

        for spec in selected {
            let sem = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let dispatcher = Arc::clone(&self.dispatcher);
            let name = spec.name.clone();
            let handle = tokio::spawn(async move {
                let _permit = match sem.acquire().await {
                    Ok(p) => p,
                    Err(_) => {
                        return RotationOutcome {
                            service: spec.name.clone(),
                            status: RotationStatus::Failed,
                            error: Some("worker pool closed".to_string()),
                            duration_ms: 0,
                        }
                    }
                };
                rotate_one(&store, &dispatcher, &spec).await
            });
            handles.push((name, handle));
        }

        // Barrier: every dispatched task joins before the summary exists.
        for (name, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(RotationOutcome {
                    service: name,
                    status: RotationStatus::Failed,
                    error: Some(format!("rotation task panicked: {e}")),
                    duration_ms: 0,
                }),
            }
        }

        let summary = RotationSummary::new(total, outcomes, skipped);
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            partial = summary.partial,
            failed = summary.failed,
            skipped = summary.skipped.len(),
            "rotation pass complete"
        );
        summary
    }

    /// Decide whether one service enters rotation. A store-read failure is
    /// this service's failed outcome, never a reason to abort the pass.
    async fn select(&self, spec: ServiceSpec) -> Selection {
        if self.force {
            tracing::info!(service = %spec.name, "force rotation enabled");
            return Selection::Rotate(spec);
        }

        let started = Instant::now();
        let material = match self.store.current_certificate(&spec.cert_path).await {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(service = %spec.name, error = %e, "failed to read current certificate");
                return Selection::ReadFailed(RotationOutcome {
                    service: spec.name.clone(),
                    status: RotationStatus::Failed,
                    error: Some(e.to_string()),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let expiry = material.as_ref().and_then(|m| m.expires_at.as_deref());
        match expiry::evaluate(expiry, Utc::now(), self.lead_time_days) {
            Disposition::Current { days_left } => {
                tracing::info!(service = %spec.name, days_left, "no rotation needed");
                Selection::Skip(SkippedService {
                    service: spec.name,
                    days_left,
                })
            }
            Disposition::Due { days_left } => {
                tracing::info!(service = %spec.name, days_left, "rotation due");
                Selection::Rotate(spec)
            }
            Disposition::DueUnverifiable { detail } => {
                tracing::warn!(service = %spec.name, %detail, "expiry unverifiable, rotating");
                Selection::Rotate(spec)
            }
        }
    }
}

enum Selection {
    Rotate(ServiceSpec),
    Skip(SkippedService),
    ReadFailed(RotationOutcome),
}

/// Rotate a single service: issue, then reload. Always returns an outcome;
/// errors never cross the task boundary.
async fn rotate_one(
    store: &StoreClient,
    dispatcher: &ReloadDispatcher,
    spec: &ServiceSpec,
) -> RotationOutcome {
    let started = Instant::now();
    tracing::info!(service = %spec.name, "starting certificate rotation");

    if let Err(e) = store.issue_certificate(&spec.cert_path, spec.common_name()).await {
        tracing::error!(service = %spec.name, error = %e, "certificate issuance failed");
        return RotationOutcome {
            service: spec.name.clone(),
            status: RotationStatus::Failed,
            error: Some(e.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
        };
    }

    match dispatcher.dispatch(spec).await {
        Ok(()) => RotationOutcome {
            service: spec.name.clone(),
            status: RotationStatus::Success,
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
        },
        Err(e) => {
            tracing::error!(service = %spec.name, error = %e, "reload failed after issuance");
            RotationOutcome {
                service: spec.name.clone(),
                status: RotationStatus::Partial,
                error: Some(format!("certificate issued but reload failed: {e}")),
                duration_ms: started.elapsed().as_millis() as u64,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use crate::config::StoreConfig;
    use crate::error::ConfigError;
    use crate::registry::ReloadMethod;

    fn config(base_url: &str) -> Config {
        let mut cfg = Config::new(StoreConfig {
            base_url: base_url.to_string(),
            token: "test-token".to_string(),
        });
        cfg.max_retries = 0;
        cfg.base_delay = Duration::from_millis(1);
        cfg.request_timeout = Duration::from_secs(2);
        cfg
    }

    fn http_service(name: &str, cert_path: &str, endpoint: &str) -> ServiceEntry {
        ServiceEntry::Ready(ServiceSpec {
            name: name.into(),
            cert_path: cert_path.into(),
            common_name: None,
            reload: ReloadMethod::Http {
                reload_endpoint: endpoint.into(),
            },
        })
    }

    fn issued_body() -> &'static str {
        r#"{"data": {"certificate": "CERT", "private_key": "KEY"}}"#
    }

    /// HTTP server that answers every request with an issuance body after
    /// `delay`, recording the peak number of simultaneously open requests.
    /// Each rotation has at most one request in flight at a time, so the
    /// peak observed here is the peak number of in-flight rotations.
    async fn counting_server(
        delay: std::time::Duration,
    ) -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peak = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&peak);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let peak = Arc::clone(&observed);
                let in_flight = Arc::clone(&in_flight);
                tokio::spawn(async move {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(current, Ordering::SeqCst);

                    let mut buf = [0u8; 4096];
                    let _ = stream.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let body = issued_body();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;

                    in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        (format!("http://{addr}"), peak)
    }

    #[tokio::test]
    async fn forced_dry_run_succeeds_for_every_service_without_network() {
        // Unroutable store: dry-run must never reach it.
        let mut cfg = config("http://127.0.0.1:9");
        cfg.dry_run = true;
        cfg.force = true;
        let orchestrator = RotationOrchestrator::new(&cfg).unwrap();

        let entries = vec![
            http_service("svc-a", "pki/issue/a", "http://127.0.0.1:9/reload"),
            http_service("svc-b", "pki/issue/b", "http://127.0.0.1:9/reload"),
            http_service("svc-c", "pki/issue/c", "http://127.0.0.1:9/reload"),
        ];

        let summary = orchestrator.run(entries).await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.partial, 0);
        assert_eq!(summary.outcomes.len(), 3);
        assert!(summary.skipped.is_empty());
        assert!(!summary.has_failures());

        let names: HashSet<_> = summary.outcomes.iter().map(|o| o.service.as_str()).collect();
        assert_eq!(names, HashSet::from(["svc-a", "svc-b", "svc-c"]));
    }

    #[tokio::test]
    async fn every_entry_yields_exactly_one_record() {
        let mut cfg = config("http://127.0.0.1:9");
        cfg.dry_run = true;
        cfg.force = true;
        let orchestrator = RotationOrchestrator::new(&cfg).unwrap();

        let entries: Vec<ServiceEntry> = (0..25)
            .map(|i| {
                http_service(
                    &format!("svc-{i}"),
                    &format!("pki/issue/{i}"),
                    "http://127.0.0.1:9/reload",
                )
            })
            .collect();

        let summary = orchestrator.run(entries).await;

        assert_eq!(summary.outcomes.len() + summary.skipped.len(), 25);
        let names: HashSet<_> = summary.outcomes.iter().map(|o| o.service.clone()).collect();
        assert_eq!(names.len(), 25, "one outcome per unique service");
    }

    #[tokio::test]
    async fn rejected_entry_becomes_failed_outcome() {
        let mut cfg = config("http://127.0.0.1:9");
        cfg.dry_run = true;
        cfg.force = true;
        let orchestrator = RotationOrchestrator::new(&cfg).unwrap();

        let entries = vec![
            ServiceEntry::Rejected(ConfigError {
                name: "bad-service".into(),
                detail: "unknown variant `carrier_pigeon`".into(),
            }),
            http_service("good-service", "pki/issue/good", "http://127.0.0.1:9/reload"),
        ];

        let summary = orchestrator.run(entries).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
        let bad = summary
            .outcomes
            .iter()
            .find(|o| o.service == "bad-service")
            .unwrap();
        assert_eq!(bad.status, RotationStatus::Failed);
        assert!(bad.error.as_ref().unwrap().contains("invalid service entry"));
    }

    #[tokio::test]
    async fn one_failing_issuance_does_not_affect_the_others() {
        let mut server = mockito::Server::new_async().await;
        for path in ["a", "c"] {
            server
                .mock("POST", format!("/v1/pki/issue/{path}").as_str())
                .with_status(200)
                .with_body(issued_body())
                .create_async()
                .await;
        }
        // Non-retriable client error for service b.
        server
            .mock("POST", "/v1/pki/issue/b")
            .with_status(403)
            .create_async()
            .await;
        let reload = server
            .mock("POST", "/reload")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let mut cfg = config(&server.url());
        cfg.force = true;
        cfg.max_workers = 2;
        let orchestrator = RotationOrchestrator::new(&cfg).unwrap();

        let endpoint = format!("{}/reload", server.url());
        let entries = vec![
            http_service("svc-a", "pki/issue/a", &endpoint),
            http_service("svc-b", "pki/issue/b", &endpoint),
            http_service("svc-c", "pki/issue/c", &endpoint),
        ];

        let summary = orchestrator.run(entries).await;

        reload.assert_async().await;
        assert_eq!(summary.outcomes.len(), 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.partial, 0);
        let failed = summary
            .outcomes
            .iter()
            .find(|o| o.service == "svc-b")
            .unwrap();
        assert!(failed.error.as_ref().unwrap().contains("403"));
        assert!(summary.has_failures());
    }

    #[tokio::test]
    async fn reload_failure_after_issuance_is_partial() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/pki/issue/a")
            .with_status(200)
            .with_body(issued_body())
            .create_async()
            .await;
        server
            .mock("POST", "/reload")
            .with_status(404)
            .create_async()
            .await;

        let mut cfg = config(&server.url());
        cfg.force = true;
        let orchestrator = RotationOrchestrator::new(&cfg).unwrap();

        let endpoint = format!("{}/reload", server.url());
        let summary = orchestrator
            .run(vec![http_service("svc-a", "pki/issue/a", &endpoint)])
            .await;

        assert_eq!(summary.partial, 1);
        let outcome = &summary.outcomes[0];
        assert_eq!(outcome.status, RotationStatus::Partial);
        assert!(outcome
            .error
            .as_ref()
            .unwrap()
            .contains("certificate issued but reload failed"));
    }

    #[tokio::test]
    async fn selection_rotates_due_and_skips_current() {
        let mut server = mockito::Server::new_async().await;
        // Expired long ago: due.
        server
            .mock("GET", "/v1/pki/issue/old")
            .with_status(200)
            .with_body(
                r#"{"data": {"certificate": "C", "private_key": "K",
                    "expiration": "2020-01-01T00:00:00Z"}}"#,
            )
            .create_async()
            .await;
        // Far future: current.
        server
            .mock("GET", "/v1/pki/issue/fresh")
            .with_status(200)
            .with_body(
                r#"{"data": {"certificate": "C", "private_key": "K",
                    "expiration": "2099-01-01T00:00:00Z"}}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/v1/pki/issue/old")
            .with_status(200)
            .with_body(issued_body())
            .create_async()
            .await;
        let fresh_issue = server
            .mock("POST", "/v1/pki/issue/fresh")
            .expect(0)
            .create_async()
            .await;
        server
            .mock("POST", "/reload")
            .with_status(200)
            .create_async()
            .await;

        let cfg = config(&server.url());
        let orchestrator = RotationOrchestrator::new(&cfg).unwrap();

        let endpoint = format!("{}/reload", server.url());
        let summary = orchestrator
            .run(vec![
                http_service("old-svc", "pki/issue/old", &endpoint),
                http_service("fresh-svc", "pki/issue/fresh", &endpoint),
            ])
            .await;

        fresh_issue.assert_async().await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].service, "fresh-svc");
        assert!(summary.skipped[0].days_left > 30);
        assert_eq!(summary.outcomes.len() + summary.skipped.len(), 2);
    }

    #[tokio::test]
    async fn missing_certificate_counts_as_due() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/pki/issue/new")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("POST", "/v1/pki/issue/new")
            .with_status(200)
            .with_body(issued_body())
            .create_async()
            .await;
        server
            .mock("POST", "/reload")
            .with_status(200)
            .create_async()
            .await;

        let cfg = config(&server.url());
        let orchestrator = RotationOrchestrator::new(&cfg).unwrap();

        let endpoint = format!("{}/reload", server.url());
        let summary = orchestrator
            .run(vec![http_service("new-svc", "pki/issue/new", &endpoint)])
            .await;

        assert_eq!(summary.succeeded, 1);
        assert!(summary.skipped.is_empty());
    }

    #[tokio::test]
    async fn selection_read_failure_is_isolated_to_that_service() {
        let mut server = mockito::Server::new_async().await;
        // Permission denied on read for one service.
        server
            .mock("GET", "/v1/pki/issue/denied")
            .with_status(403)
            .create_async()
            .await;
        server
            .mock("GET", "/v1/pki/issue/ok")
            .with_status(200)
            .with_body(
                r#"{"data": {"certificate": "C", "private_key": "K",
                    "expiration": "2020-01-01T00:00:00Z"}}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/v1/pki/issue/ok")
            .with_status(200)
            .with_body(issued_body())
            .create_async()
            .await;
        server
            .mock("POST", "/reload")
            .with_status(200)
            .create_async()
            .await;

        let cfg = config(&server.url());
        let orchestrator = RotationOrchestrator::new(&cfg).unwrap();

        let endpoint = format!("{}/reload", server.url());
        let summary = orchestrator
            .run(vec![
                http_service("denied-svc", "pki/issue/denied", &endpoint),
                http_service("ok-svc", "pki/issue/ok", &endpoint),
            ])
            .await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
        let denied = summary
            .outcomes
            .iter()
            .find(|o| o.service == "denied-svc")
            .unwrap();
        assert_eq!(denied.status, RotationStatus::Failed);
    }

    #[tokio::test]
    async fn worker_pool_bounds_in_flight_rotations() {
        use std::sync::atomic::Ordering;

        // Slow enough that all permitted rotations demonstrably overlap.
        let (url, peak) = counting_server(Duration::from_millis(50)).await;

        let mut cfg = config(&url);
        cfg.force = true;
        cfg.max_workers = 2;
        let orchestrator = RotationOrchestrator::new(&cfg).unwrap();

        // Every service talks only to the counting server: one issuance
        // request, then one reload request, sequentially per rotation.
        let entries: Vec<ServiceEntry> = (0..4)
            .map(|i| {
                http_service(
                    &format!("svc-{i}"),
                    &format!("pki/issue/{i}"),
                    &format!("{url}/reload"),
                )
            })
            .collect();

        let summary = orchestrator.run(entries).await;

        assert_eq!(summary.succeeded, 4);
        let observed = peak.load(Ordering::SeqCst);
        assert!(
            observed <= 2,
            "worker ceiling of 2 exceeded: {observed} rotations in flight"
        );
        assert_eq!(observed, 2, "permitted rotations should actually overlap");
    }

    #[tokio::test]
    async fn worker_ceiling_of_one_still_completes_every_service() {
        let mut cfg = config("http://127.0.0.1:9");
        cfg.dry_run = true;
        cfg.force = true;
        cfg.max_workers = 1;
        let orchestrator = RotationOrchestrator::new(&cfg).unwrap();

        let entries: Vec<ServiceEntry> = (0..5)
            .map(|i| {
                http_service(
                    &format!("svc-{i}"),
                    &format!("pki/issue/{i}"),
                    "http://127.0.0.1:9/reload",
                )
            })
            .collect();

        let summary = orchestrator.run(entries).await;
        assert_eq!(summary.succeeded, 5);
    }

    #[tokio::test]
    async fn dry_run_pass_is_idempotent() {
        let mut cfg = config("http://127.0.0.1:9");
        cfg.dry_run = true;
        cfg.force = true;
        let orchestrator = RotationOrchestrator::new(&cfg).unwrap();

        let entries = || {
            vec![
                http_service("svc-a", "pki/issue/a", "http://127.0.0.1:9/reload"),
                http_service("svc-b", "pki/issue/b", "http://127.0.0.1:9/reload"),
            ]
        };

        let first = orchestrator.run(entries()).await;
        let second = orchestrator.run(entries()).await;

        assert_eq!(first.succeeded, second.succeeded);
        assert_eq!(first.partial, second.partial);
        assert_eq!(first.failed, second.failed);
    }
}
