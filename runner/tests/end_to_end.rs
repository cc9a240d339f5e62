//! End-to-end scenarios driving a `JobRunner` against a mocked control
//! plane and a scripted submission driver.

use std::sync::Arc;
use std::time::Duration;

use runner_core::kernel::control_plane::ControlPlaneClient;
use runner_core::kernel::jobs::advisors::{HeuristicProbabilityOracle, NoopFormFieldMapper, PassthroughDescriptionCustomizer};
use runner_core::kernel::jobs::catalog::DirectoryCatalog;
use runner_core::kernel::jobs::driver::ScriptedDriver;
use runner_core::kernel::jobs::health::HealthMonitorConfig;
use runner_core::kernel::jobs::resilience::RetryPolicy;
use runner_core::kernel::jobs::runner::{JobRunner, JobRunnerConfig};
use runner_core::kernel::jobs::scheduler::SchedulerConfig;
use runner_core::kernel::traits::{SubmissionDriver, SubmissionOutcome};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_catalog(contents: &str) -> String {
    let path = std::env::temp_dir().join(format!("autobolt-catalog-{}-{}.json", std::process::id(), uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

fn sample_catalog_json() -> &'static str {
    r#"{
        "directories": [
            {
                "directoryId": "dir-1",
                "name": "Example One",
                "submissionUrl": "https://example.com/1",
                "priority": 0.9,
                "successRate": 0.8
            },
            {
                "directoryId": "dir-2",
                "name": "Example Two",
                "submissionUrl": "https://example.com/2",
                "priority": 0.2,
                "successRate": 0.6
            }
        ]
    }"#
}

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent_attempts: 4,
        attempt_timeout: Duration::from_secs(5),
        dir_delay_min: Duration::from_millis(0),
        dir_delay_max: Duration::from_millis(0),
        ai_probability_threshold: 0.0,
        escalation_threshold: 3,
    }
}

fn runner_config() -> JobRunnerConfig {
    JobRunnerConfig {
        worker_id: "worker-1".into(),
        poll_interval: Duration::from_millis(50),
        heartbeat_interval: Duration::from_secs(60),
        scheduler: scheduler_config(),
        health: HealthMonitorConfig::default(),
        retry_policy: RetryPolicy {
            max_attempts: 3,
            backoff: runner_core::common::Backoff::new(Duration::from_millis(5), Duration::from_millis(20), 0.0),
        },
    }
}

fn build_runner(
    control_plane: Arc<ControlPlaneClient>,
    catalog_path: &str,
    driver: Arc<dyn SubmissionDriver>,
) -> JobRunner {
    let catalog = Arc::new(DirectoryCatalog::load(Some(catalog_path)).unwrap());
    let oracle = Arc::new(HeuristicProbabilityOracle);
    JobRunner::new(
        runner_config(),
        control_plane,
        catalog,
        driver,
        oracle,
        Arc::new(PassthroughDescriptionCustomizer),
        Arc::new(NoopFormFieldMapper),
    )
}

#[tokio::test]
async fn happy_path_reports_progress_and_completion() {
    let server = MockServer::start().await;
    let catalog_path = write_catalog(sample_catalog_json());

    Mock::given(method("GET"))
        .and(path("/api/jobs/next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "data": {
                "jobId": "job-1",
                "customerId": "cust-1",
                "directoryLimit": 2,
            },
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/jobs/update"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/jobs/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let control_plane = Arc::new(ControlPlaneClient::new(server.uri(), "test-key").unwrap());
    let driver: Arc<dyn SubmissionDriver> = Arc::new(ScriptedDriver::always(SubmissionOutcome::success()));
    let runner = build_runner(control_plane, &catalog_path, driver);

    runner.run_once(CancellationToken::new()).await;

    server.verify().await;
    std::fs::remove_file(&catalog_path).ok();
}

#[tokio::test]
async fn no_job_available_returns_immediately_in_run_once() {
    let server = MockServer::start().await;
    let catalog_path = write_catalog(sample_catalog_json());

    Mock::given(method("GET"))
        .and(path("/api/jobs/next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "data": null,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let control_plane = Arc::new(ControlPlaneClient::new(server.uri(), "test-key").unwrap());
    let driver: Arc<dyn SubmissionDriver> = Arc::new(ScriptedDriver::always(SubmissionOutcome::success()));
    let runner = build_runner(control_plane, &catalog_path, driver);

    runner.run_once(CancellationToken::new()).await;

    server.verify().await;
    std::fs::remove_file(&catalog_path).ok();
}

#[tokio::test]
async fn cancellation_before_polling_skips_the_job_entirely() {
    let server = MockServer::start().await;
    let catalog_path = write_catalog(sample_catalog_json());

    // No mocks registered for /api/jobs/next: a cancelled runner must never poll.
    let control_plane = Arc::new(ControlPlaneClient::new(server.uri(), "test-key").unwrap());
    let driver: Arc<dyn SubmissionDriver> = Arc::new(ScriptedDriver::always(SubmissionOutcome::success()));
    let runner = build_runner(control_plane, &catalog_path, driver);

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    runner.run_once(shutdown).await;

    std::fs::remove_file(&catalog_path).ok();
}

#[tokio::test]
async fn a_flaky_directory_is_retried_until_it_succeeds() {
    let server = MockServer::start().await;
    let catalog_path = write_catalog(sample_catalog_json());

    Mock::given(method("GET"))
        .and(path("/api/jobs/next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "data": {
                "jobId": "job-1",
                "customerId": "cust-1",
                "directoryLimit": 1,
            },
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/jobs/update"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/jobs/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let control_plane = Arc::new(ControlPlaneClient::new(server.uri(), "test-key").unwrap());
    let driver: Arc<dyn SubmissionDriver> = Arc::new(ScriptedDriver::new(
        vec![SubmissionOutcome::failure("timeout")],
        SubmissionOutcome::success(),
    ));
    let runner = build_runner(control_plane, &catalog_path, driver);

    runner.run_once(CancellationToken::new()).await;

    server.verify().await;
    std::fs::remove_file(&catalog_path).ok();
}

#[tokio::test]
async fn a_control_plane_outage_during_flush_is_dead_lettered_not_dropped() {
    let server = MockServer::start().await;
    let catalog_path = write_catalog(sample_catalog_json());

    Mock::given(method("GET"))
        .and(path("/api/jobs/next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "data": {
                "jobId": "job-1",
                "customerId": "cust-1",
                "directoryLimit": 2,
            },
        })))
        .expect(1)
        .mount(&server)
        .await;

    // /api/jobs/update is never mocked, so every call returns 404 and the
    // reporter must dead-letter the batch instead of losing it silently.
    Mock::given(method("POST"))
        .and(path("/api/jobs/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .mount(&server)
        .await;

    let control_plane = Arc::new(
        ControlPlaneClient::new(server.uri(), "test-key")
            .unwrap()
            .with_max_attempts(1),
    );
    let driver: Arc<dyn SubmissionDriver> = Arc::new(ScriptedDriver::always(SubmissionOutcome::success()));
    let runner = build_runner(control_plane, &catalog_path, driver);

    runner.run_once(CancellationToken::new()).await;

    assert!(runner.dead_letter_count() > 0, "attempts lost to a dead control plane must be retained, not dropped");
    std::fs::remove_file(&catalog_path).ok();
}

#[tokio::test]
async fn mid_flight_cancellation_still_reports_a_cancelled_completion() {
    let server = MockServer::start().await;
    let catalog_path = write_catalog(sample_catalog_json());

    Mock::given(method("GET"))
        .and(path("/api/jobs/next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "data": {
                "jobId": "job-1",
                "customerId": "cust-1",
                "directoryLimit": 2,
            },
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/jobs/update"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/jobs/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    /// A driver that blocks forever, so the only way an attempt completes is
    /// via cancellation racing it inside the scheduler's `tokio::select!`.
    struct HangingDriver;
    #[async_trait::async_trait]
    impl SubmissionDriver for HangingDriver {
        async fn submit(
            &self,
            _directory: &runner_core::kernel::jobs::directory::DirectoryDescriptor,
            _profile: &runner_core::kernel::jobs::job::BusinessProfile,
        ) -> SubmissionOutcome {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    let control_plane = Arc::new(ControlPlaneClient::new(server.uri(), "test-key").unwrap());
    let driver: Arc<dyn SubmissionDriver> = Arc::new(HangingDriver);
    let runner = build_runner(control_plane, &catalog_path, driver);

    let shutdown = CancellationToken::new();
    let shutdown_trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_trigger.cancel();
    });

    runner.run_once(shutdown).await;

    server.verify().await;
    std::fs::remove_file(&catalog_path).ok();
}
