use std::io::Write;
use std::time::Duration;

use crackpair::controller::{ControllerConfig, ControllerSession, Outcome, SessionReport};
use crackpair::engine::{CryptVerifier, SearchEngine, Verifier, VerifyError};
use crackpair::error::SessionError;
use crackpair::shadow;
use crackpair::structs::CrackingJob;
use crackpair::worker::{WorkerConfig, WorkerOutcome, WorkerSession};
use tokio::net::TcpListener;
use tracing::Span;

/// Runs a controller and a worker against each other on loopback.
async fn pair<V: Verifier + 'static>(
    job: CrackingJob,
    engine: SearchEngine<V>,
) -> (
    Result<SessionReport, SessionError>,
    Result<WorkerOutcome, SessionError>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let controller = tokio::spawn(
        ControllerSession::new(job, ControllerConfig::default(), Span::none()).serve(listener),
    );
    let worker = WorkerSession::new(engine, WorkerConfig::default(), Span::none())
        .connect(addr)
        .await;

    (controller.await.unwrap(), worker)
}

fn shadow_job(password: &str, interval_seconds: u32) -> CrackingJob {
    let hash = pwhash::sha512_crypt::hash_with("$6$rounds=1000$abcd", password).unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "root:!:19000:0:99999:7:::").unwrap();
    writeln!(file, "alice:{hash}:19000:0:99999:7:::").unwrap();

    let mut job = shadow::find_user(file.path(), "alice").unwrap();
    job.interval_seconds = interval_seconds;
    job
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cracks_a_real_hash_end_to_end() {
    let job = shadow_job("A", 1);
    assert_eq!(job.setting, "$6$rounds=1000$abcd");

    let engine = SearchEngine::new(CryptVerifier, 2, Span::none()).unwrap();
    let (report, worker) = pair(job, engine).await;

    let report = report.unwrap();
    let Outcome::Found { password, metrics } = report.outcome else {
        panic!("expected a password, got {:?}", report.outcome);
    };
    assert_eq!(password, "A");
    assert!(!metrics.dispatch_latency.is_negative());
    assert!(!metrics.worker_crack_time.is_negative());
    assert!(!metrics.result_return_latency.is_negative());
    for pair in report.heartbeats.windows(2) {
        assert!(pair[1].total_tested >= pair[0].total_tested);
    }

    assert!(matches!(worker.unwrap(), WorkerOutcome::Found { password, .. } if password == "A"));
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cracks_a_yescrypt_shadow_entry() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "carol:$y$j9T$PaFi5RIRFJvMEF3DX6mbt.$VOdVkfZT/EVfOXM3BcAE0G.0QJJ0xTDlxXDm5LsKZF2:19000:0:99999:7:::"
    )
    .unwrap();
    let mut job = shadow::find_user(file.path(), "carol").unwrap();
    job.interval_seconds = 1;
    assert_eq!(job.setting, "$y$j9T$PaFi5RIRFJvMEF3DX6mbt.");

    let engine = SearchEngine::new(CryptVerifier, 2, Span::none()).unwrap();
    let (report, worker) = pair(job, engine).await;

    let report = report.unwrap();
    assert!(matches!(report.outcome, Outcome::Found { ref password, .. } if password == "A"));
    assert!(matches!(worker.unwrap(), WorkerOutcome::Found { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bounded_keyspace_reports_not_found() {
    let job = shadow_job("toolong", 1);
    let engine = SearchEngine::new(
        |_: &str, _: &CrackingJob| Ok::<_, VerifyError>(false),
        4,
        Span::none(),
    )
    .unwrap()
    .with_max_length(Some(2));

    let (report, worker) = pair(job, engine).await;

    assert!(matches!(report.unwrap().outcome, Outcome::NotFound { .. }));
    assert_eq!(worker.unwrap(), WorkerOutcome::NotFound { tested: 79 + 79 * 79 });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_failure_reaches_the_controller() {
    let job = shadow_job("A", 1);
    let engine = SearchEngine::new(
        |_: &str, _: &CrackingJob| {
            Err::<bool, _>(VerifyError::Unrecoverable("unsupported setting".into()))
        },
        2,
        Span::none(),
    )
    .unwrap();

    let (report, worker) = pair(job, engine).await;

    let Outcome::Failed { reason } = report.unwrap().outcome else {
        panic!("expected a failure");
    };
    assert!(reason.contains("unsupported setting"), "{reason}");
    assert!(matches!(worker.unwrap(), WorkerOutcome::Failed { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_search_collects_heartbeats() {
    let job = shadow_job("A", 1);
    let engine = SearchEngine::new(
        |candidate: &str, _: &CrackingJob| {
            std::thread::sleep(Duration::from_millis(25));
            Ok::<_, VerifyError>(candidate == "Ba")
        },
        2,
        Span::none(),
    )
    .unwrap();

    let (report, worker) = pair(job, engine).await;

    let report = report.unwrap();
    assert!(matches!(report.outcome, Outcome::Found { ref password, .. } if password == "Ba"));
    assert!(!report.heartbeats.is_empty());
    for pair in report.heartbeats.windows(2) {
        assert!(pair[1].total_tested >= pair[0].total_tested);
    }
    assert!(worker.is_ok());
}
