//! Worker flow tests against the in-memory gateway
//!
//! The process-backed test swaps the fetch and publish programs for small
//! shell scripts, so the full path from delivery to notice runs without a
//! broker or network.

use async_trait::async_trait;
use relaybox::config::{DestinationConfig, NormalizerConfig, ToolsConfig};
use relaybox::job::{Job, Normalizer};
use relaybox::queue::{MemoryPublisher, MemoryQueue, NoticePublisher, Settlement};
use relaybox::transfer::{FetchOutcome, ProcessTransfer, Transfer};
use relaybox::worker::{self, JobController, StopReason};
use relaybox::workspace::Workspace;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=%5BSubsPlease%5D+Show+-+05+%281080p%29+%5BABCD1234%5D.mkv";

fn expected_job() -> Job {
    Job {
        title: "[SubsPlease] Show - 05 (1080p) [ABCD1234].mkv".to_string(),
        link: MAGNET.to_string(),
        show: "Show - 1080p".to_string(),
    }
}

fn controller_with(
    transfer: Arc<dyn Transfer>,
    workspace: Workspace,
    publisher: &MemoryPublisher,
) -> JobController {
    JobController::builder()
        .normalizer(Normalizer::new(&NormalizerConfig::default()).unwrap())
        .transfer(transfer)
        .workspace(workspace)
        .publisher(Arc::new(publisher.clone()))
        .build()
}

#[cfg(unix)]
#[tokio::test]
async fn test_process_transfer_flow() {
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    let temp_dir = TempDir::new().unwrap();
    let record = temp_dir.path().join("publish.log");
    let staging = temp_dir.path().join("temp");

    let script = |name: &str, body: &str| -> PathBuf {
        let path = temp_dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    };

    // Writes a partial file into the --dir it was given
    let download = "for arg in \"$@\"; do case \"$arg\" in --dir=*) dir=\"${arg#--dir=}\";; esac; done\n\
                    mkdir -p \"$dir\"\nprintf 'data' > \"$dir/partial.bin\"";
    let fetch_ok = script("fetch-ok.sh", &format!("{}\nexit 0", download));
    let fetch_broken = script("fetch-broken.sh", &format!("{}\nexit 1", download));
    let publish = script(
        "publish.sh",
        &format!(
            "for arg in \"$@\"; do printf '%s\\n' \"$arg\" >> '{}'; done\nexit 0",
            record.display()
        ),
    );

    let destination = DestinationConfig {
        root: "gdrive:".to_string(),
        collection: "Airing".to_string(),
    };

    // A magnet delivery is fetched, copied, acked and announced
    let tools = ToolsConfig {
        fetch_program: fetch_ok,
        publish_program: publish.clone(),
        ..ToolsConfig::default()
    };
    let workspace = Workspace::new(&staging);
    let transfer = ProcessTransfer::new(tools, destination.clone(), workspace.clone());
    let publisher = MemoryPublisher::new();
    let controller = controller_with(Arc::new(transfer), workspace, &publisher);

    let queue = MemoryQueue::new();
    queue.push(MAGNET).await;
    let summary = worker::run(&mut queue.source(), &controller, std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(queue.settlements().await, vec![Settlement::Acked]);
    assert_eq!(publisher.published().await, vec![expected_job()]);
    assert!(!staging.exists());

    let recorded = std::fs::read_to_string(&record).unwrap();
    let lines: Vec<&str> = recorded.lines().collect();
    assert_eq!(lines[0], "copy");
    let staged = staging
        .join(&expected_job().title)
        .to_string_lossy()
        .into_owned();
    assert_eq!(lines[1], staged);
    assert_eq!(lines[2], "gdrive:Airing/Show - 1080p");
    assert_eq!(lines[3], "--config");

    // A failed download leaves nothing behind and goes back to the queue
    let tools = ToolsConfig {
        fetch_program: fetch_broken,
        publish_program: publish,
        ..ToolsConfig::default()
    };
    let workspace = Workspace::new(&staging);
    let transfer = ProcessTransfer::new(tools, destination, workspace.clone());
    let publisher = MemoryPublisher::new();
    let controller = controller_with(Arc::new(transfer), workspace, &publisher);

    let queue = MemoryQueue::new();
    queue.push(MAGNET).await;
    worker::run(&mut queue.source(), &controller, std::future::pending())
        .await
        .unwrap();

    assert_eq!(
        queue.settlements().await,
        vec![Settlement::Nacked { requeue: true }]
    );
    assert_eq!(queue.requeued().await, 1);
    assert!(publisher.published().await.is_empty());
    assert!(!staging.exists());
    // publish never ran for the failed job
    assert_eq!(std::fs::read_to_string(&record).unwrap(), recorded);
}

/// Transfer and notice publisher that checks every earlier delivery was
/// settled before the next job starts
struct DispositionTracker {
    queue: MemoryQueue,
    fetched: AtomicUsize,
    overlaps: AtomicUsize,
    notices: AtomicUsize,
}

impl DispositionTracker {
    fn new(queue: MemoryQueue) -> Self {
        Self {
            queue,
            fetched: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
            notices: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transfer for DispositionTracker {
    async fn fetch(&self, job: &Job) -> relaybox::transfer::Result<FetchOutcome> {
        let earlier = self.fetched.fetch_add(1, Ordering::SeqCst);
        if self.queue.settlements().await.len() != earlier {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        tokio::time::sleep(Duration::from_millis(5)).await;

        if job.title.contains("broken") {
            return Err(relaybox::transfer::TransferError::Failed {
                step: relaybox::transfer::Step::Fetch,
                code: Some(1),
            });
        }
        Ok(FetchOutcome::Fetched)
    }

    async fn ensure_destination(&self, _job: &Job) -> relaybox::transfer::Result<()> {
        Ok(())
    }

    async fn publish(&self, _job: &Job) -> relaybox::transfer::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl NoticePublisher for DispositionTracker {
    async fn publish(&self, _job: &Job) -> relaybox::queue::Result<()> {
        // the notice must follow the ack of the job being announced
        let settlements = self.queue.settlements().await;
        if settlements.len() != self.fetched.load(Ordering::SeqCst)
            || settlements.last() != Some(&Settlement::Acked)
        {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.notices.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_one_job_in_flight_until_disposition() {
    let temp_dir = TempDir::new().unwrap();
    let queue = MemoryQueue::new();
    let tracker = Arc::new(DispositionTracker::new(queue.clone()));
    let controller = JobController::builder()
        .normalizer(Normalizer::new(&NormalizerConfig::default()).unwrap())
        .transfer(tracker.clone())
        .workspace(Workspace::new(temp_dir.path().join("temp")))
        .publisher(tracker.clone())
        .build();

    for episode in 1..=4 {
        let title = if episode == 2 {
            format!("Show - {:02} (720p) broken.mkv", episode)
        } else {
            format!("Show - {:02} (720p).mkv", episode)
        };
        let record = serde_json::json!({
            "title": title,
            "link": format!("magnet:?xt=urn:btih:{:040}", episode),
            "show": "Show - 720p",
        });
        queue.push(record.to_string()).await;
    }

    let summary = worker::run(&mut queue.source(), &controller, std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.processed, 4);
    assert_eq!(summary.stop, StopReason::ConsumerCancelled);
    assert_eq!(tracker.fetched.load(Ordering::SeqCst), 4);
    assert_eq!(tracker.notices.load(Ordering::SeqCst), 3);
    assert_eq!(tracker.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(
        queue.settlements().await,
        vec![
            Settlement::Acked,
            Settlement::Nacked { requeue: true },
            Settlement::Acked,
            Settlement::Acked,
        ]
    );
    assert_eq!(queue.max_unsettled().await, 1);
}

#[tokio::test]
async fn test_requeued_job_succeeds_on_redelivery() {
    /// Fails the first fetch only
    #[derive(Default)]
    struct FlakyTransfer {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Transfer for FlakyTransfer {
        async fn fetch(&self, _job: &Job) -> relaybox::transfer::Result<FetchOutcome> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(relaybox::transfer::TransferError::Failed {
                    step: relaybox::transfer::Step::Fetch,
                    code: Some(1),
                });
            }
            Ok(FetchOutcome::Fetched)
        }

        async fn ensure_destination(&self, _job: &Job) -> relaybox::transfer::Result<()> {
            Ok(())
        }

        async fn publish(&self, _job: &Job) -> relaybox::transfer::Result<()> {
            Ok(())
        }
    }

    let temp_dir = TempDir::new().unwrap();
    let publisher = MemoryPublisher::new();
    let controller = controller_with(
        Arc::new(FlakyTransfer::default()),
        Workspace::new(temp_dir.path().join("temp")),
        &publisher,
    );

    let queue = MemoryQueue::new();
    queue.push(MAGNET).await;

    worker::run(&mut queue.source(), &controller, std::future::pending())
        .await
        .unwrap();
    assert!(publisher.published().await.is_empty());

    assert_eq!(queue.redeliver().await, 1);
    worker::run(&mut queue.source(), &controller, std::future::pending())
        .await
        .unwrap();

    assert_eq!(
        queue.settlements().await,
        vec![Settlement::Nacked { requeue: true }, Settlement::Acked]
    );
    assert_eq!(publisher.published().await, vec![expected_job()]);
}
