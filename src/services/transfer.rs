use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;

use crate::cancel::CancelFlag;
use crate::errors::{Result, RomfetchError};
use crate::models::{TransferEvent, TransferOptions, TransferOutcome, TransferTask};
use crate::services::scanner::part_path_for;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Token-bucket pacing over one-second windows. `acquire` blocks in 100 ms
/// steps until the current window has room; a zero limit disables pacing.
/// Accounting of transferred bytes is never affected, only timing.
#[derive(Clone)]
pub struct BandwidthThrottler {
    max_bytes_per_second: Arc<tokio::sync::Mutex<u64>>,
    current_window_bytes: Arc<tokio::sync::Mutex<u64>>,
    reset_started: Arc<AtomicBool>,
}

impl BandwidthThrottler {
    pub fn new(max_bps: u64) -> Self {
        Self {
            max_bytes_per_second: Arc::new(tokio::sync::Mutex::new(max_bps)),
            current_window_bytes: Arc::new(tokio::sync::Mutex::new(0)),
            reset_started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn acquire(&self, bytes: u64) {
        loop {
            let max = *self.max_bytes_per_second.lock().await;
            if max == 0 {
                return;
            }
            // A chunk can exceed the whole window budget (low KB/s limits vs
            // network-sized chunks); charge it one full window so it is still
            // admitted instead of waiting forever.
            let want = bytes.min(max);
            let mut current = self.current_window_bytes.lock().await;
            if *current + want <= max {
                *current += want;
                return;
            }
            drop(current);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn start_reset_task(&self) {
        if self.reset_started.swap(true, Ordering::SeqCst) {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            self.reset_started.store(false, Ordering::SeqCst);
            return;
        }
        let counter = self.current_window_bytes.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let mut guard = counter.lock().await;
                *guard = 0;
            }
        });
    }
}

struct AggregateState {
    done: u64,
    total: u64,
    skipped: u64,
}

/// Rate-limits progress events to one pair (per-file + aggregate) every
/// 100 ms, with a forced emit on file completion.
struct ProgressReporter {
    last_sent: Instant,
}

impl ProgressReporter {
    fn new() -> Self {
        Self {
            last_sent: Instant::now() - Duration::from_secs(5),
        }
    }

    fn maybe_report(
        &mut self,
        events: &UnboundedSender<TransferEvent>,
        task: &TransferTask,
        file_index: usize,
        total_files: usize,
        agg: &AggregateState,
        force: bool,
    ) {
        let now = Instant::now();
        if !force && now.duration_since(self.last_sent) < PROGRESS_INTERVAL {
            return;
        }
        self.last_sent = now;
        let _ = events.send(TransferEvent::FileProgress {
            name: task.name_raw.clone(),
            current: task.downloaded_bytes,
            total: task.remote_size,
            file_index,
            total_files,
        });
        let _ = events.send(TransferEvent::AggregateProgress {
            current: agg.done,
            total: agg.total,
            skipped: agg.skipped,
            is_final: false,
        });
    }
}

/// Moves every task over the wire, strictly one at a time. Single-file
/// failures are logged and folded into `skipped_files` with the aggregate
/// denominator corrected; cancellation aborts the whole batch with a
/// distinguished error.
pub async fn transfer(
    tasks: Vec<TransferTask>,
    total_size: u64,
    initial_skipped_size: u64,
    options: &TransferOptions,
    client: &Client,
    cancel: &CancelFlag,
    events: &UnboundedSender<TransferEvent>,
) -> Result<TransferOutcome> {
    let throttler = options.throttle.as_ref().map(|config| {
        let throttler = BandwidthThrottler::new(config.bytes_per_second());
        throttler.start_reset_task();
        throttler
    });

    let total_files = tasks.len();
    let mut agg = AggregateState {
        done: initial_skipped_size,
        total: total_size,
        skipped: initial_skipped_size,
    };
    let mut outcome = TransferOutcome::default();

    for (file_index, mut task) in tasks.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(RomfetchError::CancelledBetweenFiles);
        }
        let mut resumed = task.downloaded_bytes;
        let started = download_one(
            &mut task,
            &mut resumed,
            file_index,
            total_files,
            client,
            throttler.as_ref(),
            cancel,
            events,
            &mut agg,
        )
        .await;
        match started {
            Ok(()) => {
                tracing::info!(
                    "transfer complete name={} bytes={}",
                    task.name_raw,
                    task.downloaded_bytes
                );
                outcome.downloaded_files.push(task);
            }
            Err(error) if error.is_cancellation() => return Err(error),
            Err(error) => {
                tracing::warn!("transfer failed name={} error={}", task.name_raw, error);
                agg.done = agg.done.saturating_sub(task.downloaded_bytes);
                agg.skipped = agg.skipped.saturating_sub(resumed);
                agg.total = agg.total.saturating_sub(task.remote_size);
                let _ = tokio::fs::remove_file(part_path_for(&task.local_target_path)).await;
                outcome.skipped_files.push(task.name_raw);
            }
        }
    }

    let _ = events.send(TransferEvent::AggregateProgress {
        current: agg.done,
        total: agg.total,
        skipped: agg.skipped,
        is_final: true,
    });
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn download_one(
    task: &mut TransferTask,
    resumed: &mut u64,
    file_index: usize,
    total_files: usize,
    client: &Client,
    throttler: Option<&BandwidthThrottler>,
    cancel: &CancelFlag,
    events: &UnboundedSender<TransferEvent>,
    agg: &mut AggregateState,
) -> Result<()> {
    if let Some(parent) = task.local_target_path.parent() {
        if let Err(error) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(
                "mkdir failed path={} error={}",
                parent.display(),
                error
            );
        }
    }
    let part_path = part_path_for(&task.local_target_path);

    let mut request = client.get(&task.url);
    if task.downloaded_bytes > 0 {
        request = request.header(RANGE, format!("bytes={}-", task.downloaded_bytes));
    }
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RomfetchError::Http(format!(
            "GET {} returned {}",
            task.url, status
        )));
    }

    let mut file = if task.downloaded_bytes > 0 && status == StatusCode::PARTIAL_CONTENT {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&part_path)
            .await?
    } else {
        // Server ignored the range request; the resumed bytes get transferred
        // again, so drop them from the accounting and start over.
        if task.downloaded_bytes > 0 {
            tracing::warn!(
                "resume not honored name={} status={}",
                task.name_raw,
                status
            );
            agg.done = agg.done.saturating_sub(*resumed);
            agg.skipped = agg.skipped.saturating_sub(*resumed);
            task.downloaded_bytes = 0;
            *resumed = 0;
        }
        tokio::fs::File::create(&part_path).await?
    };

    let mut reporter = ProgressReporter::new();
    let mut stream = response.bytes_stream();
    let mut cancelled = false;
    while let Some(next) = stream.next().await {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let chunk = next?;
        if let Some(throttler) = throttler {
            throttler.acquire(chunk.len() as u64).await;
        }
        file.write_all(&chunk).await?;
        task.downloaded_bytes += chunk.len() as u64;
        agg.done += chunk.len() as u64;
        reporter.maybe_report(events, task, file_index, total_files, agg, false);
    }
    drop(stream);

    if cancelled {
        let _ = file.shutdown().await;
        drop(file);
        let _ = tokio::fs::remove_file(&part_path).await;
        return Err(RomfetchError::CancelledMidFile {
            file: task.name_raw.clone(),
        });
    }

    file.flush().await?;
    drop(file);
    tokio::fs::rename(&part_path, &task.local_target_path).await?;
    task.path = Some(task.local_target_path.clone());
    reporter.maybe_report(events, task, file_index, total_files, agg, true);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SkipReason;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serves one canned HTTP response on an ephemeral loopback port and
    /// hands back the raw request bytes for header assertions.
    async fn serve_once(response: Vec<u8>) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buffer = [0u8; 2048];
            loop {
                let read = socket.read(&mut buffer).await.expect("read request");
                request.extend_from_slice(&buffer[..read]);
                if read == 0 || request.windows(4).any(|window| window == b"\r\n\r\n") {
                    break;
                }
            }
            socket.write_all(&response).await.expect("write response");
            let _ = socket.shutdown().await;
            request
        });
        (format!("http://{}", addr), handle)
    }

    fn response_with_body(status_line: &str, body: &[u8]) -> Vec<u8> {
        let mut response = format!(
            "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status_line,
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);
        response
    }

    fn task(name: &str, url: &str, dir: &std::path::Path, remote_size: u64) -> TransferTask {
        TransferTask {
            name_raw: name.to_string(),
            base_name: name.to_string(),
            url: url.to_string(),
            relative_path: String::new(),
            remote_size,
            downloaded_bytes: 0,
            skip: false,
            skip_reason: SkipReason::None,
            local_target_path: dir.join(name),
            path: None,
        }
    }

    #[tokio::test]
    async fn unlimited_throttler_never_blocks() {
        let throttler = BandwidthThrottler::new(0);
        let start = Instant::now();
        throttler.acquire(10 * 1024 * 1024).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn oversized_chunk_is_admitted_against_a_full_window() {
        let throttler = BandwidthThrottler::new(1024);
        throttler.start_reset_task();
        let admitted = tokio::time::timeout(Duration::from_secs(3), throttler.acquire(4096))
            .await
            .is_ok();
        assert!(admitted);
    }

    #[tokio::test]
    async fn throttler_paces_second_window() {
        let throttler = BandwidthThrottler::new(1024);
        throttler.acquire(1024).await;
        // Window full and no reset task running; the next acquire must wait.
        let waited = tokio::time::timeout(Duration::from_millis(150), throttler.acquire(1))
            .await
            .is_err();
        assert!(waited);
    }

    #[tokio::test]
    async fn completed_download_renames_part_to_final_path() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let body = b"hello world";
        let (base, server) = serve_once(response_with_body("HTTP/1.1 200 OK", body)).await;
        let tasks = vec![task(
            "A.zip",
            &format!("{}/A.zip", base),
            dir.path(),
            body.len() as u64,
        )];
        let options = TransferOptions::new(dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancelFlag::new();

        let outcome = transfer(
            tasks,
            body.len() as u64,
            0,
            &options,
            &Client::new(),
            &cancel,
            &tx,
        )
        .await
        .expect("transfer");

        assert!(outcome.skipped_files.is_empty());
        assert_eq!(outcome.downloaded_files.len(), 1);
        let final_path = dir.path().join("A.zip");
        assert_eq!(
            outcome.downloaded_files[0].path.as_deref(),
            Some(final_path.as_path())
        );
        assert_eq!(std::fs::read(&final_path).expect("read output"), body);
        assert!(!dir.path().join("A.zip.part").exists());
        let _ = server.await;
    }

    #[tokio::test]
    async fn resume_sends_range_header_and_appends_to_part() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("A.zip.part"), b"hello ").expect("seed part file");
        let (base, server) = serve_once(response_with_body(
            "HTTP/1.1 206 Partial Content",
            b"world",
        ))
        .await;
        let mut resume = task("A.zip", &format!("{}/A.zip", base), dir.path(), 11);
        resume.downloaded_bytes = 6;
        let options = TransferOptions::new(dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancelFlag::new();

        let outcome = transfer(vec![resume], 11, 6, &options, &Client::new(), &cancel, &tx)
            .await
            .expect("transfer");

        assert_eq!(outcome.downloaded_files.len(), 1);
        assert_eq!(outcome.downloaded_files[0].downloaded_bytes, 11);
        assert_eq!(
            std::fs::read(dir.path().join("A.zip")).expect("read output"),
            b"hello world"
        );
        let request = server.await.expect("server task");
        assert!(String::from_utf8_lossy(&request).contains("bytes=6-"));
    }

    #[tokio::test]
    async fn ignored_range_request_restarts_from_scratch() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("A.zip.part"), b"XXXXXX").expect("seed part file");
        let (base, server) = serve_once(response_with_body("HTTP/1.1 200 OK", b"hello world")).await;
        let mut resume = task("A.zip", &format!("{}/A.zip", base), dir.path(), 11);
        resume.downloaded_bytes = 6;
        let options = TransferOptions::new(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancelFlag::new();

        let outcome = transfer(vec![resume], 11, 6, &options, &Client::new(), &cancel, &tx)
            .await
            .expect("transfer");

        // The stale bytes are discarded, not prepended.
        assert_eq!(
            std::fs::read(dir.path().join("A.zip")).expect("read output"),
            b"hello world"
        );
        assert_eq!(outcome.downloaded_files[0].downloaded_bytes, 11);

        let mut final_agg = None;
        while let Ok(event) = rx.try_recv() {
            if let TransferEvent::AggregateProgress {
                current,
                total,
                skipped,
                is_final: true,
            } = event
            {
                final_agg = Some((current, total, skipped));
            }
        }
        // The credited resume bytes are rolled back from done and skipped.
        assert_eq!(final_agg, Some((11, 11, 0)));
        let _ = server.await;
    }

    #[tokio::test]
    async fn mid_stream_cancellation_deletes_the_part_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (resume_tx, resume_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buffer = [0u8; 2048];
            let _ = socket.read(&mut buffer).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 32\r\n\r\n")
                .await
                .expect("write headers");
            socket.write_all(&[1u8; 16]).await.expect("write first half");
            let _ = resume_rx.await;
            let _ = socket.write_all(&[2u8; 16]).await;
        });

        let tasks = vec![task("A.zip", &format!("http://{}/A.zip", addr), dir.path(), 32)];
        let options = TransferOptions::new(dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancelFlag::new();

        let client = Client::new();
        let run = transfer(tasks, 32, 0, &options, &client, &cancel, &tx);
        let controller = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.request();
            let _ = resume_tx.send(());
        };
        let (result, _) = tokio::join!(run, controller);

        let error = result.expect_err("cancelled transfer");
        assert!(matches!(error, RomfetchError::CancelledMidFile { file } if file == "A.zip"));
        assert!(!dir.path().join("A.zip.part").exists());
        assert!(!dir.path().join("A.zip").exists());
        let _ = server.await;
    }

    #[tokio::test]
    async fn cancellation_before_first_file_is_distinguished() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let tasks = vec![task("A.zip", "http://127.0.0.1:1/A.zip", dir.path(), 10)];
        let options = TransferOptions::new(dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancelFlag::new();
        cancel.request();

        let error = transfer(tasks, 10, 0, &options, &Client::new(), &cancel, &tx)
            .await
            .expect_err("cancelled transfer");
        assert!(matches!(error, RomfetchError::CancelledBetweenFiles));
    }

    #[tokio::test]
    async fn single_file_failure_shrinks_totals_and_continues() {
        let dir = tempfile::tempdir().expect("create temp dir");
        // Nothing listens on port 1; the connection fails immediately and the
        // batch must finish with the file recorded as skipped.
        let tasks = vec![task("A.zip", "http://127.0.0.1:1/A.zip", dir.path(), 10)];
        let options = TransferOptions::new(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancelFlag::new();

        let outcome = transfer(tasks, 10, 0, &options, &Client::new(), &cancel, &tx)
            .await
            .expect("transfer");
        assert_eq!(outcome.skipped_files, vec!["A.zip".to_string()]);
        assert!(outcome.downloaded_files.is_empty());

        let mut final_agg = None;
        while let Ok(event) = rx.try_recv() {
            if let TransferEvent::AggregateProgress {
                current,
                total,
                is_final: true,
                ..
            } = event
            {
                final_agg = Some((current, total));
            }
        }
        // Denominator corrected down to zero after the only file failed.
        assert_eq!(final_agg, Some((0, 0)));
    }
}
