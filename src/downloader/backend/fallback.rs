use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{BackendHandle, BackendKind, PollOutcome, TransferBackend, TransferRequest, percent_of};
use crate::common::client::client::{HttpClient, content_length_header};
use crate::downloader::error::DownloadError;

/// 写盘缓冲大小
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerProgress {
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
}

struct Worker {
    progress: watch::Receiver<WorkerProgress>,
    cancel: CancellationToken,
    join: JoinHandle<Result<u64, DownloadError>>,
}

/// 内置下载器：每个任务一个独立的 tokio 任务，单连接流式写盘
pub struct FallbackBackend {
    client: HttpClient,
    workers: DashMap<u64, Worker>,
    next_id: AtomicU64,
}

impl FallbackBackend {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            workers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    #[cfg(test)]
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }
}

#[async_trait]
impl TransferBackend for FallbackBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fallback
    }

    async fn start(&self, request: &TransferRequest) -> Result<BackendHandle, DownloadError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (progress_tx, progress_rx) = watch::channel(WorkerProgress::default());
        let cancel = CancellationToken::new();

        let client = self.client.clone();
        let url = request.url.clone();
        let dest = request.destination_path.clone();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            let result = run_transfer(&client, &url, &dest, &token, &progress_tx).await;
            match &result {
                Ok(bytes) => info!("✅ 下载完成: {} ({} 字节)", dest.display(), bytes),
                Err(DownloadError::Cancelled) => debug!("下载已取消: {}", url),
                Err(e) => error!("❌ 下载失败: {}, 错误: {}", url, e),
            }
            result
        });

        self.workers.insert(
            id,
            Worker {
                progress: progress_rx,
                cancel,
                join,
            },
        );
        Ok(BackendHandle::Worker(id))
    }

    async fn poll(&self, handle: &BackendHandle) -> PollOutcome {
        let BackendHandle::Worker(id) = handle else {
            return PollOutcome::NoUpdate;
        };

        // 读锁必须在 remove 之前释放
        let running = match self.workers.get(id) {
            None => return PollOutcome::NoUpdate,
            Some(worker) => (!worker.join.is_finished()).then(|| *worker.progress.borrow()),
        };

        let Some(progress) = running else {
            return match self.workers.remove(id) {
                Some((_, worker)) => finish(worker).await,
                None => PollOutcome::NoUpdate,
            };
        };

        PollOutcome::Progress {
            percent: percent_of(progress.bytes_done, progress.bytes_total),
            bytes_done: progress.bytes_done,
            bytes_total: progress.bytes_total,
            rate: None,
        }
    }

    async fn cancel(&self, handle: &BackendHandle) {
        if let BackendHandle::Worker(id) = handle {
            if let Some(worker) = self.workers.get(id) {
                worker.cancel.cancel();
            }
        }
    }

    async fn shutdown(&self) {
        for worker in self.workers.iter() {
            worker.cancel.cancel();
        }
    }
}

// 工作任务已经结束，取回它的结果
async fn finish(worker: Worker) -> PollOutcome {
    match worker.join.await {
        Ok(Ok(_)) => PollOutcome::Completed,
        Ok(Err(e)) => PollOutcome::Failed(e.to_string()),
        Err(e) => PollOutcome::Failed(DownloadError::WorkerPanicked(e.to_string()).to_string()),
    }
}

async fn run_transfer(
    client: &HttpClient,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
    progress_tx: &watch::Sender<WorkerProgress>,
) -> Result<u64, DownloadError> {
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        response = client.get_raw_response(url) => response?,
    };
    let response = response.error_for_status()?;

    let bytes_total = content_length_header(response.headers());
    debug!("开始下载: {} -> {}, 大小: {:?}", url, dest.display(), bytes_total);

    let file = tokio::fs::File::create(dest).await?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
    let mut stream = response.bytes_stream();

    let mut downloaded = 0u64;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;

        writer.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        progress_tx.send_replace(WorkerProgress {
            bytes_done: downloaded,
            bytes_total,
        });
    }

    writer.flush().await?;
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend() -> FallbackBackend {
        let client =
            HttpClient::for_streaming(Duration::from_secs(2), Duration::from_secs(2)).unwrap();
        FallbackBackend::new(client)
    }

    fn request(url: String, dir: &Path) -> TransferRequest {
        TransferRequest {
            url,
            destination_dir: dir.to_path_buf(),
            destination_path: dir.join("out.bin"),
            connections: 1,
        }
    }

    async fn poll_until_done(backend: &FallbackBackend, handle: &BackendHandle) -> PollOutcome {
        for _ in 0..200 {
            match backend.poll(handle).await {
                PollOutcome::Progress { .. } | PollOutcome::NoUpdate => {
                    tokio::time::sleep(Duration::from_millis(10)).await
                }
                done => return done,
            }
        }
        panic!("worker did not finish");
    }

    #[tokio::test]
    async fn finished_worker_is_reported_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/out.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 200_000]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let backend = backend();
        let handle = backend
            .start(&request(format!("{}/out.bin", server.uri()), dir.path()))
            .await
            .unwrap();
        assert_eq!(backend.active_workers(), 1);

        assert_eq!(poll_until_done(&backend, &handle).await, PollOutcome::Completed);
        assert_eq!(backend.active_workers(), 0);
        assert_eq!(backend.poll(&handle).await, PollOutcome::NoUpdate);

        let written = tokio::fs::read(dir.path().join("out.bin")).await.unwrap();
        assert_eq!(written.len(), 200_000);
    }

    #[tokio::test]
    async fn cancelled_worker_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let backend = backend();
        let handle = backend
            .start(&request(format!("{}/slow", server.uri()), dir.path()))
            .await
            .unwrap();
        backend.cancel(&handle).await;

        assert_eq!(
            poll_until_done(&backend, &handle).await,
            PollOutcome::Failed(DownloadError::Cancelled.to_string())
        );
    }

    #[tokio::test]
    async fn job_handles_are_ignored() {
        let backend = backend();
        let handle = BackendHandle::Job("2089b05ecca3d829".to_string());
        assert_eq!(backend.poll(&handle).await, PollOutcome::NoUpdate);
    }
}
