use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{
    Aria2Backend, Aria2Controller, BackendKind, FallbackBackend, PollOutcome, TransferBackend,
    TransferRequest,
};
use super::config::OrchestratorConfig;
use super::error::DownloadError;
use super::events::{OrchestratorEvent, RunSummary};
use super::task::{Task, TaskId, TaskState};
use crate::common::client::client::HttpClient;
use crate::parser::LinkResolver;

const EVENT_CAPACITY: usize = 1024;

struct RunState {
    tasks: Vec<Task>,
    queue: VecDeque<TaskId>,
    active: Vec<TaskId>,
    started: bool,
    stopped: bool,
    finished: bool,
}

impl RunState {
    fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }
}

struct Inner {
    config: OrchestratorConfig,
    backend: OnceLock<Arc<dyn TransferBackend>>,
    state: Mutex<RunState>,
    events: broadcast::Sender<OrchestratorEvent>,
    shutdown: CancellationToken,
    finished_tx: watch::Sender<bool>,
}

/// 单次运行的编排器：持有等待队列和活动集合，负责选择后端、分发和轮询
///
/// 每次 start 都应该构造新的实例，运行结束或 stop_all 之后即可丢弃。
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, tasks: Vec<Task>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (finished_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                backend: OnceLock::new(),
                state: Mutex::new(RunState {
                    tasks,
                    queue: VecDeque::new(),
                    active: Vec::new(),
                    started: false,
                    stopped: false,
                    finished: false,
                }),
                events,
                shutdown: CancellationToken::new(),
                finished_tx,
            }),
        }
    }

    /// 使用指定的后端，跳过 aria2 探测
    pub fn with_backend(
        config: OrchestratorConfig,
        tasks: Vec<Task>,
        backend: Arc<dyn TransferBackend>,
    ) -> Self {
        let orchestrator = Self::new(config, tasks);
        let _ = orchestrator.inner.backend.set(backend);
        orchestrator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.inner.backend.get().map(|backend| backend.kind())
    }

    pub async fn snapshot(&self) -> Vec<Task> {
        self.inner.state.lock().await.tasks.clone()
    }

    pub async fn active_count(&self) -> usize {
        self.inner.state.lock().await.active.len()
    }

    pub async fn queued_count(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn summary(&self) -> RunSummary {
        RunSummary::from_tasks(&self.inner.state.lock().await.tasks)
    }

    /// 选择后端、解析链接、填满并发槽位，然后启动轮询
    pub async fn start(&self) -> Result<(), DownloadError> {
        let inner = &self.inner;
        inner.config.validate()?;

        {
            let mut state = inner.state.lock().await;
            if state.started {
                return Err(DownloadError::Config("编排器只能启动一次".to_string()));
            }
            state.started = true;
        }

        let dest = &inner.config.destination_dir;
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|_| DownloadError::DestinationUnavailable(dest.clone()))?;

        let backend = match inner.backend.get() {
            Some(backend) => Arc::clone(backend),
            None => {
                let selected = inner.select_backend().await?;
                Arc::clone(inner.backend.get_or_init(|| selected))
            }
        };
        info!("本次运行使用: {}", backend.kind());
        inner.emit(OrchestratorEvent::BackendSelected(backend.kind()));

        if inner.config.probe_sizes {
            tokio::spawn(Arc::clone(inner).probe_sizes());
        }

        if inner.config.resolve_links {
            inner.resolve_links().await;
        }

        let mut state = inner.state.lock().await;
        if state.stopped {
            // 启动过程中收到了停止命令
            backend.shutdown().await;
            return Ok(());
        }
        state.queue = state
            .tasks
            .iter()
            .filter(|t| t.selected && t.state == TaskState::Queued)
            .map(|t| t.id)
            .collect();
        debug!("待下载任务数: {}", state.queue.len());

        inner.fill_slots(&mut state, &backend).await;
        if inner.finish_if_drained(&mut state, &backend).await {
            return Ok(());
        }
        drop(state);

        tokio::spawn(Arc::clone(inner).poll_loop(backend));
        Ok(())
    }

    /// 停止所有正在下载的任务，排队中的任务保持 Queued；可以重复调用
    pub async fn stop_all(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();

        let mut state = inner.state.lock().await;
        if state.stopped {
            return;
        }
        state.stopped = true;

        let backend = inner.backend.get().cloned();
        let active = std::mem::take(&mut state.active);

        for id in active {
            let Some(task) = state.task(id) else {
                continue;
            };
            if task.state.is_terminal() {
                continue;
            }
            let Some(handle) = task.backend_handle.clone() else {
                continue;
            };
            if let Some(backend) = &backend {
                backend.cancel(&handle).await;
            }
            inner.set_state(&mut state, id, TaskState::Cancelled);
        }

        if let Some(backend) = &backend {
            backend.shutdown().await;
        }

        let summary = RunSummary::from_tasks(&state.tasks);
        if !state.finished {
            state.finished = true;
            info!(
                "已停止全部下载: 取消 {} 个，{} 个仍在排队",
                summary.cancelled, summary.queued
            );
            inner.emit(OrchestratorEvent::Stopped(summary));
        }
        inner.finished_tx.send_replace(true);
    }

    /// 等待运行结束（全部任务到达终态或被停止）
    pub async fn wait(&self) -> RunSummary {
        let mut rx = self.inner.finished_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
        self.summary().await
    }
}

impl Inner {
    fn emit(&self, event: OrchestratorEvent) {
        // 没有订阅者时发送失败，直接忽略
        let _ = self.events.send(event);
    }

    async fn select_backend(&self) -> Result<Arc<dyn TransferBackend>, DownloadError> {
        let config = &self.config;

        let reason = if config.aria2.enabled {
            let controller = Arc::new(Aria2Controller::new(config.aria2.clone())?);
            if controller
                .ensure_running(config.concurrency_limit, config.per_transfer_connections)
                .await
            {
                return Ok(Arc::new(Aria2Backend::new(controller)));
            }
            format!("无法连接或启动 aria2 ({})，改用内置下载器", config.aria2.binary)
        } else {
            "已禁用 aria2，使用内置下载器".to_string()
        };

        warn!("{}", reason);
        self.emit(OrchestratorEvent::DaemonUnavailable { reason });

        let client = HttpClient::for_streaming(config.transfer_timeout, config.transfer_timeout)?;
        Ok(Arc::new(FallbackBackend::new(client)))
    }

    // 逐个解析选中任务的链接，不持有锁等待网络
    async fn resolve_links(&self) {
        let client = match HttpClient::new(self.config.resolve_timeout) {
            Ok(client) => client,
            Err(e) => {
                warn!("无法创建链接解析客户端，跳过解析: {}", e);
                return;
            }
        };
        let resolver = LinkResolver::new(client);

        let targets: Vec<TaskId> = {
            let state = self.state.lock().await;
            state
                .tasks
                .iter()
                .filter(|t| t.selected && t.state == TaskState::Queued)
                .map(|t| t.id)
                .collect()
        };

        for id in targets {
            if self.shutdown.is_cancelled() {
                break;
            }

            let url = {
                let mut state = self.state.lock().await;
                let Some(url) = state.task(id).map(|t| t.url.clone()) else {
                    continue;
                };
                self.set_state(&mut state, id, TaskState::Resolving);
                url
            };

            let resolved = resolver.resolve(&url).await;

            let mut state = self.state.lock().await;
            let rewritten = state
                .task_mut(id)
                .map(|task| task.rewrite_url(resolved.clone()))
                .unwrap_or(false);
            if rewritten {
                self.emit(OrchestratorEvent::UrlResolved {
                    task_id: id,
                    url: resolved,
                });
            }
            self.set_state(&mut state, id, TaskState::Queued);
        }
    }

    async fn probe_sizes(self: Arc<Self>) {
        let client = match HttpClient::new(self.config.probe_timeout) {
            Ok(client) => client,
            Err(e) => {
                debug!("无法创建探测客户端: {}", e);
                return;
            }
        };

        let targets: Vec<(TaskId, String)> = {
            let state = self.state.lock().await;
            state
                .tasks
                .iter()
                .filter(|t| t.selected && t.size_bytes.is_none())
                .map(|t| (t.id, t.url.clone()))
                .collect()
        };

        for (id, url) in targets {
            if self.shutdown.is_cancelled() {
                break;
            }
            let Some(bytes) = client.head_content_length(&url).await else {
                continue;
            };
            let mut state = self.state.lock().await;
            if let Some(task) = state.task_mut(id) {
                if task.size_bytes.is_none() {
                    task.size_bytes = Some(bytes);
                    self.emit(OrchestratorEvent::SizeKnown { task_id: id, bytes });
                }
            }
        }
    }

    fn set_state(&self, state: &mut RunState, id: TaskId, next: TaskState) -> bool {
        let Some(task) = state.task_mut(id) else {
            return false;
        };
        match task.transition(next) {
            Ok(from) => {
                debug!("任务 #{} {}: {} -> {}", id, task.filename, from, next);
                self.emit(OrchestratorEvent::StateChanged {
                    task_id: id,
                    from,
                    to: next,
                });
                true
            }
            Err(e) => {
                warn!("任务 #{}: {}", id, e);
                false
            }
        }
    }

    /// 在持有状态锁的情况下填满空闲槽位，保证活动集合不超过并发上限
    ///
    /// stop_all 先取消 shutdown 再等待状态锁，所以这里同时检查两者，
    /// 收到停止命令后剩下的任务留在队列里。
    async fn fill_slots(&self, state: &mut RunState, backend: &Arc<dyn TransferBackend>) {
        while !state.stopped
            && !self.shutdown.is_cancelled()
            && state.active.len() < self.config.concurrency_limit
        {
            let Some(id) = state.queue.pop_front() else {
                break;
            };
            self.dispatch(state, id, backend).await;
        }
    }

    async fn dispatch(&self, state: &mut RunState, id: TaskId, backend: &Arc<dyn TransferBackend>) {
        if !self.set_state(state, id, TaskState::Starting) {
            return;
        }
        let Some(task) = state.task(id) else {
            return;
        };

        let destination_path = self.config.destination_dir.join(&task.filename);
        let request = TransferRequest {
            url: task.url.clone(),
            destination_dir: self.config.destination_dir.clone(),
            destination_path: destination_path.clone(),
            connections: self.config.per_transfer_connections,
        };

        let result = backend.start(&request).await;

        let attached = match result {
            Ok(handle) => match state.task_mut(id) {
                Some(task) => task.attach_handle(handle, &destination_path),
                None => return,
            },
            Err(e) => Err(e),
        };

        match attached {
            Ok(()) => {
                state.active.push(id);
                self.set_state(state, id, TaskState::Downloading);
            }
            Err(e) => {
                warn!("任务 #{} 提交失败: {}", id, e);
                self.fail(state, id, e.to_string());
            }
        }
    }

    fn fail(&self, state: &mut RunState, id: TaskId, message: String) {
        if let Some(task) = state.task_mut(id) {
            task.error = Some(message.clone());
        }
        if self.set_state(state, id, TaskState::Error) {
            self.emit(OrchestratorEvent::TaskFailed {
                task_id: id,
                message,
            });
        }
    }

    /// 应用一次轮询结果，返回任务是否进入终态
    fn apply_outcome(&self, state: &mut RunState, id: TaskId, outcome: PollOutcome) -> bool {
        match outcome {
            PollOutcome::NoUpdate => false,
            PollOutcome::Progress {
                percent,
                bytes_total,
                rate,
                ..
            } => {
                let Some(task) = state.task_mut(id) else {
                    return false;
                };
                let advanced = task.update_progress(percent);
                let rate_changed = task.transfer_rate_bytes_per_sec != rate;
                task.transfer_rate_bytes_per_sec = rate;
                let new_size = match (task.size_bytes, bytes_total) {
                    (None, Some(total)) => {
                        task.size_bytes = Some(total);
                        Some(total)
                    }
                    _ => None,
                };
                let percent = task.progress_percent;

                if let Some(bytes) = new_size {
                    self.emit(OrchestratorEvent::SizeKnown { task_id: id, bytes });
                }
                if advanced || rate_changed {
                    self.emit(OrchestratorEvent::Progress {
                        task_id: id,
                        percent,
                        rate,
                    });
                }
                false
            }
            PollOutcome::Completed => {
                if let Some(task) = state.task_mut(id) {
                    task.update_progress(100);
                }
                self.emit(OrchestratorEvent::Progress {
                    task_id: id,
                    percent: 100,
                    rate: None,
                });
                self.set_state(state, id, TaskState::Completed)
            }
            PollOutcome::Failed(message) => {
                self.fail(state, id, message);
                true
            }
        }
    }

    /// 轮询一次全部活动任务，返回是否需要继续轮询
    async fn poll_once(&self, backend: &Arc<dyn TransferBackend>) -> bool {
        let mut state = self.state.lock().await;
        if state.stopped || state.finished {
            return false;
        }

        let active = state.active.clone();
        for id in active {
            if self.shutdown.is_cancelled() {
                return false;
            }
            let Some(handle) = state.task(id).and_then(|t| t.backend_handle.clone()) else {
                continue;
            };

            let outcome = backend.poll(&handle).await;
            if self.apply_outcome(&mut state, id, outcome) {
                state.active.retain(|active_id| *active_id != id);
                self.fill_slots(&mut state, backend).await;
            }
        }

        !self.finish_if_drained(&mut state, backend).await
    }

    async fn poll_loop(self: Arc<Self>, backend: Arc<dyn TransferBackend>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if !self.poll_once(&backend).await {
                break;
            }
        }
        debug!("轮询结束");
    }

    // 队列和活动集合都为空时结束本次运行
    async fn finish_if_drained(
        &self,
        state: &mut RunState,
        backend: &Arc<dyn TransferBackend>,
    ) -> bool {
        if state.finished {
            return true;
        }
        if state.stopped || !state.queue.is_empty() || !state.active.is_empty() {
            return false;
        }

        state.finished = true;
        self.shutdown.cancel();
        backend.shutdown().await;

        let summary = RunSummary::from_tasks(&state.tasks);
        info!(
            "全部任务结束: 完成 {} 个，失败 {} 个",
            summary.completed, summary.failed
        );
        self.emit(OrchestratorEvent::Finished(summary));
        self.finished_tx.send_replace(true);
        true
    }
}
