use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::rpc::{self, Aria2Status, RpcReply, STATUS_KEYS};
use super::{BackendHandle, BackendKind, PollOutcome, TransferBackend, TransferRequest};
use crate::common::client::client::HttpClient;
use crate::downloader::config::Aria2Options;
use crate::downloader::error::DownloadError;

/// aria2 JSON-RPC 客户端，只负责收发请求
#[derive(Debug, Clone)]
pub struct Aria2Client {
    http: HttpClient,
    rpc_url: String,
    secret: Option<String>,
}

impl Aria2Client {
    pub fn new(options: &Aria2Options) -> Result<Self, DownloadError> {
        Ok(Self {
            http: HttpClient::new(options.rpc_timeout)?,
            rpc_url: options.rpc_url.clone(),
            secret: options.secret.clone(),
        })
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> RpcReply<Value> {
        let request = rpc::build_request(method, params, self.secret.as_deref());

        let resp = match self.http.post_json(&self.rpc_url, &request).await {
            Ok(resp) => resp,
            Err(e) => return RpcReply::TransportError(e.to_string()),
        };

        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => return RpcReply::TransportError(e.to_string()),
        };

        // aria2 对调用错误也会返回非 200，先看包体里有没有 error 对象
        match rpc::decode_envelope(&body) {
            RpcReply::Malformed(_) if !status.is_success() => {
                RpcReply::TransportError(format!("HTTP {}", status))
            }
            reply => reply,
        }
    }

    /// 探测 aria2 是否在线，网络错误只返回 false
    pub async fn probe(&self) -> bool {
        let request = rpc::build_request("system.listMethods", Vec::new(), None);
        match self.http.post_json(&self.rpc_url, &request).await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("aria2 探测失败: {}", e);
                false
            }
        }
    }

    pub async fn add_uri(
        &self,
        url: &str,
        request: &TransferRequest,
    ) -> Result<String, DownloadError> {
        let connections = request.connections.to_string();
        let options = json!({
            "dir": request.destination_dir.to_string_lossy(),
            "split": connections,
            "max-connection-per-server": connections,
        });

        match self.call("aria2.addUri", vec![json!([url]), options]).await {
            RpcReply::Ok(Value::String(gid)) => Ok(gid),
            RpcReply::Ok(other) => Err(DownloadError::Rpc(format!(
                "addUri 返回了意外的结果: {}",
                other
            ))),
            RpcReply::Rejected { code, message } => {
                Err(DownloadError::RpcRejected { code, message })
            }
            RpcReply::Malformed(msg) | RpcReply::TransportError(msg) => {
                Err(DownloadError::Rpc(msg))
            }
        }
    }

    pub async fn tell_status(&self, gid: &str) -> RpcReply<Aria2Status> {
        self.call("aria2.tellStatus", vec![json!(gid), json!(STATUS_KEYS)])
            .await
            .and_then(rpc::parse_status)
    }
}

/// 管理 aria2 守护进程：探测、按需启动、关闭自己启动的进程
#[derive(Debug)]
pub struct Aria2Controller {
    client: Aria2Client,
    options: Aria2Options,
    proc: Mutex<Option<Child>>,
}

impl Aria2Controller {
    pub fn new(options: Aria2Options) -> Result<Self, DownloadError> {
        Ok(Self {
            client: Aria2Client::new(&options)?,
            options,
            proc: Mutex::new(None),
        })
    }

    pub fn client(&self) -> &Aria2Client {
        &self.client
    }

    pub async fn is_running(&self) -> bool {
        self.client.probe().await
    }

    pub fn launch_args(&self, concurrency: usize, connections: usize) -> Vec<String> {
        let mut args = vec![
            "--enable-rpc".to_string(),
            "--rpc-listen-all=false".to_string(),
            "--rpc-allow-origin-all".to_string(),
            "--continue=true".to_string(),
            "--daemon=false".to_string(),
            format!("--rpc-listen-port={}", self.options.listen_port()),
            format!("--max-connection-per-server={}", connections),
            format!("--split={}", connections),
            format!("--max-concurrent-downloads={}", concurrency),
        ];
        if let Some(secret) = &self.options.secret {
            args.push(format!("--rpc-secret={}", secret));
        }
        args
    }

    /// 已在运行则直接返回 true，否则启动 aria2 并在有限次数内等待 RPC 就绪
    pub async fn ensure_running(&self, concurrency: usize, connections: usize) -> bool {
        if self.is_running().await {
            info!("检测到已运行的 aria2: {}", self.options.rpc_url);
            return true;
        }

        let args = self.launch_args(concurrency, connections);
        debug!("启动 aria2: {} {}", self.options.binary, args.join(" "));

        let child = Command::new(&self.options.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("无法启动 aria2 ({}): {}", self.options.binary, e);
                return false;
            }
        };
        *self.proc.lock().await = Some(child);

        for attempt in 1..=self.options.launch_attempts {
            if self.is_running().await {
                info!("aria2 已启动 (第 {} 次探测)", attempt);
                return true;
            }
            tokio::time::sleep(self.options.launch_interval).await;
        }

        if self.is_running().await {
            return true;
        }

        warn!("aria2 启动后 RPC 仍不可用，放弃");
        self.stop().await;
        false
    }

    /// 只关闭自己启动的进程，外部已有的 aria2 不受影响
    pub async fn stop(&self) {
        let child = self.proc.lock().await.take();
        if let Some(mut child) = child {
            match child.kill().await {
                Ok(()) => info!("已关闭 aria2 进程"),
                Err(e) => warn!("关闭 aria2 进程失败: {}", e),
            }
        }
    }

    #[cfg(test)]
    pub async fn owns_process(&self) -> bool {
        self.proc.lock().await.is_some()
    }
}

pub struct Aria2Backend {
    controller: Arc<Aria2Controller>,
}

impl Aria2Backend {
    pub fn new(controller: Arc<Aria2Controller>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl TransferBackend for Aria2Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::External
    }

    async fn start(&self, request: &TransferRequest) -> Result<BackendHandle, DownloadError> {
        let gid = self.controller.client().add_uri(&request.url, request).await?;
        debug!("aria2 已接收任务: {} -> gid={}", request.url, gid);
        Ok(BackendHandle::Job(gid))
    }

    async fn poll(&self, handle: &BackendHandle) -> PollOutcome {
        let BackendHandle::Job(gid) = handle else {
            warn!("aria2 后端收到了非 gid 句柄: {}", handle);
            return PollOutcome::NoUpdate;
        };

        match self.controller.client().tell_status(gid).await {
            RpcReply::Ok(status) => status.to_outcome(),
            RpcReply::Rejected { code, message } => {
                debug!("tellStatus({}) 被拒绝 ({}): {}", gid, code, message);
                PollOutcome::NoUpdate
            }
            RpcReply::Malformed(msg) => {
                debug!("tellStatus({}) 响应格式错误: {}", gid, msg);
                PollOutcome::NoUpdate
            }
            RpcReply::TransportError(msg) => {
                debug!("tellStatus({}) 请求失败: {}", gid, msg);
                PollOutcome::NoUpdate
            }
        }
    }

    async fn cancel(&self, handle: &BackendHandle) {
        // 单个任务不单独移除，停止时整个守护进程会被关闭
        debug!("aria2 任务 {} 随守护进程一起停止", handle);
    }

    async fn shutdown(&self) {
        self.controller.stop().await;
    }
}
