use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use super::error::DownloadError;

pub mod aria2;
pub mod fallback;
pub mod rpc;

pub use aria2::{Aria2Backend, Aria2Client, Aria2Controller};
pub use fallback::FallbackBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// aria2 守护进程，通过 JSON-RPC 控制
    External,
    /// 内置的单连接下载器
    Fallback,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::External => f.write_str("aria2"),
            BackendKind::Fallback => f.write_str("内置下载器"),
        }
    }
}

/// 后端为一次下载分配的句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendHandle {
    /// aria2 的 gid
    Job(String),
    /// 内置下载器的工作任务编号
    Worker(u64),
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendHandle::Job(gid) => write!(f, "gid={}", gid),
            BackendHandle::Worker(id) => write!(f, "worker#{}", id),
        }
    }
}

/// 一次下载请求
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub destination_dir: PathBuf,
    pub destination_path: PathBuf,
    pub connections: usize,
}

/// 一次轮询的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// 本轮没有可用的数据，保持原状态
    NoUpdate,
    Progress {
        percent: u8,
        bytes_done: u64,
        bytes_total: Option<u64>,
        rate: Option<u64>,
    },
    Completed,
    Failed(String),
}

#[async_trait]
pub trait TransferBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// 提交下载，成功时返回句柄
    async fn start(&self, request: &TransferRequest) -> Result<BackendHandle, DownloadError>;

    async fn poll(&self, handle: &BackendHandle) -> PollOutcome;

    /// 要求停止单个下载，重复调用无副作用
    async fn cancel(&self, handle: &BackendHandle);

    /// 运行结束或全部停止时调用
    async fn shutdown(&self);
}

/// 按已完成字节数计算百分比，总大小未知时为 0
pub fn percent_of(done: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => (done.saturating_mul(100) / total).min(100) as u8,
        _ => 0,
    }
}
