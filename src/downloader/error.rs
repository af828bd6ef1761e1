use std::path::PathBuf;

use thiserror::Error;

use super::task::TaskState;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP错误: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("非法的状态转换: {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("RPC 调用失败: {0}")]
    Rpc(String),

    #[error("aria2 返回错误 ({code}): {message}")]
    RpcRejected { code: i64, message: String },

    #[error("目标目录不可用: {0:?}")]
    DestinationUnavailable(PathBuf),

    #[error("下载已取消")]
    Cancelled,

    #[error("下载线程异常退出: {0}")]
    WorkerPanicked(String),

    #[error("配置错误: {0}")]
    Config(String),
}
