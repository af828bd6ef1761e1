use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use super::error::DownloadError;

pub const CONCURRENCY_RANGE: RangeInclusive<usize> = 1..=16;
pub const CONNECTIONS_RANGE: RangeInclusive<usize> = 1..=32;

pub const DEFAULT_RPC_PORT: u16 = 6800;

/// aria2 守护进程相关配置
#[derive(Debug, Clone)]
pub struct Aria2Options {
    pub rpc_url: String,
    pub secret: Option<String>,
    pub binary: String,
    pub rpc_timeout: Duration,
    pub launch_attempts: u32,
    pub launch_interval: Duration,
    /// 为 false 时直接使用内置下载器
    pub enabled: bool,
}

impl Default for Aria2Options {
    fn default() -> Self {
        Self {
            rpc_url: format!("http://localhost:{}/jsonrpc", DEFAULT_RPC_PORT),
            secret: None,
            binary: default_aria2_binary(),
            rpc_timeout: Duration::from_secs(3),
            launch_attempts: 20,
            launch_interval: Duration::from_millis(200),
            enabled: true,
        }
    }
}

impl Aria2Options {
    /// 启动 aria2 时监听的端口，与探测用的 rpc_url 保持一致
    pub fn listen_port(&self) -> u16 {
        Url::parse(&self.rpc_url)
            .ok()
            .and_then(|url| url.port_or_known_default())
            .unwrap_or(DEFAULT_RPC_PORT)
    }
}

/// 获取 aria2c 路径（支持环境变量）
pub fn default_aria2_binary() -> String {
    std::env::var("ARIA2C_PATH").unwrap_or_else(|_| "aria2c".to_string())
}

/// 单次运行的全部配置，由调用方在 start 时传入
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub concurrency_limit: usize,
    pub per_transfer_connections: usize,
    pub destination_dir: PathBuf,
    pub poll_interval: Duration,
    pub resolve_links: bool,
    pub probe_sizes: bool,
    pub resolve_timeout: Duration,
    pub probe_timeout: Duration,
    pub transfer_timeout: Duration,
    pub aria2: Aria2Options,
}

impl OrchestratorConfig {
    pub fn new(destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            concurrency_limit: 3,
            per_transfer_connections: 8,
            destination_dir: destination_dir.into(),
            poll_interval: Duration::from_secs(1),
            resolve_links: true,
            probe_sizes: true,
            resolve_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(8),
            transfer_timeout: Duration::from_secs(15),
            aria2: Aria2Options::default(),
        }
    }

    pub fn validate(&self) -> Result<(), DownloadError> {
        if !CONCURRENCY_RANGE.contains(&self.concurrency_limit) {
            return Err(DownloadError::Config(format!(
                "并发数必须在 {}-{} 之间，当前为 {}",
                CONCURRENCY_RANGE.start(),
                CONCURRENCY_RANGE.end(),
                self.concurrency_limit
            )));
        }
        if !CONNECTIONS_RANGE.contains(&self.per_transfer_connections) {
            return Err(DownloadError::Config(format!(
                "单文件连接数必须在 {}-{} 之间，当前为 {}",
                CONNECTIONS_RANGE.start(),
                CONNECTIONS_RANGE.end(),
                self.per_transfer_connections
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(DownloadError::Config("轮询间隔不能为 0".to_string()));
        }
        if self.destination_dir.as_os_str().is_empty() {
            return Err(DownloadError::Config("未指定下载目录".to_string()));
        }
        Ok(())
    }
}
