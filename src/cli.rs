use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use batch_downloader::downloader::config::{
    Aria2Options, CONCURRENCY_RANGE, CONNECTIONS_RANGE, DEFAULT_RPC_PORT, OrchestratorConfig,
};

/// 批量文件下载器
#[derive(Parser, Debug)]
#[command(name = "batchdl")]
#[command(version)]
#[command(about = "从 URL 列表批量下载文件，优先使用 aria2", long_about = None)]
pub struct Cli {
    /// URL 列表文件，每行一个链接
    #[arg(long, short, value_name = "FILE")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub input: PathBuf,

    /// 文件保存目录
    #[arg(long, short, value_name = "DIR")]
    #[arg(default_value = "./downloads")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// 同时下载的文件数
    #[arg(long, short, default_value_t = 3)]
    #[arg(value_parser = clap::value_parser!(u16).range(
        *CONCURRENCY_RANGE.start() as i64..=*CONCURRENCY_RANGE.end() as i64
    ))]
    pub concurrency: u16,

    /// 单个文件的连接数 (仅 aria2)
    #[arg(long, default_value_t = 8)]
    #[arg(value_parser = clap::value_parser!(u16).range(
        *CONNECTIONS_RANGE.start() as i64..=*CONNECTIONS_RANGE.end() as i64
    ))]
    pub connections: u16,

    /// 只下载指定行 (可选)
    #[arg(long, value_name = "RANGE")]
    #[arg(help = "指定要下载的行号范围，如: 1-3,5,7-9")]
    pub select: Option<String>,

    /// aria2 RPC 地址，启动 aria2 时使用其中的端口
    #[arg(long, value_name = "URL", conflicts_with = "rpc_port")]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub rpc_url: Option<String>,

    /// aria2 RPC 端口，生成 http://localhost:<PORT>/jsonrpc
    #[arg(long, value_name = "PORT")]
    pub rpc_port: Option<u16>,

    /// aria2 RPC 密钥
    #[arg(long, value_name = "SECRET")]
    pub rpc_secret: Option<String>,

    /// aria2c 可执行文件路径
    #[arg(long = "aria2c", value_name = "PATH", env = "ARIA2C_PATH")]
    #[arg(default_value = "aria2c")]
    pub aria2_binary: String,

    /// 不使用 aria2，直接用内置下载器
    #[arg(long)]
    pub no_daemon: bool,

    /// 不解析中转页面里的真实链接
    #[arg(long)]
    pub no_resolve: bool,

    #[arg(long, value_name = "MS", default_value_t = 1000)]
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_ms: u64,

    /// 输出调试日志
    #[arg(long, short)]
    pub verbose: bool,
}

impl Cli {
    pub fn to_config(&self) -> OrchestratorConfig {
        let rpc_url = self.rpc_url.clone().unwrap_or_else(|| {
            format!(
                "http://localhost:{}/jsonrpc",
                self.rpc_port.unwrap_or(DEFAULT_RPC_PORT)
            )
        });

        let mut config = OrchestratorConfig::new(self.output_dir.clone());
        config.concurrency_limit = usize::from(self.concurrency);
        config.per_transfer_connections = usize::from(self.connections);
        config.poll_interval = Duration::from_millis(self.poll_interval_ms);
        config.resolve_links = !self.no_resolve;
        config.aria2 = Aria2Options {
            rpc_url,
            secret: self.rpc_secret.clone(),
            binary: self.aria2_binary.clone(),
            enabled: !self.no_daemon,
            ..Aria2Options::default()
        };
        config
    }
}
