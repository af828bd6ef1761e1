use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use batch_downloader::common::logger::PrettyLogger;
use batch_downloader::downloader::progress::DownloadProgress;
use batch_downloader::downloader::{Orchestrator, OrchestratorEvent, RunSummary, Task, TaskState};
use batch_downloader::parser::{load_url_list, parse_selection};

mod cli;

/// 根据 --select 标记要下载的行，行号从 1 开始
fn apply_selection(tasks: &mut [Task], select: Option<&str>) -> anyhow::Result<()> {
    let Some(range) = select else {
        return Ok(());
    };
    let rows = parse_selection(range).with_context(|| format!("无效的行号范围: {}", range))?;
    for task in tasks.iter_mut() {
        task.selected = rows.contains(&(task.id + 1));
    }
    debug!("已选择 {} 行", rows.len());
    Ok(())
}

fn print_summary(summary: &RunSummary, stopped: bool, tasks: &[Task]) {
    let title = if stopped { "下载已停止" } else { "下载完成" };
    PrettyLogger::run_summary(title, summary);

    for task in tasks.iter().filter(|t| t.state == TaskState::Error) {
        PrettyLogger::error(format!(
            "{}: {}",
            task.filename,
            task.error.as_deref().unwrap_or_default()
        ));
    }

    if stopped {
        PrettyLogger::warning(format!("还有 {} 个文件没有开始下载", summary.queued));
    } else if summary.failed == 0 {
        PrettyLogger::success("全部文件下载完成");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // 日志和进度条都写到 stderr，stdout 只留给最后的汇总
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    let config = args.to_config();
    config.validate()?;

    PrettyLogger::step_start("读取链接列表");
    let urls = load_url_list(&args.input)
        .await
        .with_context(|| format!("无法读取 {}", args.input.display()))?;
    info!("共 {} 个链接", urls.len());

    let mut tasks = Task::from_urls(urls);
    apply_selection(&mut tasks, args.select.as_deref())?;
    PrettyLogger::file_info("保存目录", config.destination_dir.display().to_string());

    let mut progress = DownloadProgress::new(&tasks);
    let orchestrator = Orchestrator::new(config, tasks);
    let mut events = orchestrator.subscribe();

    let stopper = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在停止全部下载");
            stopper.stop_all().await;
        }
    });

    let runner = orchestrator.clone();
    let mut start = tokio::spawn(async move { runner.start().await });
    let mut started = false;

    let stopped = loop {
        tokio::select! {
            result = &mut start, if !started => {
                started = true;
                result.context("启动任务异常退出")??;
            }
            event = events.recv() => match event {
                Ok(OrchestratorEvent::Finished(_)) => break false,
                Ok(OrchestratorEvent::Stopped(_)) => break true,
                Ok(OrchestratorEvent::BackendSelected(kind)) => {
                    progress.println(format!("{} {}", "使用下载器:".cyan(), kind));
                }
                Ok(OrchestratorEvent::DaemonUnavailable { reason }) => {
                    progress.println(format!("{} {}", "⚠".yellow(), reason));
                }
                Ok(event) => progress.handle(&event),
                Err(RecvError::Lagged(skipped)) => debug!("跳过了 {} 条事件", skipped),
                Err(RecvError::Closed) => break false,
            }
        }
    };

    let summary = orchestrator.wait().await;
    print_summary(&summary, stopped, &orchestrator.snapshot().await);
    Ok(())
}
