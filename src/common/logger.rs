use colored::*;

use crate::downloader::events::RunSummary;

/// 终端输出工具，进度条之外的提示都走这里
pub struct PrettyLogger;

impl PrettyLogger {
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    pub fn error(message: impl AsRef<str>) {
        println!("{} {}", "✗".red().bold(), message.as_ref());
    }

    /// 显示步骤开始
    pub fn step_start(step: impl AsRef<str>) {
        println!("\n{} {}", "▶".cyan().bold(), step.as_ref().bold());
    }

    pub fn file_info(label: impl AsRef<str>, path: impl AsRef<str>) {
        println!("{} {}: {}", "📁".blue().bold(), label.as_ref().bold(), path.as_ref());
    }

    /// 运行结束后的统计，数量为 0 的项目不显示颜色
    pub fn run_summary(title: impl AsRef<str>, summary: &RunSummary) {
        println!("\n{}", "─".repeat(50).bright_black());
        println!("{}", title.as_ref().bold());

        let rows = [
            ("完成", summary.completed, Color::Green),
            ("失败", summary.failed, Color::Red),
            ("取消", summary.cancelled, Color::Yellow),
            ("未开始", summary.queued, Color::BrightBlack),
        ];
        for (label, count, color) in rows {
            let count = if count > 0 {
                count.to_string().color(color).bold()
            } else {
                count.to_string().normal()
            };
            println!("  {:<6} {}", label, count);
        }
    }
}
