use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::events::OrchestratorEvent;
use super::task::{Task, TaskId, TaskState};
use crate::common::format::FormatTool;

/// 终端里的任务列表：每个任务一条进度条，消息栏显示大小和状态
pub struct DownloadProgress {
    multi_pb: MultiProgress,
    bars: HashMap<TaskId, TaskBar>,
}

struct TaskBar {
    pb: ProgressBar,
    filename: String,
    size: Option<u64>,
    status: String,
}

impl TaskBar {
    fn refresh(&self) {
        self.pb.set_message(format!(
            "{:<32} {:>10}  {}",
            truncate(&self.filename, 32),
            FormatTool::format_optional_size(self.size),
            self.status
        ));
    }
}

impl DownloadProgress {
    pub fn new(tasks: &[Task]) -> Self {
        let multi_pb = MultiProgress::new();
        let style = ProgressStyle::with_template("[{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");

        let bars = tasks
            .iter()
            .filter(|t| t.selected)
            .map(|task| {
                let pb = multi_pb.add(ProgressBar::new(100));
                pb.set_style(style.clone());
                let bar = TaskBar {
                    pb,
                    filename: task.filename.clone(),
                    size: task.size_bytes,
                    status: task.state.label().to_string(),
                };
                bar.refresh();
                (task.id, bar)
            })
            .collect();

        Self { multi_pb, bars }
    }

    pub fn println(&self, line: impl AsRef<str>) {
        let _ = self.multi_pb.println(line.as_ref());
    }

    pub fn handle(&mut self, event: &OrchestratorEvent) {
        match event {
            OrchestratorEvent::SizeKnown { task_id, bytes } => {
                if let Some(bar) = self.bars.get_mut(task_id) {
                    bar.size = Some(*bytes);
                    bar.refresh();
                }
            }
            OrchestratorEvent::StateChanged { task_id, to, .. } => {
                if let Some(bar) = self.bars.get_mut(task_id) {
                    bar.status = to.label().to_string();
                    bar.refresh();
                    match to {
                        TaskState::Completed => bar.pb.finish(),
                        TaskState::Error | TaskState::Cancelled => bar.pb.abandon(),
                        _ => {}
                    }
                }
            }
            OrchestratorEvent::Progress {
                task_id,
                percent,
                rate,
            } => {
                if let Some(bar) = self.bars.get_mut(task_id) {
                    bar.pb.set_position(u64::from(*percent));
                    if let Some(rate) = rate {
                        bar.status = format!(
                            "{} @ {}",
                            TaskState::Downloading,
                            FormatTool::format_speed(*rate)
                        );
                        bar.refresh();
                    }
                }
            }
            OrchestratorEvent::TaskFailed { task_id, message } => {
                if let Some(bar) = self.bars.get_mut(task_id) {
                    bar.status = format!("{}: {}", TaskState::Error, message);
                    bar.refresh();
                }
            }
            _ => {}
        }
    }
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        return name.to_string();
    }
    let head: String = name.chars().take(width.saturating_sub(1)).collect();
    format!("{}…", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("short.iso", 32), "short.iso");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
