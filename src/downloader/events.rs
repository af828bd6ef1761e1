use super::backend::BackendKind;
use super::task::{Task, TaskId, TaskState};

/// 编排器对外发布的事件，展示层只通过它和快照读取任务状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    BackendSelected(BackendKind),
    /// 整个运行只报告一次
    DaemonUnavailable { reason: String },
    UrlResolved { task_id: TaskId, url: String },
    SizeKnown { task_id: TaskId, bytes: u64 },
    StateChanged {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },
    Progress {
        task_id: TaskId,
        percent: u8,
        rate: Option<u64>,
    },
    TaskFailed { task_id: TaskId, message: String },
    Stopped(RunSummary),
    Finished(RunSummary),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub queued: usize,
}

impl RunSummary {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut summary = Self::default();
        for task in tasks.into_iter().filter(|t| t.selected) {
            match task.state {
                TaskState::Completed => summary.completed += 1,
                TaskState::Error => summary.failed += 1,
                TaskState::Cancelled => summary.cancelled += 1,
                // 解析中的任务之后会回到 Queued
                TaskState::Queued | TaskState::Resolving => summary.queued += 1,
                _ => {}
            }
        }
        summary
    }
}
