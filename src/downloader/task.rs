use std::fmt;
use std::path::{Path, PathBuf};

use super::backend::BackendHandle;
use super::error::DownloadError;
use crate::parser::url_list::filename_from_url;

pub type TaskId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Queued,
    Resolving,
    Starting,
    Downloading,
    Completed,
    Error,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Error | TaskState::Cancelled
        )
    }

    /// 状态机允许的转换，终态不能再离开
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, Resolving)
                | (Resolving, Queued)
                | (Queued, Starting)
                | (Starting, Downloading)
                | (Starting, Error)
                | (Downloading, Completed)
                | (Downloading, Error)
                | (Downloading, Cancelled)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Resolving => "resolving link...",
            TaskState::Starting => "starting",
            TaskState::Downloading => "downloading",
            TaskState::Completed => "complete",
            TaskState::Error => "error",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub url: String,
    pub filename: String,
    pub destination_path: Option<PathBuf>,
    pub backend_handle: Option<BackendHandle>,
    pub state: TaskState,
    pub size_bytes: Option<u64>,
    pub progress_percent: u8,
    pub transfer_rate_bytes_per_sec: Option<u64>,
    pub selected: bool,
    pub error: Option<String>,
    url_resolved: bool,
}

impl Task {
    pub fn new(id: TaskId, url: impl Into<String>) -> Self {
        let url = url.into();
        let filename = filename_from_url(&url);
        Self {
            id,
            url,
            filename,
            destination_path: None,
            backend_handle: None,
            state: TaskState::Queued,
            size_bytes: None,
            progress_percent: 0,
            transfer_rate_bytes_per_sec: None,
            selected: true,
            error: None,
            url_resolved: false,
        }
    }

    /// 按照列表顺序创建任务，id 即行号（从 0 开始）
    pub fn from_urls<I, S>(urls: I) -> Vec<Task>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter()
            .enumerate()
            .map(|(id, url)| Task::new(id, url))
            .collect()
    }

    pub fn transition(&mut self, next: TaskState) -> Result<TaskState, DownloadError> {
        if !self.state.can_transition_to(next) {
            return Err(DownloadError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        if next != TaskState::Downloading {
            self.transfer_rate_bytes_per_sec = None;
        }
        Ok(previous)
    }

    /// 链接解析只允许改写一次 URL
    pub fn rewrite_url(&mut self, url: String) -> bool {
        if self.url_resolved {
            return false;
        }
        self.url_resolved = true;
        if url == self.url {
            return false;
        }
        self.url = url;
        true
    }

    pub fn attach_handle(
        &mut self,
        handle: BackendHandle,
        destination: &Path,
    ) -> Result<(), DownloadError> {
        if self.backend_handle.is_some() {
            return Err(DownloadError::InvalidTransition {
                from: self.state,
                to: TaskState::Downloading,
            });
        }
        self.backend_handle = Some(handle);
        self.destination_path = Some(destination.to_path_buf());
        Ok(())
    }

    /// 同一个句柄下进度只增不减
    pub fn update_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent > self.progress_percent {
            self.progress_percent = percent;
            true
        } else {
            false
        }
    }
}
