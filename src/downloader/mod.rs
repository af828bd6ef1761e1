pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod progress;
pub mod task;

pub use backend::{BackendHandle, BackendKind, PollOutcome, TransferBackend, TransferRequest};
pub use config::{Aria2Options, OrchestratorConfig};
pub use error::DownloadError;
pub use events::{OrchestratorEvent, RunSummary};
pub use orchestrator::Orchestrator;
pub use task::{Task, TaskId, TaskState};
