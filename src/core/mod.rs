//! Core: 下载任务的注册表、任务协调、分块传输、错误与事件等核心逻辑模块

pub mod client;
pub mod error;
pub mod event;
pub mod registry;
pub mod task;

// 只导出主流程和其它模块实际用到的类型
pub use error::{DownloadError, DownloadResult, ErrorKind};
pub use event::{DownloadEvent, EventSink};
pub use registry::{
    AddBatch, AddTask, CancelTaskById, DownloadRegistry, GetTask, ListTasks, PauseTaskById, ResumeTaskById,
    SetDefaultThreadCount, SetGlobalSpeedLimit, SetProxy, SetTaskSpeedLimit,
};
pub use task::{ChunkStatus, TaskSnapshot, TaskStatus};
