//! `task` 模块包含了与单个下载任务相关的所有逻辑
//!
//! 主要包括：
//! - `actor`: 任务协调器 `TaskCoordinator` 的定义
//! - `handlers`: 协调器的消息处理器
//! - `messages`: Actor 之间传递的消息
//! - `state`: 任务与分块状态
//! - `chunk`: 任务、分块记录与快照
//! - `planner`: 探测与分块切分
//! - `transfer`: 单个分块的传输单元
//! - `governor`: 限速与测速
//! - `merger`: 分块合并

pub mod actor;
pub mod chunk;
pub mod governor;
pub mod handlers;
pub mod merger;
pub mod messages;
pub mod planner;
pub mod state;
pub mod transfer;

// 导出核心组件，方便外部使用
pub use actor::TaskCoordinator;
pub use chunk::{ChunkRange, ChunkSnapshot, DownloadChunk, DownloadTask, TaskSnapshot};
pub use messages::{CancelTask, PauseTask, QuerySnapshot, ResumeTask, SetSpeedLimit, StartTask};
pub use planner::{probe_and_plan, FileInfo, PlanResult};
pub use state::{ChunkStatus, TaskStatus};
