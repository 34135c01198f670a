//! 引擎向观察者发出的事件
//!
//! 所有任务共用一个多路复用通道，事件以任务ID标记。同一任务的事件由唯一的
//! 协调器按顺序写入，不同任务之间不保证顺序。

use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::core::error::ErrorKind;
use crate::core::task::state::{ChunkStatus, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DownloadEvent {
    Progress {
        task_id: Uuid,
        percent: u8,
    },
    ChunkProgress {
        task_id: Uuid,
        chunk_index: usize,
        percent: u8,
        speed_kbps: f64,
        status: ChunkStatus,
    },
    Status {
        task_id: Uuid,
        status: TaskStatus,
    },
    Speed {
        task_id: Uuid,
        speed_kbps: f64,
    },
    Completed {
        task_id: Uuid,
    },
    Error {
        task_id: Uuid,
        kind: ErrorKind,
        message: String,
    },
}

impl DownloadEvent {
    pub fn task_id(&self) -> Uuid {
        match self {
            DownloadEvent::Progress { task_id, .. }
            | DownloadEvent::ChunkProgress { task_id, .. }
            | DownloadEvent::Status { task_id, .. }
            | DownloadEvent::Speed { task_id, .. }
            | DownloadEvent::Completed { task_id }
            | DownloadEvent::Error { task_id, .. } => *task_id,
        }
    }
}

/// 事件发送端
///
/// 观察者已关闭接收端时发送会静默失败，引擎继续运行。
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<DownloadEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: DownloadEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("事件接收端已关闭");
        }
    }
}
