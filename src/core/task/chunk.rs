use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::state::{ChunkStatus, TaskStatus};

/// 分块字节区间 `[start, end]`，两端都包含
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    /// 分块大小
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// 按整数向下取整计算进度，结果始终在 0..=100
pub fn chunk_percent(downloaded: u64, len: u64) -> u8 {
    if len == 0 {
        return 0;
    }
    let downloaded = downloaded.min(len) as u128;
    (downloaded * 100 / len as u128) as u8
}

/// 下载块
///
/// `downloaded` 由负责该块的传输单元独占写入，协调器只读取。
#[derive(Debug, Clone)]
pub struct DownloadChunk {
    pub range: ChunkRange,
    pub downloaded: Arc<AtomicU64>,
    pub status: ChunkStatus,
    pub staging_path: Option<PathBuf>,
}

impl DownloadChunk {
    pub fn new(range: ChunkRange) -> Self {
        Self {
            range,
            downloaded: Arc::new(AtomicU64::new(0)),
            status: ChunkStatus::Pending,
            staging_path: None,
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn percent(&self) -> u8 {
        chunk_percent(self.downloaded(), self.range.size())
    }

    pub fn snapshot(&self) -> ChunkSnapshot {
        ChunkSnapshot {
            index: self.range.index,
            start: self.range.start,
            end: self.range.end,
            downloaded: self.downloaded(),
            percent: self.percent(),
            status: self.status,
        }
    }
}

/// 单个下载任务的记录
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: Uuid,
    pub url: String,
    pub destination: PathBuf,
    pub total_size: u64,
    pub downloaded_size: u64,
    pub status: TaskStatus,
    pub speed_kbps: f64,
    pub speed_limit_kbps: f64,
    pub thread_count: usize,
    pub chunks: Vec<DownloadChunk>,
    pub error: Option<String>,
}

impl DownloadTask {
    pub fn new(id: Uuid, url: String, destination: PathBuf, thread_count: usize, speed_limit_kbps: f64) -> Self {
        Self {
            id,
            url,
            destination,
            total_size: 0,
            downloaded_size: 0,
            status: TaskStatus::Pending,
            speed_kbps: 0.0,
            speed_limit_kbps,
            thread_count,
            chunks: Vec::new(),
            error: None,
        }
    }

    /// 所有分块 `downloaded` 之和，由协调器同步到 `downloaded_size`
    pub fn sum_downloaded(&self) -> u64 {
        self.chunks.iter().map(|c| c.downloaded()).sum()
    }

    pub fn all_chunks_done(&self) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(|c| c.status == ChunkStatus::Done)
    }

    /// 聚合进度；未全部完成前最多为 99
    pub fn percent(&self) -> u8 {
        if self.all_chunks_done() {
            return 100;
        }
        chunk_percent(self.downloaded_size, self.total_size).min(99)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            url: self.url.clone(),
            destination: self.destination.clone(),
            total_size: self.total_size,
            downloaded_size: self.downloaded_size,
            percent: self.percent(),
            status: self.status,
            speed_kbps: self.speed_kbps,
            speed_limit_kbps: self.speed_limit_kbps,
            thread_count: self.thread_count,
            chunks: self.chunks.iter().map(DownloadChunk::snapshot).collect(),
            error: self.error.clone(),
        }
    }
}

/// 分块只读快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkSnapshot {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub downloaded: u64,
    pub percent: u8,
    pub status: ChunkStatus,
}

/// `get_task` 返回的任务只读快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub url: String,
    pub destination: PathBuf,
    pub total_size: u64,
    pub downloaded_size: u64,
    pub percent: u8,
    pub status: TaskStatus,
    pub speed_kbps: f64,
    pub speed_limit_kbps: f64,
    pub thread_count: usize,
    pub chunks: Vec<ChunkSnapshot>,
    pub error: Option<String>,
}
