use actix::Message;

use crate::core::error::DownloadError;
use super::chunk::TaskSnapshot;
use super::state::ChunkStatus;

/// 启动任务：探测、切分并开始所有分块
pub struct StartTask;
impl Message for StartTask { type Result = (); }

/// 暂停任务
pub struct PauseTask;
impl Message for PauseTask { type Result = (); }

/// 恢复任务
pub struct ResumeTask;
impl Message for ResumeTask { type Result = (); }

/// 取消任务，所有分块退出并清理暂存文件后才返回
pub struct CancelTask;
impl Message for CancelTask { type Result = (); }

/// 修改任务速度上限（KB/s），0 表示不限速
pub struct SetSpeedLimit(pub f64);
impl Message for SetSpeedLimit { type Result = (); }

/// 查询任务快照
pub struct QuerySnapshot;
impl Message for QuerySnapshot { type Result = TaskSnapshot; }

/// 分块传输单元上报的进度、速度与状态
#[derive(Debug, Clone)]
pub struct ChunkReport {
    pub chunk_index: usize,
    pub percent: u8,
    pub speed_kbps: f64,
    pub status: ChunkStatus,
    pub error: Option<DownloadError>,
}
impl Message for ChunkReport { type Result = (); }
