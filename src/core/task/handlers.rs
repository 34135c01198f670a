use actix::{ActorContext, ActorFutureExt, Handler, MessageResult, ResponseActFuture, WrapFuture};

use crate::core::error::DownloadError;
use crate::core::event::DownloadEvent;
use crate::utils::validator::clamp_speed_limit;
use super::actor::{remove_staging_dir, TaskCoordinator};
use super::messages::*;
use super::state::{ChunkStatus, TaskStatus};

impl Handler<StartTask> for TaskCoordinator {
    type Result = ();
    fn handle(&mut self, _msg: StartTask, ctx: &mut Self::Context) {
        if self.task.status != TaskStatus::Pending {
            return;
        }
        self.begin(ctx);
    }
}

impl Handler<PauseTask> for TaskCoordinator {
    type Result = ();
    fn handle(&mut self, _msg: PauseTask, _ctx: &mut Self::Context) {
        match self.task.status {
            TaskStatus::Pending | TaskStatus::Probing => self.pause_requested = true,
            TaskStatus::Active => {
                self.pause_requested = true;
                for control in &self.controls {
                    control.pause();
                }
                self.task.speed_kbps = 0.0;
                self.set_status(TaskStatus::Paused);
                self.events.emit(DownloadEvent::Speed { task_id: self.task.id, speed_kbps: 0.0 });
                log::info!("任务已暂停: {}", self.task.id);
            }
            _ => {}
        }
    }
}

impl Handler<ResumeTask> for TaskCoordinator {
    type Result = ();
    fn handle(&mut self, _msg: ResumeTask, _ctx: &mut Self::Context) {
        match self.task.status {
            TaskStatus::Pending | TaskStatus::Probing => self.pause_requested = false,
            TaskStatus::Paused => {
                self.pause_requested = false;
                // 已完成或出错的分块不再恢复
                for (chunk, control) in self.task.chunks.iter().zip(&self.controls) {
                    if !chunk.status.is_finished() {
                        control.resume();
                    }
                }
                self.task.downloaded_size = self.task.sum_downloaded();
                self.meter.reset(self.task.downloaded_size);
                self.set_status(TaskStatus::Active);
                log::info!("任务已恢复: {}", self.task.id);
            }
            _ => {}
        }
    }
}

impl Handler<CancelTask> for TaskCoordinator {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, _msg: CancelTask, ctx: &mut Self::Context) -> Self::Result {
        self.stop_supervision(ctx);
        if !self.task.status.is_terminal() {
            self.task.downloaded_size = self.task.sum_downloaded();
            self.task.speed_kbps = 0.0;
            self.set_status(TaskStatus::Cancelled);
            log::info!("任务已取消: {}", self.task.id);
        }

        // 先通知所有分块退出，全部确认后才删除暂存目录
        let joins = self.cancel_chunks();
        let staging_dir = self.staging_dir.clone();
        Box::pin(
            async move {
                futures::future::join_all(joins).await;
                remove_staging_dir(&staging_dir).await;
            }
            .into_actor(self)
            .map(|_, act, ctx| {
                for chunk in act.task.chunks.iter_mut() {
                    if !chunk.status.is_finished() {
                        chunk.status = ChunkStatus::Cancelled;
                    }
                }
                ctx.stop();
            }),
        )
    }
}

impl Handler<SetSpeedLimit> for TaskCoordinator {
    type Result = ();
    fn handle(&mut self, msg: SetSpeedLimit, _ctx: &mut Self::Context) {
        let kbps = clamp_speed_limit(msg.0);
        self.task.speed_limit_kbps = kbps;
        self.speed_cap.set(kbps);
        log::debug!("任务 {} 速度上限: {} KB/s", self.task.id, kbps);
    }
}

impl Handler<QuerySnapshot> for TaskCoordinator {
    type Result = MessageResult<QuerySnapshot>;
    fn handle(&mut self, _msg: QuerySnapshot, _ctx: &mut Self::Context) -> Self::Result {
        if !self.task.chunks.is_empty() {
            self.task.downloaded_size = self.task.sum_downloaded();
        }
        MessageResult(self.task.snapshot())
    }
}

impl Handler<ChunkReport> for TaskCoordinator {
    type Result = ();
    fn handle(&mut self, msg: ChunkReport, ctx: &mut Self::Context) {
        // 任务结束后分块的迟到上报直接丢弃
        if self.task.status.is_terminal() {
            return;
        }
        let Some(chunk) = self.task.chunks.get_mut(msg.chunk_index) else {
            log::warn!("任务 {} 收到未知分块 {} 的上报", self.task.id, msg.chunk_index);
            return;
        };
        chunk.status = msg.status;

        self.events.emit(DownloadEvent::ChunkProgress {
            task_id: self.task.id,
            chunk_index: msg.chunk_index,
            percent: msg.percent,
            speed_kbps: msg.speed_kbps,
            status: msg.status,
        });

        match msg.status {
            ChunkStatus::Error => {
                let error = msg.error.unwrap_or_else(|| {
                    DownloadError::Transfer(format!("分块 {} 下载失败", msg.chunk_index))
                });
                self.fail(error, ctx);
            }
            ChunkStatus::Done if self.task.all_chunks_done() => self.complete(ctx),
            _ => {}
        }
    }
}
