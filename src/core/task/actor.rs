use actix::prelude::*;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{Config, ProxyConfig};
use crate::core::client::build_client;
use crate::core::error::DownloadError;
use crate::core::event::{DownloadEvent, EventSink};
use super::chunk::{DownloadChunk, DownloadTask};
use super::governor::{CapShare, SpeedCap, SpeedMeter};
use super::merger::{merge, StagedPart};
use super::messages::ChunkReport;
use super::planner::{probe_and_plan, PlanResult};
use super::state::{ChunkStatus, TaskStatus};
use super::transfer::{ChunkControl, ChunkTransfer, TransferOutcome};

/// 单任务协调器 Actor
///
/// 负责探测、启动所有分块、汇总进度与速度，全部完成后合并。
pub struct TaskCoordinator {
    pub(super) task: DownloadTask,
    pub(super) config: Config,
    pub(super) proxy: Arc<RwLock<ProxyConfig>>,
    pub(super) events: EventSink,
    pub(super) speed_cap: SpeedCap,
    pub(super) staging_dir: PathBuf,
    pub(super) controls: Vec<Arc<ChunkControl>>,
    pub(super) joins: Vec<JoinHandle<TransferOutcome>>,
    pub(super) supervisor: Option<SpawnHandle>,
    pub(super) probe: Option<SpawnHandle>,
    pub(super) meter: SpeedMeter,
    pub(super) last_percent: Option<u8>,
    /// 探测完成前收到的暂停请求
    pub(super) pause_requested: bool,
}

impl Actor for TaskCoordinator {
    type Context = Context<Self>;

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::debug!("任务协调器已停止: {}", self.task.id);
    }
}

impl TaskCoordinator {
    pub fn new(
        id: Uuid,
        url: String,
        destination: PathBuf,
        thread_count: usize,
        speed_limit_kbps: f64,
        config: Config,
        proxy: Arc<RwLock<ProxyConfig>>,
        events: EventSink,
    ) -> Self {
        let staging_dir = config.staging_root().join(id.to_string());
        Self {
            task: DownloadTask::new(id, url, destination, thread_count, speed_limit_kbps),
            config,
            proxy,
            events,
            speed_cap: SpeedCap::new(speed_limit_kbps),
            staging_dir,
            controls: Vec::new(),
            joins: Vec::new(),
            supervisor: None,
            probe: None,
            meter: SpeedMeter::new(0),
            last_percent: None,
            pause_requested: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.task.id
    }

    pub(super) fn set_status(&mut self, status: TaskStatus) {
        if self.task.status == status {
            return;
        }
        log::debug!("任务 {} 状态: {} -> {}", self.task.id, self.task.status, status);
        self.task.status = status;
        self.events.emit(DownloadEvent::Status { task_id: self.task.id, status });
    }

    fn proxy_snapshot(&self) -> ProxyConfig {
        match self.proxy.read() {
            Ok(proxy) => proxy.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 探测并切分，完成后启动分块
    pub(super) fn begin(&mut self, ctx: &mut Context<Self>) {
        self.set_status(TaskStatus::Probing);
        log::info!("开始探测任务 {}: {}", self.task.id, self.task.url);

        let client = match build_client(&self.config, &self.proxy_snapshot()) {
            Ok(client) => client,
            Err(e) => return self.fail(e, ctx),
        };
        let url = self.task.url.clone();
        let desired = self.task.thread_count;
        let min_chunk_size = self.config.min_chunk_size;
        let timeout = Duration::from_secs(self.config.timeout);
        let probe_client = client.clone();

        let handle = ctx.spawn(
            async move { probe_and_plan(&probe_client, &url, desired, min_chunk_size, timeout).await }
                .into_actor(self)
                .map(move |result, act, ctx| {
                    act.probe = None;
                    match result {
                        Ok(plan) => act.on_planned(plan, client, ctx),
                        Err(e) => act.fail(e, ctx),
                    }
                }),
        );
        self.probe = Some(handle);
    }

    fn on_planned(&mut self, plan: PlanResult, client: reqwest::Client, ctx: &mut Context<Self>) {
        if self.task.status.is_terminal() {
            return;
        }
        log::info!(
            "任务 {} 文件大小 {} 字节, 分为 {} 块{}",
            self.task.id,
            plan.total_size,
            plan.chunks.len(),
            if plan.ranged { "" } else { " (服务器不支持断点续传)" }
        );

        self.task.total_size = plan.total_size;
        self.task.thread_count = plan.thread_count;
        self.task.chunks = plan
            .chunks
            .iter()
            .map(|range| {
                let mut chunk = DownloadChunk::new(*range);
                chunk.staging_path = Some(self.staging_dir.join(format!("chunk_{:04}.part", range.index)));
                chunk
            })
            .collect();

        if self.pause_requested {
            self.set_status(TaskStatus::Paused);
        } else {
            self.set_status(TaskStatus::Active);
        }
        self.start_transfers(client, plan.ranged, ctx);

        let interval = Duration::from_millis(self.config.progress_interval_ms.max(1));
        self.supervisor = Some(ctx.run_interval(interval, |act, _ctx| act.supervise()));
    }

    fn start_transfers(&mut self, client: reqwest::Client, ranged: bool, ctx: &mut Context<Self>) {
        let reporter: Recipient<ChunkReport> = ctx.address().recipient();
        let cap_share = CapShare::new(self.task.chunks.len());
        for chunk in &self.task.chunks {
            let control = if self.pause_requested {
                Arc::new(ChunkControl::paused())
            } else {
                Arc::new(ChunkControl::default())
            };
            let staging_path = match &chunk.staging_path {
                Some(path) => path.clone(),
                None => self.staging_dir.join(format!("chunk_{:04}.part", chunk.range.index)),
            };
            let transfer = ChunkTransfer {
                range: chunk.range,
                url: self.task.url.clone(),
                client: client.clone(),
                ranged,
                staging_path,
                downloaded: chunk.downloaded.clone(),
                control: control.clone(),
                speed_cap: self.speed_cap.clone(),
                cap_share: cap_share.clone(),
                read_unit_size: self.config.read_unit_size,
                read_timeout: Duration::from_secs(self.config.read_timeout),
                reporter: reporter.clone(),
            };
            self.controls.push(control);
            self.joins.push(actix::spawn(transfer.run()));
        }
        self.meter.reset(0);
    }

    /// 周期性汇总已下载字节、进度与速度
    pub(super) fn supervise(&mut self) {
        self.task.downloaded_size = self.task.sum_downloaded();
        self.emit_progress();

        if self.task.status == TaskStatus::Active {
            if let Some(kbps) = self.meter.sample(self.task.downloaded_size) {
                self.task.speed_kbps = kbps;
                self.events.emit(DownloadEvent::Speed { task_id: self.task.id, speed_kbps: kbps });
            }
        }
    }

    fn emit_progress(&mut self) {
        let percent = self.task.percent();
        if self.last_percent.map_or(true, |last| percent > last) {
            self.last_percent = Some(percent);
            self.events.emit(DownloadEvent::Progress { task_id: self.task.id, percent });
        }
    }

    pub(super) fn stop_supervision(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.supervisor.take() {
            ctx.cancel_future(handle);
        }
        if let Some(handle) = self.probe.take() {
            ctx.cancel_future(handle);
        }
    }

    pub(super) fn cancel_chunks(&mut self) -> Vec<JoinHandle<TransferOutcome>> {
        for control in &self.controls {
            control.cancel();
        }
        std::mem::take(&mut self.joins)
    }

    /// 任务失败：只发出一次错误事件，取消其余分块并清理暂存目录
    pub(super) fn fail(&mut self, error: DownloadError, ctx: &mut Context<Self>) {
        if self.task.status.is_terminal() {
            return;
        }
        log::error!("任务 {} 失败: {}", self.task.id, error);
        self.stop_supervision(ctx);
        self.task.downloaded_size = self.task.sum_downloaded();
        self.task.speed_kbps = 0.0;
        self.task.error = Some(error.to_string());
        self.events.emit(DownloadEvent::Error {
            task_id: self.task.id,
            kind: error.kind(),
            message: error.to_string(),
        });
        self.set_status(TaskStatus::Error);

        let joins = self.cancel_chunks();
        let staging_dir = self.staging_dir.clone();
        ctx.wait(
            async move {
                futures::future::join_all(joins).await;
                remove_staging_dir(&staging_dir).await;
            }
            .into_actor(self)
            .map(|_, act, _ctx| {
                for chunk in act.task.chunks.iter_mut() {
                    if !chunk.status.is_finished() {
                        chunk.status = ChunkStatus::Cancelled;
                    }
                }
            }),
        );
    }

    /// 所有分块完成后合并，合并期间不处理其他消息
    pub(super) fn complete(&mut self, ctx: &mut Context<Self>) {
        self.stop_supervision(ctx);
        self.task.downloaded_size = self.task.sum_downloaded();

        let parts: Vec<StagedPart> = self
            .task
            .chunks
            .iter()
            .filter_map(|c| {
                c.staging_path
                    .clone()
                    .map(|path| StagedPart { start: c.range.start, path })
            })
            .collect();
        let destination = self.task.destination.clone();
        let joins = std::mem::take(&mut self.joins);
        let staging_dir = self.staging_dir.clone();

        ctx.wait(
            async move {
                futures::future::join_all(joins).await;
                let result = tokio::task::spawn_blocking(move || merge(&destination, &parts))
                    .await
                    .map_err(|e| DownloadError::Merge(format!("合并线程异常: {}", e)))
                    .and_then(|r| r);
                if result.is_ok() {
                    remove_staging_dir(&staging_dir).await;
                }
                result
            }
            .into_actor(self)
            .map(|result, act, ctx| match result {
                Ok(written) => {
                    log::info!(
                        "任务 {} 下载完成: {} ({} 字节)",
                        act.task.id,
                        act.task.destination.display(),
                        written
                    );
                    act.task.speed_kbps = 0.0;
                    act.emit_progress();
                    act.set_status(TaskStatus::Done);
                    act.events.emit(DownloadEvent::Completed { task_id: act.task.id });
                }
                Err(e) => act.fail(e, ctx),
            }),
        );
    }
}

pub(super) async fn remove_staging_dir(dir: &std::path::Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => log::debug!("已清理暂存目录 {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("清理暂存目录失败 {}: {}", dir.display(), e),
    }
}
