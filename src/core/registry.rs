use actix::prelude::*;
use futures::FutureExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::config::{Config, ProxyConfig};
use crate::core::error::DownloadError;
use crate::core::event::EventSink;
use crate::core::task::{
    CancelTask, PauseTask, QuerySnapshot, ResumeTask, SetSpeedLimit, StartTask, TaskCoordinator, TaskSnapshot,
};
use crate::utils::naming::derive_file_name;
use crate::utils::validator::{clamp_speed_limit, clamp_thread_count, is_valid_url};

/// 添加下载任务，立即返回任务ID，协调器独立运行
pub struct AddTask {
    pub url: String,
    pub destination: PathBuf,
    pub thread_count: Option<usize>,
}
impl Message for AddTask { type Result = Result<Uuid, DownloadError>; }
impl Handler<AddTask> for DownloadRegistry {
    type Result = Result<Uuid, DownloadError>;
    fn handle(&mut self, msg: AddTask, _ctx: &mut Self::Context) -> Self::Result {
        self.add(msg.url, msg.destination, msg.thread_count)
    }
}

/// 批量添加，每个URL的文件名取自路径最后一段
pub struct AddBatch {
    pub urls: Vec<String>,
    pub destination_dir: PathBuf,
    pub thread_count: Option<usize>,
}
impl Message for AddBatch { type Result = Vec<Result<Uuid, DownloadError>>; }
impl Handler<AddBatch> for DownloadRegistry {
    type Result = MessageResult<AddBatch>;
    fn handle(&mut self, msg: AddBatch, _ctx: &mut Self::Context) -> Self::Result {
        let results = msg
            .urls
            .into_iter()
            .map(|url| {
                let destination = msg.destination_dir.join(derive_file_name(&url));
                self.add(url, destination, msg.thread_count)
            })
            .collect();
        MessageResult(results)
    }
}

/// 暂停指定任务
pub struct PauseTaskById { pub task_id: Uuid }
impl Message for PauseTaskById { type Result = Result<(), DownloadError>; }
impl Handler<PauseTaskById> for DownloadRegistry {
    type Result = Result<(), DownloadError>;
    fn handle(&mut self, msg: PauseTaskById, _ctx: &mut Self::Context) -> Self::Result {
        self.coordinator(msg.task_id)?.do_send(PauseTask);
        Ok(())
    }
}

/// 恢复指定任务
pub struct ResumeTaskById { pub task_id: Uuid }
impl Message for ResumeTaskById { type Result = Result<(), DownloadError>; }
impl Handler<ResumeTaskById> for DownloadRegistry {
    type Result = Result<(), DownloadError>;
    fn handle(&mut self, msg: ResumeTaskById, _ctx: &mut Self::Context) -> Self::Result {
        self.coordinator(msg.task_id)?.do_send(ResumeTask);
        Ok(())
    }
}

/// 取消指定任务，协调器确认所有分块退出后才从注册表移除
pub struct CancelTaskById { pub task_id: Uuid }
impl Message for CancelTaskById { type Result = Result<(), DownloadError>; }
impl Handler<CancelTaskById> for DownloadRegistry {
    type Result = ResponseActFuture<Self, Result<(), DownloadError>>;
    fn handle(&mut self, msg: CancelTaskById, _ctx: &mut Self::Context) -> Self::Result {
        let task_id = msg.task_id;
        let addr = match self.coordinator(task_id) {
            Ok(addr) => addr.clone(),
            Err(e) => return Box::pin(actix::fut::ready(Err(e))),
        };
        Box::pin(addr.send(CancelTask).into_actor(self).map(move |res, act, _ctx| {
            if let Err(e) = res {
                // 协调器已经停止，同样视为取消完成
                log::debug!("任务 {} 协调器已退出: {}", task_id, e);
            }
            act.tasks.remove(&task_id);
            log::info!("任务已从注册表移除: {}", task_id);
            Ok(())
        }))
    }
}

/// 设置全局速度上限（KB/s），作用于所有任务
pub struct SetGlobalSpeedLimit(pub f64);
impl Message for SetGlobalSpeedLimit { type Result = f64; }
impl Handler<SetGlobalSpeedLimit> for DownloadRegistry {
    type Result = MessageResult<SetGlobalSpeedLimit>;
    fn handle(&mut self, msg: SetGlobalSpeedLimit, _ctx: &mut Self::Context) -> Self::Result {
        let kbps = clamp_speed_limit(msg.0);
        self.speed_limit_kbps = kbps;
        for addr in self.tasks.values() {
            addr.do_send(SetSpeedLimit(kbps));
        }
        log::info!("全局速度上限: {} KB/s", kbps);
        MessageResult(kbps)
    }
}

/// 设置单个任务的速度上限
pub struct SetTaskSpeedLimit {
    pub task_id: Uuid,
    pub kbps: f64,
}
impl Message for SetTaskSpeedLimit { type Result = Result<(), DownloadError>; }
impl Handler<SetTaskSpeedLimit> for DownloadRegistry {
    type Result = Result<(), DownloadError>;
    fn handle(&mut self, msg: SetTaskSpeedLimit, _ctx: &mut Self::Context) -> Self::Result {
        self.coordinator(msg.task_id)?.do_send(SetSpeedLimit(msg.kbps));
        Ok(())
    }
}

/// 设置默认线程数，返回修正后的值
pub struct SetDefaultThreadCount(pub usize);
impl Message for SetDefaultThreadCount { type Result = usize; }
impl Handler<SetDefaultThreadCount> for DownloadRegistry {
    type Result = usize;
    fn handle(&mut self, msg: SetDefaultThreadCount, _ctx: &mut Self::Context) -> Self::Result {
        self.default_thread_count = clamp_thread_count(msg.0);
        self.default_thread_count
    }
}

/// 修改代理设置，只影响之后开始探测的任务
pub struct SetProxy {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}
impl Message for SetProxy { type Result = (); }
impl Handler<SetProxy> for DownloadRegistry {
    type Result = ();
    fn handle(&mut self, msg: SetProxy, _ctx: &mut Self::Context) {
        let proxy = ProxyConfig {
            enabled: msg.enabled,
            host: msg.host,
            port: msg.port,
            username: msg.username,
            password: msg.password,
        };
        log::info!("代理设置: {}", proxy.url().unwrap_or_else(|| "未启用".to_string()));
        match self.proxy.write() {
            Ok(mut current) => *current = proxy,
            Err(poisoned) => *poisoned.into_inner() = proxy,
        }
    }
}

/// 查询任务快照，未知ID返回 None
pub struct GetTask { pub task_id: Uuid }
impl Message for GetTask { type Result = Option<TaskSnapshot>; }
impl Handler<GetTask> for DownloadRegistry {
    type Result = ResponseFuture<Option<TaskSnapshot>>;
    fn handle(&mut self, msg: GetTask, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(addr) = self.tasks.get(&msg.task_id) {
            Box::pin(addr.send(QuerySnapshot).map(|res| res.ok()))
        } else {
            Box::pin(async { None })
        }
    }
}

/// 查询所有任务ID
pub struct ListTasks;
impl Message for ListTasks { type Result = Vec<Uuid>; }
impl Handler<ListTasks> for DownloadRegistry {
    type Result = MessageResult<ListTasks>;
    fn handle(&mut self, _msg: ListTasks, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.tasks.keys().cloned().collect())
    }
}

impl Actor for DownloadRegistry {
    type Context = Context<Self>;
}

/// 全局任务注册表 Actor
///
/// 任务表只在 Actor 内部修改，邮箱保证了增删查之间的互斥。
pub struct DownloadRegistry {
    pub config: Config,
    pub default_thread_count: usize,
    pub speed_limit_kbps: f64,
    pub proxy: Arc<RwLock<ProxyConfig>>,
    pub events: EventSink,
    pub tasks: HashMap<Uuid, Addr<TaskCoordinator>>,
}

impl DownloadRegistry {
    // 创建一个新的注册表，所有任务共用同一个事件通道
    pub fn new(mut config: Config, events: EventSink) -> Self {
        config.sanitize();
        Self {
            default_thread_count: config.thread_count,
            speed_limit_kbps: config.speed_limit_kb,
            proxy: Arc::new(RwLock::new(config.proxy.clone())),
            config,
            events,
            tasks: HashMap::new(),
        }
    }

    fn coordinator(&self, task_id: Uuid) -> Result<&Addr<TaskCoordinator>, DownloadError> {
        self.tasks.get(&task_id).ok_or(DownloadError::TaskNotFound(task_id))
    }

    fn add(&mut self, url: String, destination: PathBuf, thread_count: Option<usize>) -> Result<Uuid, DownloadError> {
        if !is_valid_url(&url) {
            return Err(DownloadError::InvalidUrl(url));
        }
        let id = Uuid::new_v4();
        let thread_count = clamp_thread_count(thread_count.unwrap_or(self.default_thread_count));
        log::info!("添加任务 {}: {} -> {} ({} 线程)", id, url, destination.display(), thread_count);

        let coordinator = TaskCoordinator::new(
            id,
            url,
            destination,
            thread_count,
            self.speed_limit_kbps,
            self.config.clone(),
            self.proxy.clone(),
            self.events.clone(),
        )
        .start();
        coordinator.do_send(StartTask);
        self.tasks.insert(id, coordinator);
        Ok(id)
    }
}
