use actix::prelude::*;
use anyhow::Context as _;
use crossterm::{
    cursor, execute, terminal,
    event::{self, Event, KeyCode, KeyEventKind},
};
use log::LevelFilter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use rangedown::cli;
use rangedown::config::Config;
use rangedown::core::{
    AddTask, CancelTaskById, DownloadEvent, DownloadRegistry, EventSink, GetTask, ListTasks, PauseTaskById,
    ResumeTaskById, SetGlobalSpeedLimit, TaskStatus,
};
use rangedown::ui::{self, DownloadSummary, ProgressManager};
use rangedown::utils::logger;
use rangedown::utils::naming::derive_file_name;
use rangedown::utils::retry::{RetryContext, RetryStrategy};

const KEYBOARD_POLL_INTERVAL: Duration = Duration::from_millis(50);
const SPEED_LIMIT_STEP_KB: f64 = 128.0;

#[actix::main]
async fn main() -> anyhow::Result<()> {
    let (args, config) = cli::Args::parse_args().context("参数解析失败")?;
    init_logging();
    log::info!("程序启动");

    let urls = args.get_urls().context("获取URL列表失败")?;
    log::info!("解析到的URLs: {:?}", urls);
    log::info!("配置文件路径: {}", args.config);
    log::info!("{}", config.get_summary());

    if !args.json {
        println!("{}", config.get_summary());
    }

    let (events, rx) = EventSink::channel();
    let registry = DownloadRegistry::new(config.clone(), events).start();
    log::info!("下载注册表已启动");

    let dir = PathBuf::from(&config.download_dir);
    let mut session = Session::new(registry, &config, args.json);
    for (i, url) in urls.iter().enumerate() {
        let name = match (&args.file_name, urls.len()) {
            (Some(name), 1) => name.clone(),
            _ => derive_file_name(url),
        };
        let job = Job {
            url: url.clone(),
            name: name.clone(),
            destination: dir.join(&name),
            retry: RetryContext::new(session.strategy.clone()),
        };
        if let Err(e) = session.submit(job).await {
            log::error!("创建下载任务失败 [{}] {}: {}", i, url, e);
            ui::print_error(&format!("创建下载任务失败: {} - {}", url, e));
        }
    }

    if session.jobs.is_empty() {
        eprintln!("没有可下载的任务");
        return Ok(());
    }

    let started = Instant::now();
    if args.json {
        run_json_loop(&mut session, rx).await?;
    } else {
        println!("\n开始下载... (p 暂停, r 恢复, +/- 调整限速, c 取消, q 退出)");
        run_interactive_loop(&mut session, rx).await?;
    }

    let summary = DownloadSummary {
        total_files: session.success + session.failed + session.cancelled + session.jobs.len(),
        total_size: session.total_bytes,
        elapsed_time: started.elapsed(),
        success_count: session.success,
        failed_count: session.failed,
        cancelled_count: session.cancelled,
    };
    log::info!("下载结束 - 成功: {}, 失败: {}, 取消: {}", summary.success_count, summary.failed_count, summary.cancelled_count);
    if !args.json {
        println!("{}", summary);
    }
    Ok(())
}

/// 优先使用文件日志 Actor，失败时退回 env_logger
fn init_logging() {
    if let Err(e) = logger::init("logs/rangedown.log", LevelFilter::Info, 10 * 1024 * 1024) {
        let _ = env_logger::Builder::from_default_env()
            .filter_level(LevelFilter::Warn)
            .try_init();
        log::warn!("无法打开日志文件，改用标准错误输出: {}", e);
    }
}

/// 一个 URL 的下载作业，失败后可能以新的任务ID重新提交
struct Job {
    url: String,
    name: String,
    destination: PathBuf,
    retry: RetryContext,
}

struct Session {
    registry: Addr<DownloadRegistry>,
    strategy: RetryStrategy,
    jobs: HashMap<Uuid, Job>,
    retry_queue: Vec<(Instant, Job)>,
    progress: Option<ProgressManager>,
    speed_limit_kb: f64,
    success: usize,
    failed: usize,
    cancelled: usize,
    total_bytes: u64,
}

impl Session {
    fn new(registry: Addr<DownloadRegistry>, config: &Config, json: bool) -> Self {
        Self {
            registry,
            strategy: RetryStrategy::from_config(config),
            jobs: HashMap::new(),
            retry_queue: Vec::new(),
            progress: if json { None } else { Some(ProgressManager::new()) },
            speed_limit_kb: config.speed_limit_kb,
            success: 0,
            failed: 0,
            cancelled: 0,
            total_bytes: 0,
        }
    }

    fn is_finished(&self) -> bool {
        self.jobs.is_empty() && self.retry_queue.is_empty()
    }

    async fn submit(&mut self, job: Job) -> anyhow::Result<Uuid> {
        let task_id = self
            .registry
            .send(AddTask { url: job.url.clone(), destination: job.destination.clone(), thread_count: None })
            .await??;
        log::info!("创建下载任务 {}: {} -> {}", task_id, job.url, job.destination.display());
        if let Some(progress) = &mut self.progress {
            progress.add_task(task_id, &job.name);
        }
        self.jobs.insert(task_id, job);
        Ok(task_id)
    }

    async fn submit_due_retries(&mut self) {
        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = self.retry_queue.drain(..).partition(|(at, _)| *at <= now);
        self.retry_queue = waiting;
        for (_, job) in due {
            let url = job.url.clone();
            if let Err(e) = self.submit(job).await {
                log::error!("重新提交任务失败 {}: {}", url, e);
                self.failed += 1;
            }
        }
    }

    async fn handle_event(&mut self, event: DownloadEvent) {
        if let Some(progress) = &mut self.progress {
            progress.handle_event(&event);
        }
        match event {
            DownloadEvent::Completed { task_id } => {
                if let Ok(Some(snapshot)) = self.registry.send(GetTask { task_id }).await {
                    self.total_bytes += snapshot.total_size;
                }
                if let Some(job) = self.jobs.remove(&task_id) {
                    self.println(&format!("✓ 下载完成: {}", job.destination.display()));
                }
                self.success += 1;
            }
            DownloadEvent::Error { task_id, kind, message } => {
                let Some(mut job) = self.jobs.remove(&task_id) else {
                    return;
                };
                // 失败的任务仍留在注册表中，重新提交前先移除
                match self.registry.send(CancelTaskById { task_id }).await {
                    Ok(Ok(())) => log::debug!("失败任务已从注册表移除: {}", task_id),
                    Ok(Err(e)) => log::debug!("移除失败任务 {} 时出错: {}", task_id, e),
                    Err(e) => log::debug!("注册表不可用，无法移除任务 {}: {}", task_id, e),
                }
                if let Some(progress) = &mut self.progress {
                    progress.remove_task(task_id);
                }
                if job.retry.should_retry(kind) {
                    let delay = job.retry.record_failure(message.clone());
                    log::warn!(
                        "任务失败，{:.1} 秒后第 {} 次重试 {}: {}",
                        delay.as_secs_f64(),
                        job.retry.retry_count,
                        job.url,
                        message
                    );
                    self.retry_queue.push((Instant::now() + delay, job));
                } else {
                    self.println(&format!("✗ 下载失败: {} - {}", job.url, message));
                    self.failed += 1;
                }
            }
            DownloadEvent::Status { task_id, status: TaskStatus::Cancelled } => {
                if self.jobs.remove(&task_id).is_some() {
                    self.cancelled += 1;
                }
            }
            _ => {}
        }
    }

    async fn task_ids(&self) -> Vec<Uuid> {
        match self.registry.send(ListTasks).await {
            Ok(ids) => ids,
            Err(e) => {
                log::warn!("获取任务列表失败: {}", e);
                Vec::new()
            }
        }
    }

    async fn for_each_task<M>(&self, make: impl Fn(Uuid) -> M)
    where
        M: Message + Send + 'static,
        M::Result: Send,
        DownloadRegistry: Handler<M>,
    {
        for id in self.task_ids().await {
            if let Err(e) = self.registry.send(make(id)).await {
                log::debug!("向任务 {} 发送命令失败: {}", id, e);
            }
        }
    }

    async fn adjust_speed_limit(&mut self, delta: f64) {
        let wanted = (self.speed_limit_kb + delta).max(0.0);
        if let Ok(applied) = self.registry.send(SetGlobalSpeedLimit(wanted)).await {
            self.speed_limit_kb = applied;
            let label = if applied <= 0.0 { "不限速".to_string() } else { ui::format_speed(applied) };
            self.println(&format!("全局速度上限: {}", label));
        }
    }

    fn println(&self, message: &str) {
        match &self.progress {
            Some(progress) => progress.println(message),
            None => log::info!("{}", message),
        }
    }
}

/// JSON 模式：每个事件输出一行
async fn run_json_loop(session: &mut Session, mut rx: UnboundedReceiver<DownloadEvent>) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(Duration::from_millis(200));
    while !session.is_finished() {
        tokio::select! {
            Some(event) = rx.recv() => {
                println!("{}", serde_json::to_string(&event)?);
                session.handle_event(event).await;
            }
            _ = tick.tick() => session.submit_due_retries().await,
        }
    }
    Ok(())
}

/// 退出时恢复终端
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(std::io::stdout(), cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(std::io::stdout(), cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

/// 交互模式：处理键盘输入和进度显示
async fn run_interactive_loop(session: &mut Session, mut rx: UnboundedReceiver<DownloadEvent>) -> anyhow::Result<()> {
    let _guard = TerminalGuard::enter()?;
    let mut tick = tokio::time::interval(KEYBOARD_POLL_INTERVAL);

    while !session.is_finished() {
        tokio::select! {
            Some(event) = rx.recv() => session.handle_event(event).await,
            _ = tick.tick() => {
                session.submit_due_retries().await;
                // 不阻塞 actix 线程，只取已经到达的按键
                while event::poll(Duration::ZERO)? {
                    let Event::Key(key) = event::read()? else { continue };
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => {
                            log::info!("用户主动退出下载");
                            session.for_each_task(|task_id| CancelTaskById { task_id }).await;
                            return Ok(());
                        }
                        KeyCode::Char('p') | KeyCode::Char('P') => {
                            session.for_each_task(|task_id| PauseTaskById { task_id }).await;
                            session.println("已暂停所有下载任务");
                        }
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            session.for_each_task(|task_id| ResumeTaskById { task_id }).await;
                            session.println("已恢复所有下载任务");
                        }
                        KeyCode::Char('+') | KeyCode::Char('=') => session.adjust_speed_limit(SPEED_LIMIT_STEP_KB).await,
                        KeyCode::Char('-') => session.adjust_speed_limit(-SPEED_LIMIT_STEP_KB).await,
                        KeyCode::Char('c') | KeyCode::Char('C') => {
                            session.for_each_task(|task_id| CancelTaskById { task_id }).await;
                            session.retry_queue.clear();
                            session.println("已取消所有下载任务");
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    if let Some(progress) = &session.progress {
        progress.finish();
    }
    Ok(())
}

