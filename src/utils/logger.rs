use chrono::Local; // 用于获取本地时间
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::{Write, BufWriter};
use std::fs::{File, OpenOptions};
use std::path::Path;
use actix::prelude::*;

/// 日志消息
pub struct LogMsg {
    pub level: Level,
    pub target: String,
    pub message: String,
}
impl Message for LogMsg { type Result = (); }

/// 日志Actor，按大小轮转到 `<file>.backup`
pub struct LoggerActor {
    pub writer: BufWriter<File>,
    pub level: LevelFilter,
    pub file_path: String,
    pub max_size: u64, // 最大文件大小 (bytes)
    pub current_size: u64,
}

impl LoggerActor {
    /// 创建新的日志Actor
    pub fn new(file_path: &str, level: LevelFilter, max_size: u64) -> Result<Self, std::io::Error> {
        // 确保日志目录存在
        if let Some(parent) = Path::new(file_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            writer: BufWriter::new(file),
            level,
            file_path: file_path.to_string(),
            max_size,
            current_size,
        })
    }

    /// 检查并执行日志轮转
    fn check_rotation(&mut self) -> Result<(), std::io::Error> {
        if self.current_size > self.max_size {
            self.writer.flush()?;

            let backup_path = format!("{}.backup", self.file_path);
            if Path::new(&backup_path).exists() {
                std::fs::remove_file(&backup_path)?;
            }
            std::fs::rename(&self.file_path, &backup_path)?;

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?;

            self.writer = BufWriter::new(file);
            self.current_size = 0;
        }
        Ok(())
    }

    /// 写入日志并处理错误
    fn write_log(&mut self, level: Level, target: &str, message: &str) -> Result<(), std::io::Error> {
        if level <= self.level {
            let log_entry = format!(
                "{} [{}] {} - {}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level,
                target,
                message
            );

            self.check_rotation()?;

            self.writer.write_all(log_entry.as_bytes())?;
            self.current_size += log_entry.len() as u64;

            // 警告以上立即落盘，其余约每 1KB 刷新一次
            if level <= Level::Warn || self.current_size % 1024 < log_entry.len() as u64 {
                self.writer.flush()?;
            }
        }
        Ok(())
    }
}

impl Actor for LoggerActor {
    type Context = Context<Self>;

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let _ = self.writer.flush();
    }
}

impl Handler<LogMsg> for LoggerActor {
    type Result = ();
    fn handle(&mut self, msg: LogMsg, _ctx: &mut Self::Context) {
        if let Err(e) = self.write_log(msg.level, &msg.target, &msg.message) {
            eprintln!("日志写入失败: {}", e);
        }
    }
}

/// `log` 门面的实现，把记录转发给 [`LoggerActor`]
pub struct ActorLogger {
    addr: Addr<LoggerActor>,
    level: LevelFilter,
}

impl ActorLogger {
    pub fn new(addr: Addr<LoggerActor>, level: LevelFilter) -> Self {
        Self { addr, level }
    }
}

impl Log for ActorLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.addr.do_send(LogMsg {
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        });
    }

    fn flush(&self) {}
}

/// 启动日志Actor并注册为全局日志实现，需要在 actix 系统内调用
pub fn init(file_path: &str, level: LevelFilter, max_size: u64) -> Result<Addr<LoggerActor>, std::io::Error> {
    let addr = LoggerActor::new(file_path, level, max_size)?.start();
    log::set_boxed_logger(Box::new(ActorLogger::new(addr.clone(), level)))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::AlreadyExists, e.to_string()))?;
    log::set_max_level(level);
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("app.log");
        let path_str = path.to_str().unwrap();
        let mut logger = LoggerActor::new(path_str, LevelFilter::Info, 1024 * 1024).unwrap();

        logger.write_log(Level::Info, "rangedown", "任务开始").unwrap();
        logger.write_log(Level::Debug, "rangedown", "不应写入").unwrap();
        logger.writer.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[INFO] rangedown - 任务开始"));
        assert!(!content.contains("不应写入"));
    }

    #[test]
    fn test_rotation_creates_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let path_str = path.to_str().unwrap();
        let mut logger = LoggerActor::new(path_str, LevelFilter::Info, 64).unwrap();

        for i in 0..10 {
            logger.write_log(Level::Warn, "rangedown", &format!("第 {} 条日志，写满后轮转", i)).unwrap();
        }
        logger.writer.flush().unwrap();

        assert!(dir.path().join("app.log.backup").exists());
        assert!(std::fs::metadata(&path).unwrap().len() < 64 * 4);
    }

    #[actix_rt::test]
    async fn test_actor_logger_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let addr = LoggerActor::new(path.to_str().unwrap(), LevelFilter::Debug, 1024 * 1024)
            .unwrap()
            .start();
        let logger = ActorLogger::new(addr.clone(), LevelFilter::Info);

        assert!(!logger.enabled(&Metadata::builder().level(Level::Debug).build()));
        logger.log(
            &Record::builder()
                .level(Level::Error)
                .target("rangedown::core")
                .args(format_args!("分块 {} 下载失败", 2))
                .build(),
        );
        // 邮箱按顺序处理
        addr.send(LogMsg { level: Level::Warn, target: "test".into(), message: "结束".into() })
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("分块 2 下载失败"));
        assert!(content.contains("结束"));
    }
}
