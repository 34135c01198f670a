use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use crate::core::error::DownloadError;
use crate::core::task::planner::MIN_CHUNK_SIZE;
use crate::core::task::transfer::READ_UNIT_SIZE;
use crate::utils::validator::{clamp_speed_limit, clamp_thread_count};

/// 代理设置，对之后启动的每个分块请求生效
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// 是否启用代理
    pub enabled: bool,
    /// 代理主机
    pub host: String,
    /// 代理端口
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// 代理地址，未启用或主机为空时返回 None
    pub fn url(&self) -> Option<String> {
        if !self.enabled || self.host.trim().is_empty() {
            return None;
        }
        let host = self.host.trim();
        if host.contains("://") {
            Some(format!("{}:{}", host, self.port))
        } else {
            Some(format!("http://{}:{}", host, self.port))
        }
    }
}

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 下载速度限制（KB/s），0 表示不限速
    pub speed_limit_kb: f64,
    /// 默认下载目录
    pub download_dir: String,
    /// 默认线程数
    pub thread_count: usize,
    /// 连接与探测超时时间（秒）
    pub timeout: u64,
    /// 单次读取超时时间（秒）
    pub read_timeout: u64,
    /// User-Agent
    pub user_agent: String,
    /// 最小分块大小（字节）
    pub min_chunk_size: u64,
    /// 每次读取单元大小（字节）
    pub read_unit_size: usize,
    /// 进度轮询间隔（毫秒）
    pub progress_interval_ms: u64,
    /// 分块暂存目录，未设置时使用系统临时目录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<String>,
    /// 重试次数（由调用方对失败任务重新提交）
    pub retry_count: usize,
    /// 重试延迟（秒）
    pub retry_delay: u64,
    /// 最大重试延迟（秒）
    pub retry_max_delay: u64,
    /// 代理设置
    pub proxy: ProxyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            speed_limit_kb: 0.0, // 默认不限速
            download_dir: "./downloads".to_string(),
            thread_count: 4,
            timeout: 30,
            read_timeout: 60,
            user_agent: "RangeDown/0.1".to_string(),
            min_chunk_size: MIN_CHUNK_SIZE,
            read_unit_size: READ_UNIT_SIZE,
            progress_interval_ms: 100,
            temp_dir: None,
            retry_count: 3,
            retry_delay: 5,
            retry_max_delay: 60,
            proxy: ProxyConfig::default(),
        }
    }
}

impl Config {
    /// 加载配置文件
    pub fn load(path: &str) -> Result<Self, DownloadError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            // 尝试解析TOML
            match toml::from_str::<Config>(&content) {
                Ok(mut config) => {
                    config.sanitize();
                    Ok(config)
                }
                Err(e) => {
                    log::warn!("配置文件格式错误: {}，将使用默认配置", e);
                    let config = Config::default();
                    Config::save_with_tutorial(&config, path)?;
                    Ok(config)
                }
            }
        } else {
            let config = Config::default();
            Config::save_with_tutorial(&config, path)?;
            Ok(config)
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), DownloadError> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::Config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    /// 生成配置文件教程内容（静态方法）
    fn generate_tutorial_content() -> String {
        r#"# RangeDown 配置文件
# ====================
#
# TOML 格式。命令行参数会覆盖配置文件中的设置，优先级：命令行 > 配置文件 > 默认值
#
# 配置文件位置：
# - Windows: %APPDATA%/rangedown/rangedown.conf
# - macOS: ~/Library/Application Support/rangedown/rangedown.conf
# - Linux: ~/.config/rangedown/rangedown.conf
#
# 使用示例：
#   rangedown https://example.com/file.zip                    # 使用默认配置
#   rangedown -l 1000 https://example.com/file.zip           # 限制速度 1000KB/s
#   rangedown -t 8 https://example.com/file.zip              # 使用 8 个分块
#   rangedown --proxy 127.0.0.1:7890 https://example.com/a   # 通过代理下载

# ==================== 下载设置 ====================
#
# speed_limit_kb        全局速度限制（KB/s），0 表示不限速，运行中可用 +/- 调整
# download_dir          默认下载目录
# thread_count          每个任务的分块数，取值 1-32，超出范围会被自动修正
# min_chunk_size        最小分块大小（字节），文件较小时分块数会相应减少
# read_unit_size        每次读取的单元大小（字节），暂停与取消在单元之间生效
# progress_interval_ms  任务进度轮询间隔（毫秒）
# temp_dir              分块暂存目录，不设置时使用系统临时目录
#
# ==================== 网络设置 ====================
#
# timeout               连接与探测超时（秒）
# read_timeout          单次读取超时（秒），超时视为传输失败
# user_agent            User-Agent 字符串
#
# ==================== 重试设置 ====================
#
# 引擎本身不重试。命令行前端在任务因网络原因失败时重新提交，
# 间隔按指数退避增长。
# retry_count / retry_delay / retry_max_delay
#
# ==================== 代理设置 ====================
#
# [proxy]
# enabled = true
# host = "127.0.0.1"
# port = 7890
# username = "user"      # 可选
# password = "secret"    # 可选
#
# 代理修改只对之后开始的请求生效，进行中的请求不受影响。

# ==================== 配置项 ===================="#
            .to_string()
    }

    /// 修正不合法的配置值，返回被修正的项
    pub fn sanitize(&mut self) -> Vec<&'static str> {
        let defaults = Config::default();
        let mut fixed = Vec::new();

        let threads = clamp_thread_count(self.thread_count);
        if threads != self.thread_count {
            self.thread_count = threads;
            fixed.push("thread_count");
        }
        let speed = clamp_speed_limit(self.speed_limit_kb);
        if speed != self.speed_limit_kb {
            self.speed_limit_kb = speed;
            fixed.push("speed_limit_kb");
        }
        if self.timeout == 0 {
            self.timeout = defaults.timeout;
            fixed.push("timeout");
        }
        if self.read_timeout == 0 {
            self.read_timeout = defaults.read_timeout;
            fixed.push("read_timeout");
        }
        if self.min_chunk_size == 0 {
            self.min_chunk_size = defaults.min_chunk_size;
            fixed.push("min_chunk_size");
        }
        if self.read_unit_size == 0 {
            self.read_unit_size = defaults.read_unit_size;
            fixed.push("read_unit_size");
        }
        if self.progress_interval_ms == 0 {
            self.progress_interval_ms = defaults.progress_interval_ms;
            fixed.push("progress_interval_ms");
        }
        if self.download_dir.trim().is_empty() {
            self.download_dir = defaults.download_dir;
            fixed.push("download_dir");
        }

        for name in &fixed {
            log::warn!("配置项 {} 不合法，已自动修正", name);
        }
        fixed
    }

    /// 分块暂存根目录
    pub fn staging_root(&self) -> PathBuf {
        match &self.temp_dir {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => std::env::temp_dir().join("rangedown"),
        }
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        // 命令行参数覆盖配置文件
        if let Some(speed_limit) = args.speed_limit_kb {
            self.speed_limit_kb = speed_limit;
        }

        if !args.download_dir.is_empty() {
            self.download_dir = args.download_dir.clone();
        }

        if let Some(thread_count) = args.thread_count {
            self.thread_count = thread_count;
        }

        if let Some(proxy) = &args.proxy {
            if let Some((host, port)) = proxy.rsplit_once(':') {
                if let Ok(port) = port.parse::<u16>() {
                    self.proxy.enabled = true;
                    self.proxy.host = host.to_string();
                    self.proxy.port = port;
                }
            }
        }
        if args.proxy_user.is_some() {
            self.proxy.username = args.proxy_user.clone();
        }
        if args.proxy_pass.is_some() {
            self.proxy.password = args.proxy_pass.clone();
        }

        self.sanitize();
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 线程数: {}\n\
            - 速度限制: {} KB/s\n\
            - 超时时间: {} 秒\n\
            - 重试次数: {}\n\
            - 代理: {}",
            self.download_dir,
            self.thread_count,
            if self.speed_limit_kb <= 0.0 { "不限速".to_string() } else { self.speed_limit_kb.to_string() },
            self.timeout,
            self.retry_count,
            self.proxy.url().unwrap_or_else(|| "未启用".to_string()),
        )
    }
}
