//! CLI: 命令行接口和参数解析模块
//!
//! ## 主要功能
//!
//! - 命令行参数解析和验证
//! - 配置文件路径管理
//! - URL 列表处理（命令行参数和文件）
//! - 平台特定的路径处理
//! - 配置文件编辑器集成
//!
//! ## 支持的命令
//!
//! - 基本下载：`rangedown <url>`
//! - 批量下载：`rangedown -f urls.txt`
//! - 编辑配置：`rangedown -e`
//! - 指定配置：`rangedown -c config.conf <url>`
//! - 速度限制：`rangedown -l 1024 <url>`
//! - 使用代理：`rangedown --proxy 127.0.0.1:7890 <url>`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/rangedown/rangedown.conf`
//! - macOS: `~/Library/Application Support/rangedown/rangedown.conf`
//! - Linux: `~/.config/rangedown/rangedown.conf`

use clap::Parser;
use std::env;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::core::error::DownloadError;
use crate::utils::validator::is_valid_url;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/rangedown/rangedown.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/rangedown/rangedown.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/rangedown/rangedown.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 xdg-open，否则 nano
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// RangeDown 命令行参数
///
/// 示例用法：
///   rangedown https://example.com/file.zip
///   rangedown -e  # 编辑配置文件
///   rangedown -c /path/to/config.conf https://example.com/file.zip
///   rangedown -l 1000 -t 8 https://example.com/file.zip
///
/// 更多用法请加 --help 查看
#[derive(Parser, Debug, Clone)]
#[command(
    name = "rangedown",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    about = "一个用 Rust 编写的分块并发 HTTP 下载器",
    long_about = "按 Range 分块并发下载，支持暂停/恢复、限速、代理和实时进度显示。\n\n示例：\n  rangedown https://example.com/file.zip\n  rangedown -e\n  rangedown -c /path/to/config.conf https://example.com/file.zip\n  rangedown --speed-limit-kb 1000 https://example.com/file.zip\n"
)]
pub struct Args {
    /// 要下载的URL列表（可同时指定多个）
    #[arg(required = false, help = "要下载的URL列表，可以同时指定多个URL。")]
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径
    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL。")]
    pub file: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    /// 下载速度限制（KB/s），0 表示不限速
    #[arg(long, short = 'l', help = "下载速度限制（KB/s），0 表示不限速。")]
    pub speed_limit_kb: Option<f64>,

    /// 指定下载目录，为空时使用配置文件中的目录
    #[arg(long, short = 'd', default_value = "", help = "指定下载目录，覆盖配置文件中的设置。")]
    pub download_dir: String,

    /// 指定下载文件名
    #[arg(long, short = 'n', help = "指定下载文件名，仅对单个URL生效。")]
    pub file_name: Option<String>,

    /// 指定下载线程数
    #[arg(long, short = 't', help = "指定每个任务的分块数（1-32），覆盖配置文件中的设置。")]
    pub thread_count: Option<usize>,

    /// 代理地址 host:port
    #[arg(long, help = "HTTP 代理地址，格式 host:port。")]
    pub proxy: Option<String>,

    #[arg(long, help = "代理用户名。")]
    pub proxy_user: Option<String>,

    #[arg(long, help = "代理密码。")]
    pub proxy_pass: Option<String>,

    /// 以 JSON 行输出事件，不显示进度条
    #[arg(long, help = "以 JSON 行的形式输出下载事件，不使用交互界面。")]
    pub json: bool,
}

impl Args {
    pub fn parse_args() -> Result<(Self, Config), DownloadError> {
        let args = Args::parse();

        // --edit 逻辑
        if args.edit_config {
            open_config_in_editor(&args.config);
            std::process::exit(0);
        }

        let config = args.load_config()?;
        Ok((args, config))
    }

    /// 加载或创建配置文件，并合并命令行参数
    pub fn load_config(&self) -> Result<Config, DownloadError> {
        let mut config = if Path::new(&self.config).exists() {
            Config::load(&self.config)?
        } else {
            // 确保配置文件所在目录存在
            if let Some(parent) = Path::new(&self.config).parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .map_err(|e| DownloadError::Io(format!("无法创建配置目录: {}", e)))?;
            }
            let config = Config::default();
            config.save_with_tutorial(&self.config)?;
            config
        };

        config.merge_from_args(self);
        Ok(config)
    }

    // 合并命令行与文件中的URL
    pub fn get_urls(&self) -> Result<Vec<String>, DownloadError> {
        let mut urls = Vec::new();
        urls.extend_from_slice(&self.urls);

        if let Some(file_path) = &self.file {
            let content = fs::read_to_string(file_path)
                .map_err(|e| DownloadError::Io(format!("无法读取URL文件 {}: {}", file_path, e)))?;

            // 按行读取URL，忽略空行和注释
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    urls.push(line.to_string());
                }
            }
        }

        if let Some(bad) = urls.iter().find(|u| !is_valid_url(u)) {
            return Err(DownloadError::InvalidUrl(bad.clone()));
        }

        if urls.is_empty() {
            return Err(DownloadError::InvalidUrl(
                "未提供任何URL。请通过命令行参数或文件提供至少一个URL。".to_string(),
            ));
        }

        Ok(urls)
    }
}
