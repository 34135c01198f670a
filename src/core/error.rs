use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// 下载引擎错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DownloadError {
    /// 资源不可达、非成功状态码、大小未知或为 0
    #[error("探测失败: {0}")]
    Probe(String),

    /// 分块传输中途的网络错误或超时
    #[error("传输失败: {0}")]
    Transfer(String),

    /// 暂存数据缺失或目标文件写入失败
    #[error("合并失败: {0}")]
    Merge(String),

    #[error("配置无效: {0}")]
    Config(String),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("IO错误: {0}")]
    Io(String),

    #[error("任务ID不存在: {0}")]
    TaskNotFound(Uuid),
}

/// 错误分类，随 `error` 事件一起发出，观察者无需解析消息文本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Probe,
    Transfer,
    Merge,
    Config,
    InvalidUrl,
    Io,
    NotFound,
}

impl ErrorKind {
    /// 调用方是否值得重新提交任务
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Probe | ErrorKind::Transfer)
    }
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::Probe(_) => ErrorKind::Probe,
            DownloadError::Transfer(_) => ErrorKind::Transfer,
            DownloadError::Merge(_) => ErrorKind::Merge,
            DownloadError::Config(_) => ErrorKind::Config,
            DownloadError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            DownloadError::Io(_) => ErrorKind::Io,
            DownloadError::TaskNotFound(_) => ErrorKind::NotFound,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DownloadError::InvalidUrl(_) | DownloadError::Config(_) | DownloadError::Merge(_)
        )
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(error: std::io::Error) -> Self {
        DownloadError::Io(error.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            DownloadError::Transfer(format!("请求超时: {}", error))
        } else {
            DownloadError::Transfer(format!("网络错误: {}", error))
        }
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;
