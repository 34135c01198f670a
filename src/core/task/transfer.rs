use actix::Recipient;
use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::{sleep, timeout};

use crate::core::error::{DownloadError, DownloadResult};
use super::chunk::{chunk_percent, ChunkRange};
use super::governor::{CapShare, SpeedCap, SpeedGovernor, SpeedMeter};
use super::messages::ChunkReport;
use super::state::ChunkStatus;

/// 默认读取单元 8KB
pub const READ_UNIT_SIZE: usize = 8 * 1024;

const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 分块的暂停/取消信号，在读取单元之间检查
#[derive(Debug, Default)]
pub struct ChunkControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
}

impl ChunkControl {
    pub fn paused() -> Self {
        let control = Self::default();
        control.pause();
        control
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// 传输结束方式
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Done,
    Cancelled,
    Failed(DownloadError),
}

/// 单个分块的传输单元
///
/// 把 `[start, end]` 区间下载到私有暂存文件。暂存文件是它唯一写入的文件。
pub struct ChunkTransfer {
    pub range: ChunkRange,
    pub url: String,
    pub client: reqwest::Client,
    /// 为 false 时资源不支持 Range，直接请求整个文件
    pub ranged: bool,
    pub staging_path: PathBuf,
    pub downloaded: Arc<AtomicU64>,
    pub control: Arc<ChunkControl>,
    pub speed_cap: SpeedCap,
    /// 任务上限在未完成的分块之间平分
    pub cap_share: CapShare,
    pub read_unit_size: usize,
    pub read_timeout: Duration,
    pub reporter: Recipient<ChunkReport>,
}

impl ChunkTransfer {
    pub async fn run(self) -> TransferOutcome {
        let outcome = match self.transfer().await {
            Ok(true) => TransferOutcome::Done,
            Ok(false) => TransferOutcome::Cancelled,
            Err(e) if self.control.is_cancelled() => {
                log::debug!("分块 {} 取消时出现错误: {}", self.range.index, e);
                TransferOutcome::Cancelled
            }
            Err(e) => TransferOutcome::Failed(e),
        };

        match &outcome {
            TransferOutcome::Done => {
                self.cap_share.release();
                log::debug!("分块 {} 下载完成 [{}-{}]", self.range.index, self.range.start, self.range.end);
                self.report(ChunkStatus::Done, 0.0, None);
            }
            TransferOutcome::Cancelled => self.discard_staging().await,
            TransferOutcome::Failed(e) => {
                log::error!("分块 {} 下载失败: {}", self.range.index, e);
                self.report(ChunkStatus::Error, 0.0, Some(e.clone()));
            }
        }
        outcome
    }

    /// 返回 Ok(false) 表示中途被取消
    async fn transfer(&self) -> DownloadResult<bool> {
        if let Some(parent) = self.staging_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&self.staging_path).await?;
        let mut writer = BufWriter::new(file);

        if self.control.is_paused() {
            self.report(ChunkStatus::Paused, 0.0, None);
            if !self.wait_while_paused().await {
                return Ok(false);
            }
        }
        if self.control.is_cancelled() {
            return Ok(false);
        }

        let mut request = self.client.get(&self.url);
        if self.ranged {
            request = request.header(RANGE, format!("bytes={}-{}", self.range.start, self.range.end));
        }
        let mut response = timeout(self.read_timeout, request.send())
            .await
            .map_err(|_| DownloadError::Transfer("等待响应超时".to_string()))??;

        let status = response.status();
        if self.ranged && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::Transfer(format!("服务器未返回分段内容，状态码 {}", status)));
        }
        if !status.is_success() {
            return Err(DownloadError::Transfer(format!("服务器返回状态码 {}", status)));
        }

        let expected = self.range.size();
        let unit_size = self.read_unit_size.max(1);
        let mut downloaded = 0u64;
        let mut pending = Bytes::new();
        let mut governor = SpeedGovernor::default();
        let mut meter = SpeedMeter::new(0);
        let mut last_percent = 0u8;
        let mut speed = 0.0;
        self.report(ChunkStatus::Active, 0.0, None);

        loop {
            if self.control.is_cancelled() {
                return Ok(false);
            }
            if self.control.is_paused() {
                self.report(ChunkStatus::Paused, 0.0, None);
                if !self.wait_while_paused().await {
                    return Ok(false);
                }
                governor.reset();
                meter.reset(downloaded);
                self.report(ChunkStatus::Active, 0.0, None);
            }

            if pending.is_empty() {
                let next = timeout(self.read_timeout, response.chunk())
                    .await
                    .map_err(|_| DownloadError::Transfer("读取超时".to_string()))??;
                match next {
                    Some(bytes) => pending = bytes,
                    None => break,
                }
                continue;
            }

            let unit = pending.split_to(pending.len().min(unit_size));
            if downloaded + unit.len() as u64 > expected {
                return Err(DownloadError::Transfer(format!(
                    "服务器返回的数据超出分块范围: 预期 {} 字节",
                    expected
                )));
            }
            writer.write_all(&unit).await?;
            downloaded += unit.len() as u64;
            self.downloaded.store(downloaded, Ordering::Release);

            let percent = chunk_percent(downloaded, expected);
            if let Some(kbps) = meter.sample(downloaded) {
                speed = kbps;
                last_percent = percent;
                self.report(ChunkStatus::Active, speed, None);
            } else if percent != last_percent {
                last_percent = percent;
                self.report(ChunkStatus::Active, speed, None);
            }

            if let Some(delay) = governor.regulate(unit.len(), self.cap_kbps()) {
                sleep(delay).await;
            }
        }

        writer.flush().await?;
        if downloaded != expected {
            return Err(DownloadError::Transfer(format!(
                "数据不完整: 预期 {} 字节, 实际 {} 字节",
                expected, downloaded
            )));
        }
        Ok(true)
    }

    /// 暂停期间不读取响应；返回 false 表示等待中被取消
    async fn wait_while_paused(&self) -> bool {
        while self.control.is_paused() {
            if self.control.is_cancelled() {
                return false;
            }
            sleep(PAUSE_POLL_INTERVAL).await;
        }
        !self.control.is_cancelled()
    }

    fn cap_kbps(&self) -> f64 {
        self.cap_share.per_chunk(self.speed_cap.get())
    }

    fn report(&self, status: ChunkStatus, speed_kbps: f64, error: Option<DownloadError>) {
        let percent = chunk_percent(self.downloaded.load(Ordering::Acquire), self.range.size());
        self.reporter.do_send(ChunkReport {
            chunk_index: self.range.index,
            percent,
            speed_kbps,
            status,
            error,
        });
    }

    async fn discard_staging(&self) {
        match tokio::fs::remove_file(&self.staging_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("清理块文件失败 {}: {}", self.staging_path.display(), e),
        }
    }
}
