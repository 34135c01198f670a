use reqwest::header::{HeaderMap, HeaderName, ACCEPT_RANGES, CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use serde::Serialize;
use std::time::Duration;

use crate::core::error::{DownloadError, DownloadResult};
use super::chunk::ChunkRange;

/// 默认最小分块大小 1MB
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;

/// 探测得到的远程文件信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub size: Option<u64>,
    pub supports_range: bool,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

/// 分块计划
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanResult {
    pub total_size: u64,
    pub thread_count: usize,
    /// 为 false 时只有一个分块，且传输时不带 Range 头
    pub ranged: bool,
    pub chunks: Vec<ChunkRange>,
}

/// 发送 HEAD 请求获取文件大小与 Range 支持情况，重定向由客户端跟随
pub async fn probe(client: &reqwest::Client, url: &str, timeout: Duration) -> DownloadResult<FileInfo> {
    let response = client
        .head(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| DownloadError::Probe(format!("请求失败: {}", e)))?;

    if !response.status().is_success() {
        return Err(DownloadError::Probe(format!("服务器返回状态码 {}", response.status())));
    }

    // HEAD 响应没有响应体，不能用 content_length()，直接读头部
    let headers = response.headers();
    Ok(FileInfo {
        size: header_str(headers, CONTENT_LENGTH).and_then(|s| s.trim().parse::<u64>().ok()),
        supports_range: header_str(headers, ACCEPT_RANGES)
            .map(|s| s.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")))
            .unwrap_or(false),
        last_modified: header_str(headers, LAST_MODIFIED).map(str::to_string),
        etag: header_str(headers, ETAG).map(str::to_string),
    })
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// 根据探测结果和期望线程数切分分块，纯函数
pub fn plan(info: &FileInfo, desired_thread_count: usize, min_chunk_size: u64) -> DownloadResult<PlanResult> {
    let total_size = match info.size {
        Some(size) if size > 0 => size,
        _ => return Err(DownloadError::Probe("文件大小未知或为 0".to_string())),
    };

    if !info.supports_range {
        return Ok(PlanResult {
            total_size,
            thread_count: 1,
            ranged: false,
            chunks: vec![ChunkRange { index: 0, start: 0, end: total_size - 1 }],
        });
    }

    let desired = desired_thread_count.max(1) as u64;
    let chunk_size = (total_size / desired).max(min_chunk_size.max(1));
    // 文件较小时分块数随之减少，但不超过期望值
    let thread_count = (total_size / chunk_size).clamp(1, desired);

    let chunks = (0..thread_count)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i == thread_count - 1 {
                total_size - 1
            } else {
                start + chunk_size - 1
            };
            ChunkRange { index: i as usize, start, end }
        })
        .collect();

    Ok(PlanResult {
        total_size,
        thread_count: thread_count as usize,
        ranged: true,
        chunks,
    })
}

pub async fn probe_and_plan(
    client: &reqwest::Client,
    url: &str,
    desired_thread_count: usize,
    min_chunk_size: u64,
    timeout: Duration,
) -> DownloadResult<PlanResult> {
    let info = probe(client, url, timeout).await?;
    log::debug!("探测结果 {}: {:?}", url, info);
    plan(&info, desired_thread_count, min_chunk_size)
}
