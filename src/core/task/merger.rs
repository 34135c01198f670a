use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::error::{DownloadError, DownloadResult};

/// 一个待合并的分块暂存文件
#[derive(Debug, Clone)]
pub struct StagedPart {
    pub start: u64,
    pub path: PathBuf,
}

/// 按起始偏移升序把暂存文件拼接到目标文件，成功后删除暂存文件。
///
/// 只能在所有分块都已完成后调用；任何暂存文件缺失都视为协调器的错误，
/// 此时不会创建目标文件。返回写入的总字节数。
pub fn merge(destination: &Path, parts: &[StagedPart]) -> DownloadResult<u64> {
    let mut parts: Vec<&StagedPart> = parts.iter().collect();
    parts.sort_by_key(|p| p.start);

    if parts.is_empty() {
        return Err(DownloadError::Merge("没有可合并的分块".to_string()));
    }
    if let Some(missing) = parts.iter().find(|p| !p.path.is_file()) {
        return Err(DownloadError::Merge(format!("块文件缺失: {}", missing.path.display())));
    }

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| DownloadError::Merge(format!("无法创建目录 {}: {}", parent.display(), e)))?;
    }
    let output = File::create(destination)
        .map_err(|e| DownloadError::Merge(format!("无法创建目标文件 {}: {}", destination.display(), e)))?;
    let mut output = BufWriter::new(output);

    let mut written = 0u64;
    for part in &parts {
        let mut input = File::open(&part.path)
            .map_err(|e| DownloadError::Merge(format!("无法打开块文件 {}: {}", part.path.display(), e)))?;
        written += io::copy(&mut input, &mut output)
            .map_err(|e| DownloadError::Merge(format!("写入目标文件失败: {}", e)))?;
    }
    output
        .flush()
        .map_err(|e| DownloadError::Merge(format!("写入目标文件失败: {}", e)))?;

    for part in &parts {
        if let Err(e) = fs::remove_file(&part.path) {
            log::warn!("清理块文件失败 {}: {}", part.path.display(), e);
        }
    }
    Ok(written)
}
