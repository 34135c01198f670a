use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use uuid::Uuid;

use crate::core::event::DownloadEvent;
use crate::core::task::TaskStatus;
use super::format_speed;

// 结构体：ProgressManager
// 每个任务一条进度条，按任务ID索引
pub struct ProgressManager {
    multi: MultiProgress,
    bars: HashMap<Uuid, ProgressBar>,
    speeds: HashMap<Uuid, f64>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        ProgressManager {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            speeds: HashMap::new(),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:>24} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }

    // 添加进度条，百分比为单位
    pub fn add_task(&mut self, task_id: Uuid, name: &str) {
        let pb = self.multi.add(ProgressBar::new(100));
        pb.set_style(Self::style());
        pb.set_prefix(name.to_string());
        pb.set_message(TaskStatus::Pending.to_string());
        self.bars.insert(task_id, pb);
    }

    pub fn remove_task(&mut self, task_id: Uuid) {
        if let Some(pb) = self.bars.remove(&task_id) {
            pb.finish_and_clear();
            self.multi.remove(&pb);
        }
        self.speeds.remove(&task_id);
    }

    // 根据引擎事件更新显示
    pub fn handle_event(&mut self, event: &DownloadEvent) {
        let Some(pb) = self.bars.get(&event.task_id()) else {
            return;
        };
        match event {
            DownloadEvent::Progress { percent, .. } => pb.set_position(*percent as u64),
            DownloadEvent::Speed { task_id, speed_kbps } => {
                self.speeds.insert(*task_id, *speed_kbps);
                pb.set_message(format_speed(*speed_kbps));
            }
            DownloadEvent::Status { status, .. } => match status {
                TaskStatus::Active => {}
                _ => pb.set_message(status.to_string()),
            },
            DownloadEvent::Completed { .. } => {
                pb.set_position(100);
                pb.finish_with_message("完成");
            }
            DownloadEvent::Error { message, .. } => pb.abandon_with_message(format!("失败: {}", message)),
            DownloadEvent::ChunkProgress { .. } => {}
        }
    }

    /// 所有任务的速度之和
    pub fn total_speed(&self) -> f64 {
        self.speeds.values().sum()
    }

    pub fn println(&self, message: &str) {
        let _ = self.multi.println(message);
    }

    pub fn finish(&self) {
        for pb in self.bars.values() {
            if !pb.is_finished() {
                pb.abandon();
            }
        }
    }
}
