use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 限速检查周期
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// 限速规则：`bytes` 字节在 `interval` 内到达，上限为 `cap_kbps` KB/s。
///
/// 当 `bytes/1024 > cap * interval` 时返回需要补足的休眠时间
/// `bytes/1024/cap - interval`，否则返回 `None`。`cap <= 0` 表示不限速。
pub fn throttle_delay(bytes: u64, cap_kbps: f64, interval: Duration) -> Option<Duration> {
    if cap_kbps <= 0.0 || !cap_kbps.is_finite() {
        return None;
    }
    let kb = bytes as f64 / 1024.0;
    let interval = interval.as_secs_f64();
    if kb > cap_kbps * interval {
        Some(Duration::from_secs_f64(kb / cap_kbps - interval))
    } else {
        None
    }
}

/// 可在运行中修改的速度上限 (KB/s)，多个分块并发读取
#[derive(Debug, Clone, Default)]
pub struct SpeedCap(Arc<AtomicU64>);

impl SpeedCap {
    pub fn new(kbps: f64) -> Self {
        let cap = Self::default();
        cap.set(kbps);
        cap
    }

    pub fn set(&self, kbps: f64) {
        let kbps = if kbps.is_finite() && kbps > 0.0 { kbps } else { 0.0 };
        self.0.store(kbps.to_bits(), Ordering::Release);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
}

/// 任务上限在仍在传输的分块之间平分
///
/// 分块完成时调用 [`CapShare::release`]，剩余分块的份额随之变大。
#[derive(Debug, Clone)]
pub struct CapShare(Arc<AtomicUsize>);

impl CapShare {
    pub fn new(chunk_count: usize) -> Self {
        Self(Arc::new(AtomicUsize::new(chunk_count)))
    }

    pub fn release(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn active(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// 单个分块的上限，`cap <= 0` 仍表示不限速
    pub fn per_chunk(&self, cap_kbps: f64) -> f64 {
        cap_kbps / self.active().max(1) as f64
    }
}

/// 速度调节器
///
/// 每个传输单元持有一个，按读取单元调用 [`SpeedGovernor::regulate`]。
/// 在一个采样窗口内累计字节数，窗口内的累计量超过上限时给出休眠时间。
#[derive(Debug)]
pub struct SpeedGovernor {
    window_start: Instant,
    window_bytes: u64,
    sample_interval: Duration,
}

impl Default for SpeedGovernor {
    fn default() -> Self {
        Self::new(SAMPLE_INTERVAL)
    }
}

impl SpeedGovernor {
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            window_start: Instant::now(),
            window_bytes: 0,
            sample_interval,
        }
    }

    /// 记录一个读取单元，返回在读取下一单元前需要休眠的时长
    ///
    /// 需要休眠时，下一个窗口从休眠结束时开始，休眠时间不计入窗口。
    pub fn regulate(&mut self, unit_size: usize, cap_kbps: f64) -> Option<Duration> {
        if cap_kbps <= 0.0 {
            self.reset();
            return None;
        }
        self.window_bytes += unit_size as u64;
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.window_start);
        match throttle_delay(self.window_bytes, cap_kbps, elapsed.max(self.sample_interval)) {
            Some(delay) => {
                // 窗口未满时补足到窗口长度
                let delay = delay + self.sample_interval.saturating_sub(elapsed);
                self.window_start = now + delay;
                self.window_bytes = 0;
                Some(delay)
            }
            None => {
                if elapsed >= self.sample_interval {
                    self.reset();
                }
                None
            }
        }
    }

    /// 暂停恢复后丢弃旧窗口
    pub fn reset(&mut self) {
        self.window_start = Instant::now();
        self.window_bytes = 0;
    }
}

/// 速度统计窗口，至少 1 秒更新一次
pub const SPEED_WINDOW: Duration = Duration::from_secs(1);

/// 滑动窗口测速，单位 KB/s
#[derive(Debug)]
pub struct SpeedMeter {
    started: Instant,
    bytes_at_start: u64,
    window: Duration,
}

impl SpeedMeter {
    pub fn new(downloaded: u64) -> Self {
        Self::with_window(downloaded, SPEED_WINDOW)
    }

    pub fn with_window(downloaded: u64, window: Duration) -> Self {
        Self {
            started: Instant::now(),
            bytes_at_start: downloaded,
            window,
        }
    }

    /// 窗口到期时返回这段时间的平均速度并开始新窗口
    pub fn sample(&mut self, downloaded: u64) -> Option<f64> {
        let elapsed = self.started.elapsed();
        if elapsed < self.window {
            return None;
        }
        let delta = downloaded.saturating_sub(self.bytes_at_start);
        let kbps = delta as f64 / 1024.0 / elapsed.as_secs_f64();
        self.reset(downloaded);
        Some(kbps)
    }

    pub fn reset(&mut self, downloaded: u64) {
        self.started = Instant::now();
        self.bytes_at_start = downloaded;
    }
}
