use std::time::Duration;

use crate::config::Config;
use crate::core::error::{DownloadError, ErrorKind};

/// 重试策略
///
/// 引擎本身从不重试，由调用方在任务失败后重新提交。
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64, // 抖动因子，避免所有任务同时重新提交
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryStrategy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.retry_count,
            base_delay: Duration::from_secs(config.retry_delay),
            max_delay: Duration::from_secs(config.retry_max_delay.max(config.retry_delay)),
            ..Self::default()
        }
    }

    pub fn should_retry(&self, kind: ErrorKind, retry_count: usize) -> bool {
        retry_count < self.max_retries && kind.is_retryable()
    }

    pub fn get_delay(&self, retry_count: usize) -> Duration {
        let max_secs = self.max_delay.as_secs_f64().max(0.1);
        let exponent = retry_count.min(i32::MAX as usize) as i32;
        // 指数溢出为无穷大时按上限处理
        let delay_secs = (self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent)).min(max_secs);

        let jitter = delay_secs * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (delay_secs + jitter).clamp(0.1, max_secs); // 最小延迟100ms

        Duration::from_secs_f64(final_delay)
    }
}

/// 单个URL的重试上下文
#[derive(Debug)]
pub struct RetryContext {
    pub strategy: RetryStrategy,
    pub retry_count: usize,
    pub last_error: Option<String>,
    pub total_retry_time: Duration,
}

impl RetryContext {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            retry_count: 0,
            last_error: None,
            total_retry_time: Duration::ZERO,
        }
    }

    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        self.strategy.should_retry(kind, self.retry_count)
    }

    /// 记录一次失败并返回下次提交前的等待时间
    pub fn record_failure(&mut self, message: impl Into<String>) -> Duration {
        let delay = self.strategy.get_delay(self.retry_count);
        self.retry_count += 1;
        self.last_error = Some(message.into());
        self.total_retry_time += delay;
        delay
    }

    pub fn should_retry_error(&self, error: &DownloadError) -> bool {
        self.should_retry(error.kind())
    }
}
