use url::Url;

pub const MIN_THREAD_COUNT: usize = 1;
pub const MAX_THREAD_COUNT: usize = 32;

/// 只接受 http/https
pub fn is_valid_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some(),
        Err(_) => false,
    }
}

/// 线程数限定在 [1, 32]
pub fn clamp_thread_count(threads: usize) -> usize {
    threads.clamp(MIN_THREAD_COUNT, MAX_THREAD_COUNT)
}

/// 负数和非有限值视为不限速
pub fn clamp_speed_limit(kbps: f64) -> f64 {
    if kbps.is_finite() && kbps > 0.0 {
        kbps
    } else {
        0.0
    }
}
