use std::time::Duration;

use crate::config::{Config, ProxyConfig};
use crate::core::error::{DownloadError, DownloadResult};

/// 构建任务使用的 HTTP 客户端
///
/// 代理设置在构建时读取一次，之后修改不影响已经创建的客户端。
pub fn build_client(config: &Config, proxy: &ProxyConfig) -> DownloadResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(Duration::from_secs(config.timeout))
        .redirect(reqwest::redirect::Policy::limited(10));

    match proxy.url() {
        Some(url) => {
            let mut p = reqwest::Proxy::all(&url)
                .map_err(|e| DownloadError::Config(format!("代理地址无效 {}: {}", url, e)))?;
            if let Some(username) = &proxy.username {
                p = p.basic_auth(username, proxy.password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(p);
        }
        None => {
            builder = builder.no_proxy();
        }
    }

    builder
        .build()
        .map_err(|e| DownloadError::Config(format!("无法创建HTTP客户端: {}", e)))
}
