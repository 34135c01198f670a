use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use url::Url;

static GENERATED: AtomicUsize = AtomicUsize::new(0);

fn invalid_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f]"#).expect("静态正则"))
}

/// 从URL推断文件名：取最后一个非空路径段，无法推断时生成名称
pub fn derive_file_name(url: &str) -> String {
    let segment = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
    });

    let name = segment
        .map(|s| decode_segment(&s))
        .map(|s| invalid_chars().replace_all(&s, "_").trim().to_string())
        .filter(|s| !s.is_empty() && s != "." && s != "..");

    name.unwrap_or_else(generated_name)
}

fn decode_segment(segment: &str) -> String {
    // form 解码会把 '+' 当作空格、把 '&' 当作分隔符，先转义
    let escaped = segment.replace('+', "%2B").replace('&', "%26");
    url::form_urlencoded::parse(format!("x={}", escaped).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| segment.to_string())
}

/// 同一秒内多次生成时以序号区分
fn generated_name() -> String {
    let n = GENERATED.fetch_add(1, Ordering::Relaxed);
    format!("download_{}_{}", chrono::Utc::now().timestamp(), n)
}
