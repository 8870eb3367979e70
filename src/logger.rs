//! 日志初始化与敏感信息脱敏
use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::EnvFilter;

/// 把 `LOG_LEVEL`（TRACE/DEBUG/INFO/WARNING/ERROR）转换为 tracing 过滤指令
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARNING" | "WARN" => "warn",
        "ERROR" => "error",
        _ => "info",
    }
}

/// 安装全局 fmt subscriber
///
/// 设置了 `RUST_LOG` 时以其为准，否则使用 `LOG_LEVEL`。
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 遮盖 token：保留首尾各 4 个字符
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

static SENSITIVE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Bearer\s+[A-Za-z0-9._~+/=-]+", "Bearer ***"),
        (
            r#"(?i)refresh[_-]?token["']?\s*[:=]\s*["']?[A-Za-z0-9._~+/=-]+"#,
            "refresh_token: ***",
        ),
        (
            r#"(?i)access[_-]?token["']?\s*[:=]\s*["']?[A-Za-z0-9._~+/=-]+"#,
            "access_token: ***",
        ),
        (
            r#"(?i)(?:x-)?api[_-]?key["']?\s*[:=]\s*["']?[A-Za-z0-9._:-]+"#,
            "api_key: ***",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| {
        Regex::new(pattern).ok().map(|re| (re, replacement))
    })
    .collect()
});

/// 脱敏日志消息中的凭证
pub fn sanitize_log_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (re, replacement) in SENSITIVE_PATTERNS.iter() {
        sanitized = re.replace_all(&sanitized, *replacement).into_owned();
    }
    sanitized
}
