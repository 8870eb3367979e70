//! 网关配置
//!
//! 所有配置均来自环境变量；无法解析的数值回退到默认值并记录警告。

use crate::error::GatewayError;
use std::time::Duration;

pub const DEFAULT_PROXY_API_KEY: &str = "changeme_proxy_secret";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PORT: u16 = 8000;

/// 最大上下文窗口（token）
pub const MAX_INPUT_TOKENS: u64 = 200_000;
/// 工具描述长度上限，超过的描述移到 system prompt；0 表示禁用
pub const TOOL_DESCRIPTION_MAX_LENGTH: usize = 4000;
/// 请求体大小上限
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Kiro 刷新端点
pub fn refresh_url(region: &str) -> String {
    format!("https://prod.{region}.auth.desktop.kiro.dev/refreshToken")
}

/// Kiro 会话端点
pub fn api_url(region: &str) -> String {
    format!("https://codewhisperer.{region}.amazonaws.com/generateAssistantResponse")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub proxy_api_key: String,
    pub refresh_token: Option<String>,
    pub profile_arn: Option<String>,
    pub region: String,
    pub kiro_creds_file: Option<String>,
    /// 秒
    pub token_refresh_threshold: u64,
    pub max_retries: u32,
    /// 秒
    pub base_retry_delay: f64,
    /// 秒
    pub first_token_timeout: f64,
    pub first_token_max_retries: u32,
    /// 秒
    pub stream_read_timeout: f64,
    pub log_level: String,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_api_key: DEFAULT_PROXY_API_KEY.to_string(),
            refresh_token: None,
            profile_arn: None,
            region: DEFAULT_REGION.to_string(),
            kiro_creds_file: None,
            token_refresh_threshold: 600,
            max_retries: 3,
            base_retry_delay: 1.0,
            first_token_timeout: 15.0,
            first_token_max_retries: 3,
            stream_read_timeout: 300.0,
            log_level: "INFO".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Settings {
    /// 从进程环境读取配置
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源读取配置（测试时注入）
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            proxy_api_key: text("PROXY_API_KEY").unwrap_or(defaults.proxy_api_key),
            refresh_token: text("REFRESH_TOKEN"),
            profile_arn: text("PROFILE_ARN"),
            region: text("KIRO_REGION").unwrap_or(defaults.region),
            kiro_creds_file: text("KIRO_CREDS_FILE"),
            token_refresh_threshold: parse_or(
                "TOKEN_REFRESH_THRESHOLD",
                text("TOKEN_REFRESH_THRESHOLD"),
                defaults.token_refresh_threshold,
            ),
            max_retries: parse_or("MAX_RETRIES", text("MAX_RETRIES"), defaults.max_retries),
            base_retry_delay: parse_or(
                "BASE_RETRY_DELAY",
                text("BASE_RETRY_DELAY"),
                defaults.base_retry_delay,
            ),
            first_token_timeout: parse_or(
                "FIRST_TOKEN_TIMEOUT",
                text("FIRST_TOKEN_TIMEOUT"),
                defaults.first_token_timeout,
            ),
            first_token_max_retries: parse_or(
                "FIRST_TOKEN_MAX_RETRIES",
                text("FIRST_TOKEN_MAX_RETRIES"),
                defaults.first_token_max_retries,
            ),
            stream_read_timeout: parse_or(
                "STREAM_READ_TIMEOUT",
                text("STREAM_READ_TIMEOUT"),
                defaults.stream_read_timeout,
            ),
            log_level: text("LOG_LEVEL").unwrap_or(defaults.log_level),
            port: parse_or("PORT", text("PORT"), defaults.port),
        }
    }

    /// 启动前校验：至少需要一个凭证来源
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.refresh_token.is_none() && self.kiro_creds_file.is_none() {
            return Err(GatewayError::Configuration(
                "REFRESH_TOKEN or KIRO_CREDS_FILE must be set".to_string(),
            ));
        }
        if self.proxy_api_key == DEFAULT_PROXY_API_KEY {
            tracing::warn!("[CONFIG] PROXY_API_KEY 使用默认值，请在生产环境中修改");
        }
        Ok(())
    }

    pub fn base_retry_delay(&self) -> Duration {
        secs(self.base_retry_delay)
    }

    pub fn first_token_timeout(&self) -> Duration {
        secs(self.first_token_timeout)
    }

    pub fn stream_read_timeout(&self) -> Duration {
        secs(self.stream_read_timeout)
    }

    pub fn token_refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.token_refresh_threshold)
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match raw {
        None => default,
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(
                    "[CONFIG] {} 的值 '{}' 无法解析，使用默认值 {}",
                    key,
                    value,
                    default
                );
                default
            }
        },
    }
}
