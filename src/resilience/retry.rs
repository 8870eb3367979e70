//! 上游请求重试调度
//!
//! 按响应状态决定下一步：
//!
//! | 状态 | 处理 |
//! |------|------|
//! | 2xx | 立即返回 |
//! | 400 | 立即返回，记录请求体便于排查 |
//! | 403 | 强制刷新 Token 后立即重试（消耗一次机会，不等待） |
//! | 429 / 5xx | 等待 `base * 2^attempt` 后重试 |
//! | 网络错误 | 同上 |
//! | 其他 | 立即返回 |
//!
//! 流式请求使用独立的预算 (`FIRST_TOKEN_MAX_RETRIES`)，并额外处理首 token 超时：
//! 超时后丢弃响应体并重新发起整个请求。

use crate::backends::traits::{Upstream, UpstreamResponse};
use crate::config::Settings;
use crate::credential::TokenSource;
use crate::error::GatewayError;
use crate::models::codewhisperer::CodeWhispererRequest;
use crate::resilience::timeout::{prime_first_token, PrimeOutcome, PrimedStream};
use std::sync::Arc;
use std::time::Duration;

/// 调度预算与退避参数
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// 首 token 超时；为 None 时不检测
    pub first_token_timeout: Option<Duration>,
}

impl DispatchPolicy {
    /// 流式请求使用首 token 预算，非流式使用普通预算
    pub fn from_settings(settings: &Settings, streaming: bool) -> Self {
        Self {
            max_attempts: if streaming {
                settings.first_token_max_retries
            } else {
                settings.max_retries
            }
            .max(1),
            base_delay: settings.base_retry_delay(),
            first_token_timeout: streaming.then(|| settings.first_token_timeout()),
        }
    }

    /// 第 N 次（从 0 开始）失败后的退避时间
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// 重试调度器
pub struct RetryDispatcher {
    upstream: Arc<dyn Upstream>,
    policy: DispatchPolicy,
}

impl RetryDispatcher {
    pub fn new(upstream: Arc<dyn Upstream>, policy: DispatchPolicy) -> Self {
        Self { upstream, policy }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// 发送请求直到得到成功响应或不可重试的错误
    pub async fn dispatch(
        &self,
        tokens: &dyn TokenSource,
        payload: &CodeWhispererRequest,
    ) -> Result<UpstreamResponse, GatewayError> {
        let max_attempts = self.policy.max_attempts;
        let mut token = tokens.get_valid_token().await?;
        let mut last_error = String::from("no attempts made");

        for attempt in 0..max_attempts {
            let response = match self.upstream.send(tokens.region(), &token, payload).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        "[KIRO_DISPATCH] 请求失败 (第 {}/{} 次): {}",
                        attempt + 1,
                        max_attempts,
                        e
                    );
                    last_error = e.to_string();
                    self.backoff(attempt).await;
                    continue;
                }
            };

            let status = response.status;
            if response.is_success() {
                return Ok(response);
            }

            match status {
                400 => {
                    let body = response.text().await;
                    tracing::error!("[KIRO_DISPATCH] 上游拒绝请求 (400): {}", body);
                    match serde_json::to_string(payload) {
                        Ok(json) => tracing::error!("[KIRO_DISPATCH] 请求体: {}", json),
                        Err(e) => tracing::error!("[KIRO_DISPATCH] 请求体序列化失败: {}", e),
                    }
                    return Err(GatewayError::UpstreamClient { status, body });
                }
                403 => {
                    tracing::warn!(
                        "[KIRO_DISPATCH] 收到 403，强制刷新 Token (第 {}/{} 次)",
                        attempt + 1,
                        max_attempts
                    );
                    last_error = format!("HTTP 403: {}", response.text().await);
                    token = tokens.force_refresh().await?;
                }
                s if is_retryable_status(s) => {
                    let body = response.text().await;
                    tracing::warn!(
                        "[KIRO_DISPATCH] 上游返回 {} (第 {}/{} 次): {}",
                        s,
                        attempt + 1,
                        max_attempts,
                        body
                    );
                    last_error = format!("HTTP {s}: {body}");
                    self.backoff(attempt).await;
                }
                _ => {
                    let body = response.text().await;
                    tracing::error!("[KIRO_DISPATCH] 上游返回 {}: {}", status, body);
                    return Err(GatewayError::UpstreamClient { status, body });
                }
            }
        }

        tracing::error!("[KIRO_DISPATCH] {} 次尝试后仍然失败", max_attempts);
        Err(GatewayError::UpstreamTransient {
            attempts: max_attempts,
            message: last_error,
        })
    }

    /// 流式发送：成功响应后等待首 token，超时则重新发起请求
    pub async fn dispatch_primed(
        &self,
        tokens: &dyn TokenSource,
        payload: &CodeWhispererRequest,
    ) -> Result<PrimedStream, GatewayError> {
        let Some(timeout) = self.policy.first_token_timeout else {
            let response = self.dispatch(tokens, payload).await?;
            return match prime_first_token(response.body, Duration::ZERO).await {
                PrimeOutcome::Primed(primed) => Ok(primed),
                PrimeOutcome::Failed(e) => Err(GatewayError::StreamInterrupted(e)),
                PrimeOutcome::TimedOut => Err(GatewayError::Internal("unexpected timeout".into())),
            };
        };

        let max_attempts = self.policy.max_attempts;
        for attempt in 0..max_attempts {
            let response = self.dispatch(tokens, payload).await?;
            match prime_first_token(response.body, timeout).await {
                PrimeOutcome::Primed(primed) => return Ok(primed),
                PrimeOutcome::Failed(e) => return Err(GatewayError::StreamInterrupted(e)),
                PrimeOutcome::TimedOut => {
                    tracing::warn!(
                        "[KIRO_DISPATCH] 首 token 超时 ({:?})，第 {}/{} 次",
                        timeout,
                        attempt + 1,
                        max_attempts
                    );
                }
            }
        }

        tracing::error!(
            "[KIRO_DISPATCH] {} 次尝试均因首 token 超时失败",
            max_attempts
        );
        Err(GatewayError::FirstTokenTimeout {
            timeout_secs: timeout.as_secs_f64(),
            attempts: max_attempts,
        })
    }

    async fn backoff(&self, attempt: u32) {
        if attempt + 1 >= self.policy.max_attempts {
            return;
        }
        let delay = self.policy.backoff_delay(attempt);
        tracing::debug!("[KIRO_DISPATCH] 等待 {:?} 后重试", delay);
        tokio::time::sleep(delay).await;
    }
}
