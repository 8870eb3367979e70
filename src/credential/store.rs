//! Kiro 凭证存储与 Token 刷新
//!
//! 每个租户一个 `CredentialStore`。凭证状态放在异步互斥锁内，
//! 同一租户的并发刷新被串行化：等待者拿到锁后重新检查过期时间，直接复用新 Token。
//!
//! 刷新策略：最多 3 次，退避 `1s * 2^attempt`；429/5xx/网络错误可重试，其余 4xx 立即失败。

use crate::config;
use crate::credential::creds_file::CredentialDocument;
use crate::credential::fingerprint::{machine_fingerprint, refresh_user_agent};
use crate::error::GatewayError;
use crate::logger::mask_token;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;

/// 刷新请求最大尝试次数
pub const REFRESH_MAX_ATTEMPTS: u32 = 3;
/// 刷新退避基数
pub const REFRESH_BASE_DELAY: Duration = Duration::from_millis(1000);
/// 过期时间预留的续期余量（秒）
pub const EXPIRY_MARGIN_SECS: i64 = 60;
/// 上游未返回 `expiresIn` 时的默认有效期（秒）
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Token 来源
///
/// 请求处理与重试调度器只依赖此 trait，测试时可替换为计数实现。
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// 返回可用的 access token，必要时先刷新
    async fn get_valid_token(&self) -> Result<String, GatewayError>;

    /// 无条件刷新
    async fn force_refresh(&self) -> Result<String, GatewayError>;

    fn region(&self) -> &str;

    async fn profile_arn(&self) -> Option<String>;
}

/// 单个租户的凭证
#[derive(Debug, Clone, PartialEq)]
pub struct KiroCredential {
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub profile_arn: Option<String>,
    pub region: String,
}

impl KiroCredential {
    pub fn new(refresh_token: impl Into<String>, profile_arn: Option<String>, region: &str) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            access_token: None,
            expires_at: None,
            profile_arn,
            region: region.to_string(),
        }
    }

    /// 用凭证文档中存在的字段覆盖当前值
    pub fn apply_document(&mut self, doc: &CredentialDocument) {
        if let Some(rt) = doc.refresh_token.as_ref().filter(|v| !v.is_empty()) {
            self.refresh_token = rt.clone();
        }
        if let Some(at) = doc.access_token.as_ref().filter(|v| !v.is_empty()) {
            self.access_token = Some(at.clone());
        }
        if let Some(arn) = doc.profile_arn.as_ref().filter(|v| !v.is_empty()) {
            self.profile_arn = Some(arn.clone());
        }
        if let Some(region) = doc.region.as_ref().filter(|v| !v.is_empty()) {
            self.region = region.clone();
        }
        if let Some(expires_at) = doc.expires_at() {
            self.expires_at = Some(expires_at);
        }
    }

    /// 没有过期时间，或过期时间落在 `now + threshold` 之内
    pub fn is_expiring_soon(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => {
                let window = chrono::Duration::from_std(threshold)
                    .unwrap_or_else(|_| chrono::Duration::seconds(0));
                expires_at <= now + window
            }
        }
    }

    /// 可以直接使用的 token
    fn usable_token(&self, threshold: Duration) -> Option<&str> {
        if self.is_expiring_soon(threshold, Utc::now()) {
            return None;
        }
        self.access_token.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    profile_arn: Option<String>,
    expires_in: Option<i64>,
}

/// 刷新单次尝试的失败分类
enum RefreshFailure {
    Retryable(Option<u16>, String),
    Fatal(u16, String),
}

/// 单租户凭证存储
pub struct CredentialStore {
    state: Mutex<KiroCredential>,
    region: String,
    client: Client,
    refresh_url: String,
    threshold: Duration,
    base_delay: Duration,
    user_agent: String,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("region", &self.region)
            .field("refresh_url", &self.refresh_url)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn new(credential: KiroCredential, threshold: Duration) -> Self {
        Self::with_client(credential, threshold, Client::new())
    }

    /// 共享 HTTP 客户端（租户缓存中所有存储复用同一个连接池）
    pub fn with_client(credential: KiroCredential, threshold: Duration, client: Client) -> Self {
        let region = credential.region.clone();
        Self {
            refresh_url: config::refresh_url(&region),
            state: Mutex::new(credential),
            region,
            client,
            threshold,
            base_delay: REFRESH_BASE_DELAY,
            user_agent: refresh_user_agent(machine_fingerprint()),
        }
    }

    /// 覆盖刷新端点
    pub fn with_refresh_url(mut self, url: impl Into<String>) -> Self {
        self.refresh_url = url.into();
        self
    }

    /// 覆盖退避基数
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn refresh_url(&self) -> &str {
        &self.refresh_url
    }

    /// 当前凭证快照
    pub async fn snapshot(&self) -> KiroCredential {
        self.state.lock().await.clone()
    }

    async fn refresh_locked(&self, credential: &mut KiroCredential) -> Result<String, GatewayError> {
        if credential.refresh_token.is_empty() {
            return Err(GatewayError::CredentialRefresh {
                status: None,
                message: "Refresh token is not set".to_string(),
            });
        }

        tracing::info!(
            "[KIRO_AUTH] 正在刷新 Token: refresh_token={}",
            mask_token(&credential.refresh_token)
        );

        let data = self.request_with_retry(&credential.refresh_token).await?;
        let access_token = data.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            GatewayError::CredentialRefresh {
                status: None,
                message: "Response does not contain accessToken".to_string(),
            }
        })?;

        credential.access_token = Some(access_token.clone());
        if let Some(rt) = data.refresh_token.filter(|t| !t.is_empty()) {
            credential.refresh_token = rt;
        }
        if let Some(arn) = data.profile_arn.filter(|a| !a.is_empty()) {
            credential.profile_arn = Some(arn);
        }
        let expires_in = data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        let expires_at = Utc::now() + chrono::Duration::seconds(expires_in - EXPIRY_MARGIN_SECS);
        credential.expires_at = Some(expires_at);

        tracing::info!(
            "[KIRO_AUTH] Token 刷新成功，过期时间: {}",
            expires_at.to_rfc3339()
        );
        Ok(access_token)
    }

    async fn request_with_retry(&self, refresh_token: &str) -> Result<RefreshResponse, GatewayError> {
        let mut last_error = (None, "Token refresh failed after all retries".to_string());

        for attempt in 0..REFRESH_MAX_ATTEMPTS {
            match self.request_once(refresh_token).await {
                Ok(data) if data.access_token.as_deref().is_some_and(|t| !t.is_empty()) => {
                    return Ok(data);
                }
                Ok(data) => {
                    tracing::warn!(
                        "[KIRO_AUTH] 刷新响应缺少 accessToken: expires_in={:?}",
                        data.expires_in
                    );
                    last_error = (None, "Response does not contain accessToken".to_string());
                }
                Err(RefreshFailure::Fatal(status, body)) => {
                    tracing::error!(
                        "[KIRO_AUTH] Token 刷新失败（不可重试）: HTTP {} - {}",
                        status,
                        body
                    );
                    return Err(GatewayError::CredentialRefresh {
                        status: Some(status),
                        message: format!("HTTP {status}: {body}"),
                    });
                }
                Err(RefreshFailure::Retryable(status, message)) => {
                    last_error = (status, message);
                }
            }

            if attempt + 1 < REFRESH_MAX_ATTEMPTS {
                let delay = self.base_delay * 2u32.pow(attempt);
                tracing::warn!(
                    "[KIRO_AUTH] Token 刷新第 {}/{} 次失败: {}，{:?} 后重试",
                    attempt + 1,
                    REFRESH_MAX_ATTEMPTS,
                    last_error.1,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(
            "[KIRO_AUTH] Token 刷新在 {} 次尝试后失败",
            REFRESH_MAX_ATTEMPTS
        );
        Err(GatewayError::CredentialRefresh {
            status: last_error.0,
            message: last_error.1,
        })
    }

    async fn request_once(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshFailure> {
        let resp = self
            .client
            .post(&self.refresh_url)
            .header("Content-Type", "application/json")
            .header("User-Agent", &self.user_agent)
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(|e| RefreshFailure::Retryable(None, e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return if status == 429 || (500..600).contains(&status) {
                Err(RefreshFailure::Retryable(
                    Some(status),
                    format!("HTTP {status}: {body}"),
                ))
            } else {
                Err(RefreshFailure::Fatal(status, body))
            };
        }

        resp.json::<RefreshResponse>()
            .await
            .map_err(|e| RefreshFailure::Retryable(Some(status), e.to_string()))
    }
}

#[async_trait]
impl TokenSource for CredentialStore {
    async fn get_valid_token(&self) -> Result<String, GatewayError> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.usable_token(self.threshold) {
            return Ok(token.to_string());
        }
        tracing::debug!("[KIRO_AUTH] Token 缺失或即将过期");
        self.refresh_locked(&mut state).await
    }

    async fn force_refresh(&self) -> Result<String, GatewayError> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn profile_arn(&self) -> Option<String> {
        self.state.lock().await.profile_arn.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct ScriptedRefresh {
        statuses: Arc<Vec<u16>>,
        hits: Arc<AtomicUsize>,
    }

    async fn refresh_handler(
        State(script): State<ScriptedRefresh>,
        Json(body): Json<serde_json::Value>,
    ) -> Response {
        let idx = script.hits.fetch_add(1, Ordering::SeqCst);
        let status = script.statuses.get(idx).copied().unwrap_or(200);
        if status != 200 {
            let code = StatusCode::from_u16(status).unwrap();
            return (code, "refresh rejected").into_response();
        }
        assert!(body["refreshToken"].is_string());
        // 模拟一次慢响应，让并发调用有机会排队
        tokio::time::sleep(Duration::from_millis(20)).await;
        Json(serde_json::json!({
            "accessToken": format!("at-{idx}"),
            "refreshToken": "rt-rotated",
            "profileArn": "arn:rotated",
            "expiresIn": 3600
        }))
        .into_response()
    }

    async fn spawn_refresh_server(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let script = ScriptedRefresh {
            statuses: Arc::new(statuses),
            hits: hits.clone(),
        };
        let app = Router::new()
            .route("/refreshToken", post(refresh_handler))
            .with_state(script);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/refreshToken"), hits)
    }

    fn store(url: &str) -> CredentialStore {
        CredentialStore::new(
            KiroCredential::new("rt-initial", None, "us-east-1"),
            Duration::from_secs(600),
        )
        .with_refresh_url(url)
        .with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_expiring_soon_window() {
        let now = Utc::now();
        let mut cred = KiroCredential::new("rt", None, "us-east-1");
        assert!(cred.is_expiring_soon(Duration::from_secs(600), now));

        cred.expires_at = Some(now + chrono::Duration::seconds(300));
        assert!(cred.is_expiring_soon(Duration::from_secs(600), now));

        cred.expires_at = Some(now + chrono::Duration::seconds(3600));
        assert!(!cred.is_expiring_soon(Duration::from_secs(600), now));
    }

    #[test]
    fn test_apply_document_overrides_present_fields() {
        let mut cred = KiroCredential::new("rt-env", Some("arn:env".into()), "us-east-1");
        cred.apply_document(&CredentialDocument {
            refresh_token: Some("rt-doc".into()),
            region: Some("eu-west-1".into()),
            expires_at: Some("2031-05-01T10:00:00Z".into()),
            ..Default::default()
        });
        assert_eq!(cred.refresh_token, "rt-doc");
        assert_eq!(cred.profile_arn.as_deref(), Some("arn:env"));
        assert_eq!(cred.region, "eu-west-1");
        assert!(cred.expires_at.is_some());
        assert!(cred.access_token.is_none());
    }

    #[test]
    fn test_default_refresh_url_follows_region() {
        let store = CredentialStore::new(
            KiroCredential::new("rt", None, "ap-southeast-1"),
            Duration::from_secs(600),
        );
        assert_eq!(
            store.refresh_url(),
            "https://prod.ap-southeast-1.auth.desktop.kiro.dev/refreshToken"
        );
        assert_eq!(store.region(), "ap-southeast-1");
    }

    #[tokio::test]
    async fn test_refresh_on_first_use_rotates_secret() {
        let (url, hits) = spawn_refresh_server(vec![200]).await;
        let store = store(&url);

        let token = store.get_valid_token().await.unwrap();
        assert_eq!(token, "at-0");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.refresh_token, "rt-rotated");
        assert_eq!(store.profile_arn().await.as_deref(), Some("arn:rotated"));
        let remaining = snapshot.expires_at.unwrap() - Utc::now();
        assert!(remaining.num_seconds() > 3500 && remaining.num_seconds() <= 3540);

        // 仍然有效，不会再次刷新
        assert_eq!(store.get_valid_token().await.unwrap(), "at-0");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_valid_token_skips_refresh() {
        let (url, hits) = spawn_refresh_server(vec![]).await;
        let mut cred = KiroCredential::new("rt", None, "us-east-1");
        cred.access_token = Some("cached".into());
        cred.expires_at = Some(Utc::now() + chrono::Duration::hours(2));
        let store = CredentialStore::new(cred, Duration::from_secs(600)).with_refresh_url(url);

        assert_eq!(store.get_valid_token().await.unwrap(), "cached");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retryable_status_then_success() {
        let (url, hits) = spawn_refresh_server(vec![503, 429, 200]).await;
        let store = store(&url);

        assert_eq!(store.force_refresh().await.unwrap(), "at-2");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_client_error_aborts() {
        let (url, hits) = spawn_refresh_server(vec![401, 200]).await;
        let store = store(&url);

        let err = store.get_valid_token().await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::CredentialRefresh {
                status: Some(401),
                ..
            }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries() {
        let (url, hits) = spawn_refresh_server(vec![500, 502, 504, 200]).await;
        let store = store(&url);

        let err = store.force_refresh().await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::CredentialRefresh {
                status: Some(504),
                ..
            }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let (url, hits) = spawn_refresh_server(vec![200, 200]).await;
        let store = Arc::new(store(&url));

        let (a, b) = tokio::join!(store.get_valid_token(), store.get_valid_token());
        assert_eq!(a.unwrap(), "at-0");
        assert_eq!(b.unwrap(), "at-0");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_refresh_token() {
        let store = CredentialStore::new(
            KiroCredential::new("", None, "us-east-1"),
            Duration::from_secs(600),
        );
        assert!(matches!(
            store.get_valid_token().await,
            Err(GatewayError::CredentialRefresh { status: None, .. })
        ));
    }
}
