//! Kiro/CodeWhisperer 上游
//!
//! 每次调用发送一次 `generateAssistantResponse` 请求，响应体以字节流原样返回。
//! 流读取超时由调用方控制，这里不设置总超时。

use crate::backends::traits::{BackendError, BackendResult, ByteStream, Upstream, UpstreamResponse};
use crate::config;
use crate::credential::{kiro_headers, machine_fingerprint};
use crate::models::codewhisperer::CodeWhispererRequest;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;

pub struct KiroBackend {
    client: Client,
    /// 覆盖默认端点（测试时指向本地服务）
    endpoint: Option<String>,
}

impl Default for KiroBackend {
    fn default() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("[KIRO_BACKEND] 创建 HTTP 客户端失败，使用默认配置: {}", e);
                Client::new()
            });
        Self::with_client(client)
    }
}

impl KiroBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn url(&self, region: &str) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| config::api_url(region))
    }
}

#[async_trait]
impl Upstream for KiroBackend {
    async fn send(
        &self,
        region: &str,
        access_token: &str,
        payload: &CodeWhispererRequest,
    ) -> BackendResult<UpstreamResponse> {
        let url = self.url(region);
        tracing::debug!(
            "[KIRO_BACKEND] POST {} (conversation_id={})",
            url,
            payload.conversation_state.conversation_id
        );

        let resp = self
            .client
            .post(&url)
            .headers(kiro_headers(access_token, machine_fingerprint()))
            .json(payload)
            .send()
            .await
            .map_err(BackendError::from)?;

        let status = resp.status().as_u16();
        let body: ByteStream = Box::pin(resp.bytes_stream().map(|chunk| chunk.map_err(BackendError::from)));
        Ok(UpstreamResponse::new(status, body))
    }

    fn name(&self) -> &str {
        "kiro"
    }
}
