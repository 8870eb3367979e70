//! 测试用上游与 Token 来源
//!
//! `ScriptedUpstream` 按顺序返回预设的响应，`CountingTokenSource` 记录强制刷新次数。

use crate::backends::traits::{BackendError, BackendResult, ByteStream, Upstream, UpstreamResponse};
use crate::credential::TokenSource;
use crate::error::GatewayError;
use crate::models::codewhisperer::CodeWhispererRequest;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

/// 一次上游调用的预设结果
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// 返回状态码与按块发送的响应体
    Respond { status: u16, chunks: Vec<Vec<u8>> },
    /// 返回 200，发送若干块后永远不再产生数据
    StallAfter(Vec<Vec<u8>>),
    /// 返回 200，发送若干块后响应体出错
    FailAfter(Vec<Vec<u8>>),
    /// 连接失败
    NetworkError,
}

impl ScriptStep {
    pub fn status(status: u16) -> Self {
        ScriptStep::Respond {
            status,
            chunks: vec![format!("{{\"message\":\"status {status}\"}}").into_bytes()],
        }
    }

    pub fn ok(chunks: &[&str]) -> Self {
        ScriptStep::Respond {
            status: 200,
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
        }
    }
}

fn chunk_stream(chunks: Vec<Vec<u8>>) -> impl futures::Stream<Item = Result<Bytes, BackendError>> {
    futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
}

pub struct ScriptedUpstream {
    steps: Mutex<VecDeque<ScriptStep>>,
    calls: AtomicU32,
    tokens: Mutex<Vec<String>>,
    payloads: Mutex<Vec<CodeWhispererRequest>>,
}

impl ScriptedUpstream {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
            tokens: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用使用的 access token
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }

    pub fn payloads(&self) -> Vec<CodeWhispererRequest> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn send(
        &self,
        _region: &str,
        access_token: &str,
        payload: &CodeWhispererRequest,
    ) -> BackendResult<UpstreamResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().push(access_token.to_string());
        self.payloads.lock().push(payload.clone());

        let step = self.steps.lock().pop_front();
        let body: ByteStream = match step {
            Some(ScriptStep::Respond { status, chunks }) => {
                return Ok(UpstreamResponse::new(status, Box::pin(chunk_stream(chunks))));
            }
            Some(ScriptStep::StallAfter(chunks)) => {
                Box::pin(chunk_stream(chunks).chain(futures::stream::pending()))
            }
            Some(ScriptStep::FailAfter(chunks)) => Box::pin(chunk_stream(chunks).chain(
                futures::stream::once(async { Err(BackendError::network("connection reset")) }),
            )),
            Some(ScriptStep::NetworkError) | None => {
                return Err(BackendError::network("connection refused"));
            }
        };
        Ok(UpstreamResponse::new(200, body))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// 计数 Token 来源
#[derive(Debug, Default)]
pub struct CountingTokenSource {
    refreshes: AtomicU32,
}

impl CountingTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingTokenSource {
    async fn get_valid_token(&self) -> Result<String, GatewayError> {
        Ok(format!("token-{}", self.refreshes()))
    }

    async fn force_refresh(&self) -> Result<String, GatewayError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{n}"))
    }

    fn region(&self) -> &str {
        "us-east-1"
    }

    async fn profile_arn(&self) -> Option<String> {
        Some("arn:aws:codewhisperer:test".to_string())
    }
}
