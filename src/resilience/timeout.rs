//! 流读取超时控制
//!
//! - 首 token 超时：在发送响应头之前读取上游流，直到出现第一个文本增量或工具调用开始。
//!   超时后丢弃响应体（释放连接），由调度器重新发起整个请求。
//! - 读取超时：首 token 之后每次读取都受 `STREAM_READ_TIMEOUT` 限制，
//!   连续超时超过上限时结束流，不再重试。

use crate::backends::traits::ByteStream;
use crate::stream::events::UpstreamEvent;
use crate::stream::parsers::AwsEventStreamParser;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;

/// 允许的连续读取超时次数
pub const MAX_CONSECUTIVE_READ_TIMEOUTS: u32 = 3;

/// 已收到首 token 的上游流
///
/// 解析器状态随流一起移交，已解析出的事件放在 `events` 中等待发送。
pub struct PrimedStream {
    pub parser: AwsEventStreamParser,
    pub events: Vec<UpstreamEvent>,
    pub body: ByteStream,
    /// 上游在首 token 之前就已结束
    pub ended: bool,
}

impl std::fmt::Debug for PrimedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimedStream")
            .field("events", &self.events.len())
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum PrimeOutcome {
    Primed(PrimedStream),
    /// 首 token 超时，响应体已丢弃
    TimedOut,
    /// 首 token 之前响应体读取失败
    Failed(String),
}

async fn read_with_timeout(
    body: &mut ByteStream,
    timeout: Duration,
) -> Result<Option<Result<Bytes, String>>, tokio::time::error::Elapsed> {
    let next = async {
        body.next()
            .await
            .map(|chunk| chunk.map_err(|e| e.to_string()))
    };
    if timeout.is_zero() {
        Ok(next.await)
    } else {
        tokio::time::timeout(timeout, next).await
    }
}

/// 读取上游流直到首 token
///
/// 每次读取都与计时器竞争；计时器先到时读取被取消，响应体随之释放。
pub async fn prime_first_token(mut body: ByteStream, timeout: Duration) -> PrimeOutcome {
    let mut parser = AwsEventStreamParser::new();
    let mut events = Vec::new();

    loop {
        match read_with_timeout(&mut body, timeout).await {
            Ok(Some(Ok(chunk))) => {
                let parsed = parser.feed(&chunk);
                let primed = parsed.iter().any(UpstreamEvent::is_first_token);
                events.extend(parsed);
                if primed {
                    return PrimeOutcome::Primed(PrimedStream {
                        parser,
                        events,
                        body,
                        ended: false,
                    });
                }
            }
            Ok(Some(Err(e))) => return PrimeOutcome::Failed(e),
            Ok(None) => {
                tracing::debug!("[KIRO_STREAM] 上游在首 token 之前结束");
                return PrimeOutcome::Primed(PrimedStream {
                    parser,
                    events,
                    body,
                    ended: true,
                });
            }
            Err(_) => {
                drop(body);
                return PrimeOutcome::TimedOut;
            }
        }
    }
}

/// 单次受保护读取的结果
#[derive(Debug)]
pub enum ReadOutcome {
    Chunk(Bytes),
    End,
    /// 读取出错或连续超时次数超限
    Failed(String),
}

/// 首 token 之后的读取保护
#[derive(Debug, Clone)]
pub struct StreamReadGuard {
    timeout: Duration,
    max_consecutive_timeouts: u32,
    consecutive_timeouts: u32,
}

impl StreamReadGuard {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_consecutive_timeouts: MAX_CONSECUTIVE_READ_TIMEOUTS,
            consecutive_timeouts: 0,
        }
    }

    pub fn with_max_timeouts(mut self, max: u32) -> Self {
        self.max_consecutive_timeouts = max;
        self
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    pub async fn next(&mut self, body: &mut ByteStream) -> ReadOutcome {
        loop {
            match read_with_timeout(body, self.timeout).await {
                Ok(Some(Ok(chunk))) => {
                    self.consecutive_timeouts = 0;
                    return ReadOutcome::Chunk(chunk);
                }
                Ok(Some(Err(e))) => {
                    tracing::error!("[KIRO_STREAM] 读取上游流失败: {}", e);
                    return ReadOutcome::Failed(e);
                }
                Ok(None) => return ReadOutcome::End,
                Err(_) => {
                    self.consecutive_timeouts += 1;
                    if self.consecutive_timeouts > self.max_consecutive_timeouts {
                        tracing::error!(
                            "[KIRO_STREAM] 连续 {} 次读取超时，结束流",
                            self.consecutive_timeouts
                        );
                        return ReadOutcome::Failed(format!(
                            "Stream read timeout after {} consecutive timeouts ({}s each)",
                            self.consecutive_timeouts,
                            self.timeout.as_secs_f64()
                        ));
                    }
                    tracing::warn!(
                        "[KIRO_STREAM] 读取超时 ({:?})，第 {}/{} 次",
                        self.timeout,
                        self.consecutive_timeouts,
                        self.max_consecutive_timeouts
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::traits::BackendError;

    fn body_from(chunks: Vec<&'static str>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, BackendError>(Bytes::from_static(c.as_bytes()))),
        ))
    }

    fn stalled_after(chunks: Vec<&'static str>) -> ByteStream {
        Box::pin(
            futures::stream::iter(
                chunks
                    .into_iter()
                    .map(|c| Ok::<_, BackendError>(Bytes::from_static(c.as_bytes()))),
            )
            .chain(futures::stream::pending()),
        )
    }

    #[tokio::test]
    async fn test_prime_stops_at_first_content() {
        let body = body_from(vec![
            r#"{"contextUsagePercentage":1.5}"#,
            r#"{"content":"Hel"#,
            r#"lo"}{"content":"!"}"#,
        ]);
        match prime_first_token(body, Duration::from_secs(5)).await {
            PrimeOutcome::Primed(primed) => {
                assert!(!primed.ended);
                assert_eq!(
                    primed.events,
                    vec![
                        UpstreamEvent::ContextUsagePercentage(1.5),
                        UpstreamEvent::ContentDelta("Hello".into()),
                        UpstreamEvent::ContentDelta("!".into()),
                    ]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prime_accepts_tool_start() {
        let body = stalled_after(vec![r#"{"name":"read","toolUseId":"t1"}"#]);
        assert!(matches!(
            prime_first_token(body, Duration::from_millis(200)).await,
            PrimeOutcome::Primed(_)
        ));
    }

    #[tokio::test]
    async fn test_prime_times_out_without_content() {
        let body = stalled_after(vec![r#"{"usage":0.01}"#]);
        assert!(matches!(
            prime_first_token(body, Duration::from_millis(30)).await,
            PrimeOutcome::TimedOut
        ));
    }

    #[tokio::test]
    async fn test_prime_empty_stream_ends() {
        match prime_first_token(body_from(vec![]), Duration::from_millis(30)).await {
            PrimeOutcome::Primed(primed) => {
                assert!(primed.ended);
                assert!(primed.events.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_guard_tolerates_then_fails() {
        let mut body = stalled_after(vec!["a"]);
        let mut guard = StreamReadGuard::new(Duration::from_millis(10));

        assert!(matches!(guard.next(&mut body).await, ReadOutcome::Chunk(_)));
        match guard.next(&mut body).await {
            ReadOutcome::Failed(msg) => assert!(msg.contains("4 consecutive timeouts")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(guard.consecutive_timeouts(), 4);
    }

    #[tokio::test]
    async fn test_read_guard_reports_body_error() {
        let mut body: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"x")),
            Err(BackendError::network("reset")),
        ]));
        let mut guard = StreamReadGuard::new(Duration::from_secs(1));
        assert!(matches!(guard.next(&mut body).await, ReadOutcome::Chunk(_)));
        assert!(matches!(guard.next(&mut body).await, ReadOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_read_guard_end() {
        let mut body = body_from(vec![]);
        let mut guard = StreamReadGuard::new(Duration::from_secs(1));
        assert!(matches!(guard.next(&mut body).await, ReadOutcome::End));
    }
}
