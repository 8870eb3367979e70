//! 统一流处理管道
//!
//! 封装完整的流式处理流程：上游字节流 → 解析 → 转换 → 客户端 SSE
//!
//! # 使用示例
//!
//! ```ignore
//! use kirogate_lib::stream::pipeline::{create_sse_stream, PipelineConfig};
//!
//! let config = PipelineConfig::new(ApiDialect::Anthropic, "claude-sonnet-4-5".to_string(), 12);
//! let sse_stream = create_sse_stream(primed, config, guard, |summary| { ... });
//! ```

use crate::backends::traits::ByteStream;
use crate::error::GatewayError;
use crate::models::ApiDialect;
use crate::resilience::{PrimedStream, ReadOutcome, StreamReadGuard};
use crate::stream::events::UpstreamEvent;
use crate::stream::generators::{anthropic_sse, openai_sse, AnthropicSseGenerator, OpenAiSseGenerator};
use crate::stream::parsers::AwsEventStreamParser;
use crate::stream::turn::{CompletedTurn, TurnCollector};
use futures::Stream;
use std::convert::Infallible;

/// 流处理管道配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 客户端格式
    pub dialect: ApiDialect,
    /// 回显给客户端的模型名
    pub model: String,
    /// 本地估算的 prompt token 数
    pub prompt_tokens: u64,
    /// 响应 ID（可选）
    pub response_id: Option<String>,
}

impl PipelineConfig {
    pub fn new(dialect: ApiDialect, model: String, prompt_tokens: u64) -> Self {
        Self {
            dialect,
            model,
            prompt_tokens,
            response_id: None,
        }
    }

    /// 设置响应 ID
    pub fn with_response_id(mut self, id: String) -> Self {
        self.response_id = Some(id);
        self
    }
}

/// 流结束时的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub tool_calls: usize,
    /// 流中途失败的原因
    pub error: Option<String>,
}

/// SSE 生成器封装
#[derive(Debug)]
enum SseGenerator {
    Anthropic(AnthropicSseGenerator),
    OpenAi(OpenAiSseGenerator),
}

impl SseGenerator {
    fn generate(&mut self, event: &UpstreamEvent) -> Vec<String> {
        match self {
            SseGenerator::Anthropic(g) => g.generate(event),
            SseGenerator::OpenAi(g) => g.generate(event).into_iter().collect(),
        }
    }
}

/// 统一流处理管道
///
/// 将上游字节转换为客户端 SSE 字符串
#[derive(Debug)]
pub struct StreamPipeline {
    config: PipelineConfig,
    parser: AwsEventStreamParser,
    generator: SseGenerator,
    turn: TurnCollector,
    tool_calls: usize,
}

impl StreamPipeline {
    /// 创建新的管道
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_parser(config, AwsEventStreamParser::new())
    }

    /// 接管首 token 阶段已经使用过的解析器
    pub fn with_parser(config: PipelineConfig, parser: AwsEventStreamParser) -> Self {
        let model = config.model.clone();
        let generator = match (config.dialect, config.response_id.clone()) {
            (ApiDialect::Anthropic, Some(id)) => {
                SseGenerator::Anthropic(AnthropicSseGenerator::with_id(id, model))
            }
            (ApiDialect::Anthropic, None) => SseGenerator::Anthropic(AnthropicSseGenerator::new(model)),
            (ApiDialect::OpenAi, Some(id)) => SseGenerator::OpenAi(OpenAiSseGenerator::with_id(id, model)),
            (ApiDialect::OpenAi, None) => SseGenerator::OpenAi(OpenAiSseGenerator::new(model)),
        };

        Self {
            config,
            parser,
            generator,
            turn: TurnCollector::new(),
            tool_calls: 0,
        }
    }

    /// 流开头的固定事件（Anthropic 的 message_start）
    pub fn start(&self) -> Vec<String> {
        match &self.generator {
            SseGenerator::Anthropic(g) => vec![g.start()],
            SseGenerator::OpenAi(_) => Vec::new(),
        }
    }

    /// 处理已解析的事件
    pub fn process_events(&mut self, events: &[UpstreamEvent]) -> Vec<String> {
        let mut result = Vec::new();
        for event in events {
            self.turn.observe(event);
            result.extend(self.generator.generate(event));
        }
        result
    }

    /// 处理单个字节块
    pub fn process_chunk(&mut self, bytes: &[u8]) -> Vec<String> {
        let events = self.parser.feed(bytes);
        self.process_events(&events)
    }

    /// 正常结束：输出工具调用与结束事件
    pub fn finish(&mut self) -> Vec<String> {
        let tool_calls = self.parser.tool_calls();
        self.tool_calls = tool_calls.len();
        let prompt_tokens = self.config.prompt_tokens;
        match &mut self.generator {
            SseGenerator::Anthropic(g) => g.finish(&tool_calls, prompt_tokens),
            SseGenerator::OpenAi(g) => g.finish(&tool_calls, prompt_tokens),
        }
    }

    /// 流内错误事件，之后不再发送任何内容
    pub fn error(&self, message: &str) -> String {
        match self.config.dialect {
            ApiDialect::Anthropic => anthropic_sse::generate_error(message),
            ApiDialect::OpenAi => openai_sse::generate_error(message),
        }
    }

    /// 获取配置
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn summary(&self, error: Option<String>) -> StreamSummary {
        let usage = self.turn.usage(self.config.prompt_tokens);
        StreamSummary {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            tool_calls: self.tool_calls,
            error,
        }
    }
}

/// 创建流式处理的异步流
///
/// 从首 token 阶段留下的状态继续读取，每次读取都受 `guard` 约束。
/// 读取失败时发送一条错误事件并结束；`on_finish` 在流结束时调用一次。
pub fn create_sse_stream<F>(
    primed: PrimedStream,
    config: PipelineConfig,
    mut guard: StreamReadGuard,
    on_finish: F,
) -> impl Stream<Item = Result<String, Infallible>>
where
    F: FnOnce(StreamSummary) + Send + 'static,
{
    async_stream::stream! {
        let PrimedStream { parser, events, mut body, ended } = primed;
        let mut pipeline = StreamPipeline::with_parser(config, parser);

        for sse in pipeline.start() {
            yield Ok(sse);
        }
        for sse in pipeline.process_events(&events) {
            yield Ok(sse);
        }

        let mut failure: Option<String> = None;
        if !ended {
            loop {
                match guard.next(&mut body).await {
                    ReadOutcome::Chunk(bytes) => {
                        for sse in pipeline.process_chunk(&bytes) {
                            yield Ok(sse);
                        }
                    }
                    ReadOutcome::End => break,
                    ReadOutcome::Failed(message) => {
                        failure = Some(message);
                        break;
                    }
                }
            }
        }

        match failure {
            Some(message) => {
                tracing::error!(
                    "[KIRO_STREAM] 流式响应中断 ({}): {}",
                    pipeline.config().dialect.as_str(),
                    message
                );
                yield Ok(pipeline.error(&message));
                on_finish(pipeline.summary(Some(message)));
            }
            None => {
                for sse in pipeline.finish() {
                    yield Ok(sse);
                }
                on_finish(pipeline.summary(None));
            }
        }
    }
}

/// 非流式路径：读完整个响应体并汇总
pub async fn collect_turn(
    mut body: ByteStream,
    mut guard: StreamReadGuard,
    prompt_tokens: u64,
) -> Result<CompletedTurn, GatewayError> {
    let mut parser = AwsEventStreamParser::new();
    let mut turn = TurnCollector::new();

    loop {
        match guard.next(&mut body).await {
            ReadOutcome::Chunk(bytes) => {
                for event in parser.feed(&bytes) {
                    turn.observe(&event);
                }
            }
            ReadOutcome::End => break,
            ReadOutcome::Failed(message) => return Err(GatewayError::StreamInterrupted(message)),
        }
    }

    Ok(turn.complete(parser.tool_calls(), prompt_tokens))
}
