//! 容错机制模块
//!
//! 提供上游请求重试调度与流读取超时控制

mod retry;
mod timeout;

pub use retry::{DispatchPolicy, RetryDispatcher};
pub use timeout::{
    prime_first_token, PrimeOutcome, PrimedStream, ReadOutcome, StreamReadGuard,
    MAX_CONSECUTIVE_READ_TIMEOUTS,
};
