//! 监控模块
//!
//! 每个完成的模型请求输出一条结构化记录（tracing target `kirogate::metrics`），
//! 同时计入内存中的聚合统计。持久化由外部收集器负责。

mod stats;
mod types;

pub use stats::{MetricsAggregator, MetricsSnapshot, METRICS_WINDOW};
pub use types::{RequestRecord, METRICS_TARGET};
