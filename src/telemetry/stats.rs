//! 指标聚合器
//!
//! 只在内存中保留近期数据，计数允许近似（不保证强一致）

use crate::telemetry::types::RequestRecord;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// 滚动窗口与最近记录的容量
pub const METRICS_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct MetricsState {
    total: u64,
    success: u64,
    failed: u64,
    streaming: u64,
    non_streaming: u64,
    durations: VecDeque<u64>,
    by_model: BTreeMap<String, u64>,
    by_dialect: BTreeMap<String, u64>,
    /// 最新的在前
    recent: VecDeque<RequestRecord>,
}

/// `GET /api/metrics` 返回的快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub streaming_requests: u64,
    pub non_streaming_requests: u64,
    pub average_duration_ms: f64,
    pub recent_durations_ms: Vec<u64>,
    pub requests_by_model: BTreeMap<String, u64>,
    pub requests_by_dialect: BTreeMap<String, u64>,
    pub recent_requests: Vec<RequestRecord>,
}

/// 指标聚合器
pub struct MetricsAggregator {
    state: RwLock<MetricsState>,
    window: usize,
    started_at: DateTime<Utc>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(METRICS_WINDOW)
    }
}

impl MetricsAggregator {
    pub fn new(window: usize) -> Self {
        Self {
            state: RwLock::new(MetricsState::default()),
            window: window.max(1),
            started_at: Utc::now(),
        }
    }

    /// 输出结构化事件并计入统计
    pub fn record(&self, record: RequestRecord) {
        record.emit();

        let mut state = self.state.write();
        state.total += 1;
        if record.is_success() {
            state.success += 1;
        } else {
            state.failed += 1;
        }
        if record.streaming {
            state.streaming += 1;
        } else {
            state.non_streaming += 1;
        }

        state.durations.push_back(record.duration_ms);
        while state.durations.len() > self.window {
            state.durations.pop_front();
        }

        if let Some(model) = &record.model {
            *state.by_model.entry(model.clone()).or_insert(0) += 1;
        }
        *state
            .by_dialect
            .entry(record.dialect.as_str().to_string())
            .or_insert(0) += 1;

        state.recent.push_front(record);
        state.recent.truncate(self.window);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read();
        let average = if state.durations.is_empty() {
            0.0
        } else {
            state.durations.iter().sum::<u64>() as f64 / state.durations.len() as f64
        };

        MetricsSnapshot {
            started_at: self.started_at,
            total_requests: state.total,
            successful_requests: state.success,
            failed_requests: state.failed,
            streaming_requests: state.streaming,
            non_streaming_requests: state.non_streaming,
            average_duration_ms: average,
            recent_durations_ms: state.durations.iter().copied().collect(),
            requests_by_model: state.by_model.clone(),
            requests_by_dialect: state.by_dialect.clone(),
            recent_requests: state.recent.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> u64 {
        self.state.read().total
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
