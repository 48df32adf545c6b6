//! 告警评估依赖的外部数据源契约
//!
//! 指标、日志、健康检查后端都在管道之外实现，这里只定义接口和值类型。

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flux_logging::{LogEntry, LogLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// 指标数据点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// 指标查询
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricQuery {
    pub name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// 指标在某个窗口内的快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub metric_id: String,
    pub current: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub sample_count: u64,
}

impl MetricSnapshot {
    /// 只有当前值的快照
    pub fn of_value(metric_id: impl Into<String>, value: f64) -> Self {
        Self {
            metric_id: metric_id.into(),
            current: value,
            min: value,
            max: value,
            avg: value,
            sample_count: 1,
        }
    }

    pub fn current_value(&self) -> f64 {
        self.current
    }
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn query(&self, query: &MetricQuery) -> Result<Vec<Metric>>;

    async fn get_snapshot(&self, metric_id: &str, window: Duration) -> Result<MetricSnapshot>;
}

/// 日志查询
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogQuery {
    /// 最低级别
    pub min_level: Option<LogLevel>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub logger: Option<String>,
    /// 消息子串
    pub message_contains: Option<String>,
    pub limit: Option<usize>,
}

impl LogQuery {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(level) = self.min_level {
            if entry.level < level {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        if let Some(logger) = &self.logger {
            if !entry.logger.starts_with(logger.as_str()) {
                return false;
            }
        }
        if let Some(needle) = &self.message_contains {
            if !entry.message.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait LogSource: Send + Sync {
    async fn query(&self, query: &LogQuery) -> Result<Vec<LogEntry>>;
}

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
    Degraded,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}

#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn get_health(&self) -> Result<HealthReport>;
}
