use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// 告警类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertType {
    Log,
    Trace,
    Health,
    Metric,
}

/// 告警级别
///
/// 排序即严重程度：`Info < Warning < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::GreaterThanOrEqual => ">=",
            Comparison::LessThan => "<",
            Comparison::LessThanOrEqual => "<=",
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
        }
    }

    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::GreaterThanOrEqual => value >= threshold,
            Comparison::LessThan => value < threshold,
            Comparison::LessThanOrEqual => value <= threshold,
            Comparison::Equal => (value - threshold).abs() < f64::EPSILON,
            Comparison::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

/// 告警触发条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    /// 指标 ID（METRIC 类型）
    #[serde(default)]
    pub metric: Option<String>,

    /// 健康检查组件名（HEALTH 类型，为空时使用整体状态）
    #[serde(default)]
    pub health_component: Option<String>,

    pub operator: Comparison,

    pub threshold: f64,

    /// 评估窗口（秒）
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// 自由过滤条件，例如日志的 `level` / `logger` / `message`
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

fn default_window_secs() -> u64 {
    300
}

impl AlertCondition {
    pub fn new(operator: Comparison, threshold: f64) -> Self {
        Self {
            metric: None,
            health_component: None,
            operator,
            threshold,
            window_secs: default_window_secs(),
            filters: HashMap::new(),
        }
    }

    /// 指标阈值条件
    pub fn metric(metric: impl Into<String>, operator: Comparison, threshold: f64) -> Self {
        Self {
            metric: Some(metric.into()),
            ..Self::new(operator, threshold)
        }
    }

    /// 组件（或整体）健康状态为 DOWN 时触发
    pub fn health(component: Option<String>) -> Self {
        Self {
            health_component: component,
            ..Self::new(Comparison::GreaterThanOrEqual, 1.0)
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_secs = window.as_secs();
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn filter(&self, key: &str) -> Option<&str> {
        self.filters.get(key).map(String::as_str)
    }

    pub fn evaluate(&self, value: f64) -> bool {
        self.operator.apply(value, self.threshold)
    }
}

/// 告警定义（配置）
///
/// 只通过显式保存或启停来修改，每次修改都会产生新值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        name: impl Into<String>,
        alert_type: AlertType,
        condition: AlertCondition,
        severity: AlertSeverity,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            alert_type,
            condition,
            severity,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 返回启停状态被修改后的副本
    pub fn with_enabled(&self, enabled: bool) -> Self {
        Self {
            enabled,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// 单次评估结果，由引擎立即消费，不单独持久化
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvaluationResult {
    pub alert_id: String,
    pub triggered: bool,
    pub message: String,
    pub labels: HashMap<String, String>,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvaluationResult {
    pub fn triggered(alert: &Alert, value: f64, message: impl Into<String>) -> Self {
        Self {
            alert_id: alert.id.clone(),
            triggered: true,
            message: message.into(),
            labels: HashMap::new(),
            value: Some(value),
            threshold: Some(alert.condition.threshold),
            timestamp: Utc::now(),
        }
    }

    pub fn not_triggered(alert: &Alert, message: impl Into<String>) -> Self {
        Self {
            alert_id: alert.id.clone(),
            triggered: false,
            message: message.into(),
            labels: HashMap::new(),
            value: None,
            threshold: Some(alert.condition.threshold),
            timestamp: Utc::now(),
        }
    }

    /// 根据比较结果构造
    pub fn from_comparison(alert: &Alert, value: f64, message: impl Into<String>) -> Self {
        let mut result = if alert.condition.evaluate(value) {
            Self::triggered(alert, value, message)
        } else {
            Self::not_triggered(alert, message)
        };
        result.value = Some(value);
        result
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}
