use crate::error::{AlertError, Result};
use crate::model::alert::{Alert, AlertEvaluationResult, AlertSeverity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 系统自动操作使用的操作者名
pub const SYSTEM_ACTOR: &str = "system";

/// 告警事件状态
///
/// 只能向前推进：`Firing -> Acknowledged -> Resolved` 或 `Firing -> Resolved`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Firing,
    Acknowledged,
    Resolved,
}

/// 一次告警触发记录
///
/// 状态转换返回新值，原值不变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub alert_id: String,
    pub alert_name: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub message: String,
    pub labels: HashMap<String, String>,
    pub fired_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl AlertEvent {
    pub fn new(
        alert_id: impl Into<String>,
        alert_name: impl Into<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
        labels: HashMap<String, String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert_id.into(),
            alert_name: alert_name.into(),
            severity,
            status: AlertStatus::Firing,
            message: message.into(),
            labels,
            fired_at: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
        }
    }

    /// 根据告警定义和触发结果构造 FIRING 事件
    pub fn from_result(alert: &Alert, result: &AlertEvaluationResult) -> Self {
        let mut event = Self::new(
            alert.id.clone(),
            alert.name.clone(),
            alert.severity,
            result.message.clone(),
            result.labels.clone(),
        );
        event.fired_at = result.timestamp;
        event
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_fired_at(mut self, fired_at: DateTime<Utc>) -> Self {
        self.fired_at = fired_at;
        self
    }

    pub fn is_firing(&self) -> bool {
        self.status == AlertStatus::Firing
    }

    pub fn is_resolved(&self) -> bool {
        self.status == AlertStatus::Resolved
    }

    /// 确认事件
    pub fn acknowledge(&self, by: impl Into<String>) -> Result<AlertEvent> {
        match self.status {
            AlertStatus::Firing => Ok(Self {
                status: AlertStatus::Acknowledged,
                acknowledged_at: Some(Utc::now()),
                acknowledged_by: Some(by.into()),
                ..self.clone()
            }),
            AlertStatus::Acknowledged => Err(AlertError::InvalidState(format!(
                "event {} is already acknowledged",
                self.id
            ))),
            AlertStatus::Resolved => Err(AlertError::AlreadyResolved(self.id.clone())),
        }
    }

    /// 解决事件
    pub fn resolve(&self, by: impl Into<String>) -> Result<AlertEvent> {
        if self.status == AlertStatus::Resolved || self.resolved_at.is_some() {
            return Err(AlertError::AlreadyResolved(self.id.clone()));
        }

        Ok(Self {
            status: AlertStatus::Resolved,
            resolved_at: Some(Utc::now()),
            resolved_by: Some(by.into()),
            ..self.clone()
        })
    }
}
