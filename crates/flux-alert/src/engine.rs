use crate::error::{AlertError, Result};
use crate::model::{
    Alert, AlertEvaluationResult, AlertEvent, AlertStatus, AlertType, SYSTEM_ACTOR,
};
use crate::repository::{AlertEventRepository, AlertRepository};
use crate::source::{HealthSource, HealthStatus, LogQuery, LogSource, MetricSource};
use chrono::Utc;
use flux_logging::LogLevel;
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// 评估所需的外部数据源
#[derive(Clone)]
pub struct AlertSources {
    pub metrics: Arc<dyn MetricSource>,
    pub logs: Arc<dyn LogSource>,
    pub health: Arc<dyn HealthSource>,
}

/// 告警评估引擎
///
/// 评估告警条件、生成事件，并自动解决条件已恢复的事件。
pub struct AlertEngine {
    alerts: Arc<dyn AlertRepository>,
    events: Arc<dyn AlertEventRepository>,
    sources: AlertSources,
    /// 串行化事件的 读取-转换-保存
    transitions: Mutex<()>,
}

impl AlertEngine {
    pub fn new(
        alerts: Arc<dyn AlertRepository>,
        events: Arc<dyn AlertEventRepository>,
        sources: AlertSources,
    ) -> Self {
        Self {
            alerts,
            events,
            sources,
            transitions: Mutex::new(()),
        }
    }

    /// 保存告警定义
    ///
    /// 缺少 ID 时自动生成，`updated_at` 总是刷新。
    pub async fn save_alert(&self, alert: Alert) -> Result<Alert> {
        if alert.name.trim().is_empty() {
            return Err(AlertError::validation("alert name must not be empty"));
        }

        let now = Utc::now();
        let alert = Alert {
            id: if alert.id.is_empty() {
                uuid::Uuid::new_v4().to_string()
            } else {
                alert.id
            },
            updated_at: now,
            ..alert
        };

        let saved = self.alerts.save(alert).await?;
        info!(alert_id = %saved.id, alert_name = %saved.name, "Alert saved");
        Ok(saved)
    }

    pub async fn get_alert(&self, alert_id: &str) -> Result<Alert> {
        self.alerts
            .find_by_id(alert_id)
            .await?
            .ok_or_else(|| AlertError::not_found(format!("alert {}", alert_id)))
    }

    pub async fn list_alerts(&self) -> Result<Vec<Alert>> {
        self.alerts.find_all().await
    }

    /// 启用/停用告警
    ///
    /// 停用时立即解决该告警所有未关闭的事件。
    pub async fn set_enabled(&self, alert_id: &str, enabled: bool) -> Result<Alert> {
        let alert = self.get_alert(alert_id).await?;
        let updated = self.alerts.save(alert.with_enabled(enabled)).await?;

        info!(alert_id = %alert_id, enabled = %enabled, "Alert enabled state changed");

        if !enabled {
            let resolved = self.resolve_open_events(alert_id).await?;
            if resolved > 0 {
                info!(alert_id = %alert_id, count = resolved, "Resolved open events of disabled alert");
            }
        }

        Ok(updated)
    }

    pub async fn delete_alert(&self, alert_id: &str) -> Result<()> {
        if !self.alerts.delete(alert_id).await? {
            return Err(AlertError::not_found(format!("alert {}", alert_id)));
        }
        info!(alert_id = %alert_id, "Alert deleted");
        Ok(())
    }

    /// 评估单个告警
    ///
    /// 任何评估错误（包括数据源 panic）都视为未触发，只记录日志，不向上传播。
    pub async fn evaluate(&self, alert: &Alert) -> AlertEvaluationResult {
        let strategy = async {
            match alert.alert_type {
                AlertType::Metric => self.evaluate_metric(alert).await,
                AlertType::Log => self.evaluate_log(alert).await,
                AlertType::Health => self.evaluate_health(alert).await,
                AlertType::Trace => Ok(AlertEvaluationResult::not_triggered(
                    alert,
                    "Trace-based evaluation is not supported",
                )),
            }
        };

        let outcome = match AssertUnwindSafe(strategy).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(alert_id = %alert.id, alert_name = %alert.name, "Alert evaluation panicked");
                return AlertEvaluationResult::not_triggered(alert, "Evaluation panicked");
            }
        };

        match outcome {
            Ok(result) => {
                debug!(
                    alert_id = %alert.id,
                    triggered = result.triggered,
                    value = ?result.value,
                    "Alert evaluated"
                );
                result
            }
            Err(e) => {
                warn!(alert_id = %alert.id, alert_name = %alert.name, error = %e, "Alert evaluation failed");
                AlertEvaluationResult::not_triggered(alert, format!("Evaluation failed: {}", e))
            }
        }
    }

    /// 按存储顺序评估所有启用的告警
    pub async fn evaluate_all(&self) -> Result<Vec<AlertEvaluationResult>> {
        let alerts = self.alerts.find_all().await?;
        let mut results = Vec::with_capacity(alerts.len());

        for alert in alerts.iter().filter(|a| a.enabled) {
            results.push(self.evaluate(alert).await);
        }

        Ok(results)
    }

    /// 构造 FIRING 事件（不持久化）
    pub fn create_event(&self, alert: &Alert, result: &AlertEvaluationResult) -> AlertEvent {
        AlertEvent::from_result(alert, result)
    }

    pub async fn save_event(&self, event: AlertEvent) -> Result<AlertEvent> {
        self.events.save(event).await
    }

    pub async fn get_event(&self, event_id: &str) -> Result<AlertEvent> {
        self.events
            .find_by_id(event_id)
            .await?
            .ok_or_else(|| AlertError::not_found(format!("event {}", event_id)))
    }

    pub async fn events_by_status(&self, status: AlertStatus) -> Result<Vec<AlertEvent>> {
        self.events.find_by_status(status).await
    }

    /// 最近一次事件是否仍处于 FIRING
    pub async fn is_already_firing(&self, alert_id: &str) -> Result<bool> {
        Ok(self
            .events
            .find_latest_by_alert_id(alert_id)
            .await?
            .map(|e| e.is_firing())
            .unwrap_or(false))
    }

    /// 告警当前处于 FIRING 的最新事件
    pub async fn current_firing_event(&self, alert_id: &str) -> Result<Option<AlertEvent>> {
        Ok(self
            .events
            .find_latest_by_alert_id(alert_id)
            .await?
            .filter(|e| e.is_firing()))
    }

    /// 解决本轮评估中未再触发的 FIRING 事件
    pub async fn auto_resolve(
        &self,
        results: &[AlertEvaluationResult],
    ) -> Result<Vec<AlertEvent>> {
        let triggered: HashSet<&str> = results
            .iter()
            .filter(|r| r.triggered)
            .map(|r| r.alert_id.as_str())
            .collect();

        let _guard = self.transitions.lock().await;
        let firing = self.events.find_by_status(AlertStatus::Firing).await?;
        let mut resolved = Vec::new();

        for event in firing {
            if triggered.contains(event.alert_id.as_str()) {
                continue;
            }

            let event = event.resolve(SYSTEM_ACTOR)?;
            let event = self.events.save(event).await?;
            info!(
                event_id = %event.id,
                alert_id = %event.alert_id,
                alert_name = %event.alert_name,
                "Alert auto-resolved"
            );
            resolved.push(event);
        }

        Ok(resolved)
    }

    /// 确认事件
    pub async fn acknowledge_event(&self, event_id: &str, by: &str) -> Result<AlertEvent> {
        let _guard = self.transitions.lock().await;
        let event = self.get_event(event_id).await?.acknowledge(by)?;
        let event = self.events.save(event).await?;
        info!(event_id = %event_id, by = %by, "Alert event acknowledged");
        Ok(event)
    }

    /// 手动解决事件
    pub async fn resolve_event(&self, event_id: &str, by: &str) -> Result<AlertEvent> {
        let _guard = self.transitions.lock().await;
        let event = self.get_event(event_id).await?.resolve(by)?;
        let event = self.events.save(event).await?;
        info!(event_id = %event_id, by = %by, "Alert event resolved");
        Ok(event)
    }

    /// 删除早于保留期的事件
    pub async fn delete_events_older_than(&self, cutoff: chrono::DateTime<Utc>) -> Result<usize> {
        self.events.delete_older_than(cutoff).await
    }

    async fn resolve_open_events(&self, alert_id: &str) -> Result<usize> {
        let _guard = self.transitions.lock().await;
        let mut count = 0;
        for status in [AlertStatus::Firing, AlertStatus::Acknowledged] {
            for event in self.events.find_by_status(status).await? {
                if event.alert_id == alert_id {
                    self.events.save(event.resolve(SYSTEM_ACTOR)?).await?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn evaluate_metric(&self, alert: &Alert) -> Result<AlertEvaluationResult> {
        let condition = &alert.condition;
        let metric_id = condition.metric.as_deref().ok_or_else(|| {
            AlertError::evaluation(format!("metric alert {} has no metric reference", alert.id))
        })?;

        let snapshot = self
            .sources
            .metrics
            .get_snapshot(metric_id, condition.window())
            .await?;
        let value = snapshot.current_value();

        let message = format!(
            "{}: {} = {:.2} (threshold {} {:.2})",
            alert.name,
            metric_id,
            value,
            condition.operator.symbol(),
            condition.threshold
        );

        Ok(AlertEvaluationResult::from_comparison(alert, value, message).with_label("metric", metric_id))
    }

    async fn evaluate_log(&self, alert: &Alert) -> Result<AlertEvaluationResult> {
        let condition = &alert.condition;
        let min_level = match condition.filter("level") {
            Some(level) => level.parse::<LogLevel>().map_err(AlertError::evaluation)?,
            None => LogLevel::Error,
        };

        let window = chrono::Duration::from_std(condition.window())
            .map_err(|e| AlertError::evaluation(format!("invalid window: {}", e)))?;
        let query = LogQuery {
            min_level: Some(min_level),
            since: Some(
                Utc::now()
                    .checked_sub_signed(window)
                    .ok_or_else(|| AlertError::evaluation("log window is out of range"))?,
            ),
            until: None,
            logger: condition.filter("logger").map(str::to_string),
            message_contains: condition.filter("message").map(str::to_string),
            limit: None,
        };

        let entries = self.sources.logs.query(&query).await?;
        let count = entries.len() as f64;

        let message = format!(
            "{}: {} log entries at {} or above in the last {}s (threshold {} {})",
            alert.name,
            entries.len(),
            min_level,
            condition.window_secs,
            condition.operator.symbol(),
            condition.threshold
        );

        let mut result = AlertEvaluationResult::from_comparison(alert, count, message);
        if let Some(logger) = &query.logger {
            result = result.with_label("logger", logger.clone());
        }
        Ok(result)
    }

    async fn evaluate_health(&self, alert: &Alert) -> Result<AlertEvaluationResult> {
        let report = self.sources.health.get_health().await?;

        let (subject, status) = match &alert.condition.health_component {
            Some(name) => {
                let component = report.component(name).ok_or_else(|| {
                    AlertError::evaluation(format!("health component not found: {}", name))
                })?;
                (name.clone(), component.status)
            }
            None => ("overall".to_string(), report.overall_status),
        };

        let message = format!("{}: {} health is {:?}", alert.name, subject, status);
        let result = if status == HealthStatus::Down {
            AlertEvaluationResult::triggered(alert, 1.0, message)
        } else {
            let mut result = AlertEvaluationResult::not_triggered(alert, message);
            result.value = Some(0.0);
            result
        };

        Ok(result.with_label("component", subject))
    }
}
