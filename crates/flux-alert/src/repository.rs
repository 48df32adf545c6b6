use crate::error::Result;
use crate::model::{Alert, AlertEvent, AlertStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 告警定义存储
#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn save(&self, alert: Alert) -> Result<Alert>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Alert>>;

    /// 按存储的枚举顺序返回
    async fn find_all(&self) -> Result<Vec<Alert>>;

    async fn delete(&self, id: &str) -> Result<bool>;
}

/// 告警事件存储
#[async_trait]
pub trait AlertEventRepository: Send + Sync {
    async fn save(&self, event: AlertEvent) -> Result<AlertEvent>;

    async fn find_by_id(&self, id: &str) -> Result<Option<AlertEvent>>;

    async fn find_by_status(&self, status: AlertStatus) -> Result<Vec<AlertEvent>>;

    /// 指定告警最近一次触发（按 fired_at）的事件
    async fn find_latest_by_alert_id(&self, alert_id: &str) -> Result<Option<AlertEvent>>;

    /// 删除 fired_at 早于 cutoff 的事件，返回删除数量
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// 告警定义存储（内存实现，保持插入顺序）
pub struct InMemoryAlertRepository {
    alerts: Arc<RwLock<Vec<Alert>>>,
}

impl InMemoryAlertRepository {
    pub fn new() -> Self {
        Self {
            alerts: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryAlertRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertRepository for InMemoryAlertRepository {
    async fn save(&self, alert: Alert) -> Result<Alert> {
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(existing) => *existing = alert.clone(),
            None => alerts.push(alert.clone()),
        }
        Ok(alert)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Alert>> {
        let alerts = self.alerts.read().await;
        Ok(alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Alert>> {
        let alerts = self.alerts.read().await;
        Ok(alerts.clone())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut alerts = self.alerts.write().await;
        let before = alerts.len();
        alerts.retain(|a| a.id != id);
        Ok(alerts.len() != before)
    }
}

/// 告警事件存储（内存实现）
pub struct InMemoryEventRepository {
    events: Arc<RwLock<HashMap<String, AlertEvent>>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

impl Default for InMemoryEventRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertEventRepository for InMemoryEventRepository {
    async fn save(&self, event: AlertEvent) -> Result<AlertEvent> {
        let mut events = self.events.write().await;
        events.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<AlertEvent>> {
        let events = self.events.read().await;
        Ok(events.get(id).cloned())
    }

    async fn find_by_status(&self, status: AlertStatus) -> Result<Vec<AlertEvent>> {
        let events = self.events.read().await;
        let mut matched: Vec<_> = events
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.fired_at.cmp(&b.fired_at));
        Ok(matched)
    }

    async fn find_latest_by_alert_id(&self, alert_id: &str) -> Result<Option<AlertEvent>> {
        let events = self.events.read().await;
        Ok(events
            .values()
            .filter(|e| e.alert_id == alert_id)
            .max_by(|a, b| a.fired_at.cmp(&b.fired_at))
            .cloned())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|_, e| e.fired_at >= cutoff);
        Ok(before - events.len())
    }
}
