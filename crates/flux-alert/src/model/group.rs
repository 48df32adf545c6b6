use crate::error::{AlertError, Result};
use crate::model::alert::AlertSeverity;
use crate::model::event::AlertEvent;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// 汇总消息中最多列出的成员消息数
const SUMMARY_MAX_LINES: usize = 10;

/// 分组键
///
/// 只保留配置的 group-by 标签，其它标签不参与分组。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertGroupKey {
    pub alert_name: String,
    pub severity: AlertSeverity,
    pub labels: BTreeMap<String, String>,
}

impl AlertGroupKey {
    pub fn new(
        alert_name: impl Into<String>,
        severity: AlertSeverity,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            alert_name: alert_name.into(),
            severity,
            labels,
        }
    }

    pub fn from_event(event: &AlertEvent, group_by: &[String]) -> Self {
        let labels = group_by
            .iter()
            .filter_map(|key| {
                event
                    .labels
                    .get(key)
                    .map(|value| (key.clone(), value.clone()))
            })
            .collect();

        Self::new(event.alert_name.clone(), event.severity, labels)
    }
}

impl fmt::Display for AlertGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{}:{}:{{{}}}", self.alert_name, self.severity, labels)
    }
}

/// 分组状态，只有 `Pending` 是非终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupStatus {
    Pending,
    Sent,
    Failed,
}

/// 一批相关事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertGroup {
    pub id: String,
    pub key: AlertGroupKey,
    pub events: Vec<AlertEvent>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub status: GroupStatus,
}

impl AlertGroup {
    pub fn from_event(key: AlertGroupKey, event: AlertEvent) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            events: vec![event],
            created_at: now,
            last_updated_at: now,
            status: GroupStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == GroupStatus::Pending
    }

    /// 终态分组永远不再接收新成员
    pub fn can_accept(&self, max_size: usize) -> bool {
        self.is_pending() && self.events.len() < max_size
    }

    /// 追加事件，返回新分组
    pub fn add_event(&self, event: AlertEvent) -> Result<AlertGroup> {
        if !self.is_pending() {
            return Err(AlertError::InvalidState(format!(
                "group {} is {:?} and cannot accept events",
                self.id, self.status
            )));
        }

        let mut events = self.events.clone();
        events.push(event);

        Ok(Self {
            events,
            last_updated_at: Utc::now(),
            ..self.clone()
        })
    }

    pub fn with_status(&self, status: GroupStatus) -> AlertGroup {
        Self {
            status,
            last_updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn size(&self) -> usize {
        self.events.len()
    }

    /// 成员中的最高级别
    pub fn severity(&self) -> AlertSeverity {
        self.events
            .iter()
            .map(|e| e.severity)
            .max()
            .unwrap_or(self.key.severity)
    }

    pub fn first_fired_at(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|e| e.fired_at).min()
    }

    pub fn last_fired_at(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|e| e.fired_at).max()
    }

    pub fn duration(&self) -> Duration {
        match (self.first_fired_at(), self.last_fired_at()) {
            (Some(first), Some(last)) => last - first,
            _ => Duration::zero(),
        }
    }

    /// 生成用于发送的汇总事件
    ///
    /// 单成员分组直接返回原事件。
    pub fn to_summary_event(&self) -> Option<AlertEvent> {
        match self.events.as_slice() {
            [] => None,
            [only] => Some(only.clone()),
            [first, ..] => {
                let mut labels: HashMap<String, String> = self
                    .key
                    .labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                labels.insert("group_id".to_string(), self.id.clone());
                labels.insert("group_size".to_string(), self.size().to_string());

                let mut event = AlertEvent::new(
                    first.alert_id.clone(),
                    self.key.alert_name.clone(),
                    self.severity(),
                    self.summary_message(),
                    labels,
                );
                event.fired_at = self.first_fired_at().unwrap_or(first.fired_at);
                Some(event)
            }
        }
    }

    fn summary_message(&self) -> String {
        let first = self.first_fired_at().unwrap_or(self.created_at);
        let last = self.last_fired_at().unwrap_or(self.created_at);

        let mut message = format!(
            "[{} alerts] {} ({})\nFirst: {}\nLast: {}\nDuration: {}",
            self.size(),
            self.key.alert_name,
            self.severity(),
            first.to_rfc3339(),
            last.to_rfc3339(),
            format_duration(self.duration()),
        );

        for event in self.events.iter().take(SUMMARY_MAX_LINES) {
            message.push_str(&format!("\n- {}", event.message));
        }
        if self.size() > SUMMARY_MAX_LINES {
            message.push_str(&format!("\n... and {} more", self.size() - SUMMARY_MAX_LINES));
        }

        message
    }
}

fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(service: &str, host: &str, offset_secs: i64) -> AlertEvent {
        let base = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        AlertEvent::new(
            "alert-1",
            "high-cpu",
            AlertSeverity::Warning,
            format!("cpu high on {}", host),
            HashMap::from([
                ("service".to_string(), service.to_string()),
                ("host".to_string(), host.to_string()),
            ]),
        )
        .with_fired_at(base + Duration::seconds(offset_secs))
    }

    #[test]
    fn test_key_ignores_labels_outside_group_by() {
        let group_by = vec!["service".to_string()];
        let a = AlertGroupKey::from_event(&event("api", "node-1", 0), &group_by);
        let b = AlertGroupKey::from_event(&event("api", "node-2", 0), &group_by);
        let c = AlertGroupKey::from_event(&event("web", "node-1", 0), &group_by);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "high-cpu:WARNING:{service=api}");
    }

    #[test]
    fn test_add_event_returns_new_group() {
        let e1 = event("api", "node-1", 0);
        let key = AlertGroupKey::from_event(&e1, &["service".to_string()]);
        let group = AlertGroup::from_event(key, e1);

        let grown = group.add_event(event("api", "node-2", 5)).unwrap();
        assert_eq!(group.size(), 1);
        assert_eq!(grown.size(), 2);
        assert_eq!(grown.id, group.id);
        assert_eq!(grown.events[1].labels["host"], "node-2");
    }

    #[test]
    fn test_terminal_group_rejects_events() {
        let e1 = event("api", "node-1", 0);
        let key = AlertGroupKey::from_event(&e1, &[]);
        let sent = AlertGroup::from_event(key, e1).with_status(GroupStatus::Sent);

        assert!(!sent.can_accept(100));
        assert!(matches!(
            sent.add_event(event("api", "node-2", 1)),
            Err(AlertError::InvalidState(_))
        ));

        let failed = sent.with_status(GroupStatus::Failed);
        assert!(!failed.can_accept(100));
    }

    #[test]
    fn test_can_accept_respects_max_size() {
        let e1 = event("api", "node-1", 0);
        let key = AlertGroupKey::from_event(&e1, &[]);
        let group = AlertGroup::from_event(key, e1);

        assert!(group.can_accept(2));
        let group = group.add_event(event("api", "node-2", 1)).unwrap();
        assert!(!group.can_accept(2));
    }

    #[test]
    fn test_severity_is_max_of_members() {
        let e1 = event("api", "node-1", 0);
        let key = AlertGroupKey::from_event(&e1, &[]);
        let mut critical = event("api", "node-2", 1);
        critical.severity = AlertSeverity::Critical;

        let group = AlertGroup::from_event(key, e1).add_event(critical).unwrap();
        assert_eq!(group.severity(), AlertSeverity::Critical);
    }

    #[test]
    fn test_single_event_summary_passes_through() {
        let e1 = event("api", "node-1", 0);
        let key = AlertGroupKey::from_event(&e1, &[]);
        let group = AlertGroup::from_event(key, e1.clone());

        assert_eq!(group.to_summary_event(), Some(e1));
    }

    #[test]
    fn test_multi_event_summary() {
        let group_by = vec!["service".to_string()];
        let e1 = event("api", "node-1", 0);
        let key = AlertGroupKey::from_event(&e1, &group_by);
        let group = AlertGroup::from_event(key, e1)
            .add_event(event("api", "node-2", 5))
            .unwrap()
            .add_event(event("api", "node-3", 75))
            .unwrap();

        let summary = group.to_summary_event().unwrap();
        assert!(summary.message.starts_with("[3 alerts] high-cpu"));
        assert!(summary.message.contains("Duration: 1m 15s"));
        assert!(summary.message.contains("2024-05-01T10:00:00+00:00"));
        assert!(summary.message.contains("cpu high on node-3"));
        assert_eq!(summary.labels["service"], "api");
        assert_eq!(summary.labels["group_size"], "3");
        assert_eq!(summary.labels["group_id"], group.id);
        assert!(!summary.labels.contains_key("host"));
        assert_eq!(summary.fired_at, group.first_fired_at().unwrap());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(12)), "12s");
        assert_eq!(format_duration(Duration::seconds(65)), "1m 5s");
        assert_eq!(format_duration(Duration::seconds(3725)), "1h 2m 5s");
        assert_eq!(format_duration(Duration::seconds(-3)), "0s");
    }
}
