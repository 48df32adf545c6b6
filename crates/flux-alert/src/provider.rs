use crate::model::{AlertEvent, AlertNotificationResult, AlertSeverity};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// 通知渠道 trait
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// 渠道名称，注册表内唯一
    fn name(&self) -> &str;

    /// 必需的配置（地址、凭据）是否齐全有效
    fn is_configured(&self) -> bool;

    /// 是否启用
    fn is_enabled(&self) -> bool {
        true
    }

    /// 发送通知
    async fn send(&self, event: &AlertEvent) -> Result<AlertNotificationResult>;

    /// 自检：发送一条低级别的测试事件
    async fn test(&self) -> Result<AlertNotificationResult> {
        self.send(&test_event()).await
    }
}

/// 自检使用的合成事件
pub fn test_event() -> AlertEvent {
    AlertEvent::new(
        "test",
        "Test Notification",
        AlertSeverity::Info,
        "This is a test notification to verify the channel configuration",
        HashMap::from([("test".to_string(), "true".to_string())]),
    )
}
