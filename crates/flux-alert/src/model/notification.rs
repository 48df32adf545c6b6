use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个 (事件, 通知渠道) 的发送结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotificationResult {
    pub provider: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AlertNotificationResult {
    pub fn success(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            success: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn provider_not_found(provider: impl Into<String>) -> Self {
        let provider = provider.into();
        let error = format!("Provider not found: {}", provider);
        Self::failure(provider, error)
    }
}
