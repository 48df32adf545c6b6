use crate::model::{AlertEvent, AlertNotificationResult};
use crate::provider::NotificationProvider;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{info, warn};

/// 事件分发接口
///
/// 分组器通过它发送。
#[async_trait]
pub trait EventDispatch: Send + Sync {
    async fn dispatch(&self, event: &AlertEvent) -> Vec<AlertNotificationResult>;
}

/// 通知分发器
///
/// 并发地把事件发给所有已配置且启用的渠道，单个渠道失败不影响其它渠道。
pub struct AlertDispatcher {
    providers: RwLock<Vec<Arc<dyn NotificationProvider>>>,
    send_timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            send_timeout,
        }
    }

    /// 注册通知渠道，同名渠道会被替换
    pub async fn register(&self, provider: Arc<dyn NotificationProvider>) {
        let mut providers = self.providers.write().await;
        info!(
            provider = %provider.name(),
            configured = provider.is_configured(),
            enabled = provider.is_enabled(),
            "Registered notification provider"
        );
        match providers.iter_mut().find(|p| p.name() == provider.name()) {
            Some(existing) => *existing = provider,
            None => providers.push(provider),
        }
    }

    pub async fn get_all_providers(&self) -> Vec<Arc<dyn NotificationProvider>> {
        self.providers.read().await.clone()
    }

    /// 已配置且启用的渠道
    pub async fn get_configured_providers(&self) -> Vec<Arc<dyn NotificationProvider>> {
        self.providers
            .read()
            .await
            .iter()
            .filter(|p| p.is_configured() && p.is_enabled())
            .cloned()
            .collect()
    }

    pub async fn provider_names(&self) -> Vec<String> {
        self.providers
            .read()
            .await
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// 发送到所有可用渠道，等待全部完成后返回
    pub async fn dispatch(&self, event: &AlertEvent) -> Vec<AlertNotificationResult> {
        let providers = self.get_configured_providers().await;
        if providers.is_empty() {
            warn!(event_id = %event.id, "No configured notification providers");
            return Vec::new();
        }

        let sends = providers
            .into_iter()
            .map(|provider| self.spawn_send(provider, event.clone()));
        let results = join_all(sends).await;

        let failed = results.iter().filter(|r| !r.success).count();
        info!(
            event_id = %event.id,
            alert_name = %event.alert_name,
            total = results.len(),
            failed,
            "Alert dispatched"
        );
        results
    }

    /// 只发送到指定渠道，用于显式重试
    pub async fn dispatch_to(&self, event: &AlertEvent, provider_name: &str) -> AlertNotificationResult {
        let Some(provider) = self.find(provider_name).await else {
            warn!(provider = %provider_name, "Notification provider not found");
            return AlertNotificationResult::provider_not_found(provider_name);
        };

        if !provider.is_configured() {
            return AlertNotificationResult::failure(provider_name, "Provider is not configured");
        }

        self.spawn_send(provider, event.clone()).await
    }

    /// 渠道自检，不触碰告警状态
    pub async fn test_provider(&self, provider_name: &str) -> AlertNotificationResult {
        let Some(provider) = self.find(provider_name).await else {
            return AlertNotificationResult::provider_not_found(provider_name);
        };

        let name = provider_name.to_string();
        let send_timeout = self.send_timeout;
        let handle = tokio::spawn(async move {
            match timeout(send_timeout, provider.test()).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => AlertNotificationResult::failure(provider.name(), e.to_string()),
                Err(_) => AlertNotificationResult::failure(
                    provider.name(),
                    format!("Test timed out after {:?}", send_timeout),
                ),
            }
        });

        let result = handle.await.unwrap_or_else(|e| {
            AlertNotificationResult::failure(name.as_str(), format!("Provider task failed: {}", e))
        });
        info!(provider = %provider_name, success = result.success, "Provider test finished");
        result
    }

    async fn find(&self, provider_name: &str) -> Option<Arc<dyn NotificationProvider>> {
        self.providers
            .read()
            .await
            .iter()
            .find(|p| p.name() == provider_name)
            .cloned()
    }

    /// 在独立任务中发送，渠道 panic 也只会变成一条失败结果
    async fn spawn_send(
        &self,
        provider: Arc<dyn NotificationProvider>,
        event: AlertEvent,
    ) -> AlertNotificationResult {
        let name = provider.name().to_string();
        let send_timeout = self.send_timeout;

        let handle = tokio::spawn(async move {
            match timeout(send_timeout, provider.send(&event)).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => AlertNotificationResult::failure(provider.name(), e.to_string()),
                Err(_) => AlertNotificationResult::failure(
                    provider.name(),
                    format!("Send timed out after {:?}", send_timeout),
                ),
            }
        });

        let result = handle.await.unwrap_or_else(|e| {
            AlertNotificationResult::failure(name.as_str(), format!("Provider task failed: {}", e))
        });

        if result.success {
            info!(provider = %name, "Notification sent");
        } else {
            warn!(
                provider = %name,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Notification failed"
            );
        }
        result
    }
}

#[async_trait]
impl EventDispatch for AlertDispatcher {
    async fn dispatch(&self, event: &AlertEvent) -> Vec<AlertNotificationResult> {
        AlertDispatcher::dispatch(self, event).await
    }
}
