use async_trait::async_trait;
use flux_alert::source::{Metric, MetricQuery};
use flux_alert::{
    Alert, AlertCondition, AlertDispatcher, AlertEngine, AlertError, AlertEvent, AlertGrouper,
    AlertNotificationResult, AlertScheduler, AlertSeverity, AlertSources, AlertThrottler,
    AlertType, AlertingConfig, Comparison, HealthReport, HealthSource, HealthStatus,
    InMemoryAlertRepository, InMemoryEventRepository, LogQuery, LogSource, MetricSnapshot,
    MetricSource, NotificationProvider, ThrottleConfig,
};
use flux_logging::{init_logging, LogEntry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

/// 可由示例直接修改的指标
#[derive(Default)]
struct DemoMetrics {
    values: RwLock<HashMap<String, f64>>,
}

impl DemoMetrics {
    async fn set(&self, id: &str, value: f64) {
        self.values.write().await.insert(id.to_string(), value);
    }
}

#[async_trait]
impl MetricSource for DemoMetrics {
    async fn query(&self, _query: &MetricQuery) -> flux_alert::Result<Vec<Metric>> {
        Ok(Vec::new())
    }

    async fn get_snapshot(
        &self,
        metric_id: &str,
        _window: Duration,
    ) -> flux_alert::Result<MetricSnapshot> {
        self.values
            .read()
            .await
            .get(metric_id)
            .map(|v| MetricSnapshot::of_value(metric_id, *v))
            .ok_or_else(|| AlertError::source(format!("unknown metric {}", metric_id)))
    }
}

struct DemoLogs;

#[async_trait]
impl LogSource for DemoLogs {
    async fn query(&self, _query: &LogQuery) -> flux_alert::Result<Vec<LogEntry>> {
        Ok(Vec::new())
    }
}

struct DemoHealth;

#[async_trait]
impl HealthSource for DemoHealth {
    async fn get_health(&self) -> flux_alert::Result<HealthReport> {
        Ok(HealthReport {
            overall_status: HealthStatus::Up,
            components: Vec::new(),
        })
    }
}

/// 打印到控制台的通知渠道
struct ConsoleProvider;

#[async_trait]
impl NotificationProvider for ConsoleProvider {
    fn name(&self) -> &str {
        "console"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, event: &AlertEvent) -> anyhow::Result<AlertNotificationResult> {
        println!(
            "   📢 [{}] {} ({:?})\n{}",
            event.severity, event.alert_name, event.status, event.message
        );
        Ok(AlertNotificationResult::success(self.name()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AlertingConfig {
        evaluation_interval_secs: 2,
        throttle: ThrottleConfig {
            group_wait_secs: 3,
            ..ThrottleConfig::default()
        },
        ..AlertingConfig::default()
    };
    init_logging(&config.logging)?;

    println!("=== FLUX IOT 告警管道示例 ===\n");

    // 1. 引擎与数据源
    let metrics = Arc::new(DemoMetrics::default());
    let engine = Arc::new(AlertEngine::new(
        Arc::new(InMemoryAlertRepository::new()),
        Arc::new(InMemoryEventRepository::new()),
        AlertSources {
            metrics: metrics.clone(),
            logs: Arc::new(DemoLogs),
            health: Arc::new(DemoHealth),
        },
    ));

    for node in ["node-1", "node-2"] {
        engine
            .save_alert(Alert::new(
                "high-cpu",
                AlertType::Metric,
                AlertCondition::metric(format!("cpu.{}", node), Comparison::GreaterThan, 0.8),
                AlertSeverity::Warning,
            ))
            .await?;
    }
    println!("1. 已添加 {} 条告警规则", engine.list_alerts().await?.len());

    // 2. 通知渠道
    let dispatcher = Arc::new(AlertDispatcher::new(config.dispatch.send_timeout()));
    dispatcher.register(Arc::new(ConsoleProvider)).await;
    println!("2. 通知渠道: {:?}", dispatcher.provider_names().await);

    // 3. 限流、分组与调度
    let grouper = AlertGrouper::new(&config.throttle, dispatcher.clone());
    let throttler = Arc::new(AlertThrottler::new(&config.throttle));
    let scheduler = Arc::new(AlertScheduler::new(
        engine.clone(),
        throttler,
        grouper.clone(),
        config.clone(),
    ));

    println!("3. CPU 使用率升高，等待分组发送...");
    metrics.set("cpu.node-1", 0.92).await;
    metrics.set("cpu.node-2", 0.87).await;
    scheduler.start().await;
    sleep(Duration::from_secs(5)).await;

    println!("\n4. CPU 恢复，等待自动解决...");
    metrics.set("cpu.node-1", 0.35).await;
    metrics.set("cpu.node-2", 0.40).await;
    sleep(Duration::from_secs(3)).await;

    for group in grouper.recent_groups(10).await {
        println!("   分组 {} -> {:?} ({} 条)", group.key, group.status, group.size());
    }

    scheduler.stop().await;
    println!("\n=== 示例结束 ===");
    Ok(())
}
