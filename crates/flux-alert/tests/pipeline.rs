use async_trait::async_trait;
use flux_alert::source::{Metric, MetricQuery};
use flux_alert::{
    Alert, AlertCondition, AlertDispatcher, AlertEngine, AlertError, AlertEvent, AlertGrouper,
    AlertNotificationResult, AlertScheduler, AlertSeverity, AlertSources, AlertStatus,
    AlertThrottler, AlertType, AlertingConfig, Comparison, HealthReport, HealthSource,
    HealthStatus, InMemoryAlertRepository, InMemoryEventRepository, LogQuery, LogSource,
    MetricSnapshot, MetricSource, NotificationProvider, Result, ScheduledTask, TaskScheduler,
    ThrottleConfig, TokioTaskScheduler,
};
use flux_alert::scheduler::RecurringTask;
use flux_logging::LogEntry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_test::{assert_err, assert_ok};

#[derive(Default)]
struct StaticMetrics {
    values: RwLock<HashMap<String, f64>>,
}

impl StaticMetrics {
    async fn set(&self, id: &str, value: f64) {
        self.values.write().await.insert(id.to_string(), value);
    }
}

#[async_trait]
impl MetricSource for StaticMetrics {
    async fn query(&self, _query: &MetricQuery) -> Result<Vec<Metric>> {
        Ok(Vec::new())
    }

    async fn get_snapshot(&self, metric_id: &str, _window: Duration) -> Result<MetricSnapshot> {
        self.values
            .read()
            .await
            .get(metric_id)
            .map(|v| MetricSnapshot::of_value(metric_id, *v))
            .ok_or_else(|| AlertError::source(format!("unknown metric {}", metric_id)))
    }
}

struct NoLogs;

#[async_trait]
impl LogSource for NoLogs {
    async fn query(&self, _query: &LogQuery) -> Result<Vec<LogEntry>> {
        Ok(Vec::new())
    }
}

struct AlwaysUp;

#[async_trait]
impl HealthSource for AlwaysUp {
    async fn get_health(&self) -> Result<HealthReport> {
        Ok(HealthReport {
            overall_status: HealthStatus::Up,
            components: Vec::new(),
        })
    }
}

#[derive(Default)]
struct RecordingProvider {
    received: RwLock<Vec<AlertEvent>>,
}

impl RecordingProvider {
    async fn received(&self) -> Vec<AlertEvent> {
        self.received.read().await.clone()
    }
}

#[async_trait]
impl NotificationProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recorder"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, event: &AlertEvent) -> anyhow::Result<AlertNotificationResult> {
        self.received.write().await.push(event.clone());
        Ok(AlertNotificationResult::success(self.name()))
    }
}

/// 从不执行任务的调度器，由测试手动驱动评估
struct ManualScheduler;

impl TaskScheduler for ManualScheduler {
    fn schedule_at_fixed_rate(
        &self,
        name: &str,
        _period: Duration,
        _task: RecurringTask,
    ) -> ScheduledTask {
        ScheduledTask::new(name, tokio::spawn(std::future::pending()))
    }
}

struct Pipeline {
    scheduler: Arc<AlertScheduler>,
    engine: Arc<AlertEngine>,
    metrics: Arc<StaticMetrics>,
    provider: Arc<RecordingProvider>,
}

async fn pipeline(config: AlertingConfig) -> Pipeline {
    pipeline_with(config, Arc::new(TokioTaskScheduler)).await
}

async fn pipeline_with(config: AlertingConfig, task_scheduler: Arc<dyn TaskScheduler>) -> Pipeline {
    let metrics = Arc::new(StaticMetrics::default());
    let engine = Arc::new(AlertEngine::new(
        Arc::new(InMemoryAlertRepository::new()),
        Arc::new(InMemoryEventRepository::new()),
        AlertSources {
            metrics: metrics.clone(),
            logs: Arc::new(NoLogs),
            health: Arc::new(AlwaysUp),
        },
    ));

    let provider = Arc::new(RecordingProvider::default());
    let dispatcher = Arc::new(AlertDispatcher::new(config.dispatch.send_timeout()));
    dispatcher.register(provider.clone()).await;

    let grouper = AlertGrouper::new(&config.throttle, dispatcher);
    let throttler = Arc::new(AlertThrottler::new(&config.throttle));
    let scheduler = Arc::new(AlertScheduler::new(
        engine.clone(),
        throttler,
        grouper,
        config,
    )
    .with_task_scheduler(task_scheduler));

    Pipeline {
        scheduler,
        engine,
        metrics,
        provider,
    }
}

fn config(throttle: ThrottleConfig) -> AlertingConfig {
    AlertingConfig {
        throttle,
        ..AlertingConfig::default()
    }
}

fn ungrouped() -> ThrottleConfig {
    ThrottleConfig {
        grouping_enabled: false,
        ..ThrottleConfig::default()
    }
}

fn cpu_alert(name: &str, metric: &str) -> Alert {
    Alert::new(
        name,
        AlertType::Metric,
        AlertCondition::metric(metric, Comparison::GreaterThan, 0.8),
        AlertSeverity::Warning,
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn test_fire_notify_and_auto_resolve() {
    let p = pipeline(config(ungrouped())).await;
    let alert = assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-1")).await);
    p.metrics.set("cpu.node-1", 0.95).await;

    let report = assert_ok!(p.scheduler.run_evaluation_cycle().await);
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.created, 1);
    settle().await;

    let received = p.provider.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].alert_id, alert.id);
    assert_eq!(received[0].status, AlertStatus::Firing);

    // 仍在触发：不重复生成事件
    let report = assert_ok!(p.scheduler.run_evaluation_cycle().await);
    assert_eq!(report.triggered, 1);
    assert_eq!(report.created, 0);
    settle().await;
    assert_eq!(p.provider.received().await.len(), 1);

    p.metrics.set("cpu.node-1", 0.3).await;
    let report = assert_ok!(p.scheduler.run_evaluation_cycle().await);
    assert_eq!(report.resolved, 1);

    let resolved = assert_ok!(p.engine.events_by_status(AlertStatus::Resolved).await);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].resolved_by.as_deref(), Some("system"));
    assert!(assert_ok!(p.engine.events_by_status(AlertStatus::Firing).await).is_empty());
}

#[tokio::test]
async fn test_throttled_event_is_persisted_but_not_sent() {
    let p = pipeline(config(ThrottleConfig {
        rate_limit_count: 1,
        ..ungrouped()
    }))
    .await;
    assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-1")).await);
    assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-2")).await);
    p.metrics.set("cpu.node-1", 0.9).await;
    p.metrics.set("cpu.node-2", 0.9).await;

    let report = assert_ok!(p.scheduler.run_evaluation_cycle().await);
    assert_eq!(report.created, 2);
    assert_eq!(report.throttled, 1);
    settle().await;

    assert_eq!(p.provider.received().await.len(), 1);
    assert_eq!(
        assert_ok!(p.engine.events_by_status(AlertStatus::Firing).await).len(),
        2
    );
}

#[tokio::test]
async fn test_evaluation_error_does_not_stop_cycle() {
    let p = pipeline(config(ungrouped())).await;
    assert_ok!(p.engine.save_alert(cpu_alert("missing", "cpu.unknown")).await);
    assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-1")).await);
    p.metrics.set("cpu.node-1", 0.9).await;

    let report = assert_ok!(p.scheduler.run_evaluation_cycle().await);
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.triggered, 1);
    assert_eq!(report.created, 1);
}

#[tokio::test(start_paused = true)]
async fn test_grouped_events_send_one_summary() {
    let p = pipeline(config(ThrottleConfig {
        grouping_enabled: true,
        group_wait_secs: 30,
        ..ThrottleConfig::default()
    }))
    .await;
    assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-1")).await);
    assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-2")).await);
    p.metrics.set("cpu.node-1", 0.9).await;
    p.metrics.set("cpu.node-2", 0.85).await;

    assert_ok!(p.scheduler.run_evaluation_cycle().await);
    settle().await;

    let grouper = p.scheduler.grouper();
    assert_eq!(grouper.pending_group_count().await, 1);
    assert_eq!(grouper.pending_alert_count().await, 2);
    assert!(p.provider.received().await.is_empty());

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;

    let received = p.provider.received().await;
    assert_eq!(received.len(), 1);
    assert!(received[0].message.starts_with("[2 alerts] high-cpu (WARNING)"));
    assert_eq!(received[0].labels["group_size"], "2");
}

#[tokio::test(start_paused = true)]
async fn test_repeat_notification_after_interval() {
    let p = pipeline(config(ThrottleConfig {
        cooldown_secs: 0,
        repeat_interval_secs: 120,
        ..ungrouped()
    }))
    .await;
    assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-1")).await);
    p.metrics.set("cpu.node-1", 0.9).await;

    assert_ok!(p.scheduler.run_evaluation_cycle().await);
    settle().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    let report = assert_ok!(p.scheduler.run_evaluation_cycle().await);
    assert_eq!(report.repeated, 0);

    tokio::time::sleep(Duration::from_secs(61)).await;
    let report = assert_ok!(p.scheduler.run_evaluation_cycle().await);
    assert_eq!(report.repeated, 1);
    settle().await;

    let received = p.provider.received().await;
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].id, received[1].id);
}

#[tokio::test(start_paused = true)]
async fn test_stop_flushes_pending_groups() {
    let p = pipeline(config(ThrottleConfig {
        group_wait_secs: 300,
        ..ThrottleConfig::default()
    }))
    .await;
    assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-1")).await);
    p.metrics.set("cpu.node-1", 0.9).await;

    p.scheduler.start().await;
    assert!(p.scheduler.is_running().await);
    settle().await;

    assert_eq!(p.scheduler.grouper().pending_group_count().await, 1);
    assert!(p.provider.received().await.is_empty());

    p.scheduler.stop().await;
    assert!(!p.scheduler.is_running().await);
    assert_eq!(p.provider.received().await.len(), 1);
    assert_eq!(p.scheduler.grouper().pending_group_count().await, 0);

    // 重复 stop 无副作用
    p.scheduler.stop().await;
    assert_eq!(p.provider.received().await.len(), 1);
}

#[tokio::test]
async fn test_stop_delivers_events_routed_just_before() {
    let p = pipeline_with(
        config(ThrottleConfig {
            group_wait_secs: 300,
            ..ThrottleConfig::default()
        }),
        Arc::new(ManualScheduler),
    )
    .await;
    assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-1")).await);
    p.metrics.set("cpu.node-1", 0.9).await;

    p.scheduler.start().await;
    let report = assert_ok!(p.scheduler.run_evaluation_cycle().await);
    assert_eq!(report.created, 1);
    p.scheduler.stop().await;

    assert_eq!(p.provider.received().await.len(), 1);
    assert_eq!(p.scheduler.grouper().pending_group_count().await, 0);

    // 停止后的事件不再进入分组，直接发送
    assert_ok!(p.engine.save_alert(cpu_alert("disk-full", "disk.node-1")).await);
    p.metrics.set("disk.node-1", 0.99).await;
    assert_ok!(p.scheduler.run_evaluation_cycle().await);
    settle().await;

    assert_eq!(p.provider.received().await.len(), 2);
    assert_eq!(p.scheduler.grouper().pending_group_count().await, 0);
}

#[tokio::test]
async fn test_cleanup_with_out_of_range_retention_fails_without_deleting() {
    let p = pipeline(AlertingConfig {
        retention_hours: u64::MAX,
        ..config(ungrouped())
    })
    .await;
    let alert = assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-1")).await);
    let event = assert_ok!(
        p.engine
            .save_event(AlertEvent::new(alert.id, alert.name, alert.severity, "old", HashMap::new()))
            .await
    );

    assert!(matches!(
        p.scheduler.run_cleanup_cycle().await,
        Err(AlertError::Config(_))
    ));
    assert_ok!(p.engine.get_event(&event.id).await);
}

#[tokio::test]
async fn test_cleanup_removes_expired_events() {
    let p = pipeline(config(ungrouped())).await;
    let alert = assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-1")).await);

    let old = AlertEvent::new(
        alert.id.clone(),
        alert.name.clone(),
        alert.severity,
        "old",
        HashMap::new(),
    )
    .with_fired_at(chrono::Utc::now() - chrono::Duration::hours(200));
    let recent = AlertEvent::new(alert.id, alert.name, alert.severity, "recent", HashMap::new());
    let old = assert_ok!(p.engine.save_event(old).await);
    let recent = assert_ok!(p.engine.save_event(recent).await);

    assert_eq!(assert_ok!(p.scheduler.run_cleanup_cycle().await), 1);
    assert_err!(p.engine.get_event(&old.id).await);
    assert_ok!(p.engine.get_event(&recent.id).await);
}

#[tokio::test]
async fn test_disabling_alert_resolves_open_events() {
    let p = pipeline(config(ungrouped())).await;
    let alert = assert_ok!(p.engine.save_alert(cpu_alert("high-cpu", "cpu.node-1")).await);
    p.metrics.set("cpu.node-1", 0.9).await;
    assert_ok!(p.scheduler.run_evaluation_cycle().await);

    let firing = assert_ok!(p.engine.events_by_status(AlertStatus::Firing).await);
    let acked = assert_ok!(p.engine.acknowledge_event(&firing[0].id, "oncall").await);
    assert_eq!(acked.status, AlertStatus::Acknowledged);

    assert_ok!(p.engine.set_enabled(&alert.id, false).await);
    let event = assert_ok!(p.engine.get_event(&firing[0].id).await);
    assert_eq!(event.status, AlertStatus::Resolved);

    let report = assert_ok!(p.scheduler.run_evaluation_cycle().await);
    assert_eq!(report.evaluated, 0);
    assert!(matches!(
        p.engine.resolve_event(&event.id, "oncall").await,
        Err(AlertError::AlreadyResolved(_))
    ));
}
