use crate::config::AlertingConfig;
use crate::engine::AlertEngine;
use crate::error::{AlertError, Result};
use crate::grouper::AlertGrouper;
use crate::model::{AlertEvaluationResult, AlertEvent};
use crate::throttle::AlertThrottler;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 周期任务体
pub type RecurringTask = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// 已调度的周期任务，可取消
pub struct ScheduledTask {
    name: String,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.handle.abort();
        debug!(task = %self.name, "Scheduled task cancelled");
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 取消并等待任务真正退出
    pub async fn cancel_and_wait(self) {
        self.handle.abort();
        match self.handle.await {
            Err(e) if e.is_panic() => warn!(task = %self.name, "Scheduled task panicked"),
            _ => debug!(task = %self.name, "Scheduled task stopped"),
        }
    }
}

/// 周期任务调度器
pub trait TaskScheduler: Send + Sync {
    /// 以固定频率执行任务，首次执行立即发生；同一任务的两次执行不会重叠
    fn schedule_at_fixed_rate(
        &self,
        name: &str,
        period: Duration,
        task: RecurringTask,
    ) -> ScheduledTask;
}

/// 基于 tokio 的调度器
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTaskScheduler;

impl TaskScheduler for TokioTaskScheduler {
    fn schedule_at_fixed_rate(
        &self,
        name: &str,
        period: Duration,
        task: RecurringTask,
    ) -> ScheduledTask {
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                debug!(task = %task_name, "Running scheduled task");
                // 单次执行 panic 不终止后续调度
                let run = async { task().await };
                if AssertUnwindSafe(run).catch_unwind().await.is_err() {
                    error!(task = %task_name, "Scheduled task panicked");
                }
            }
        });

        ScheduledTask::new(name, handle)
    }
}

/// 单轮评估的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// 评估的告警数
    pub evaluated: usize,
    /// 条件成立的告警数
    pub triggered: usize,
    /// 新生成的事件数
    pub created: usize,
    /// 被限流、未发送通知的新事件数
    pub throttled: usize,
    /// 重复通知数
    pub repeated: usize,
    /// 自动解决的事件数
    pub resolved: usize,
    /// 处理失败的告警数
    pub failed: usize,
}

enum TriggerOutcome {
    Notified,
    Throttled,
    Repeated,
    AlreadyFiring,
}

/// 告警调度器
///
/// 周期执行评估与清理，把新事件经过限流后交给分组器发送。
pub struct AlertScheduler {
    engine: Arc<AlertEngine>,
    throttler: Arc<AlertThrottler>,
    grouper: AlertGrouper,
    config: AlertingConfig,
    task_scheduler: Arc<dyn TaskScheduler>,
    tasks: Mutex<Vec<ScheduledTask>>,
    routes: Mutex<Vec<JoinHandle<()>>>,
}

impl AlertScheduler {
    pub fn new(
        engine: Arc<AlertEngine>,
        throttler: Arc<AlertThrottler>,
        grouper: AlertGrouper,
        config: AlertingConfig,
    ) -> Self {
        Self {
            engine,
            throttler,
            grouper,
            config,
            task_scheduler: Arc::new(TokioTaskScheduler),
            tasks: Mutex::new(Vec::new()),
            routes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_task_scheduler(mut self, task_scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.task_scheduler = task_scheduler;
        self
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    pub fn grouper(&self) -> &AlertGrouper {
        &self.grouper
    }

    /// 启动评估与清理循环
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Alert scheduler is already running");
            return;
        }

        let weak = Arc::downgrade(self);
        tasks.push(self.task_scheduler.schedule_at_fixed_rate(
            "alert-evaluation",
            self.config.evaluation_interval(),
            Box::new(move || {
                let weak: Weak<Self> = weak.clone();
                async move {
                    if let Some(scheduler) = weak.upgrade() {
                        if let Err(e) = scheduler.run_evaluation_cycle().await {
                            error!(error = %e, "Alert evaluation cycle failed");
                        }
                    }
                }
                .boxed()
            }),
        ));

        let weak = Arc::downgrade(self);
        tasks.push(self.task_scheduler.schedule_at_fixed_rate(
            "alert-cleanup",
            self.config.cleanup_interval(),
            Box::new(move || {
                let weak: Weak<Self> = weak.clone();
                async move {
                    if let Some(scheduler) = weak.upgrade() {
                        if let Err(e) = scheduler.run_cleanup_cycle().await {
                            error!(error = %e, "Alert cleanup cycle failed");
                        }
                    }
                }
                .boxed()
            }),
        ));

        info!(
            evaluation_interval = ?self.config.evaluation_interval(),
            cleanup_interval = ?self.config.cleanup_interval(),
            "Alert scheduler started"
        );
    }

    /// 停止循环，并发送仍在等待的分组
    ///
    /// 先等待已派发的通知进入分组器，再发送全部等待中的分组，最后关闭分组器；
    /// 之后的事件直接发送。
    pub async fn stop(&self) {
        let tasks: Vec<ScheduledTask> = self.tasks.lock().await.drain(..).collect();
        if tasks.is_empty() {
            return;
        }

        info!("Alert scheduler stopping...");
        for task in tasks {
            task.cancel_and_wait().await;
        }

        let routes: Vec<JoinHandle<()>> = self.routes.lock().await.drain(..).collect();
        for route in routes {
            if let Err(e) = route.await {
                warn!(error = %e, "Notification routing task failed");
            }
        }

        if self.grouper.is_enabled() && self.grouper.pending_group_count().await > 0 {
            let results = self.grouper.flush_all().await;
            info!(notifications = results.len(), "Flushed pending alert groups on stop");
        }
        self.grouper.shutdown().await;

        info!("Alert scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        !self.tasks.lock().await.is_empty()
    }

    /// 执行一轮评估
    ///
    /// 单个告警的处理失败只记录日志，不影响其它告警。
    pub async fn run_evaluation_cycle(&self) -> Result<EvaluationReport> {
        let results = self.engine.evaluate_all().await?;
        let mut report = EvaluationReport {
            evaluated: results.len(),
            ..Default::default()
        };

        for result in results.iter().filter(|r| r.triggered) {
            report.triggered += 1;
            match self.handle_triggered(result).await {
                Ok(TriggerOutcome::Notified) => report.created += 1,
                Ok(TriggerOutcome::Throttled) => {
                    report.created += 1;
                    report.throttled += 1;
                }
                Ok(TriggerOutcome::Repeated) => report.repeated += 1,
                Ok(TriggerOutcome::AlreadyFiring) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(alert_id = %result.alert_id, error = %e, "Failed to process triggered alert");
                }
            }
        }

        report.resolved = self.engine.auto_resolve(&results).await?.len();

        debug!(
            evaluated = report.evaluated,
            triggered = report.triggered,
            created = report.created,
            resolved = report.resolved,
            "Evaluation cycle completed"
        );
        Ok(report)
    }

    /// 删除超过保留期的事件
    pub async fn run_cleanup_cycle(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.config.retention())
            .map_err(|e| AlertError::Config(format!("invalid retention: {}", e)))?;
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .ok_or_else(|| AlertError::Config("retention period is out of range".to_string()))?;
        let deleted = self.engine.delete_events_older_than(cutoff).await?;
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Old alert events deleted");
        }
        Ok(deleted)
    }

    async fn handle_triggered(&self, result: &AlertEvaluationResult) -> Result<TriggerOutcome> {
        if let Some(current) = self.engine.current_firing_event(&result.alert_id).await? {
            return Ok(if self.repeat_due(&current).await && self.throttler.try_acquire(&current).await {
                info!(event_id = %current.id, alert_id = %current.alert_id, "Repeating notification for firing alert");
                self.route(current).await;
                TriggerOutcome::Repeated
            } else {
                TriggerOutcome::AlreadyFiring
            });
        }

        let alert = self.engine.get_alert(&result.alert_id).await?;
        let event = self
            .engine
            .save_event(self.engine.create_event(&alert, result))
            .await?;

        info!(
            event_id = %event.id,
            alert_id = %event.alert_id,
            alert_name = %event.alert_name,
            severity = %event.severity,
            "Alert fired"
        );

        if self.throttler.try_acquire(&event).await {
            self.route(event).await;
            Ok(TriggerOutcome::Notified)
        } else {
            info!(event_id = %event.id, "Notification suppressed by throttle");
            Ok(TriggerOutcome::Throttled)
        }
    }

    /// 从未发送过时按首次触发时间计算
    async fn repeat_due(&self, event: &AlertEvent) -> bool {
        let Some(repeat) = self.config.throttle.repeat_interval() else {
            return false;
        };

        let elapsed = match self.throttler.last_sent_elapsed(&event.alert_id).await {
            Some(elapsed) => elapsed,
            None => (Utc::now() - event.fired_at).to_std().unwrap_or_default(),
        };
        elapsed >= repeat
    }

    /// 异步发送，不阻塞本轮评估；句柄保留到 `stop` 时等待
    async fn route(&self, event: AlertEvent) {
        let grouper = self.grouper.clone();
        let handle = tokio::spawn(async move {
            let event_id = event.id.clone();
            for result in grouper.add_alert(event).await.iter().filter(|r| !r.success) {
                warn!(
                    event_id = %event_id,
                    provider = %result.provider,
                    error = ?result.error,
                    "Notification failed"
                );
            }
        });

        let mut routes = self.routes.lock().await;
        routes.retain(|h| !h.is_finished());
        routes.push(handle);
    }
}
