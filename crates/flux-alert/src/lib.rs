//! 告警管道：评估 -> 限流 -> 分组 -> 多渠道发送

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod grouper;
pub mod model;
pub mod provider;
pub mod repository;
pub mod scheduler;
pub mod source;
pub mod throttle;

pub use config::{AlertingConfig, DispatchConfig, ThrottleConfig};
pub use dispatcher::{AlertDispatcher, EventDispatch};
pub use engine::{AlertEngine, AlertSources};
pub use error::{AlertError, Result};
pub use grouper::{AlertGrouper, GroupListener};
pub use model::{
    Alert, AlertCondition, AlertEvaluationResult, AlertEvent, AlertGroup, AlertGroupKey,
    AlertNotificationResult, AlertSeverity, AlertStatus, AlertType, Comparison, GroupStatus,
};
pub use provider::NotificationProvider;
pub use repository::{
    AlertEventRepository, AlertRepository, InMemoryAlertRepository, InMemoryEventRepository,
};
pub use scheduler::{AlertScheduler, EvaluationReport, ScheduledTask, TaskScheduler, TokioTaskScheduler};
pub use source::{
    HealthReport, HealthSource, HealthStatus, LogQuery, LogSource, MetricSnapshot, MetricSource,
};
pub use throttle::AlertThrottler;
