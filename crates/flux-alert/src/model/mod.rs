pub mod alert;
pub mod event;
pub mod group;
pub mod notification;

pub use alert::{
    Alert, AlertCondition, AlertEvaluationResult, AlertSeverity, AlertType, Comparison,
};
pub use event::{AlertEvent, AlertStatus, SYSTEM_ACTOR};
pub use group::{AlertGroup, AlertGroupKey, GroupStatus};
pub use notification::AlertNotificationResult;
