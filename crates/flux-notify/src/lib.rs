//! 告警通知渠道：Webhook、Slack、Teams、Telegram、邮件

pub mod endpoint;
pub mod error;
pub mod message;
pub mod providers;

pub use endpoint::{ensure_public_resolution, validate_endpoint_url};
pub use error::{NotifyError, Result};
pub use providers::{
    EmailConfig, EmailProvider, SlackConfig, SlackProvider, TeamsConfig, TeamsProvider,
    TelegramConfig, TelegramProvider, WebhookConfig, WebhookProvider,
};
