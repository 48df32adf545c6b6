use thiserror::Error;

/// 通知渠道错误类型
#[derive(Error, Debug)]
pub enum NotifyError {
    /// HTTP 请求失败
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// 邮件构建或发送失败
    #[error("Email error: {0}")]
    Email(String),

    /// 地址不允许作为通知目标
    #[error("Invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// 缺少必需配置
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// 序列化失败
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 通知结果类型
pub type Result<T> = std::result::Result<T, NotifyError>;

impl NotifyError {
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
