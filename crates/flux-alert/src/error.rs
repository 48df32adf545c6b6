use thiserror::Error;

/// 告警管道错误类型
#[derive(Error, Debug)]
pub enum AlertError {
    /// 告警或事件未找到
    #[error("Not found: {0}")]
    NotFound(String),

    /// 事件已解决，不允许再次转换
    #[error("Event already resolved: {0}")]
    AlreadyResolved(String),

    /// 非法状态转换
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// 数据源（指标/日志/健康）错误
    #[error("Source error: {0}")]
    Source(String),

    /// 条件评估错误
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// 存储错误
    #[error("Repository error: {0}")]
    Repository(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 验证错误
    #[error("Validation error: {0}")]
    Validation(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

/// 告警管道结果类型
pub type Result<T> = std::result::Result<T, AlertError>;

impl AlertError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        AlertError::NotFound(msg.into())
    }

    pub fn source(msg: impl Into<String>) -> Self {
        AlertError::Source(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        AlertError::Evaluation(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AlertError::Validation(msg.into())
    }
}

impl From<config::ConfigError> for AlertError {
    fn from(err: config::ConfigError) -> Self {
        AlertError::Config(err.to_string())
    }
}
