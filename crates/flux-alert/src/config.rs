use crate::error::{AlertError, Result};
use config::{Config, Environment, File, FileFormat};
use flux_logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 环境变量前缀，例如 `FLUX_ALERT__THROTTLE__COOLDOWN_SECS=60`
pub const ENV_PREFIX: &str = "FLUX_ALERT";

/// 事件保留时长上限（100 年）
pub const MAX_RETENTION_HOURS: u64 = 100 * 365 * 24;

/// 限流、冷却与分组配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// 全局限流：周期内最多发送次数
    pub rate_limit_count: u32,

    /// 全局限流周期（秒）
    pub rate_limit_period_secs: u64,

    /// 单个告警的冷却时间（秒）
    pub cooldown_secs: u64,

    /// 是否启用分组
    pub grouping_enabled: bool,

    /// 分组等待时间（秒）
    pub group_wait_secs: u64,

    /// 分组最大事件数，达到后立即发送
    pub max_group_size: usize,

    /// 持续触发时的重复通知间隔（秒），0 表示不重复
    pub repeat_interval_secs: u64,

    /// 参与分组键的标签
    pub group_by: Vec<String>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            rate_limit_count: 10,
            rate_limit_period_secs: 60,
            cooldown_secs: 300,
            grouping_enabled: true,
            group_wait_secs: 30,
            max_group_size: 100,
            repeat_interval_secs: 3600,
            group_by: Vec::new(),
        }
    }
}

impl ThrottleConfig {
    pub fn rate_limit_period(&self) -> Duration {
        Duration::from_secs(self.rate_limit_period_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn group_wait(&self) -> Duration {
        Duration::from_secs(self.group_wait_secs)
    }

    pub fn repeat_interval(&self) -> Option<Duration> {
        (self.repeat_interval_secs > 0).then(|| Duration::from_secs(self.repeat_interval_secs))
    }
}

/// 分发配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 单个渠道发送超时（秒）
    pub send_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: 10,
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// 告警管道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// 评估周期（秒）
    pub evaluation_interval_secs: u64,

    /// 清理周期（秒）
    pub cleanup_interval_secs: u64,

    /// 事件保留时长（小时）
    pub retention_hours: u64,

    pub throttle: ThrottleConfig,

    pub dispatch: DispatchConfig,

    pub logging: LoggingConfig,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 60,
            cleanup_interval_secs: 3600,
            retention_hours: 168,
            throttle: ThrottleConfig::default(),
            dispatch: DispatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AlertingConfig {
    /// 从 TOML 文件加载配置，并叠加 `FLUX_ALERT__*` 环境变量
    ///
    /// 文件不存在时使用默认值。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| AlertError::Config(format!("Invalid config path: {:?}", path)))?;

        let config = Config::builder()
            .add_source(File::new(path_str, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: AlertingConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.evaluation_interval_secs == 0 {
            return Err(AlertError::Config(
                "evaluation_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(AlertError::Config(
                "cleanup_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.throttle.rate_limit_count == 0 || self.throttle.rate_limit_period_secs == 0 {
            return Err(AlertError::Config(
                "rate limit count and period must be greater than 0".to_string(),
            ));
        }
        if self.retention_hours > MAX_RETENTION_HOURS {
            return Err(AlertError::Config(format!(
                "retention_hours must not exceed {}",
                MAX_RETENTION_HOURS
            )));
        }
        if self.throttle.max_group_size == 0 {
            return Err(AlertError::Config(
                "max_group_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }
}
