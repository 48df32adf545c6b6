use crate::config::ThrottleConfig;
use crate::model::AlertEvent;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// 单告警发送记录的最短保留时间，冷却更长时按冷却时间保留
const STALE_THRESHOLD: Duration = Duration::from_secs(24 * 3600);

#[derive(Default)]
struct ThrottleState {
    /// alert_id -> 最后发送时间
    last_sent: HashMap<String, Instant>,
    /// 全局发送时间（滑动窗口，按时间排序）
    global_sends: VecDeque<Instant>,
}

impl ThrottleState {
    /// 顺带清理过期记录
    fn prune(&mut self, now: Instant, period: Duration, stale_after: Duration) {
        while let Some(front) = self.global_sends.front() {
            if now.duration_since(*front) >= period {
                self.global_sends.pop_front();
            } else {
                break;
            }
        }

        self.last_sent
            .retain(|_, sent_at| now.duration_since(*sent_at) < stale_after);
    }

    fn allows(&self, alert_id: &str, now: Instant, limit: usize, cooldown: Duration) -> bool {
        if self.global_sends.len() >= limit {
            return false;
        }

        match self.last_sent.get(alert_id) {
            Some(sent_at) => now.duration_since(*sent_at) >= cooldown,
            None => true,
        }
    }

    fn record(&mut self, alert_id: &str, now: Instant) {
        self.global_sends.push_back(now);
        self.last_sent.insert(alert_id.to_string(), now);
    }
}

/// 告警通知限流器
///
/// 同时执行全局滑动窗口限流与单告警冷却。
pub struct AlertThrottler {
    rate_limit: usize,
    period: Duration,
    cooldown: Duration,
    stale_after: Duration,
    state: Mutex<ThrottleState>,
}

impl AlertThrottler {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            rate_limit: config.rate_limit_count as usize,
            period: config.rate_limit_period(),
            cooldown: config.cooldown(),
            stale_after: STALE_THRESHOLD.max(config.cooldown()),
            state: Mutex::new(ThrottleState::default()),
        }
    }

    /// 当前是否允许发送（不记录）
    pub async fn should_send(&self, event: &AlertEvent) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.prune(now, self.period, self.stale_after);
        state.allows(&event.alert_id, now, self.rate_limit, self.cooldown)
    }

    /// 原子地检查并记录一次发送
    ///
    /// 并发调用时同一冷却窗口内至多一个返回 `true`。
    pub async fn try_acquire(&self, event: &AlertEvent) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.prune(now, self.period, self.stale_after);

        if !state.allows(&event.alert_id, now, self.rate_limit, self.cooldown) {
            debug!(
                alert_id = %event.alert_id,
                global_in_window = state.global_sends.len(),
                "Notification throttled"
            );
            return false;
        }

        state.record(&event.alert_id, now);
        true
    }

    pub async fn record_sent(&self, event: &AlertEvent) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.prune(now, self.period, self.stale_after);
        state.record(&event.alert_id, now);
    }

    pub async fn reset(&self, alert_id: &str) {
        self.state.lock().await.last_sent.remove(alert_id);
        debug!(alert_id = %alert_id, "Throttle state reset");
    }

    pub async fn reset_all(&self) {
        let mut state = self.state.lock().await;
        state.last_sent.clear();
        state.global_sends.clear();
        debug!("All throttle state reset");
    }

    /// 距该告警上次发送经过的时间
    pub async fn last_sent_elapsed(&self, alert_id: &str) -> Option<Duration> {
        let now = Instant::now();
        let state = self.state.lock().await;
        state
            .last_sent
            .get(alert_id)
            .map(|sent_at| now.duration_since(*sent_at))
    }

    pub async fn global_window_count(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.prune(now, self.period, self.stale_after);
        state.global_sends.len()
    }

    pub async fn tracked_alert_count(&self) -> usize {
        self.state.lock().await.last_sent.len()
    }
}
