use crate::config::ThrottleConfig;
use crate::dispatcher::EventDispatch;
use crate::error::{AlertError, Result};
use crate::model::{AlertEvent, AlertGroup, AlertGroupKey, AlertNotificationResult, GroupStatus};
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 保留的已发送分组数量
const MAX_HISTORY: usize = 100;

/// 分组发送完成后的回调
pub trait GroupListener: Send + Sync {
    fn on_group_flushed(&self, group: &AlertGroup);
}

/// 分组表和定时器表必须作为一个整体修改
#[derive(Default)]
struct GrouperState {
    groups: HashMap<AlertGroupKey, AlertGroup>,
    /// group_id -> 延迟发送任务
    timers: HashMap<String, JoinHandle<()>>,
    shut_down: bool,
}

impl GrouperState {
    fn cancel_timer(&mut self, group_id: &str) {
        if let Some(handle) = self.timers.remove(group_id) {
            handle.abort();
        }
    }
}

struct GrouperInner {
    enabled: bool,
    group_wait: Duration,
    max_group_size: usize,
    group_by: Vec<String>,
    dispatcher: Arc<dyn EventDispatch>,
    state: Mutex<GrouperState>,
    listeners: RwLock<Vec<Arc<dyn GroupListener>>>,
    history: Mutex<VecDeque<AlertGroup>>,
}

/// 告警分组器
///
/// 相同分组键的事件在等待时间内合并成一条通知；达到容量上限或显式
/// 刷新时立即发送。
#[derive(Clone)]
pub struct AlertGrouper {
    inner: Arc<GrouperInner>,
}

impl AlertGrouper {
    pub fn new(config: &ThrottleConfig, dispatcher: Arc<dyn EventDispatch>) -> Self {
        Self {
            inner: Arc::new(GrouperInner {
                enabled: config.grouping_enabled,
                group_wait: config.group_wait(),
                max_group_size: config.max_group_size.max(1),
                group_by: config.group_by.clone(),
                dispatcher,
                state: Mutex::new(GrouperState::default()),
                listeners: RwLock::new(Vec::new()),
                history: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub async fn add_listener(&self, listener: Arc<dyn GroupListener>) {
        self.inner.listeners.write().await.push(listener);
    }

    /// 添加事件
    ///
    /// 事件进入等待中的分组时返回空列表；触发立即发送（分组关闭、容量
    /// 达到上限、已关闭）时返回发送结果。
    pub async fn add_alert(&self, event: AlertEvent) -> Vec<AlertNotificationResult> {
        if !self.inner.enabled {
            return self.inner.dispatcher.dispatch(&event).await;
        }

        let key = AlertGroupKey::from_event(&event, &self.inner.group_by);

        let ready = {
            let mut state = self.inner.state.lock().await;

            if state.shut_down {
                drop(state);
                warn!(event_id = %event.id, "Grouper is shut down, dispatching event directly");
                return self.inner.dispatcher.dispatch(&event).await;
            }

            let existing = state.groups.get(&key).filter(|g| g.is_pending()).cloned();
            match existing {
                Some(group) => match group.add_event(event) {
                    Ok(updated) if updated.size() >= self.inner.max_group_size => {
                        state.groups.remove(&key);
                        state.cancel_timer(&updated.id);
                        debug!(group_id = %updated.id, size = updated.size(), "Group reached max size");
                        Some(updated)
                    }
                    Ok(updated) => {
                        debug!(group_id = %updated.id, size = updated.size(), "Event added to group");
                        state.groups.insert(key, updated);
                        None
                    }
                    Err(e) => {
                        warn!(group_id = %group.id, error = %e, "Failed to add event to group");
                        None
                    }
                },
                None => {
                    let group = AlertGroup::from_event(key.clone(), event);
                    if self.inner.max_group_size <= 1 {
                        Some(group)
                    } else {
                        let timer = self.schedule_flush(group.id.clone());
                        state.timers.insert(group.id.clone(), timer);
                        info!(group_id = %group.id, key = %key, "Alert group created");
                        state.groups.insert(key, group);
                        None
                    }
                }
            }
        };

        match ready {
            Some(group) => self.send_group(group).await,
            None => Vec::new(),
        }
    }

    /// 立即发送指定分组键的等待中分组
    pub async fn flush_group(&self, key: &AlertGroupKey) -> Result<Vec<AlertNotificationResult>> {
        let group = {
            let mut state = self.inner.state.lock().await;
            let group = state
                .groups
                .remove(key)
                .ok_or_else(|| AlertError::not_found(format!("pending group {}", key)))?;
            state.cancel_timer(&group.id);
            group
        };

        Ok(self.send_group(group).await)
    }

    /// 并发发送全部等待中的分组，全部完成后返回
    pub async fn flush_all(&self) -> Vec<AlertNotificationResult> {
        let groups: Vec<AlertGroup> = {
            let mut state = self.inner.state.lock().await;
            for (_, handle) in state.timers.drain() {
                handle.abort();
            }
            state.groups.drain().map(|(_, group)| group).collect()
        };

        if groups.is_empty() {
            return Vec::new();
        }

        info!(count = groups.len(), "Flushing all pending alert groups");
        join_all(groups.into_iter().map(|group| self.send_group(group)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// 取消所有定时器并清空状态，可重复调用
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        if state.shut_down {
            return;
        }

        let dropped = state.groups.len();
        for (_, handle) in state.timers.drain() {
            handle.abort();
        }
        state.groups.clear();
        state.shut_down = true;

        if dropped > 0 {
            warn!(dropped, "Grouper shut down with pending groups");
        }
        info!("Alert grouper shut down");
    }

    /// 等待中的分组（按创建时间排序）
    pub async fn get_pending_groups(&self) -> Vec<AlertGroup> {
        let state = self.inner.state.lock().await;
        let mut groups: Vec<_> = state.groups.values().cloned().collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        groups
    }

    pub async fn pending_group_count(&self) -> usize {
        self.inner.state.lock().await.groups.len()
    }

    pub async fn pending_alert_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .await
            .groups
            .values()
            .map(AlertGroup::size)
            .sum()
    }

    /// 最近发送过的分组（最新在前），包含 SENT / FAILED 终态
    pub async fn recent_groups(&self, limit: usize) -> Vec<AlertGroup> {
        let history = self.inner.history.lock().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    fn schedule_flush(&self, group_id: String) -> JoinHandle<()> {
        let weak: Weak<GrouperInner> = Arc::downgrade(&self.inner);
        let wait = self.inner.group_wait;

        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(inner) = weak.upgrade() {
                AlertGrouper { inner }.flush_by_id(&group_id).await;
            }
        })
    }

    /// 定时器回调：按 ID 查找分组，分组已被其它路径发送时什么都不做
    async fn flush_by_id(&self, group_id: &str) {
        let group = {
            let mut state = self.inner.state.lock().await;
            // 当前任务就是这个定时器，只移除句柄，不能 abort 自己
            state.timers.remove(group_id);

            let key = state
                .groups
                .iter()
                .find(|(_, g)| g.id == group_id)
                .map(|(k, _)| k.clone());
            match key.and_then(|k| state.groups.remove(&k)) {
                Some(group) => group,
                None => {
                    debug!(group_id = %group_id, "Group already flushed, timer is a no-op");
                    return;
                }
            }
        };

        self.send_group(group).await;
    }

    async fn send_group(&self, group: AlertGroup) -> Vec<AlertNotificationResult> {
        let Some(summary) = group.to_summary_event() else {
            return Vec::new();
        };

        info!(
            group_id = %group.id,
            key = %group.key,
            size = group.size(),
            "Sending alert group"
        );

        let results = self.inner.dispatcher.dispatch(&summary).await;
        let status = if !results.is_empty() && results.iter().all(|r| !r.success) {
            GroupStatus::Failed
        } else {
            GroupStatus::Sent
        };

        let finished = group.with_status(status);
        if status == GroupStatus::Failed {
            warn!(group_id = %finished.id, "Alert group failed on every provider");
        }

        for listener in self.inner.listeners.read().await.iter() {
            listener.on_group_flushed(&finished);
        }

        let mut history = self.inner.history.lock().await;
        history.push_back(finished);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }

        results
    }
}
