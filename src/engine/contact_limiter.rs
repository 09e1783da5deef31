// ==========================================
// 营销活动事件调度 - 联系人限制器
// ==========================================
// 职责: 约束一次调度过程选出的记录数量与联系人范围
// - 活动级预算: 跨多次选择递减，归零后不再查询
// - 批量上限: 单次选择的最大条数
// - 联系人范围 / 线程分片: 转换为仓储层谓词
// 说明: 仅存在于内存，每个调度过程独占一个实例
// ==========================================

use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::repository::event_log_repo::{ContactScope, DueCountFilter, ThreadPartition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactLimiter {
    campaign_limit_total: Option<usize>,
    campaign_limit_remaining: Option<usize>,
    batch_limit: Option<usize>,
    published_only: bool,
    scope: ContactScope,
}

impl Default for ContactLimiter {
    fn default() -> Self {
        Self {
            campaign_limit_total: None,
            campaign_limit_remaining: None,
            batch_limit: None,
            published_only: true,
            scope: ContactScope::default(),
        }
    }
}

impl ContactLimiter {
    pub fn builder() -> ContactLimiterBuilder {
        ContactLimiterBuilder::default()
    }

    /// 不限数量、仅已发布活动
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn has_campaign_limit(&self) -> bool {
        self.campaign_limit_remaining.is_some()
    }

    pub fn campaign_limit_total(&self) -> Option<usize> {
        self.campaign_limit_total
    }

    pub fn campaign_limit_remaining(&self) -> Option<usize> {
        self.campaign_limit_remaining
    }

    /// 扣减活动预算（饱和到 0）；未设置预算时无操作
    pub fn reduce_campaign_limit_remaining(&mut self, n: usize) {
        if let Some(remaining) = self.campaign_limit_remaining.as_mut() {
            *remaining = remaining.saturating_sub(n);
        }
    }

    /// 预算已耗尽
    pub fn is_exhausted(&self) -> bool {
        self.campaign_limit_remaining == Some(0)
    }

    pub fn batch_limit(&self) -> Option<usize> {
        self.batch_limit
    }

    /// 单次选择的实际上限: min(批量上限, 剩余预算)
    pub fn effective_limit(&self) -> Option<usize> {
        match (self.batch_limit, self.campaign_limit_remaining) {
            (Some(batch), Some(remaining)) => Some(batch.min(remaining)),
            (Some(batch), None) => Some(batch),
            (None, Some(remaining)) => Some(remaining),
            (None, None) => None,
        }
    }

    pub fn published_only(&self) -> bool {
        self.published_only
    }

    pub fn scope(&self) -> &ContactScope {
        &self.scope
    }

    /// 按事件计数使用的过滤条件（不含数量限制）
    pub fn due_count_filter(&self) -> DueCountFilter {
        DueCountFilter {
            published_only: self.published_only,
            scope: self.scope.clone(),
        }
    }
}

// ==========================================
// ContactLimiterBuilder
// ==========================================

#[derive(Debug, Clone)]
pub struct ContactLimiterBuilder {
    campaign_limit: Option<usize>,
    batch_limit: Option<usize>,
    published_only: bool,
    contact_id: Option<i64>,
    contact_ids: Vec<i64>,
    min_contact_id: Option<i64>,
    max_contact_id: Option<i64>,
    thread_id: Option<u32>,
    max_threads: Option<u32>,
}

impl Default for ContactLimiterBuilder {
    fn default() -> Self {
        Self {
            campaign_limit: None,
            batch_limit: None,
            published_only: true,
            contact_id: None,
            contact_ids: Vec::new(),
            min_contact_id: None,
            max_contact_id: None,
            thread_id: None,
            max_threads: None,
        }
    }
}

impl ContactLimiterBuilder {
    /// 活动级预算（总数 = 初始剩余）
    pub fn campaign_limit(mut self, limit: usize) -> Self {
        self.campaign_limit = Some(limit);
        self
    }

    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = Some(limit);
        self
    }

    pub fn published_only(mut self, published_only: bool) -> Self {
        self.published_only = published_only;
        self
    }

    pub fn contact_id(mut self, contact_id: i64) -> Self {
        self.contact_id = Some(contact_id);
        self
    }

    pub fn contact_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.contact_ids = ids.into_iter().collect();
        self
    }

    pub fn min_contact_id(mut self, id: i64) -> Self {
        self.min_contact_id = Some(id);
        self
    }

    pub fn max_contact_id(mut self, id: i64) -> Self {
        self.max_contact_id = Some(id);
        self
    }

    /// 线程分片（thread_id 从 1 开始）
    pub fn thread(mut self, thread_id: u32, max_threads: u32) -> Self {
        self.thread_id = Some(thread_id);
        self.max_threads = Some(max_threads);
        self
    }

    pub fn build(self) -> SchedulerResult<ContactLimiter> {
        let thread = match (self.thread_id, self.max_threads) {
            (None, None) => None,
            // 单线程等同于不分片
            (Some(1), Some(1)) => None,
            (Some(thread_id), Some(max_threads)) => {
                if max_threads == 0 || thread_id == 0 {
                    return Err(SchedulerError::InvalidLimiter(format!(
                        "thread_id={} max_threads={} 必须从 1 开始",
                        thread_id, max_threads
                    )));
                }
                if thread_id > max_threads {
                    return Err(SchedulerError::InvalidLimiter(format!(
                        "thread_id={} 大于 max_threads={}",
                        thread_id, max_threads
                    )));
                }
                Some(ThreadPartition {
                    thread_id,
                    max_threads,
                })
            }
            (thread_id, max_threads) => {
                return Err(SchedulerError::InvalidLimiter(format!(
                    "thread_id={:?} 与 max_threads={:?} 必须同时设置",
                    thread_id, max_threads
                )));
            }
        };

        if let (Some(min), Some(max)) = (self.min_contact_id, self.max_contact_id) {
            if min > max {
                return Err(SchedulerError::InvalidLimiter(format!(
                    "min_contact_id={} 大于 max_contact_id={}",
                    min, max
                )));
            }
        }

        Ok(ContactLimiter {
            campaign_limit_total: self.campaign_limit,
            campaign_limit_remaining: self.campaign_limit,
            batch_limit: self.batch_limit,
            published_only: self.published_only,
            scope: ContactScope {
                contact_id: self.contact_id,
                contact_ids: self.contact_ids,
                min_contact_id: self.min_contact_id,
                max_contact_id: self.max_contact_id,
                thread,
            },
        })
    }
}
