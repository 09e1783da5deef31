// ==========================================
// 营销活动事件调度 - 事件存储 Trait
// ==========================================
// 职责: 选择器所需的数据访问接口（依赖倒置）
// 实现者: EventLogRepository（rusqlite）
// 说明: 同步阻塞调用；错误为仓储层错误，由选择器统一映射
// ==========================================

use crate::domain::event_log::CampaignEventLog;
use crate::repository::error::RepositoryResult;
use crate::repository::event_log_repo::{DueCountFilter, DueQuery, EventLogRepository};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::Arc;

// ==========================================
// EventStore Trait
// ==========================================
pub trait EventStore: Send + Sync {
    /// 事件是否存在
    fn event_exists(&self, event_id: i64) -> RepositoryResult<bool>;

    /// 到期记录（id 升序，按 query.limit 截断）
    fn find_due(&self, query: &DueQuery) -> RepositoryResult<Vec<CampaignEventLog>>;

    /// 给定 id 中仍在调度且活动已发布的记录
    fn find_by_ids(&self, ids: &[i64]) -> RepositoryResult<Vec<CampaignEventLog>>;

    fn upsert_failed_log(
        &self,
        log_id: i64,
        date_added: NaiveDateTime,
        reason: &str,
    ) -> RepositoryResult<()>;

    fn set_scheduled(&self, ids: &[i64], scheduled: bool) -> RepositoryResult<usize>;

    /// upsert 失败日志 + 取消调度，单事务
    ///
    /// # 返回
    /// - Ok(rows): 被取消调度的记录数
    fn unschedule_with_reason(
        &self,
        contact_id: i64,
        campaign_id: i64,
        rotation: i64,
        date_added: NaiveDateTime,
        reason: &str,
    ) -> RepositoryResult<usize>;

    /// 条件更新 is_scheduled: true -> false
    ///
    /// # 返回
    /// - Ok(false): 记录已不在调度中
    fn claim_scheduled(&self, log_id: i64, triggered_at: NaiveDateTime) -> RepositoryResult<bool>;

    fn count_grouped_by_event(
        &self,
        campaign_id: i64,
        now: NaiveDateTime,
        filter: &DueCountFilter,
    ) -> RepositoryResult<BTreeMap<i64, u64>>;
}

impl EventStore for EventLogRepository {
    fn event_exists(&self, event_id: i64) -> RepositoryResult<bool> {
        EventLogRepository::event_exists(self, event_id)
    }

    fn find_due(&self, query: &DueQuery) -> RepositoryResult<Vec<CampaignEventLog>> {
        EventLogRepository::find_due(self, query)
    }

    fn find_by_ids(&self, ids: &[i64]) -> RepositoryResult<Vec<CampaignEventLog>> {
        EventLogRepository::find_by_ids(self, ids)
    }

    fn upsert_failed_log(
        &self,
        log_id: i64,
        date_added: NaiveDateTime,
        reason: &str,
    ) -> RepositoryResult<()> {
        EventLogRepository::upsert_failed_log(self, log_id, date_added, reason)
    }

    fn set_scheduled(&self, ids: &[i64], scheduled: bool) -> RepositoryResult<usize> {
        EventLogRepository::set_scheduled(self, ids, scheduled)
    }

    fn unschedule_with_reason(
        &self,
        contact_id: i64,
        campaign_id: i64,
        rotation: i64,
        date_added: NaiveDateTime,
        reason: &str,
    ) -> RepositoryResult<usize> {
        EventLogRepository::unschedule_with_reason(
            self,
            contact_id,
            campaign_id,
            rotation,
            date_added,
            reason,
        )
    }

    fn claim_scheduled(&self, log_id: i64, triggered_at: NaiveDateTime) -> RepositoryResult<bool> {
        EventLogRepository::claim_scheduled(self, log_id, triggered_at)
    }

    fn count_grouped_by_event(
        &self,
        campaign_id: i64,
        now: NaiveDateTime,
        filter: &DueCountFilter,
    ) -> RepositoryResult<BTreeMap<i64, u64>> {
        EventLogRepository::count_grouped_by_event(self, campaign_id, now, filter)
    }
}

/// 共享所有权的存储同样可用
impl<S: EventStore + ?Sized> EventStore for Arc<S> {
    fn event_exists(&self, event_id: i64) -> RepositoryResult<bool> {
        (**self).event_exists(event_id)
    }

    fn find_due(&self, query: &DueQuery) -> RepositoryResult<Vec<CampaignEventLog>> {
        (**self).find_due(query)
    }

    fn find_by_ids(&self, ids: &[i64]) -> RepositoryResult<Vec<CampaignEventLog>> {
        (**self).find_by_ids(ids)
    }

    fn upsert_failed_log(
        &self,
        log_id: i64,
        date_added: NaiveDateTime,
        reason: &str,
    ) -> RepositoryResult<()> {
        (**self).upsert_failed_log(log_id, date_added, reason)
    }

    fn set_scheduled(&self, ids: &[i64], scheduled: bool) -> RepositoryResult<usize> {
        (**self).set_scheduled(ids, scheduled)
    }

    fn unschedule_with_reason(
        &self,
        contact_id: i64,
        campaign_id: i64,
        rotation: i64,
        date_added: NaiveDateTime,
        reason: &str,
    ) -> RepositoryResult<usize> {
        (**self).unschedule_with_reason(contact_id, campaign_id, rotation, date_added, reason)
    }

    fn claim_scheduled(&self, log_id: i64, triggered_at: NaiveDateTime) -> RepositoryResult<bool> {
        (**self).claim_scheduled(log_id, triggered_at)
    }

    fn count_grouped_by_event(
        &self,
        campaign_id: i64,
        now: NaiveDateTime,
        filter: &DueCountFilter,
    ) -> RepositoryResult<BTreeMap<i64, u64>> {
        (**self).count_grouped_by_event(campaign_id, now, filter)
    }
}
