// ==========================================
// 营销活动事件调度 - 到期记录选择器
// ==========================================
// 职责: 在联系人限制器约束下选出到期调度记录，
//       并负责取消调度（附原因）与执行抢占
// 红线: 选择器不拼 SQL，所有查询经 EventStore
// ==========================================

use crate::domain::event_log::CampaignEventLog;
use crate::engine::contact_limiter::ContactLimiter;
use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::engine::event_store::EventStore;
use crate::repository::event_log_repo::DueQuery;
use chrono::{NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, instrument, warn};

// ==========================================
// ScheduledEventSelector
// ==========================================
pub struct ScheduledEventSelector<S: EventStore> {
    store: S,
}

impl<S: EventStore> ScheduledEventSelector<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 选出某事件的到期记录
    ///
    /// # 参数
    /// - event_id: 活动事件
    /// - now: 判定到期的时间点（UTC）
    /// - limiter: 本次调度过程的限制器，选出后按条数扣减预算
    ///
    /// 到期判定按整秒: now 与 trigger_date 都截断到秒后比较，
    /// 同一秒内稍晚到期的记录也会被选出
    ///
    /// # 返回
    /// - Ok(logs): id 升序，条数不超过 min(批量上限, 剩余预算)
    /// - Err(NotFound): 事件不存在
    /// - Err(StoreUnavailable): 存储故障
    #[instrument(skip(self, limiter), fields(
        event_id = %event_id,
        remaining = ?limiter.campaign_limit_remaining(),
        batch_limit = ?limiter.batch_limit()
    ))]
    pub fn select_due(
        &self,
        event_id: i64,
        now: NaiveDateTime,
        limiter: &mut ContactLimiter,
    ) -> SchedulerResult<Vec<CampaignEventLog>> {
        // 预算已耗尽: 不访问存储
        if limiter.is_exhausted() {
            debug!("活动预算已耗尽，跳过查询");
            return Ok(Vec::new());
        }

        if !self.store.event_exists(event_id)? {
            return Err(SchedulerError::NotFound(format!("CampaignEvent id={}", event_id)));
        }

        let query = DueQuery {
            event_id,
            now,
            limit: limiter.effective_limit(),
            published_only: limiter.published_only(),
            scope: limiter.scope().clone(),
        };
        let logs = self.store.find_due(&query)?;

        if limiter.has_campaign_limit() {
            limiter.reduce_campaign_limit_remaining(logs.len());
        }

        debug!(
            selected = logs.len(),
            remaining_after = ?limiter.campaign_limit_remaining(),
            "到期记录已选出"
        );
        Ok(logs)
    }

    /// 按 id 重新读取仍在调度中、活动已发布的记录（id 升序）
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub fn select_by_ids(&self, ids: &[i64]) -> SchedulerResult<Vec<CampaignEventLog>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.find_by_ids(ids)?)
    }

    /// 复核一批已选出的记录，剔除期间被执行/取消的记录
    pub fn revalidate(&self, batch: &[CampaignEventLog]) -> SchedulerResult<Vec<CampaignEventLog>> {
        let ids: Vec<i64> = batch.iter().map(|log| log.id).collect();
        let fresh = self.select_by_ids(&ids)?;

        let alive: HashSet<i64> = fresh.iter().map(|log| log.id).collect();
        for log_id in ids.iter().filter(|id| !alive.contains(*id)) {
            let stale = SchedulerError::StaleSelection { log_id: *log_id };
            debug!(error = %stale, "跳过已失效记录");
        }
        Ok(fresh)
    }

    /// 抢占执行: 仅当记录仍在调度中时置为已执行
    ///
    /// # 返回
    /// - Err(StaleSelection): 已被其它调度者执行，或已取消
    #[instrument(skip(self), fields(log_id = %log_id))]
    pub fn mark_executed(&self, log_id: i64, now: NaiveDateTime) -> SchedulerResult<()> {
        if self.store.claim_scheduled(log_id, now)? {
            Ok(())
        } else {
            warn!("记录已不在调度中，放弃执行");
            Err(SchedulerError::StaleSelection { log_id })
        }
    }

    /// 取消成员在某轮次的全部待执行记录并记录原因（date_added 取当前 UTC）
    ///
    /// # 返回
    /// - Ok(rows): 被取消调度的记录数
    pub fn unschedule_and_log(
        &self,
        contact_id: i64,
        campaign_id: i64,
        rotation: i64,
        reason: &str,
    ) -> SchedulerResult<usize> {
        self.unschedule_and_log_at(
            contact_id,
            campaign_id,
            rotation,
            reason,
            Utc::now().naive_utc(),
        )
    }

    /// 同 `unschedule_and_log`，显式指定记录时间
    #[instrument(skip(self, reason), fields(contact_id = %contact_id, campaign_id = %campaign_id, rotation = %rotation))]
    pub fn unschedule_and_log_at(
        &self,
        contact_id: i64,
        campaign_id: i64,
        rotation: i64,
        reason: &str,
        at: NaiveDateTime,
    ) -> SchedulerResult<usize> {
        let rows = self
            .store
            .unschedule_with_reason(contact_id, campaign_id, rotation, at, reason)?;
        info!(unscheduled = rows, reason, "成员调度记录已取消");
        Ok(rows)
    }

    /// 按事件统计到期记录数（不截断，不扣减预算）
    #[instrument(skip(self, limiter), fields(campaign_id = %campaign_id))]
    pub fn count_due_by_event(
        &self,
        campaign_id: i64,
        now: NaiveDateTime,
        limiter: &ContactLimiter,
    ) -> SchedulerResult<BTreeMap<i64, u64>> {
        Ok(self
            .store
            .count_grouped_by_event(campaign_id, now, &limiter.due_count_filter())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::error::{RepositoryError, RepositoryResult};
    use crate::repository::event_log_repo::DueCountFilter;
    use chrono::{Duration, NaiveDate};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    /// 内存存储：只模拟事件 + 调度中 + 到期 三个条件
    #[derive(Default)]
    struct MockStore {
        logs: Mutex<Vec<CampaignEventLog>>,
        events: Vec<i64>,
        calls: AtomicUsize,
        fail: bool,
        last_limit: Mutex<Option<Option<usize>>>,
    }

    impl MockStore {
        fn with_due(event_id: i64, n: i64) -> Self {
            let logs = (1..=n)
                .map(|i| {
                    let mut log = CampaignEventLog::scheduled(
                        100 + i,
                        1,
                        event_id,
                        1,
                        now() - Duration::minutes(i),
                    );
                    log.id = i;
                    log
                })
                .collect();
            Self {
                logs: Mutex::new(logs),
                events: vec![event_id],
                ..Default::default()
            }
        }

        fn hit(&self) -> RepositoryResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RepositoryError::LockError("poisoned".to_string()));
            }
            Ok(())
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl EventStore for MockStore {
        fn event_exists(&self, event_id: i64) -> RepositoryResult<bool> {
            self.hit()?;
            Ok(self.events.contains(&event_id))
        }

        fn find_due(&self, query: &DueQuery) -> RepositoryResult<Vec<CampaignEventLog>> {
            self.hit()?;
            *self.last_limit.lock().unwrap() = Some(query.limit);
            let logs = self.logs.lock().unwrap();
            Ok(logs
                .iter()
                .filter(|l| l.event_id == query.event_id && l.is_scheduled)
                .filter(|l| l.trigger_date.map_or(false, |t| t <= query.now))
                .take(query.limit.unwrap_or(usize::MAX))
                .cloned()
                .collect())
        }

        fn find_by_ids(&self, ids: &[i64]) -> RepositoryResult<Vec<CampaignEventLog>> {
            self.hit()?;
            let logs = self.logs.lock().unwrap();
            Ok(logs
                .iter()
                .filter(|l| ids.contains(&l.id) && l.is_scheduled)
                .cloned()
                .collect())
        }

        fn upsert_failed_log(&self, _: i64, _: NaiveDateTime, _: &str) -> RepositoryResult<()> {
            self.hit()
        }

        fn set_scheduled(&self, ids: &[i64], scheduled: bool) -> RepositoryResult<usize> {
            self.hit()?;
            let mut logs = self.logs.lock().unwrap();
            let mut n = 0;
            for log in logs.iter_mut().filter(|l| ids.contains(&l.id)) {
                log.is_scheduled = scheduled;
                n += 1;
            }
            Ok(n)
        }

        fn unschedule_with_reason(
            &self,
            contact_id: i64,
            campaign_id: i64,
            rotation: i64,
            _: NaiveDateTime,
            _: &str,
        ) -> RepositoryResult<usize> {
            self.hit()?;
            let mut logs = self.logs.lock().unwrap();
            let mut n = 0;
            for log in logs.iter_mut().filter(|l| {
                l.is_scheduled
                    && l.contact_id == contact_id
                    && l.campaign_id == campaign_id
                    && l.rotation == rotation
            }) {
                log.is_scheduled = false;
                n += 1;
            }
            Ok(n)
        }

        fn claim_scheduled(&self, log_id: i64, at: NaiveDateTime) -> RepositoryResult<bool> {
            self.hit()?;
            let mut logs = self.logs.lock().unwrap();
            match logs.iter_mut().find(|l| l.id == log_id && l.is_scheduled) {
                Some(log) => {
                    log.is_scheduled = false;
                    log.date_triggered = Some(at);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn count_grouped_by_event(
            &self,
            _: i64,
            now: NaiveDateTime,
            _: &DueCountFilter,
        ) -> RepositoryResult<BTreeMap<i64, u64>> {
            self.hit()?;
            let mut out = BTreeMap::new();
            for log in self.logs.lock().unwrap().iter() {
                if log.is_scheduled && log.trigger_date.map_or(false, |t| t <= now) {
                    *out.entry(log.event_id).or_insert(0) += 1;
                }
            }
            Ok(out)
        }
    }

    #[test]
    fn test_zero_budget_makes_no_store_call() {
        let selector = ScheduledEventSelector::new(MockStore::with_due(5, 3));
        let mut limiter = ContactLimiter::builder().campaign_limit(0).build().unwrap();

        let logs = selector.select_due(5, now(), &mut limiter).unwrap();
        assert!(logs.is_empty());
        assert_eq!(selector.store().calls(), 0);
    }

    #[test]
    fn test_budget_smaller_than_batch_caps_and_decrements() {
        let selector = ScheduledEventSelector::new(MockStore::with_due(5, 10));
        let mut limiter = ContactLimiter::builder()
            .campaign_limit(3)
            .batch_limit(100)
            .build()
            .unwrap();

        let logs = selector.select_due(5, now(), &mut limiter).unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(*selector.store().last_limit.lock().unwrap(), Some(Some(3)));
        assert_eq!(limiter.campaign_limit_remaining(), Some(0));

        // 预算耗尽后不再访问存储
        let calls = selector.store().calls();
        assert!(selector.select_due(5, now(), &mut limiter).unwrap().is_empty());
        assert_eq!(selector.store().calls(), calls);
    }

    #[test]
    fn test_decrement_uses_actual_result_size() {
        let selector = ScheduledEventSelector::new(MockStore::with_due(5, 2));
        let mut limiter = ContactLimiter::builder()
            .campaign_limit(50)
            .batch_limit(10)
            .build()
            .unwrap();

        let logs = selector.select_due(5, now(), &mut limiter).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(*selector.store().last_limit.lock().unwrap(), Some(Some(10)));
        assert_eq!(limiter.campaign_limit_remaining(), Some(48));
    }

    #[test]
    fn test_no_budget_no_batch_is_unbounded() {
        let selector = ScheduledEventSelector::new(MockStore::with_due(5, 4));
        let mut limiter = ContactLimiter::unbounded();

        let logs = selector.select_due(5, now(), &mut limiter).unwrap();
        assert_eq!(logs.len(), 4);
        assert_eq!(*selector.store().last_limit.lock().unwrap(), Some(None));
        assert_eq!(limiter.campaign_limit_remaining(), None);
    }

    #[test]
    fn test_unknown_event_is_not_found() {
        let selector = ScheduledEventSelector::new(MockStore::with_due(5, 1));
        let mut limiter = ContactLimiter::unbounded();

        let err = selector.select_due(6, now(), &mut limiter).unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[test]
    fn test_store_failure_surfaces_as_unavailable() {
        let store = MockStore {
            fail: true,
            ..MockStore::with_due(5, 1)
        };
        let selector = ScheduledEventSelector::new(store);
        let mut limiter = ContactLimiter::builder().campaign_limit(5).build().unwrap();

        let err = selector.select_due(5, now(), &mut limiter).unwrap_err();
        assert!(matches!(err, SchedulerError::StoreUnavailable(_)));
        assert!(err.is_retryable());
        // 失败时不扣减预算
        assert_eq!(limiter.campaign_limit_remaining(), Some(5));
    }

    #[test]
    fn test_select_by_ids_empty_makes_no_store_call() {
        let selector = ScheduledEventSelector::new(MockStore::with_due(5, 2));
        assert!(selector.select_by_ids(&[]).unwrap().is_empty());
        assert_eq!(selector.store().calls(), 0);
    }

    #[test]
    fn test_mark_executed_claims_once() {
        let selector = ScheduledEventSelector::new(MockStore::with_due(5, 1));
        selector.mark_executed(1, now()).unwrap();

        let err = selector.mark_executed(1, now()).unwrap_err();
        assert!(matches!(err, SchedulerError::StaleSelection { log_id: 1 }));
    }

    #[test]
    fn test_revalidate_drops_claimed_records() {
        let selector = ScheduledEventSelector::new(MockStore::with_due(5, 3));
        let mut limiter = ContactLimiter::unbounded();
        let batch = selector.select_due(5, now(), &mut limiter).unwrap();

        selector.mark_executed(2, now()).unwrap();
        let fresh = selector.revalidate(&batch).unwrap();
        assert_eq!(fresh.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_unschedule_then_select_excludes_records() {
        let selector = ScheduledEventSelector::new(MockStore::with_due(5, 3));
        // 联系人 102 对应 id 2
        let n = selector.unschedule_and_log(102, 1, 1, "removed").unwrap();
        assert_eq!(n, 1);

        let mut limiter = ContactLimiter::unbounded();
        let ids: Vec<i64> = selector
            .select_due(5, now(), &mut limiter)
            .unwrap()
            .iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(selector.select_by_ids(&[2]).unwrap().is_empty());
    }

    #[test]
    fn test_count_due_by_event_leaves_limiter_untouched() {
        let selector = ScheduledEventSelector::new(MockStore::with_due(5, 3));
        let limiter = ContactLimiter::builder().campaign_limit(1).build().unwrap();

        let counts = selector.count_due_by_event(1, now(), &limiter).unwrap();
        assert_eq!(counts.get(&5), Some(&3));
        assert_eq!(limiter.campaign_limit_remaining(), Some(1));
    }
}
