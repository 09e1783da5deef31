// ==========================================
// 营销活动事件调度 - 单次调度过程
// ==========================================
// 流程:
// 1) 按事件统计到期记录数
// 2) 逐事件分批选出（共享同一限制器预算）
// 3) 逐条抢占执行权后交给执行器
// 隔离: 单个事件失败只记录在报告中，不影响其它事件
// ==========================================

use crate::domain::event_log::CampaignEventLog;
use crate::engine::contact_limiter::ContactLimiter;
use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::engine::event_store::EventStore;
use crate::engine::selector::ScheduledEventSelector;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// 执行器 Trait
// ==========================================

/// 已抢占记录的执行器
pub trait EventExecutor: Send + Sync {
    /// 执行一条记录；返回 Err 时记入报告
    fn execute(&self, log: &CampaignEventLog) -> Result<(), String>;
}

/// 空执行器: 只抢占，不做额外动作
#[derive(Debug, Clone, Default)]
pub struct NoOpExecutor;

impl EventExecutor for NoOpExecutor {
    fn execute(&self, log: &CampaignEventLog) -> Result<(), String> {
        debug!(log_id = log.id, contact_id = log.contact_id, "NoOpExecutor: 跳过执行");
        Ok(())
    }
}

// ==========================================
// 报告
// ==========================================

/// 单个事件的处理结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPassOutcome {
    pub event_id: i64,
    pub due: u64,
    pub selected: usize,
    pub executed: usize,
    /// 抢占时已被执行/取消
    pub stale: usize,
    /// 执行器返回失败
    pub failed: usize,
    pub error: Option<String>,
}

/// 单次调度过程报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_id: String,
    pub campaign_id: i64,
    pub now: NaiveDateTime,
    pub events: Vec<EventPassOutcome>,
    pub campaign_limit_remaining: Option<usize>,
}

impl PassReport {
    pub fn total_executed(&self) -> usize {
        self.events.iter().map(|e| e.executed).sum()
    }

    pub fn failed_events(&self) -> impl Iterator<Item = &EventPassOutcome> {
        self.events.iter().filter(|e| e.error.is_some())
    }
}

// ==========================================
// SchedulingPass
// ==========================================

pub struct SchedulingPass<S: EventStore, E: EventExecutor = NoOpExecutor> {
    selector: ScheduledEventSelector<S>,
    executor: E,
}

impl<S: EventStore> SchedulingPass<S, NoOpExecutor> {
    pub fn new(store: S) -> Self {
        Self::with_executor(store, NoOpExecutor)
    }
}

impl<S: EventStore, E: EventExecutor> SchedulingPass<S, E> {
    pub fn with_executor(store: S, executor: E) -> Self {
        Self {
            selector: ScheduledEventSelector::new(store),
            executor,
        }
    }

    pub fn selector(&self) -> &ScheduledEventSelector<S> {
        &self.selector
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// 对活动执行一次调度
    ///
    /// # 返回
    /// - Ok(report): 各事件结果（事件级错误记录在 outcome.error）
    /// - Err: 到期统计本身失败
    #[instrument(skip(self, limiter), fields(campaign_id = %campaign_id, pass_id = tracing::field::Empty))]
    pub fn run(
        &self,
        campaign_id: i64,
        now: NaiveDateTime,
        limiter: &mut ContactLimiter,
    ) -> SchedulerResult<PassReport> {
        let pass_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("pass_id", pass_id.as_str());

        let due_counts = self.selector.count_due_by_event(campaign_id, now, limiter)?;
        info!(events = due_counts.len(), "开始调度过程");

        let mut events = Vec::with_capacity(due_counts.len());
        for (event_id, due) in due_counts {
            let mut outcome = EventPassOutcome {
                event_id,
                due,
                ..Default::default()
            };
            if let Err(e) = self.run_event(event_id, now, limiter, &mut outcome) {
                warn!(event_id, error = %e, retryable = e.is_retryable(), "事件处理失败，继续下一事件");
                outcome.error = Some(e.to_string());
            }
            events.push(outcome);
        }

        let report = PassReport {
            pass_id,
            campaign_id,
            now,
            events,
            campaign_limit_remaining: limiter.campaign_limit_remaining(),
        };
        info!(
            executed = report.total_executed(),
            failed_events = report.failed_events().count(),
            "调度过程完成"
        );
        Ok(report)
    }

    fn run_event(
        &self,
        event_id: i64,
        now: NaiveDateTime,
        limiter: &mut ContactLimiter,
        outcome: &mut EventPassOutcome,
    ) -> SchedulerResult<()> {
        loop {
            let batch_cap = limiter.effective_limit();
            let batch = self.selector.select_due(event_id, now, limiter)?;
            if batch.is_empty() {
                return Ok(());
            }
            outcome.selected += batch.len();

            for log in &batch {
                match self.selector.mark_executed(log.id, now) {
                    Ok(()) => match self.executor.execute(log) {
                        Ok(()) => outcome.executed += 1,
                        Err(reason) => {
                            warn!(log_id = log.id, %reason, "执行失败");
                            outcome.failed += 1;
                        }
                    },
                    Err(SchedulerError::StaleSelection { .. }) => outcome.stale += 1,
                    Err(e) => return Err(e),
                }
            }

            // 未设上限时一次已取尽；不足一批说明没有更多记录
            match batch_cap {
                Some(cap) if batch.len() >= cap => continue,
                _ => return Ok(()),
            }
        }
    }
}
