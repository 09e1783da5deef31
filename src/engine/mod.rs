// ==========================================
// 营销活动事件调度 - 引擎层
// ==========================================
// 职责: 到期记录选择、联系人限制、单次调度过程
// 红线: Engine 不拼 SQL, 数据访问统一经 EventStore
// ==========================================

pub mod contact_limiter;
pub mod error;
pub mod event_store;
pub mod pass;
pub mod selector;

// 重导出核心引擎
pub use contact_limiter::{ContactLimiter, ContactLimiterBuilder};
pub use error::{SchedulerError, SchedulerResult};
pub use event_store::EventStore;
pub use pass::{EventExecutor, EventPassOutcome, NoOpExecutor, PassReport, SchedulingPass};
pub use selector::ScheduledEventSelector;
