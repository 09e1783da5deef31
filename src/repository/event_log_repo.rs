// ==========================================
// 营销活动事件调度 - 事件日志数据仓储
// ==========================================
// 对齐: campaign_event_log / campaign_event_failed_log 表
// 红线: 所有动态条件走参数绑定
// ==========================================

mod core;
mod counts;
pub mod filters;
mod queries;


pub use self::core::EventLogRepository;
pub use filters::{
    ChartOptions, ContactLogOptions, ContactScope, DueCountFilter, DueQuery, LogCountOptions,
    ThreadPartition, UpcomingOptions, ViewerContext,
};
