// ==========================================
// 营销活动事件调度 - 领域模型层
// ==========================================
// 职责: 定义活动、事件、调度记录等领域实体
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod campaign;
pub mod event_log;
pub mod types;

// 重导出核心类型
pub use campaign::{Campaign, CampaignEvent, CampaignMember};
pub use event_log::{
    CampaignEventLog, ContactLogView, FailedLogEntry, PathCounts, UpcomingEvent,
};
pub use types::{EventType, PathOutcome};
