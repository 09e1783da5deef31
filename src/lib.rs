// ==========================================
// 营销活动事件调度 - 核心库
// ==========================================
// 职责: 选出到期的联系人事件调度记录，按联系人限制器
//       控制批量与预算，并支持附原因的取消调度
// 技术栈: Rust + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 选择器 / 限制器 / 调度过程
pub mod engine;

// 配置层 - 调度配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{EventType, PathOutcome};

// 领域实体
pub use domain::{
    Campaign, CampaignEvent, CampaignEventLog, CampaignMember, ContactLogView, FailedLogEntry,
    PathCounts, UpcomingEvent,
};

// 仓储
pub use repository::{CampaignRepository, EventLogRepository, RepositoryError};

// 引擎
pub use engine::{
    ContactLimiter, EventStore, PassReport, ScheduledEventSelector, SchedulerError,
    SchedulingPass,
};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
