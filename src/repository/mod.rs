// ==========================================
// 营销活动事件调度 - 数据仓储层
// ==========================================
// 红线: Repository 不含调度逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod campaign_repo;
pub mod error;
pub mod event_log_repo;
pub mod query_builder;

// 重导出核心仓储
pub use campaign_repo::CampaignRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use event_log_repo::{
    ChartOptions, ContactLogOptions, ContactScope, DueCountFilter, DueQuery, EventLogRepository,
    LogCountOptions, ThreadPartition, UpcomingOptions, ViewerContext,
};
pub use query_builder::{Predicate, SqlQueryBuilder};
