// ==========================================
// 营销活动事件调度 - 配置层
// ==========================================
// 职责: 调度配置管理（批量上限、活动预算、线程数、发布过滤）
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod scheduler_config;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager, ConfigResult};
pub use scheduler_config::{SchedulerConfig, SchedulerConfigReader};

use std::path::PathBuf;

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "CAMPAIGN_SCHEDULER_DB_PATH";

/// 默认数据库路径
///
/// 优先级: 环境变量 > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./campaign_scheduler.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("campaign-event-scheduler");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("campaign_scheduler.db");
        }
    }

    path.to_string_lossy().to_string()
}
