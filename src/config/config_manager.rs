// ==========================================
// 营销活动事件调度 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写、快照
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::scheduler_config::{SchedulerConfig, SchedulerConfigReader};
use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard};

pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> ConfigResult<MutexGuard<'_, Connection>> {
        Ok(self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?)
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value) VALUES (?1, ?2, ?3)
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now')
            "#,
            params![GLOBAL_SCOPE, key, value],
        )?;
        Ok(())
    }

    /// 删除 global scope 的配置值（恢复默认）
    pub fn remove_global_config_value(&self, key: &str) -> ConfigResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "DELETE FROM config_kv WHERE scope_id = ?1 AND key = ?2",
            params![GLOBAL_SCOPE, key],
        )?;
        Ok(rows > 0)
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> ConfigResult<String> {
        Ok(self
            .get_global_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 获取所有 global 配置的快照（JSON 对象，键有序）
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.get_conn()?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let config_map = stmt
            .query_map(params![GLOBAL_SCOPE], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;

        Ok(serde_json::to_string(&config_map)?)
    }

    /// 从配置快照恢复配置
    ///
    /// # 返回
    /// - Ok(usize): 恢复的配置项数量
    ///
    /// # 注意
    /// - 覆盖同名 global 配置；快照外的配置保持不变
    /// - `__meta_` 前缀的键只作说明，不回写
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> ConfigResult<usize> {
        let config_map: BTreeMap<String, String> = serde_json::from_str(snapshot_json)?;

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut count = 0;
        for (key, value) in config_map.iter() {
            if key.starts_with("__meta_") {
                continue;
            }
            count += tx.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value",
                params![GLOBAL_SCOPE, key, value],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }

    /// 可选的非负整数配置；缺省、空串、0 或非法值均视为“不限制”
    fn get_optional_limit(&self, key: &str) -> ConfigResult<Option<usize>> {
        let value = self.get_config_or_default(key, "")?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        match trimmed.parse::<usize>() {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(n)),
            Err(_) => {
                tracing::warn!(config_key = key, raw_value = %value, "配置值不是非负整数，按不限制处理");
                Ok(None)
            }
        }
    }
}

// ==========================================
// SchedulerConfigReader Trait 实现
// ==========================================
#[async_trait]
impl SchedulerConfigReader for ConfigManager {
    async fn get_batch_limit(&self) -> ConfigResult<Option<usize>> {
        match self.get_global_config_value(config_keys::SCHEDULER_BATCH_LIMIT)? {
            // 未配置时使用默认批量
            None => Ok(Some(SchedulerConfig::DEFAULT_BATCH_LIMIT)),
            Some(_) => self.get_optional_limit(config_keys::SCHEDULER_BATCH_LIMIT),
        }
    }

    async fn get_campaign_limit(&self) -> ConfigResult<Option<usize>> {
        self.get_optional_limit(config_keys::SCHEDULER_CAMPAIGN_LIMIT)
    }

    async fn get_max_threads(&self) -> ConfigResult<u32> {
        let value = self.get_config_or_default(config_keys::SCHEDULER_MAX_THREADS, "1")?;
        Ok(value.trim().parse::<u32>().ok().filter(|&n| n >= 1).unwrap_or(1))
    }

    async fn get_published_only(&self) -> ConfigResult<bool> {
        let value = self.get_config_or_default(config_keys::SCHEDULER_PUBLISHED_ONLY, "true")?;
        match value.trim().to_ascii_lowercase().as_str() {
            "false" | "0" | "no" => Ok(false),
            _ => Ok(true),
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 单次选择的批量上限（0 = 不限制）
    pub const SCHEDULER_BATCH_LIMIT: &str = "scheduler_batch_limit";
    // 每次调度过程的活动预算（缺省 = 不限制）
    pub const SCHEDULER_CAMPAIGN_LIMIT: &str = "scheduler_campaign_limit";
    // 并行调度进程数
    pub const SCHEDULER_MAX_THREADS: &str = "scheduler_max_threads";
    pub const SCHEDULER_PUBLISHED_ONLY: &str = "scheduler_published_only";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_with_schema;

    fn setup_manager() -> ConfigManager {
        let conn = open_in_memory_with_schema().unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_when_unset() {
        let manager = setup_manager();
        let config = manager.load_scheduler_config().await.unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.batch_limit, Some(SchedulerConfig::DEFAULT_BATCH_LIMIT));
        assert_eq!(config.campaign_limit, None);
        assert_eq!(config.max_threads, 1);
        assert!(config.published_only);
    }

    #[tokio::test]
    async fn test_overrides_are_read() {
        let manager = setup_manager();
        manager
            .set_global_config_value(config_keys::SCHEDULER_BATCH_LIMIT, "25")
            .unwrap();
        manager
            .set_global_config_value(config_keys::SCHEDULER_CAMPAIGN_LIMIT, "500")
            .unwrap();
        manager
            .set_global_config_value(config_keys::SCHEDULER_MAX_THREADS, "4")
            .unwrap();
        manager
            .set_global_config_value(config_keys::SCHEDULER_PUBLISHED_ONLY, "false")
            .unwrap();

        let config = manager.load_scheduler_config().await.unwrap();
        assert_eq!(config.batch_limit, Some(25));
        assert_eq!(config.campaign_limit, Some(500));
        assert_eq!(config.max_threads, 4);
        assert!(!config.published_only);
    }

    #[tokio::test]
    async fn test_zero_and_invalid_limits_mean_unbounded() {
        let manager = setup_manager();
        manager
            .set_global_config_value(config_keys::SCHEDULER_BATCH_LIMIT, "0")
            .unwrap();
        manager
            .set_global_config_value(config_keys::SCHEDULER_CAMPAIGN_LIMIT, "lots")
            .unwrap();
        manager
            .set_global_config_value(config_keys::SCHEDULER_MAX_THREADS, "0")
            .unwrap();

        assert_eq!(manager.get_batch_limit().await.unwrap(), None);
        assert_eq!(manager.get_campaign_limit().await.unwrap(), None);
        assert_eq!(manager.get_max_threads().await.unwrap(), 1);
    }

    #[test]
    fn test_snapshot_and_restore() {
        let manager = setup_manager();
        manager
            .set_global_config_value(config_keys::SCHEDULER_BATCH_LIMIT, "10")
            .unwrap();
        let snapshot = manager.get_config_snapshot().unwrap();

        manager
            .set_global_config_value(config_keys::SCHEDULER_BATCH_LIMIT, "99")
            .unwrap();
        let restored = manager
            .restore_config_from_snapshot(&format!(
                r#"{{"__meta_label":"before change",{}"#,
                &snapshot[1..]
            ))
            .unwrap();
        assert_eq!(restored, 1);
        assert_eq!(
            manager
                .get_global_config_value(config_keys::SCHEDULER_BATCH_LIMIT)
                .unwrap()
                .as_deref(),
            Some("10")
        );
        assert!(manager.get_global_config_value("__meta_label").unwrap().is_none());
    }

    #[test]
    fn test_remove_restores_default() {
        let manager = setup_manager();
        manager
            .set_global_config_value(config_keys::SCHEDULER_MAX_THREADS, "3")
            .unwrap();
        assert!(manager
            .remove_global_config_value(config_keys::SCHEDULER_MAX_THREADS)
            .unwrap());
        assert!(!manager
            .remove_global_config_value(config_keys::SCHEDULER_MAX_THREADS)
            .unwrap());
        assert!(manager
            .get_global_config_value(config_keys::SCHEDULER_MAX_THREADS)
            .unwrap()
            .is_none());
    }
}
