// ==========================================
// 营销活动事件调度 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少调度批次并发写入时的偶发 busy 错误
// - 统一时间戳文本格式（UTC, "YYYY-MM-DD HH:MM:SS"），保证字符串比较即时间比较
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 数据库时间戳格式（UTC）
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存库并建表（单元测试 / 演示用）
pub fn open_in_memory_with_schema() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 建表（幂等）
///
/// 表结构:
/// - campaigns / campaign_events / campaign_members: 活动、事件、成员（含当前轮次）
/// - campaign_event_log: 每个联系人每个事件的调度记录
/// - campaign_event_failed_log: 取消调度原因（每个 log_id 至多一条）
/// - config_kv: 调度配置
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS campaigns (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            is_published INTEGER NOT NULL DEFAULT 0,
            created_by INTEGER
        );

        CREATE TABLE IF NOT EXISTS campaign_events (
            id INTEGER PRIMARY KEY,
            campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT,
            event_type TEXT NOT NULL,
            type_key TEXT NOT NULL,
            channel TEXT,
            channel_id INTEGER
        );

        CREATE TABLE IF NOT EXISTS campaign_members (
            campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            contact_id INTEGER NOT NULL,
            rotation INTEGER NOT NULL DEFAULT 1,
            manually_removed INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (campaign_id, contact_id)
        );

        CREATE TABLE IF NOT EXISTS campaign_event_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contact_id INTEGER NOT NULL,
            campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            event_id INTEGER NOT NULL REFERENCES campaign_events(id) ON DELETE CASCADE,
            rotation INTEGER NOT NULL DEFAULT 1,
            is_scheduled INTEGER NOT NULL DEFAULT 0,
            trigger_date TEXT,
            date_triggered TEXT,
            non_action_path_taken INTEGER,
            channel TEXT,
            channel_id INTEGER,
            metadata TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_event_log_due
            ON campaign_event_log (event_id, is_scheduled, trigger_date);
        CREATE INDEX IF NOT EXISTS idx_event_log_member
            ON campaign_event_log (contact_id, campaign_id, rotation);

        CREATE TABLE IF NOT EXISTS campaign_event_failed_log (
            log_id INTEGER PRIMARY KEY REFERENCES campaign_event_log(id) ON DELETE CASCADE,
            date_added TEXT NOT NULL,
            reason TEXT
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 时间戳 -> 数据库文本
///
/// 精度为整秒，小数秒直接截断；到期判定因此按秒比较
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// 数据库文本 -> 时间戳
///
/// 兼容 SQLite `datetime('now')` 输出与带小数秒的写法
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}
