use crate::db::{format_timestamp, open_sqlite_connection, parse_timestamp};
use crate::domain::event_log::{CampaignEventLog, FailedLogEntry};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::query_builder::Predicate;
use chrono::NaiveDateTime;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use tracing::debug;

// ==========================================
// EventLogRepository - 活动事件日志仓储
// ==========================================
// 红线: Repository 不做调度决策,只做数据映射
pub struct EventLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EventLogRepository {
    /// 创建新的事件日志仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 按数据库路径创建（应用统一 PRAGMA）
    pub fn from_path(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// 获取数据库连接
    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入调度记录，返回数据库分配的 id
    pub fn insert(&self, log: &CampaignEventLog) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        insert_log(&conn, log)?;
        Ok(conn.last_insert_rowid())
    }

    /// 批量插入调度记录（单事务）
    pub fn batch_insert(&self, logs: &[CampaignEventLog]) -> RepositoryResult<Vec<i64>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut ids = Vec::with_capacity(logs.len());
        for log in logs {
            insert_log(&tx, log)?;
            ids.push(tx.last_insert_rowid());
        }

        tx.commit()?;
        Ok(ids)
    }

    /// 批量设置 is_scheduled
    ///
    /// # 返回
    /// - Ok(rows): 被更新的行数
    pub fn set_scheduled(&self, ids: &[i64], scheduled: bool) -> RepositoryResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.get_conn()?;
        let id_filter = Predicate::in_list("id", ids);
        let sql = format!(
            "UPDATE campaign_event_log SET is_scheduled = ? WHERE {}",
            id_filter.sql()
        );
        let mut values = vec![rusqlite::types::Value::Integer(i64::from(scheduled))];
        values.extend(id_filter.params().iter().cloned());
        let rows = conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(rows)
    }

    /// 写入（或覆盖）取消原因；每个 log_id 至多一条
    pub fn upsert_failed_log(
        &self,
        log_id: i64,
        date_added: NaiveDateTime,
        reason: &str,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO campaign_event_failed_log (log_id, date_added, reason)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(log_id) DO UPDATE SET
                date_added = excluded.date_added,
                reason = excluded.reason
            "#,
            params![log_id, format_timestamp(&date_added), reason],
        )?;
        Ok(())
    }

    /// 查询取消原因
    pub fn find_failed_log(&self, log_id: i64) -> RepositoryResult<Option<FailedLogEntry>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT log_id, date_added, reason FROM campaign_event_failed_log WHERE log_id = ?1",
                params![log_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((log_id, date_added_str, reason)) => {
                let date_added = parse_timestamp(&date_added_str).ok_or_else(|| {
                    RepositoryError::FieldValueError {
                        field: "date_added".to_string(),
                        message: date_added_str.clone(),
                    }
                })?;
                Ok(Some(FailedLogEntry {
                    log_id,
                    date_added,
                    reason,
                }))
            }
            None => Ok(None),
        }
    }

    /// 取消某成员（联系人 + 活动 + 轮次）的全部待执行记录并记录原因
    ///
    /// 两步在同一事务内完成:
    /// 1) 为每条 is_scheduled = 1 的记录 upsert 失败日志
    ///    （此前已因取消而挂有失败日志、且从未触发的记录一并覆盖原因，重复调用保留最新原因）
    /// 2) 将调度中的记录置为 is_scheduled = 0
    ///
    /// 并发读者不会看到“已取消但没有原因”的中间状态。
    ///
    /// # 返回
    /// - Ok(rows): 被取消调度的记录数
    pub fn unschedule_with_reason(
        &self,
        contact_id: i64,
        campaign_id: i64,
        rotation: i64,
        date_added: NaiveDateTime,
        reason: &str,
    ) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let logged = tx.execute(
            r#"
            INSERT INTO campaign_event_failed_log (log_id, date_added, reason)
            SELECT id, ?1, ?2 FROM campaign_event_log
            WHERE contact_id = ?3 AND campaign_id = ?4 AND rotation = ?5
              AND (
                is_scheduled = 1
                OR (date_triggered IS NULL
                    AND id IN (SELECT log_id FROM campaign_event_failed_log))
              )
            ON CONFLICT(log_id) DO UPDATE SET
                date_added = excluded.date_added,
                reason = excluded.reason
            "#,
            params![format_timestamp(&date_added), reason, contact_id, campaign_id, rotation],
        )?;

        let unscheduled = tx.execute(
            r#"
            UPDATE campaign_event_log SET is_scheduled = 0
            WHERE is_scheduled = 1 AND contact_id = ?1 AND campaign_id = ?2 AND rotation = ?3
            "#,
            params![contact_id, campaign_id, rotation],
        )?;

        tx.commit()?;

        debug!(
            contact_id,
            campaign_id, rotation, logged, unscheduled, "已取消成员调度记录"
        );
        Ok(unscheduled)
    }

    /// 抢占执行权: 仅当记录仍处于调度中时置为已执行
    ///
    /// # 返回
    /// - Ok(true): 本次调用完成抢占
    /// - Ok(false): 记录已被执行/取消（或不存在）
    pub fn claim_scheduled(&self, log_id: i64, triggered_at: NaiveDateTime) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE campaign_event_log
            SET is_scheduled = 0, date_triggered = ?1
            WHERE id = ?2 AND is_scheduled = 1
            "#,
            params![format_timestamp(&triggered_at), log_id],
        )?;
        Ok(rows == 1)
    }

    /// 联系人合并: 将 from 的日志迁移到 to
    ///
    /// to 已有日志的事件不迁移，from 上剩余的这些日志直接删除。
    ///
    /// # 返回
    /// - Ok(moved): 迁移的记录数
    pub fn update_contact(&self, from_contact_id: i64, to_contact_id: i64) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let existing: Vec<i64> = {
            let mut stmt =
                tx.prepare("SELECT DISTINCT event_id FROM campaign_event_log WHERE contact_id = ?1")?;
            let rows = stmt.query_map(params![to_contact_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<i64>>>()?
        };

        let not_existing = Predicate::not_in_list("event_id", &existing);
        let sql = format!(
            "UPDATE campaign_event_log SET contact_id = ? WHERE contact_id = ? AND {}",
            not_existing.sql()
        );
        let mut values = vec![
            rusqlite::types::Value::Integer(to_contact_id),
            rusqlite::types::Value::Integer(from_contact_id),
        ];
        values.extend(not_existing.params().iter().cloned());
        let moved = tx.execute(&sql, params_from_iter(values.iter()))?;

        let removed = if existing.is_empty() {
            0
        } else {
            tx.execute(
                "DELETE FROM campaign_event_log WHERE contact_id = ?1",
                params![from_contact_id],
            )?
        };

        tx.commit()?;

        debug!(from_contact_id, to_contact_id, moved, removed, "联系人日志已合并");
        Ok(moved)
    }

    /// 删除某事件的全部日志（失败日志随外键级联删除）
    pub fn remove_event_logs(&self, event_id: i64) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "DELETE FROM campaign_event_log WHERE event_id = ?1",
            params![event_id],
        )?;
        Ok(rows)
    }
}

fn insert_log(conn: &Connection, log: &CampaignEventLog) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO campaign_event_log (
            contact_id, campaign_id, event_id, rotation, is_scheduled,
            trigger_date, date_triggered, non_action_path_taken,
            channel, channel_id, metadata
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            log.contact_id,
            log.campaign_id,
            log.event_id,
            log.rotation,
            log.is_scheduled,
            log.trigger_date.as_ref().map(format_timestamp),
            log.date_triggered.as_ref().map(format_timestamp),
            log.non_action_path_taken,
            log.channel,
            log.channel_id,
            log.metadata.as_ref().map(|v| v.to_string()),
        ],
    )?;
    Ok(())
}
