use super::core::EventLogRepository;
use super::filters::{ContactLogOptions, DueQuery, UpcomingOptions, ViewerContext};
use crate::db::{format_timestamp, parse_timestamp};
use crate::domain::event_log::{CampaignEventLog, ContactLogView, UpcomingEvent};
use crate::domain::types::EventType;
use crate::repository::error::RepositoryResult;
use crate::repository::query_builder::{Predicate, SqlQueryBuilder};
use chrono::NaiveDateTime;
use rusqlite::{params, params_from_iter, OptionalExtension, Result as SqliteResult, Row};
use std::collections::HashMap;

/// 调度记录标准列（别名 o）
pub(super) const LOG_COLUMNS: &str = "o.id, o.contact_id, o.campaign_id, o.event_id, o.rotation, \
     o.is_scheduled, o.trigger_date, o.date_triggered, o.non_action_path_taken, \
     o.channel, o.channel_id, o.metadata";

/// 联系人已进入新轮次时，旧轮次记录不再生效
pub(super) fn current_rotation_predicate(log_alias: &str) -> Predicate {
    Predicate::raw(
        format!(
            "NOT EXISTS (SELECT 1 FROM campaign_members m \
             WHERE m.campaign_id = {a}.campaign_id AND m.contact_id = {a}.contact_id \
             AND m.rotation != {a}.rotation)",
            a = log_alias
        ),
        Vec::new(),
    )
}

impl EventLogRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 按 id 查询单条记录
    pub fn find_by_id(&self, log_id: i64) -> RepositoryResult<Option<CampaignEventLog>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM campaign_event_log o WHERE o.id = ?1", LOG_COLUMNS);
        let log = conn
            .query_row(&sql, params![log_id], map_log_row)
            .optional()?;
        Ok(log)
    }

    /// 事件是否存在
    pub fn event_exists(&self, event_id: i64) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM campaign_events WHERE id = ?1",
                params![event_id],
                |_row| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(found)
    }

    /// 查询到期记录
    ///
    /// 条件: 事件匹配 + 调度中 + trigger_date <= now + (活动已发布) + 当前轮次 + 联系人范围
    /// 排序: id 升序（稳定的批次切分）
    pub fn find_due(&self, query: &DueQuery) -> RepositoryResult<Vec<CampaignEventLog>> {
        let conn = self.get_conn()?;

        let (sql, values) = SqlQueryBuilder::new(&format!(
            "SELECT {} FROM campaign_event_log o",
            LOG_COLUMNS
        ))
        .join("INNER JOIN campaigns c ON c.id = o.campaign_id")
        .where_clause(Predicate::eq("o.event_id", query.event_id))
        .where_clause(Predicate::eq("o.is_scheduled", 1_i64))
        .where_clause(Predicate::lte("o.trigger_date", format_timestamp(&query.now)))
        .and_if(query.published_only.then(|| Predicate::eq("c.is_published", 1_i64)))
        .where_clause(current_rotation_predicate("o"))
        .and_all(query.scope.predicates("o.contact_id"))
        .order_by("o.id ASC")
        .limit_opt(query.limit)
        .build();

        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params_from_iter(values.iter()), map_log_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(logs)
    }

    /// 按 id 集合查询仍在调度中、且活动已发布的记录
    pub fn find_by_ids(&self, ids: &[i64]) -> RepositoryResult<Vec<CampaignEventLog>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;

        let (sql, values) = SqlQueryBuilder::new(&format!(
            "SELECT {} FROM campaign_event_log o",
            LOG_COLUMNS
        ))
        .join("INNER JOIN campaigns c ON c.id = o.campaign_id")
        .where_clause(Predicate::in_list("o.id", ids))
        .where_clause(Predicate::eq("o.is_scheduled", 1_i64))
        .where_clause(Predicate::eq("c.is_published", 1_i64))
        .order_by("o.id ASC")
        .build();

        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params_from_iter(values.iter()), map_log_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(logs)
    }

    /// 调度记录列表（按活动 / 联系人过滤，id 升序）
    ///
    /// 未指定活动时只返回事件与活动仍存在的记录
    pub fn find_logs(
        &self,
        campaign_id: Option<i64>,
        contact_id: Option<i64>,
    ) -> RepositoryResult<Vec<CampaignEventLog>> {
        let conn = self.get_conn()?;

        let mut builder =
            SqlQueryBuilder::new(&format!("SELECT {} FROM campaign_event_log o", LOG_COLUMNS));
        builder = match campaign_id {
            Some(id) => builder.where_clause(Predicate::eq("o.campaign_id", id)),
            None => builder
                .join("INNER JOIN campaign_events e ON e.id = o.event_id")
                .join("INNER JOIN campaigns c ON c.id = o.campaign_id"),
        };
        let (sql, values) = builder
            .and_if(contact_id.map(|id| Predicate::eq("o.contact_id", id)))
            .order_by("o.id ASC")
            .build();

        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params_from_iter(values.iter()), map_log_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(logs)
    }

    /// 联系人时间线（排除决策类事件）
    ///
    /// `contact_id = None` 时查询全部联系人
    pub fn find_contact_logs(
        &self,
        contact_id: Option<i64>,
        options: &ContactLogOptions,
    ) -> RepositoryResult<Vec<ContactLogView>> {
        let conn = self.get_conn()?;

        let scheduled_filter = options.scheduled_state.map(|state| {
            if state {
                // 包含已取消（未触发）的记录
                Predicate::any_of(vec![
                    Predicate::eq("o.is_scheduled", 1_i64),
                    Predicate::all_of(vec![
                        Predicate::eq("o.is_scheduled", 0_i64),
                        Predicate::is_null("o.date_triggered"),
                    ]),
                ])
            } else {
                Predicate::eq("o.is_scheduled", 0_i64)
            }
        });

        let search_filter = options
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|needle| {
                Predicate::contains_any(
                    &["e.name", "e.description", "c.name", "c.description"],
                    needle,
                )
            });

        let mut builder = SqlQueryBuilder::new(
            "SELECT o.id, o.contact_id, o.event_id, o.campaign_id, e.name, e.description, \
             c.name, c.description, e.type_key, o.is_scheduled, o.trigger_date, o.date_triggered, \
             o.channel, o.channel_id, o.metadata, fl.reason \
             FROM campaign_event_log o",
        )
        .join("INNER JOIN campaign_events e ON e.id = o.event_id")
        .join("INNER JOIN campaigns c ON c.id = o.campaign_id")
        .join("LEFT JOIN campaign_event_failed_log fl ON fl.log_id = o.id")
        .where_clause(Predicate::ne("e.event_type", EventType::Decision.as_str().to_string()))
        .and_if(contact_id.map(|id| Predicate::eq("o.contact_id", id)))
        .and_if(scheduled_filter)
        .and_if(search_filter)
        .order_by("o.date_triggered DESC, o.id DESC")
        .limit_opt(options.limit);
        if let Some(offset) = options.offset {
            builder = builder.offset(offset);
        }
        let (sql, values) = builder.build();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(ContactLogView {
                    log_id: row.get(0)?,
                    contact_id: row.get(1)?,
                    event_id: row.get(2)?,
                    campaign_id: row.get(3)?,
                    event_name: row.get(4)?,
                    event_description: row.get(5)?,
                    campaign_name: row.get(6)?,
                    campaign_description: row.get(7)?,
                    type_key: row.get(8)?,
                    is_scheduled: row.get(9)?,
                    trigger_date: opt_timestamp(row, 10)?,
                    date_triggered: opt_timestamp(row, 11)?,
                    channel: row.get(12)?,
                    channel_id: row.get(13)?,
                    metadata: opt_json(row, 14)?,
                    fail_reason: row.get(15)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(rows)
    }

    /// 即将执行的事件（按 trigger_date 升序）
    pub fn find_upcoming(
        &self,
        options: &UpcomingOptions,
        viewer: &ViewerContext,
    ) -> RepositoryResult<Vec<UpcomingEvent>> {
        let conn = self.get_conn()?;

        let event_type_filter = (!options.event_types.is_empty()).then(|| {
            let types: Vec<String> = options
                .event_types
                .iter()
                .map(|t| t.as_str().to_string())
                .collect();
            Predicate::in_list("e.event_type", &types)
        });

        let (sql, values) = SqlQueryBuilder::new(
            "SELECT o.id, o.event_id, o.campaign_id, o.contact_id, o.trigger_date, \
             e.name, e.description, c.name, c.description, o.metadata \
             FROM campaign_event_log o",
        )
        .join("LEFT JOIN campaign_events e ON e.id = o.event_id")
        .join("LEFT JOIN campaigns c ON c.id = e.campaign_id")
        .where_clause(Predicate::eq("o.is_scheduled", 1_i64))
        .and_if(options.contact_id.map(|id| Predicate::eq("o.contact_id", id)))
        .and_if(
            options
                .type_key
                .clone()
                .map(|key| Predicate::eq("e.type_key", key)),
        )
        .and_if(event_type_filter)
        .and_if(viewer.predicate("c.created_by"))
        .order_by("o.trigger_date ASC, o.id ASC")
        .limit(options.limit.unwrap_or(UpcomingOptions::DEFAULT_LIMIT))
        .build();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(UpcomingEvent {
                    log_id: row.get(0)?,
                    event_id: row.get(1)?,
                    campaign_id: row.get(2)?,
                    contact_id: row.get(3)?,
                    trigger_date: opt_timestamp(row, 4)?,
                    event_name: row.get(5)?,
                    event_description: row.get(6)?,
                    campaign_name: row.get(7)?,
                    campaign_description: row.get(8)?,
                    metadata: opt_json(row, 9)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(rows)
    }

    /// 已执行日期: contact_id -> date_triggered（仍在调度中的联系人不返回）
    pub fn dates_executed(
        &self,
        event_id: i64,
        contact_ids: &[i64],
    ) -> RepositoryResult<HashMap<i64, NaiveDateTime>> {
        if contact_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.get_conn()?;

        let (sql, values) = SqlQueryBuilder::new(
            "SELECT o.contact_id, o.date_triggered, o.is_scheduled FROM campaign_event_log o",
        )
        .where_clause(Predicate::eq("o.event_id", event_id))
        .where_clause(Predicate::in_list("o.contact_id", contact_ids))
        .order_by("o.id ASC")
        .build();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    opt_timestamp(row, 1)?,
                    row.get::<_, bool>(2)?,
                ))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut dates = HashMap::new();
        for (contact_id, date_triggered, is_scheduled) in rows {
            match (is_scheduled, date_triggered) {
                (false, Some(ts)) => {
                    dates.insert(contact_id, ts);
                }
                _ => {
                    dates.remove(&contact_id);
                }
            }
        }
        Ok(dates)
    }

    /// 最早的触发时间
    pub fn oldest_triggered_date(&self) -> RepositoryResult<Option<NaiveDateTime>> {
        let conn = self.get_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT MIN(date_triggered) FROM campaign_event_log WHERE date_triggered IS NOT NULL",
                [],
                |row| row.get(0),
            )?;
        Ok(raw.as_deref().and_then(parse_timestamp))
    }

    /// 联系人是否已参与过指定活动轮次
    pub fn has_been_in_campaign_rotation(
        &self,
        contact_id: i64,
        campaign_id: i64,
        rotation: i64,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row(
                r#"
                SELECT 1 FROM campaign_event_log
                WHERE contact_id = ?1 AND campaign_id = ?2 AND rotation = ?3
                LIMIT 1
                "#,
                params![contact_id, campaign_id, rotation],
                |_row| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(found)
    }
}

// ==========================================
// 行映射
// ==========================================

pub(super) fn map_log_row(row: &Row) -> SqliteResult<CampaignEventLog> {
    Ok(CampaignEventLog {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        campaign_id: row.get(2)?,
        event_id: row.get(3)?,
        rotation: row.get(4)?,
        is_scheduled: row.get(5)?,
        trigger_date: opt_timestamp(row, 6)?,
        date_triggered: opt_timestamp(row, 7)?,
        non_action_path_taken: row.get(8)?,
        channel: row.get(9)?,
        channel_id: row.get(10)?,
        metadata: opt_json(row, 11)?,
    })
}

/// 可空时间戳列；格式非法时报转换错误（不静默吞掉）
fn opt_timestamp(row: &Row, idx: usize) -> SqliteResult<Option<NaiveDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_timestamp(&s).map(Some).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                format!("无效时间戳: {}", s).into(),
            )
        }),
    }
}

/// JSON 文本列；解析失败视为空
fn opt_json(row: &Row, idx: usize) -> SqliteResult<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}
