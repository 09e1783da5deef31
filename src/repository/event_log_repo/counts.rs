use super::core::EventLogRepository;
use super::filters::{ChartOptions, DueCountFilter, LogCountOptions};
use super::queries::current_rotation_predicate;
use crate::db::format_timestamp;
use crate::domain::event_log::PathCounts;
use crate::domain::types::PathOutcome;
use crate::repository::error::RepositoryResult;
use crate::repository::query_builder::{Predicate, SqlQueryBuilder};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Result as SqliteResult};
use std::collections::BTreeMap;

impl EventLogRepository {
    // ==========================================
    // 统计查询
    // ==========================================

    /// 到期记录数（按事件分组）
    ///
    /// 与 `find_due` 同一口径，但不限制条数
    pub fn count_grouped_by_event(
        &self,
        campaign_id: i64,
        now: NaiveDateTime,
        filter: &DueCountFilter,
    ) -> RepositoryResult<BTreeMap<i64, u64>> {
        let conn = self.get_conn()?;

        let (sql, values) =
            SqlQueryBuilder::new("SELECT o.event_id, COUNT(*) FROM campaign_event_log o")
                .join("INNER JOIN campaigns c ON c.id = o.campaign_id")
                .where_clause(Predicate::eq("o.campaign_id", campaign_id))
                .where_clause(Predicate::eq("o.is_scheduled", 1_i64))
                .where_clause(Predicate::lte("o.trigger_date", format_timestamp(&now)))
                .and_if(filter.published_only.then(|| Predicate::eq("c.is_published", 1_i64)))
                .where_clause(current_rotation_predicate("o"))
                .and_all(filter.scope.predicates("o.contact_id"))
                .group_by("o.event_id")
                .build();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .map(|(event_id, count)| (event_id, count.max(0) as u64))
            .collect())
    }

    /// 活动日志计数（按事件），排除“否”分支
    pub fn campaign_log_counts(
        &self,
        campaign_id: i64,
        options: &LogCountOptions,
    ) -> RepositoryResult<BTreeMap<i64, u64>> {
        let conn = self.get_conn()?;

        let (sql, values) = log_count_builder(
            campaign_id,
            options,
            "SELECT o.event_id, COUNT(o.contact_id) FROM campaign_event_log o",
        )
        .where_clause(Predicate::any_of(vec![
            Predicate::is_null("o.non_action_path_taken"),
            Predicate::eq("o.non_action_path_taken", 0_i64),
        ]))
        .group_by("o.event_id")
        .build();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .map(|(event_id, count)| (event_id, count.max(0) as u64))
            .collect())
    }

    /// 活动日志计数（按事件 + 路径拆分）
    ///
    /// non_action_path_taken 为 NULL 与 0 同属“是”分支
    pub fn campaign_log_counts_by_path(
        &self,
        campaign_id: i64,
        options: &LogCountOptions,
    ) -> RepositoryResult<BTreeMap<i64, PathCounts>> {
        let conn = self.get_conn()?;

        let (sql, values) = log_count_builder(
            campaign_id,
            options,
            "SELECT o.event_id, COALESCE(o.non_action_path_taken, 0) AS negative, COUNT(o.contact_id) \
             FROM campaign_event_log o",
        )
        .group_by("o.event_id, COALESCE(o.non_action_path_taken, 0)")
        .build();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut out: BTreeMap<i64, PathCounts> = BTreeMap::new();
        for (event_id, negative, count) in rows {
            out.entry(event_id)
                .or_default()
                .add(PathOutcome::from_non_action_flag(Some(negative)), count.max(0) as u64);
        }
        Ok(out)
    }

    /// 按天统计触发次数（date_triggered），区间内无记录的日期补 0
    pub fn triggered_time_series(
        &self,
        options: &ChartOptions,
    ) -> RepositoryResult<BTreeMap<NaiveDate, u64>> {
        let mut series = BTreeMap::new();
        let last_day = options.date_to.date();
        let mut day = options.date_from.date();
        while day <= last_day {
            series.insert(day, 0);
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        if series.is_empty() {
            return Ok(series);
        }

        let conn = self.get_conn()?;
        let (sql, values) = SqlQueryBuilder::new(
            "SELECT substr(o.date_triggered, 1, 10), COUNT(o.id) FROM campaign_event_log o",
        )
        .join("INNER JOIN campaign_events e ON e.id = o.event_id")
        .and_all(options.predicates())
        .where_clause(Predicate::between(
            "o.date_triggered",
            format_timestamp(&options.date_from),
            format_timestamp(&options.date_to),
        ))
        .group_by("substr(o.date_triggered, 1, 10)")
        .build();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let raw: String = row.get(0)?;
                let day = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok((day, row.get::<_, i64>(1)?))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        for (day, count) in rows {
            *series.entry(day).or_insert(0) += count.max(0) as u64;
        }
        Ok(series)
    }
}

/// 活动日志计数的公共条件
///
/// - 成员关联: 未手动移除 + 轮次一致；include_non_members 时改为 LEFT JOIN
/// - 失败日志始终排除
fn log_count_builder(campaign_id: i64, options: &LogCountOptions, select: &str) -> SqlQueryBuilder {
    let join_kind = if options.include_non_members {
        "LEFT JOIN"
    } else {
        "INNER JOIN"
    };

    SqlQueryBuilder::new(select)
        .join_with(Predicate::raw(
            format!(
                "{} campaign_members l ON l.campaign_id = ? AND l.manually_removed = 0 \
                 AND l.contact_id = o.contact_id AND l.rotation = o.rotation",
                join_kind
            ),
            vec![Value::Integer(campaign_id)],
        ))
        .where_clause(Predicate::eq("o.campaign_id", campaign_id))
        .and_if(options.event_id.map(|id| Predicate::eq("o.event_id", id)))
        .and_if(
            options
                .exclude_scheduled
                .then(|| Predicate::eq("o.is_scheduled", 0_i64)),
        )
        .where_clause(options.failed_exclusion("o"))
        .and_if(options.date_range.map(|(from, to)| {
            Predicate::between(
                "o.date_triggered",
                format_timestamp(&from),
                format_timestamp(&to),
            )
        }))
}
