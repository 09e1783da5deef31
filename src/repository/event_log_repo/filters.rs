// ==========================================
// 事件日志查询条件
// ==========================================
// 职责: 把调用方的过滤意图转换为可组合谓词
// 说明: 调度语义（预算、批量）由 engine 层决定，这里只描述“查什么”
// ==========================================

use crate::db::format_timestamp;
use crate::domain::types::EventType;
use crate::repository::query_builder::Predicate;
use chrono::NaiveDateTime;
use rusqlite::types::Value;

/// 线程分片: 多个调度进程按 contact_id 取模分担同一事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPartition {
    pub thread_id: u32,   // 1..=max_threads
    pub max_threads: u32,
}

/// 联系人范围
///
/// 优先级: 单个联系人 > 显式列表 > 区间；线程分片与以上条件叠加
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactScope {
    pub contact_id: Option<i64>,
    pub contact_ids: Vec<i64>,
    pub min_contact_id: Option<i64>,
    pub max_contact_id: Option<i64>,
    pub thread: Option<ThreadPartition>,
}

impl ContactScope {
    /// 生成作用在 `column`（联系人列）上的谓词
    pub fn predicates(&self, column: &str) -> Vec<Predicate> {
        let mut out = Vec::new();

        if let Some(id) = self.contact_id {
            out.push(Predicate::eq(column, id));
        } else if !self.contact_ids.is_empty() {
            out.push(Predicate::in_list(column, &self.contact_ids));
        } else {
            match (self.min_contact_id, self.max_contact_id) {
                (Some(min), Some(max)) => out.push(Predicate::between(column, min, max)),
                (Some(min), None) => out.push(Predicate::gte(column, min)),
                (None, Some(max)) => out.push(Predicate::lte(column, max)),
                (None, None) => {}
            }
        }

        if let Some(part) = self.thread {
            out.push(Predicate::raw(
                format!("(({} + ?) % ?) = 0", column),
                vec![
                    Value::Integer(i64::from(part.thread_id) - 1),
                    Value::Integer(i64::from(part.max_threads)),
                ],
            ));
        }

        out
    }
}

/// 到期查询参数
#[derive(Debug, Clone, PartialEq)]
pub struct DueQuery {
    pub event_id: i64,
    pub now: NaiveDateTime,
    pub limit: Option<usize>,
    pub published_only: bool,
    pub scope: ContactScope,
}

/// 到期计数（按事件分组）的过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueCountFilter {
    pub published_only: bool,
    pub scope: ContactScope,
}

/// 联系人时间线查询选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactLogOptions {
    /// Some(true): 已调度或已取消（未触发）; Some(false): 仅 is_scheduled = 0
    pub scheduled_state: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// 即将执行事件查询选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpcomingOptions {
    pub contact_id: Option<i64>,
    pub type_key: Option<String>,
    pub event_types: Vec<EventType>,
    pub limit: Option<usize>,
}

impl UpcomingOptions {
    pub const DEFAULT_LIMIT: usize = 10;
}

/// 调用方身份（显式传入，不依赖全局“当前用户”）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewerContext {
    pub user_id: Option<i64>,
    pub can_view_others: bool,
}

impl ViewerContext {
    /// 不做可见性限制
    pub fn unrestricted() -> Self {
        Self {
            user_id: None,
            can_view_others: true,
        }
    }

    pub fn owner(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            can_view_others: false,
        }
    }

    /// 仅本人创建的活动
    pub fn predicate(&self, created_by_column: &str) -> Option<Predicate> {
        match (self.can_view_others, self.user_id) {
            (false, Some(uid)) => Some(Predicate::eq(created_by_column, uid)),
            _ => None,
        }
    }
}

/// 活动日志统计选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogCountOptions {
    /// 排除仍在调度中的记录
    pub exclude_scheduled: bool,
    /// true: 包含已不是活动成员（或轮次不一致）的联系人记录
    pub include_non_members: bool,
    /// 触发时间区间（同时作用于失败日志的排除条件）
    pub date_range: Option<(NaiveDateTime, NaiveDateTime)>,
    pub event_id: Option<i64>,
}

impl LogCountOptions {
    /// 失败日志排除子查询
    pub(super) fn failed_exclusion(&self, log_alias: &str) -> Predicate {
        let mut sql = format!(
            "SELECT NULL FROM campaign_event_failed_log fe WHERE fe.log_id = {}.id",
            log_alias
        );
        let mut params = Vec::new();
        if let Some((from, to)) = &self.date_range {
            sql.push_str(" AND fe.date_added BETWEEN ? AND ?");
            params.push(Value::Text(format_timestamp(from)));
            params.push(Value::Text(format_timestamp(to)));
        }
        Predicate::not_exists(Predicate::raw(sql, params))
    }
}

/// 触发时间序列（按天）查询选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartOptions {
    /// 统计区间（含两端，按天补零）
    pub date_from: NaiveDateTime,
    pub date_to: NaiveDateTime,
    /// 事件定义上的渠道
    pub channel: Option<String>,
    pub channel_id: Option<i64>,
    pub type_key: Option<String>,
    /// 调度记录上的渠道
    pub log_channel: Option<String>,
    pub log_channel_id: Option<i64>,
    /// false: 已执行记录; true: 调度中记录
    pub scheduled: bool,
}

impl ChartOptions {
    pub fn new(date_from: NaiveDateTime, date_to: NaiveDateTime) -> Self {
        Self {
            date_from,
            date_to,
            channel: None,
            channel_id: None,
            type_key: None,
            log_channel: None,
            log_channel_id: None,
            scheduled: false,
        }
    }

    /// 事件 / 记录渠道过滤条件
    pub(super) fn predicates(&self) -> Vec<Predicate> {
        let mut out = Vec::new();
        if let Some(channel) = &self.channel {
            out.push(Predicate::eq("e.channel", channel.clone()));
        }
        if let Some(id) = self.channel_id {
            out.push(Predicate::eq("e.channel_id", id));
        }
        if let Some(key) = &self.type_key {
            out.push(Predicate::eq("e.type_key", key.clone()));
        }
        if let Some(channel) = &self.log_channel {
            out.push(Predicate::eq("o.channel", channel.clone()));
        }
        if let Some(id) = self.log_channel_id {
            out.push(Predicate::eq("o.channel_id", id));
        }
        out.push(Predicate::eq("o.is_scheduled", i64::from(self.scheduled)));
        out
    }
}
