// ==========================================
// 营销活动事件调度 - 事件日志领域模型
// ==========================================
// 对齐: campaign_event_log / campaign_event_failed_log 表
// 时间: 全部为 UTC
// ==========================================

use crate::domain::types::PathOutcome;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// CampaignEventLog - 联系人事件调度记录
// ==========================================
// 生命周期:
// - 活动决策安排未来动作时创建 (is_scheduled = true)
// - 执行或取消调度时变更 (is_scheduled = false)
// - 仅在日志清理或联系人合并时删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignEventLog {
    pub id: i64,
    pub contact_id: i64,
    pub campaign_id: i64,
    pub event_id: i64,
    pub rotation: i64,
    pub is_scheduled: bool,
    pub trigger_date: Option<NaiveDateTime>,
    pub date_triggered: Option<NaiveDateTime>,
    pub non_action_path_taken: Option<bool>,
    pub channel: Option<String>,
    pub channel_id: Option<i64>,
    pub metadata: Option<JsonValue>,
}

impl CampaignEventLog {
    /// 构造一条待调度记录（id 由数据库分配）
    pub fn scheduled(
        contact_id: i64,
        campaign_id: i64,
        event_id: i64,
        rotation: i64,
        trigger_date: NaiveDateTime,
    ) -> Self {
        Self {
            id: 0,
            contact_id,
            campaign_id,
            event_id,
            rotation,
            is_scheduled: true,
            trigger_date: Some(trigger_date),
            date_triggered: None,
            non_action_path_taken: None,
            channel: None,
            channel_id: None,
            metadata: None,
        }
    }

    /// 构造一条已执行记录
    pub fn executed(
        contact_id: i64,
        campaign_id: i64,
        event_id: i64,
        rotation: i64,
        date_triggered: NaiveDateTime,
    ) -> Self {
        Self {
            is_scheduled: false,
            trigger_date: None,
            date_triggered: Some(date_triggered),
            ..Self::scheduled(contact_id, campaign_id, event_id, rotation, date_triggered)
        }
    }

    pub fn path_outcome(&self) -> PathOutcome {
        PathOutcome::from_non_action_flag(self.non_action_path_taken)
    }
}

// ==========================================
// FailedLogEntry - 取消调度原因
// ==========================================
// 约束: 每个 log_id 至多一条（upsert）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLogEntry {
    pub log_id: i64,
    pub date_added: NaiveDateTime,
    pub reason: Option<String>,
}

// ==========================================
// ContactLogView - 联系人时间线条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactLogView {
    pub log_id: i64,
    pub contact_id: i64,
    pub event_id: i64,
    pub campaign_id: i64,
    pub event_name: String,
    pub event_description: Option<String>,
    pub campaign_name: String,
    pub campaign_description: Option<String>,
    pub type_key: String,
    pub is_scheduled: bool,
    pub trigger_date: Option<NaiveDateTime>,
    pub date_triggered: Option<NaiveDateTime>,
    pub channel: Option<String>,
    pub channel_id: Option<i64>,
    pub metadata: Option<JsonValue>,
    pub fail_reason: Option<String>,
}

// ==========================================
// UpcomingEvent - 即将执行的事件
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingEvent {
    pub log_id: i64,
    pub event_id: i64,
    pub campaign_id: i64,
    pub contact_id: i64,
    pub trigger_date: Option<NaiveDateTime>,
    pub event_name: Option<String>,
    pub event_description: Option<String>,
    pub campaign_name: Option<String>,
    pub campaign_description: Option<String>,
    pub metadata: Option<JsonValue>,
}

// ==========================================
// PathCounts - 按路径拆分的事件计数
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCounts {
    pub positive: u64,
    pub negative: u64,
}

impl PathCounts {
    pub fn add(&mut self, outcome: PathOutcome, count: u64) {
        match outcome {
            PathOutcome::Positive => self.positive += count,
            PathOutcome::Negative => self.negative += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.positive + self.negative
    }
}
