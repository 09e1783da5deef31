// ==========================================
// 营销活动事件调度 - 活动领域模型
// ==========================================
// 对齐: campaigns / campaign_events / campaign_members 表
// ==========================================

use crate::domain::types::EventType;
use serde::{Deserialize, Serialize};

// ==========================================
// Campaign - 营销活动
// ==========================================
// 红线: 未发布活动的事件不参与调度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_published: bool,
    pub created_by: Option<i64>, // 创建人（用于可见性过滤）
}

// ==========================================
// CampaignEvent - 活动事件
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignEvent {
    pub id: i64,
    pub campaign_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub event_type: EventType,
    pub type_key: String,        // 具体动作标识，例如 "email.send"
    pub channel: Option<String>,
    pub channel_id: Option<i64>,
}

// ==========================================
// CampaignMember - 活动成员
// ==========================================
// rotation: 联系人在该活动中的当前轮次，旧轮次的调度记录不再生效
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignMember {
    pub campaign_id: i64,
    pub contact_id: i64,
    pub rotation: i64,
    pub manually_removed: bool,
}
