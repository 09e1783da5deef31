// ==========================================
// 营销活动事件调度 - 领域类型定义
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 活动事件类别 (Event Type)
// ==========================================
// 序列化格式: 小写 (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Action,    // 动作（发送邮件、打标签等）
    Decision,  // 决策（等待联系人行为）
    Condition, // 条件（按字段分支）
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Action => "action",
            EventType::Decision => "decision",
            EventType::Condition => "condition",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "action" => Ok(EventType::Action),
            "decision" => Ok(EventType::Decision),
            "condition" => Ok(EventType::Condition),
            other => Err(format!("未知事件类别: {}", other)),
        }
    }
}

// ==========================================
// 执行路径 (Path Outcome)
// ==========================================
// non_action_path_taken = true 表示走了“否”分支
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathOutcome {
    Positive,
    Negative,
}

impl PathOutcome {
    pub fn from_non_action_flag(flag: Option<bool>) -> Self {
        if flag.unwrap_or(false) {
            PathOutcome::Negative
        } else {
            PathOutcome::Positive
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parse() {
        assert_eq!("Decision".parse::<EventType>(), Ok(EventType::Decision));
        assert_eq!(" action ".parse::<EventType>(), Ok(EventType::Action));
        assert!("bogus".parse::<EventType>().is_err());
    }

    #[test]
    fn test_path_outcome_from_flag() {
        assert_eq!(PathOutcome::from_non_action_flag(None), PathOutcome::Positive);
        assert_eq!(PathOutcome::from_non_action_flag(Some(false)), PathOutcome::Positive);
        assert_eq!(PathOutcome::from_non_action_flag(Some(true)), PathOutcome::Negative);
    }
}
