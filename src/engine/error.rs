// ==========================================
// 营销活动事件调度 - 引擎层错误类型
// ==========================================
// 映射: RepositoryError::NotFound -> NotFound, 其余 -> StoreUnavailable
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 调度引擎错误
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("对象不存在: {0}")]
    NotFound(String),

    #[error("事件存储不可用: {0}")]
    StoreUnavailable(String),

    /// 选出后已被其它调度者执行或取消
    #[error("调度记录已失效: log_id={log_id}")]
    StaleSelection { log_id: i64 },

    #[error("联系人限制器配置非法: {0}")]
    InvalidLimiter(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    /// 仅存储不可用可以退避重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::StoreUnavailable(_))
    }
}

impl From<RepositoryError> for SchedulerError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                SchedulerError::NotFound(format!("{} id={}", entity, id))
            }
            other => SchedulerError::StoreUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_through() {
        let err: SchedulerError = RepositoryError::not_found("CampaignEvent", 42).into();
        assert!(matches!(err, SchedulerError::NotFound(ref msg) if msg.contains("42")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_other_errors_become_store_unavailable() {
        for repo_err in [
            RepositoryError::LockError("poisoned".to_string()),
            RepositoryError::DatabaseQueryError("syntax".to_string()),
            RepositoryError::ForeignKeyViolation("fk".to_string()),
        ] {
            let err = SchedulerError::from(repo_err);
            assert!(matches!(err, SchedulerError::StoreUnavailable(_)));
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_stale_and_invalid_are_not_retryable() {
        assert!(!SchedulerError::StaleSelection { log_id: 1 }.is_retryable());
        assert!(!SchedulerError::InvalidLimiter("x".to_string()).is_retryable());
    }
}
