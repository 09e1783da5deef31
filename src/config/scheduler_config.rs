// ==========================================
// 营销活动事件调度 - 调度配置读取 Trait
// ==========================================
// 职责: 定义调度过程所需的配置读取接口（不包含实现）
// 实现者: ConfigManager（从 config_kv 表读取）
// ==========================================

use crate::config::config_manager::ConfigResult;
use crate::engine::contact_limiter::{ContactLimiter, ContactLimiterBuilder};
use crate::engine::error::SchedulerResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 调度配置（一次调度过程开始时读取）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub batch_limit: Option<usize>,
    pub campaign_limit: Option<usize>,
    pub max_threads: u32,
    pub published_only: bool,
}

impl SchedulerConfig {
    pub const DEFAULT_BATCH_LIMIT: usize = 100;

    /// 按配置预置的限制器构建器（调用方可继续追加联系人范围）
    pub fn limiter_builder(&self) -> ContactLimiterBuilder {
        let mut builder = ContactLimiter::builder().published_only(self.published_only);
        if let Some(limit) = self.batch_limit {
            builder = builder.batch_limit(limit);
        }
        if let Some(limit) = self.campaign_limit {
            builder = builder.campaign_limit(limit);
        }
        builder
    }

    /// 第 thread_id 个调度进程使用的限制器
    pub fn limiter_for_thread(&self, thread_id: u32) -> SchedulerResult<ContactLimiter> {
        self.limiter_builder()
            .thread(thread_id, self.max_threads)
            .build()
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_limit: Some(Self::DEFAULT_BATCH_LIMIT),
            campaign_limit: None,
            max_threads: 1,
            published_only: true,
        }
    }
}

// ==========================================
// SchedulerConfigReader Trait
// ==========================================
#[async_trait]
pub trait SchedulerConfigReader: Send + Sync {
    /// 单次选择的批量上限
    ///
    /// # 默认值
    /// - Some(100)；配置为 0 时不限制
    async fn get_batch_limit(&self) -> ConfigResult<Option<usize>>;

    /// 每次调度过程的活动预算
    ///
    /// # 默认值
    /// - None（不限制）
    async fn get_campaign_limit(&self) -> ConfigResult<Option<usize>>;

    /// 并行调度进程数
    ///
    /// # 默认值
    /// - 1
    async fn get_max_threads(&self) -> ConfigResult<u32>;

    /// 是否只调度已发布活动
    ///
    /// # 默认值
    /// - true
    async fn get_published_only(&self) -> ConfigResult<bool>;

    /// 一次读取全部调度配置
    async fn load_scheduler_config(&self) -> ConfigResult<SchedulerConfig> {
        Ok(SchedulerConfig {
            batch_limit: self.get_batch_limit().await?,
            campaign_limit: self.get_campaign_limit().await?,
            max_threads: self.get_max_threads().await?,
            published_only: self.get_published_only().await?,
        })
    }
}
