//! 每月发送配额计数
//!
//! 配置了 `REDIS_URL` 时使用 Redis 计数（跨进程、跨重启），否则使用进程内计数。
//! 存储在启动时选定一次，运行期间不会切换。

mod durable;
mod fallback;
mod period;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::Config;

pub use durable::{CounterCommands, RedisCounter, RedisQuotaStore, count_key};
pub use fallback::{FallbackCounter, MemoryQuotaStore};
pub use period::{PeriodKey, current_period};

/// 当前时间来源，测试中可替换为固定时钟
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("invalid redis url: {0}")]
    InvalidUrl(#[source] redis::RedisError),

    #[error("quota store unavailable: {0}")]
    Unavailable(#[source] redis::RedisError),

    #[error("quota store timed out after {0:?}")]
    Timeout(Duration),
}

/// 计数存储接口
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// 存储名称，用于日志和健康检查
    fn backend(&self) -> &'static str;

    /// 当前生效的月度上限
    fn limit(&self) -> u64;

    /// 查询周期内成功发送的次数
    async fn get_count(&self, period: &PeriodKey) -> Result<u64, QuotaError>;

    /// 记录一次成功发送，返回新的计数
    async fn increment(&self, period: &PeriodKey) -> Result<u64, QuotaError>;
}

/// 准入检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { count: u64, limit: u64 },
    Exhausted { count: u64, limit: u64 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

#[derive(Clone)]
pub struct QuotaCounter {
    store: Arc<dyn QuotaStore>,
    clock: Clock,
}

impl QuotaCounter {
    pub fn new(store: Arc<dyn QuotaStore>, clock: Clock) -> Self {
        Self { store, clock }
    }

    /// 根据配置选择存储：有 REDIS_URL 用 Redis，否则用进程内计数
    pub fn from_config(config: &Config) -> Result<Self, QuotaError> {
        let clock = system_clock();
        let store: Arc<dyn QuotaStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisQuotaStore::open(
                url,
                config.limit_source(),
                config.quota_store_timeout(),
            )?),
            None => Arc::new(MemoryQuotaStore::new(config.limit_source(), clock.clone())),
        };
        Ok(Self::new(store, clock))
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn current_period(&self) -> PeriodKey {
        current_period(self.now())
    }

    pub fn limit(&self) -> u64 {
        self.store.limit()
    }

    pub async fn get_count(&self, period: &PeriodKey) -> Result<u64, QuotaError> {
        self.store.get_count(period).await
    }

    pub async fn increment(&self, period: &PeriodKey) -> Result<u64, QuotaError> {
        self.store.increment(period).await
    }

    /// 在做任何昂贵操作前检查是否还有配额
    pub async fn admit(&self, period: &PeriodKey) -> Result<Admission, QuotaError> {
        let limit = self.limit();
        let count = self.get_count(period).await?;
        if count >= limit {
            Ok(Admission::Exhausted { count, limit })
        } else {
            Ok(Admission::Allowed { count, limit })
        }
    }
}
