use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient, aio::MultiplexedConnection};
use tokio::sync::OnceCell;

use super::{PeriodKey, QuotaError, QuotaStore};
use crate::config::LimitSource;

/// 计数键前缀
const COUNT_KEY_PREFIX: &str = "contact:count:";

/// 生成周期计数键
pub fn count_key(period: &PeriodKey) -> String {
    format!("{}{}", COUNT_KEY_PREFIX, period)
}

/// 计数存储需要的两条命令；没有 SET，计数只能通过原子 INCR 增加
#[async_trait]
pub trait CounterCommands: Send + Sync {
    /// GET key
    async fn get(&self, key: &str) -> Result<Option<String>, QuotaError>;

    /// INCR key，返回自增后的值
    async fn incr(&self, key: &str) -> Result<i64, QuotaError>;
}

/// Redis 连接：首次使用时建立，此后复用；连接失效后不自动重连
pub struct RedisCounter {
    client: RedisClient,
    conn: OnceCell<MultiplexedConnection>,
    timeout: Duration,
}

impl RedisCounter {
    pub fn new(client: RedisClient, timeout: Duration) -> Self {
        Self {
            client,
            conn: OnceCell::new(),
            timeout,
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QuotaError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                tracing::debug!("Opening Redis connection for quota counter");
                self.bounded(self.client.get_multiplexed_async_connection())
                    .await
            })
            .await?;
        Ok(conn.clone())
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, QuotaError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result.map_err(QuotaError::Unavailable),
            Err(_) => Err(QuotaError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl CounterCommands for RedisCounter {
    async fn get(&self, key: &str) -> Result<Option<String>, QuotaError> {
        let mut conn = self.connection().await?;
        self.bounded(conn.get(key)).await
    }

    async fn incr(&self, key: &str) -> Result<i64, QuotaError> {
        let mut conn = self.connection().await?;
        self.bounded(conn.incr(key, 1)).await
    }
}

/// 持久计数存储，键随周期变化，跨进程重启保留
pub struct RedisQuotaStore<C = RedisCounter> {
    counter: C,
    limits: LimitSource,
}

impl<C: CounterCommands> RedisQuotaStore<C> {
    pub fn new(counter: C, limits: LimitSource) -> Self {
        Self { counter, limits }
    }
}

impl RedisQuotaStore<RedisCounter> {
    /// 只校验 URL，不建立连接
    pub fn open(url: &str, limits: LimitSource, timeout: Duration) -> Result<Self, QuotaError> {
        let client = RedisClient::open(url).map_err(QuotaError::InvalidUrl)?;
        Ok(Self::new(RedisCounter::new(client, timeout), limits))
    }
}

/// 缺失、无法解析或为负的值都按 0 处理
fn parse_count(raw: Option<String>) -> u64 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .map(|n| n.max(0) as u64)
        .unwrap_or(0)
}

#[async_trait]
impl<C: CounterCommands> QuotaStore for RedisQuotaStore<C> {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn limit(&self) -> u64 {
        (self.limits)()
    }

    async fn get_count(&self, period: &PeriodKey) -> Result<u64, QuotaError> {
        let raw = self.counter.get(&count_key(period)).await?;
        Ok(parse_count(raw))
    }

    async fn increment(&self, period: &PeriodKey) -> Result<u64, QuotaError> {
        // INCR 是原子操作，并发请求不会丢失计数
        let count = self.counter.incr(&count_key(period)).await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    use super::*;

    fn period() -> PeriodKey {
        PeriodKey::at(Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap())
    }

    /// 内存中的 Redis 替身，每条命令前让出调度以交错并发请求
    #[derive(Default)]
    struct InMemoryCounter {
        values: Mutex<HashMap<String, String>>,
        gets: AtomicUsize,
        incrs: AtomicUsize,
    }

    #[async_trait]
    impl CounterCommands for Arc<InMemoryCounter> {
        async fn get(&self, key: &str) -> Result<Option<String>, QuotaError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.values.lock().get(key).cloned())
        }

        async fn incr(&self, key: &str) -> Result<i64, QuotaError> {
            self.incrs.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let mut values = self.values.lock();
            let next = values
                .get(key)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
                + 1;
            values.insert(key.to_string(), next.to_string());
            Ok(next)
        }
    }

    #[test]
    fn key_is_scoped_by_period() {
        assert_eq!(count_key(&period()), "contact:count:2025-10");
    }

    #[test]
    fn stored_values_never_read_negative() {
        assert_eq!(parse_count(None), 0);
        assert_eq!(parse_count(Some("abc".into())), 0);
        assert_eq!(parse_count(Some("-4".into())), 0);
        assert_eq!(parse_count(Some("1.5".into())), 0);
        assert_eq!(parse_count(Some("42".into())), 42);
    }

    #[test]
    fn invalid_url_is_rejected_up_front() {
        let result = RedisQuotaStore::open("not a url", Arc::new(|| 3), Duration::from_secs(1));
        assert!(matches!(result, Err(QuotaError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn unreachable_store_is_an_error_not_zero() {
        let store = RedisQuotaStore::open(
            "redis://127.0.0.1:1/",
            Arc::new(|| 3),
            Duration::from_millis(500),
        )
        .unwrap();

        assert!(store.get_count(&period()).await.is_err());
        assert!(store.increment(&period()).await.is_err());
        // 连接建立失败后不会缓存失败结果
        assert!(!store.counter.conn.initialized());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_go_through_incr() {
        let counter = Arc::new(InMemoryCounter::default());
        let store = Arc::new(RedisQuotaStore::new(counter.clone(), Arc::new(|| 3000)));
        let period = period();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            let period = period.clone();
            handles.push(tokio::spawn(async move {
                store.increment(&period).await.unwrap()
            }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();

        assert_eq!(seen, (1..=50).collect::<Vec<u64>>());
        assert_eq!(counter.incrs.load(Ordering::SeqCst), 50);
        assert_eq!(counter.gets.load(Ordering::SeqCst), 0);
        assert_eq!(store.get_count(&period).await.unwrap(), 50);
        assert_eq!(
            counter.values.lock().get("contact:count:2025-10").map(String::as_str),
            Some("50")
        );
    }

    #[tokio::test]
    async fn garbage_stored_value_reads_as_zero() {
        let counter = Arc::new(InMemoryCounter::default());
        counter
            .values
            .lock()
            .insert(count_key(&period()), "-7".to_string());
        let store = RedisQuotaStore::new(counter, Arc::new(|| 3));

        assert_eq!(store.get_count(&period()).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "needs TEST_REDIS_URL"]
    async fn concurrent_increments_against_live_redis() {
        let url = std::env::var("TEST_REDIS_URL").expect("TEST_REDIS_URL is set");
        let store = Arc::new(
            RedisQuotaStore::open(&url, Arc::new(|| 3000), Duration::from_secs(2)).unwrap(),
        );
        let period = PeriodKey::at(Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap());

        let mut conn = store.counter.connection().await.unwrap();
        let _: () = conn.del(count_key(&period)).await.unwrap();

        let tasks = (0..50).map(|_| {
            let store = store.clone();
            let period = period.clone();
            async move { store.increment(&period).await.unwrap() }
        });
        let mut seen = futures_util::future::join_all(tasks).await;
        seen.sort_unstable();

        assert_eq!(seen, (1..=50).collect::<Vec<u64>>());
        assert_eq!(store.get_count(&period).await.unwrap(), 50);

        let _: () = conn.del(count_key(&period)).await.unwrap();
    }
}
