use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Clock, PeriodKey, QuotaError, QuotaStore};
use crate::config::LimitSource;

/// 进程内计数状态，只记住当前周期
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackCounter {
    pub period: PeriodKey,
    pub count: u64,
    pub limit: u64,
}

/// 未配置 Redis 时使用的进程内计数器，进程重启后清零
pub struct MemoryQuotaStore {
    state: Mutex<FallbackCounter>,
    limits: LimitSource,
    clock: Clock,
}

impl MemoryQuotaStore {
    pub fn new(limits: LimitSource, clock: Clock) -> Self {
        let state = FallbackCounter {
            period: PeriodKey::at(clock()),
            count: 0,
            limit: limits(),
        };
        Self {
            state: Mutex::new(state),
            limits,
            clock,
        }
    }

    /// 当前状态快照（先执行跨周期重置）
    pub fn snapshot(&self) -> FallbackCounter {
        let mut state = self.state.lock();
        self.roll_over(&mut state);
        state.clone()
    }

    /// 周期变化时清零并重新读取上限；同一周期内重复调用无副作用
    fn roll_over(&self, state: &mut FallbackCounter) {
        let now = PeriodKey::at((self.clock)());
        if state.period != now {
            tracing::info!(
                "Quota period rolled over from {} to {}, resetting fallback counter",
                state.period,
                now
            );
            state.period = now;
            state.count = 0;
            state.limit = (self.limits)();
        }
    }

    fn note_period_mismatch(state: &FallbackCounter, period: &PeriodKey) {
        if &state.period != period {
            tracing::debug!(
                "Fallback counter tracks {} but {} was requested",
                state.period,
                period
            );
        }
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn limit(&self) -> u64 {
        self.snapshot().limit
    }

    async fn get_count(&self, period: &PeriodKey) -> Result<u64, QuotaError> {
        let mut state = self.state.lock();
        self.roll_over(&mut state);
        Self::note_period_mismatch(&state, period);
        Ok(state.count)
    }

    async fn increment(&self, period: &PeriodKey) -> Result<u64, QuotaError> {
        let mut state = self.state.lock();
        self.roll_over(&mut state);
        Self::note_period_mismatch(&state, period);
        state.count += 1;
        Ok(state.count)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;

    /// 可手动推进的时钟
    fn movable_clock(start: DateTime<Utc>) -> (Clock, Arc<AtomicI64>) {
        let secs = Arc::new(AtomicI64::new(start.timestamp()));
        let handle = secs.clone();
        let clock: Clock = Arc::new(move || {
            Utc.timestamp_opt(handle.load(Ordering::SeqCst), 0)
                .single()
                .unwrap()
        });
        (clock, secs)
    }

    fn oct_2025() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 15, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn starts_at_zero_for_current_period() {
        let (clock, _) = movable_clock(oct_2025());
        let store = MemoryQuotaStore::new(Arc::new(|| 3000), clock);
        let period = PeriodKey::at(oct_2025());

        assert_eq!(store.get_count(&period).await.unwrap(), 0);
        assert_eq!(store.snapshot().period.as_str(), "2025-10");
        assert_eq!(store.limit(), 3000);
    }

    #[tokio::test]
    async fn increments_by_exactly_one() {
        let (clock, _) = movable_clock(oct_2025());
        let store = MemoryQuotaStore::new(Arc::new(|| 3000), clock);
        let period = PeriodKey::at(oct_2025());

        for expected in 1..=5 {
            assert_eq!(store.increment(&period).await.unwrap(), expected);
            assert_eq!(store.get_count(&period).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn rollover_resets_count_and_rereads_limit() {
        let (clock, secs) = movable_clock(oct_2025());
        let configured = Arc::new(AtomicU64::new(3));
        let source = configured.clone();
        let store = MemoryQuotaStore::new(Arc::new(move || source.load(Ordering::SeqCst)), clock);

        let october = PeriodKey::at(oct_2025());
        store.increment(&october).await.unwrap();
        store.increment(&october).await.unwrap();

        // 上限变更在当月不生效
        configured.store(10, Ordering::SeqCst);
        assert_eq!(store.limit(), 3);

        let november = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 1).unwrap();
        secs.store(november.timestamp(), Ordering::SeqCst);

        let period = PeriodKey::at(november);
        assert_eq!(store.get_count(&period).await.unwrap(), 0);
        assert_eq!(store.snapshot(), FallbackCounter {
            period: period.clone(),
            count: 0,
            limit: 10,
        });
    }

    #[tokio::test]
    async fn rollover_happens_once_per_period() {
        let (clock, secs) = movable_clock(oct_2025());
        let store = MemoryQuotaStore::new(Arc::new(|| 3000), clock);

        let november = Utc.with_ymd_and_hms(2025, 11, 2, 8, 0, 0).unwrap();
        secs.store(november.timestamp(), Ordering::SeqCst);
        let period = PeriodKey::at(november);

        assert_eq!(store.increment(&period).await.unwrap(), 1);
        assert_eq!(store.increment(&period).await.unwrap(), 2);
        secs.store(november.timestamp() + 3600, Ordering::SeqCst);
        assert_eq!(store.get_count(&period).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let (clock, _) = movable_clock(oct_2025());
        let store = Arc::new(MemoryQuotaStore::new(Arc::new(|| 3000), clock));
        let period = PeriodKey::at(oct_2025());

        let mut handles = Vec::new();
        for _ in 0..64 {
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

        assert_eq!(seen, (1..=64).collect::<Vec<u64>>());
        assert_eq!(store.get_count(&period).await.unwrap(), 64);
    }
}
