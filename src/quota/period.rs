use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

/// 计数周期：UTC 日历月，格式 `YYYY-MM`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PeriodKey(String);

impl PeriodKey {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(format!("{:04}-{:02}", now.year(), now.month()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 根据时间戳计算所属周期
pub fn current_period(now: DateTime<Utc>) -> PeriodKey {
    PeriodKey::at(now)
}
