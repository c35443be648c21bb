//! 逻辑时钟
//! 回放期间所有组件读取“当前时间”的唯一来源，不允许回退

use std::sync::atomic::{AtomicI64, Ordering};

use crate::core::error::SimError;
use crate::core::types::{Result, Timestamp};

const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Default)]
pub struct TimeController {
    now: AtomicI64,
}

impl TimeController {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now.load(Ordering::Acquire)
    }

    /// 推进时钟；早于当前时间返回 TimeOrderingViolation
    pub fn set_time(&self, t: Timestamp) -> Result<()> {
        self.now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if t >= current {
                    Some(t)
                } else {
                    None
                }
            })
            .map(|_| ())
            .map_err(|current| SimError::TimeOrderingViolation {
                current,
                attempted: t,
            })
    }

    /// 强制重置，只允许在回放未运行时由控制面调用
    pub(crate) fn reset(&self, t: Timestamp) {
        self.now.store(t, Ordering::Release);
    }

    /// 当前逻辑时间所在的 UTC 日序号
    pub fn day_index(&self) -> i64 {
        day_index(self.now())
    }

    /// 自 `since` 起经过的逻辑毫秒数
    pub fn elapsed_since(&self, since: Timestamp) -> i64 {
        self.now() - since
    }
}

pub fn day_index(ts: Timestamp) -> i64 {
    ts.div_euclid(MILLIS_PER_DAY)
}
