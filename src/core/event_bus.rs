//! 同步事件总线
//! 按订阅顺序依次调用处理器，单个处理器失败不影响其余处理器

use log::{debug, error};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::core::error::SimError;
use crate::core::types::{EventKind, MarketEvent, Result};

pub type EventHandler = Arc<dyn Fn(&MarketEvent) -> Result<()> + Send + Sync>;

/// 一次发布的投递统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Result<()>
    where
        F: Fn(&MarketEvent) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = crate::safe_write!(self.handlers)?;
        handlers.entry(kind).or_default().push(Arc::new(handler));
        debug!("订阅事件 {}，当前处理器数 {}", kind, handlers[&kind].len());
        Ok(())
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .map(|h| h.get(&kind).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// 同步投递给该事件类型的所有处理器
    ///
    /// 处理器返回的错误和 panic 都在这里被捕获、记录并吞掉，
    /// 不会穿过发布边界。
    pub fn publish(&self, event: &MarketEvent) -> PublishReport {
        let kind = event.kind();
        // 先复制处理器列表再释放锁，处理器内部可以继续订阅
        let handlers: Vec<EventHandler> = match self.handlers.read() {
            Ok(map) => map.get(&kind).cloned().unwrap_or_default(),
            Err(e) => {
                error!("事件总线读锁中毒: {}", e);
                return PublishReport::default();
            }
        };

        let mut report = PublishReport::default();
        for (idx, handler) in handlers.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!("事件 {} 的第 {} 个处理器失败: {}", kind, idx, e);
                }
                Err(payload) => {
                    report.failed += 1;
                    let message = panic_message(payload.as_ref());
                    error!(
                        "事件 {} 的第 {} 个处理器 panic: {}",
                        kind,
                        idx,
                        SimError::HandlerFailed(message)
                    );
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MarketEventKind;
    use std::sync::Mutex;

    fn price_event(ts: i64) -> MarketEvent {
        MarketEvent::new(
            ts,
            Some("TOKEN".to_string()),
            MarketEventKind::PriceUpdate {
                price: 1.0,
                liquidity_usd: None,
                volume: None,
            },
        )
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            bus.subscribe(EventKind::PriceUpdate, move |_| {
                seen.lock().unwrap().push(i);
                Ok(())
            })
            .unwrap();
        }

        let report = bus.publish(&price_event(1));
        assert_eq!(report.delivered, 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_handler_does_not_stop_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));

        bus.subscribe(EventKind::PriceUpdate, |_| {
            Err(SimError::Other("bad handler".to_string()))
        })
        .unwrap();
        bus.subscribe(EventKind::PriceUpdate, |_| panic!("handler exploded"))
            .unwrap();
        let counter = hits.clone();
        bus.subscribe(EventKind::PriceUpdate, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

        let report = bus.publish(&price_event(1));
        assert_eq!(report, PublishReport { delivered: 1, failed: 2 });
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn only_exact_kind_is_delivered() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        bus.subscribe(EventKind::VolumeSpike, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

        let report = bus.publish(&price_event(1));
        assert_eq!(report, PublishReport::default());
        assert_eq!(*hits.lock().unwrap(), 0);
        assert_eq!(bus.handler_count(EventKind::VolumeSpike), 1);
    }
}
