//! 回放引擎
//! 只负责按时间顺序推进时钟并发布事件，不含任何交易逻辑

use log::{error, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::core::config::ReplayConfig;
use crate::core::error::SimError;
use crate::core::event_bus::EventBus;
use crate::core::time_controller::TimeController;
use crate::core::types::{MarketEvent, MarketEventKind, ReplaySpeed, Result, Timestamp};

const NO_SEEK: i64 = i64::MIN;

/// 一次回放的统计
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ReplayReport {
    pub events_processed: usize,
    pub events_skipped: usize,
    pub final_time: Timestamp,
    pub stopped_early: bool,
    pub handler_failures: usize,
}

/// 回放控制面：暂停、恢复、停止、跳转
#[derive(Debug)]
pub struct ReplayHandle {
    paused: AtomicBool,
    stopped: AtomicBool,
    seek_to: AtomicI64,
    wake: Notify,
}

impl Default for ReplayHandle {
    fn default() -> Self {
        Self {
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            seek_to: AtomicI64::new(NO_SEEK),
            wake: Notify::new(),
        }
    }
}

impl ReplayHandle {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// 在当前事件处理完后结束回放
    ///
    /// 回放开始前调用则下一次回放不处理任何事件。停止与跳转只作用于一次回放，结束时清除。
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// 跳过时间戳早于 `ts` 的事件
    pub fn seek(&self, ts: Timestamp) {
        self.seek_to.store(ts, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn wait_while_paused(&self) {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            // 先登记再检查，避免错过 resume 的通知
            notified.as_mut().enable();
            if !self.is_paused() || self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// 回放结束（含提前返回）时释放运行标志并清除一次性控制
struct RunningGuard<'a> {
    running: &'a AtomicBool,
    handle: &'a ReplayHandle,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.handle.stopped.store(false, Ordering::SeqCst);
        self.handle.seek_to.store(NO_SEEK, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct ReplayEngine {
    bus: Arc<EventBus>,
    clock: Arc<TimeController>,
    config: ReplayConfig,
    running: AtomicBool,
    handle: Arc<ReplayHandle>,
}

impl ReplayEngine {
    pub fn new(bus: Arc<EventBus>, clock: Arc<TimeController>, config: ReplayConfig) -> Self {
        Self {
            bus,
            clock,
            config,
            running: AtomicBool::new(false),
            handle: Arc::new(ReplayHandle::default()),
        }
    }

    pub fn handle(&self) -> Arc<ReplayHandle> {
        Arc::clone(&self.handle)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn speed(&self) -> ReplaySpeed {
        self.config.speed
    }

    /// 重置逻辑时钟，回放运行中不允许
    pub fn reset_clock(&self, start: Timestamp) -> Result<()> {
        if self.is_running() {
            return Err(SimError::ReplayInProgress);
        }
        self.clock.reset(start);
        Ok(())
    }

    fn pacing(&self) -> Option<Duration> {
        let speed = self.config.speed;
        if speed.is_instant() {
            return None;
        }
        Some(Duration::from_micros(
            self.config.base_slice_ms * 1_000 / speed.multiplier() as u64,
        ))
    }

    pub async fn run(&self, events: &[MarketEvent]) -> Result<ReplayReport> {
        self.run_with(events, |_| async { Ok(()) }).await
    }

    /// 回放事件；`after_event` 在每个事件发布后执行，用于需要异步处理的订阅方
    ///
    /// 时间顺序错误会中止回放；处理器失败只计数。
    /// 配置了回放窗口时，窗口外的事件计入跳过。
    pub async fn run_with<F, Fut>(&self, events: &[MarketEvent], mut after_event: F) -> Result<ReplayReport>
    where
        F: FnMut(MarketEvent) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SimError::ReplayInProgress);
        }
        let _guard = RunningGuard {
            running: &self.running,
            handle: &self.handle,
        };
        let window_start = self.config.start_time.unwrap_or(NO_SEEK);

        let pacing = self.pacing();
        info!(
            "▶️ 开始回放 {} 个事件，速度 {:?} (x{})",
            events.len(),
            self.config.speed,
            self.config.speed.multiplier()
        );

        let mut report = ReplayReport {
            events_processed: 0,
            events_skipped: 0,
            final_time: self.clock.now(),
            stopped_early: false,
            handler_failures: 0,
        };

        for (index, event) in events.iter().enumerate() {
            self.handle.wait_while_paused().await;
            if self.handle.is_stopped() {
                report.stopped_early = true;
                warn!("⏹️ 回放被停止，已处理 {} 个事件", report.events_processed);
                break;
            }
            if self.config.end_time.map_or(false, |end| event.timestamp > end) {
                report.events_skipped += events.len() - index;
                info!("回放到达窗口终点 {:?}", self.config.end_time);
                break;
            }
            let floor = self.handle.seek_to.load(Ordering::SeqCst).max(window_start);
            if event.timestamp < floor {
                report.events_skipped += 1;
                continue;
            }

            if let Err(e) = self.clock.set_time(event.timestamp) {
                error!("❌ 回放中止: {}", e);
                return Err(e);
            }

            let published = self.bus.publish(event);
            report.handler_failures += published.failed;
            if let Err(e) = after_event(event.clone()).await {
                report.handler_failures += 1;
                error!("事件 {} 的后续处理失败: {}", event.kind(), e);
            }
            report.events_processed += 1;

            if let Some(slice) = pacing {
                tokio::time::sleep(slice).await;
            }
        }

        report.final_time = self.clock.now();
        let complete = MarketEvent::new(
            report.final_time,
            None,
            MarketEventKind::BacktestComplete {
                events_processed: report.events_processed,
            },
        );
        report.handler_failures += self.bus.publish(&complete).failed;

        info!(
            "🏁 回放结束: 处理 {} 跳过 {} 处理器失败 {}",
            report.events_processed, report.events_skipped, report.handler_failures
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EventKind;
    use std::sync::Mutex;

    fn price(ts: i64) -> MarketEvent {
        MarketEvent::new(
            ts,
            Some("X".into()),
            MarketEventKind::PriceUpdate {
                price: 1.0 + ts as f64,
                liquidity_usd: Some(10_000.0),
                volume: None,
            },
        )
    }

    fn engine(speed: ReplaySpeed) -> (Arc<EventBus>, Arc<TimeController>, ReplayEngine) {
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(TimeController::new(0));
        let config = ReplayConfig {
            speed,
            ..ReplayConfig::default()
        };
        let engine = ReplayEngine::new(bus.clone(), clock.clone(), config);
        (bus, clock, engine)
    }

    fn record(bus: &EventBus, kind: EventKind) -> Arc<Mutex<Vec<i64>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(kind, move |e| {
            sink.lock().unwrap().push(e.timestamp);
            Ok(())
        })
        .unwrap();
        seen
    }

    #[tokio::test]
    async fn publishes_in_order_then_completes() {
        let (bus, clock, engine) = engine(ReplaySpeed::Instant);
        let prices = record(&bus, EventKind::PriceUpdate);
        let done = Arc::new(Mutex::new(None));
        let done_sink = done.clone();
        bus.subscribe(EventKind::BacktestComplete, move |e| {
            if let MarketEventKind::BacktestComplete { events_processed } = e.data {
                *done_sink.lock().unwrap() = Some(events_processed);
            }
            Ok(())
        })
        .unwrap();

        let report = engine.run(&[price(10), price(20), price(20), price(30)]).await.unwrap();
        assert_eq!(*prices.lock().unwrap(), vec![10, 20, 20, 30]);
        assert_eq!(*done.lock().unwrap(), Some(4));
        assert_eq!(report.events_processed, 4);
        assert_eq!(report.final_time, 30);
        assert_eq!(clock.now(), 30);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn out_of_order_event_aborts_run() {
        let (bus, _, engine) = engine(ReplaySpeed::Instant);
        let prices = record(&bus, EventKind::PriceUpdate);
        let completes = record(&bus, EventKind::BacktestComplete);

        let err = engine.run(&[price(10), price(5), price(30)]).await.unwrap_err();
        assert!(matches!(err, SimError::TimeOrderingViolation { current: 10, attempted: 5 }));
        assert_eq!(*prices.lock().unwrap(), vec![10]);
        assert!(completes.lock().unwrap().is_empty());
        // 中止后可以再次运行
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn failing_handlers_do_not_stop_replay() {
        let (bus, _, engine) = engine(ReplaySpeed::Instant);
        bus.subscribe(EventKind::PriceUpdate, |_| Err(SimError::Other("bad".into())))
            .unwrap();
        let prices = record(&bus, EventKind::PriceUpdate);

        let report = engine
            .run_with(&[price(1), price(2)], |e| async move {
                if e.timestamp == 2 {
                    Err(SimError::Other("hook".into()))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert_eq!(*prices.lock().unwrap(), vec![1, 2]);
        assert_eq!(report.handler_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_depends_on_speed() {
        let events = [price(1), price(2), price(3)];

        let (_, _, realtime) = engine(ReplaySpeed::Realtime);
        let start = tokio::time::Instant::now();
        realtime.run(&events).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(300));

        let (_, _, fast) = engine(ReplaySpeed::Fast);
        let start = tokio::time::Instant::now();
        fast.run(&events).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(30));

        let (_, _, instant) = engine(ReplaySpeed::Instant);
        let start = tokio::time::Instant::now();
        instant.run(&events).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn not_reentrant_while_paused_run_is_in_flight() {
        let (_, _, engine) = engine(ReplaySpeed::Instant);
        let engine = Arc::new(engine);
        let handle = engine.handle();
        handle.pause();

        let background = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(&[price(1), price(2)]).await })
        };
        while !engine.is_running() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(engine.run(&[price(3)]).await, Err(SimError::ReplayInProgress)));
        assert!(matches!(engine.reset_clock(0), Err(SimError::ReplayInProgress)));

        handle.resume();
        let report = background.await.unwrap().unwrap();
        assert_eq!(report.events_processed, 2);
        assert!(engine.reset_clock(0).is_ok());
    }

    #[tokio::test]
    async fn stop_and_seek() {
        let (bus, _, engine) = engine(ReplaySpeed::Instant);
        let prices = record(&bus, EventKind::PriceUpdate);
        let handle = engine.handle();
        handle.seek(20);

        let events = [price(10), price(15), price(20), price(25), price(30)];
        let stopper = handle.clone();
        let report = engine
            .run_with(&events, move |e| {
                if e.timestamp == 25 {
                    stopper.stop();
                }
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(*prices.lock().unwrap(), vec![20, 25]);
        assert_eq!(report.events_skipped, 2);
        assert_eq!(report.events_processed, 2);
        assert!(report.stopped_early);
        assert_eq!(report.final_time, 25);
    }

    #[tokio::test]
    async fn seek_and_stop_apply_to_a_single_run() {
        let (bus, _, engine) = engine(ReplaySpeed::Instant);
        let prices = record(&bus, EventKind::PriceUpdate);
        let handle = engine.handle();

        handle.seek(20);
        let first = engine.run(&[price(10), price(20)]).await.unwrap();
        assert_eq!(first.events_skipped, 1);

        // 跳转已清除，后续回放从头处理
        let second = engine.run(&[price(30), price(40)]).await.unwrap();
        assert_eq!(second.events_skipped, 0);
        assert_eq!(*prices.lock().unwrap(), vec![20, 30, 40]);
    }

    #[tokio::test]
    async fn stop_before_run_ends_the_next_run_immediately() {
        let (bus, clock, engine) = engine(ReplaySpeed::Instant);
        let prices = record(&bus, EventKind::PriceUpdate);
        engine.handle().stop();

        let report = engine.run(&[price(10), price(20)]).await.unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.events_processed, 0);
        assert_eq!(clock.now(), 0);

        let report = engine.run(&[price(10), price(20)]).await.unwrap();
        assert!(!report.stopped_early);
        assert_eq!(*prices.lock().unwrap(), vec![10, 20]);
    }

    #[tokio::test]
    async fn window_limits_replayed_events() {
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(TimeController::new(0));
        let config = ReplayConfig {
            start_time: Some(15),
            end_time: Some(30),
            ..ReplayConfig::default()
        };
        let engine = ReplayEngine::new(bus.clone(), clock.clone(), config);
        let prices = record(&bus, EventKind::PriceUpdate);

        let events = [price(10), price(20), price(30), price(40), price(50)];
        let report = engine.run(&events).await.unwrap();
        assert_eq!(*prices.lock().unwrap(), vec![20, 30]);
        assert_eq!(report.events_processed, 2);
        assert_eq!(report.events_skipped, 3);
        assert!(!report.stopped_early);
        assert_eq!(clock.now(), 30);
    }
}
