//! 回测装配
//!
//! 按配置组装时钟、总线、报价簿、账本、风控与签名管线，
//! 回放行情并在逻辑时间到达时提交预设订单。不生成任何交易信号。

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::analysis::{AnalyzerOptions, PerformanceAnalyzer};
use crate::core::config::AppConfig;
use crate::core::error::SimError;
use crate::core::event_bus::EventBus;
use crate::core::time_controller::TimeController;
use crate::core::types::{
    BacktestResult, MarketEvent, MarketEventKind, NetworkCongestion, OrderIntent, PaperPortfolio,
    Result, SigningContext, Timestamp, TradeReport,
};
use crate::security::audit::{AlertSink, LogAlertSink, SecurityAuditLog};
use crate::security::execution_guard::ExecutionGuard;
use crate::security::risk_guard::RiskGuard;
use crate::security::signing::{NonceRegistry, Signer, SigningPipeline};
use crate::simulation::fill_engine::FillEngine;
use crate::simulation::journal::{JournalSink, TradeJournal};
use crate::simulation::ledger::{LedgerHandle, PortfolioLedger};
use crate::simulation::market::{MarketState, QuoteSource};
use crate::simulation::provider::PaperExecutionProvider;
use crate::simulation::replay::{ReplayEngine, ReplayReport};
use crate::utils::webhook::WebhookAlertSink;

/// 预设订单：逻辑时间到达 `at` 后提交
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledOrder {
    pub at: Timestamp,
    pub intent: OrderIntent,
    pub context: SigningContext,
}

/// 一次回测的完整输出
#[derive(Debug, Clone, Serialize)]
pub struct BacktestOutcome {
    pub result: BacktestResult,
    pub replay: ReplayReport,
    pub portfolio: PaperPortfolio,
    pub trades: TradeReport,
    pub executed: usize,
    pub rejected: usize,
    pub unsubmitted: usize,
    pub audit_entries: usize,
}

pub struct BacktestRunner {
    config: AppConfig,
    clock: Arc<TimeController>,
    bus: Arc<EventBus>,
    market: Arc<MarketState>,
    ledger: LedgerHandle,
    journal: Arc<TradeJournal>,
    audit: Arc<SecurityAuditLog>,
    risk_guard: Arc<RiskGuard>,
    provider: Arc<PaperExecutionProvider>,
    replay: ReplayEngine,
}

impl BacktestRunner {
    pub fn new(
        config: AppConfig,
        signer: Arc<dyn Signer>,
        journal_sink: Option<Arc<dyn JournalSink>>,
    ) -> Result<Self> {
        Self::with_nonce_registry(config, signer, journal_sink, Arc::new(NonceRegistry::new()))
    }

    /// 多个回测共用同一签名身份时，传入共享的 nonce 注册表使签名串行
    pub fn with_nonce_registry(
        config: AppConfig,
        signer: Arc<dyn Signer>,
        journal_sink: Option<Arc<dyn JournalSink>>,
        nonces: Arc<NonceRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        let clock = Arc::new(TimeController::new(0));
        let bus = Arc::new(EventBus::new());
        let market = Arc::new(MarketState::new());
        market.attach(&bus)?;

        let alert_sink: Arc<dyn AlertSink> = match &config.alert {
            Some(alert) if alert.enabled => Arc::new(WebhookAlertSink::new(alert.clone())),
            _ => Arc::new(LogAlertSink),
        };
        let audit = Arc::new(SecurityAuditLog::new(clock.clone()).with_alert_sink(alert_sink));

        let journal = match journal_sink {
            Some(sink) => TradeJournal::new().with_sink(sink),
            None => TradeJournal::new(),
        };
        let journal = Arc::new(journal);

        let ledger = LedgerHandle::new(PortfolioLedger::new(config.simulation.clone(), clock.now()));
        let risk_guard = Arc::new(RiskGuard::new(
            config.security.clone(),
            clock.clone(),
            audit.clone(),
            config.simulation.starting_balance,
        ));
        let pipeline = Arc::new(
            SigningPipeline::new(
                risk_guard.clone(),
                ExecutionGuard::new(config.guard.clone()),
                config.sandbox.clone(),
                signer,
                audit.clone(),
                clock.clone(),
                ledger.reader(),
            )
            .with_nonce_registry(nonces),
        );
        let fill_engine = Arc::new(FillEngine::with_seed(
            config.simulation.clone(),
            market.clone(),
            clock.clone(),
            config.replay.seed,
        ));
        let provider = Arc::new(PaperExecutionProvider::new(
            pipeline,
            fill_engine,
            ledger.clone(),
            journal.clone(),
            risk_guard.clone(),
            audit.clone(),
            market.clone(),
            clock.clone(),
        ));
        let replay = ReplayEngine::new(bus.clone(), clock.clone(), config.replay.clone());

        Ok(Self {
            config,
            clock,
            bus,
            market,
            ledger,
            journal,
            audit,
            risk_guard,
            provider,
            replay,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn clock(&self) -> &Arc<TimeController> {
        &self.clock
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub fn journal(&self) -> &Arc<TradeJournal> {
        &self.journal
    }

    pub fn audit(&self) -> &Arc<SecurityAuditLog> {
        &self.audit
    }

    pub fn risk_guard(&self) -> &Arc<RiskGuard> {
        &self.risk_guard
    }

    pub fn replay(&self) -> &ReplayEngine {
        &self.replay
    }

    pub async fn run(&self, events: &[MarketEvent], mut orders: Vec<ScheduledOrder>) -> Result<BacktestOutcome> {
        orders.sort_by_key(|o| o.at);
        let total_orders = orders.len();
        let mut pending: VecDeque<ScheduledOrder> = orders.into();

        let submitted = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicUsize::new(0));
        let rejected = Arc::new(AtomicUsize::new(0));
        let exit_tolerance = self.config.replay.exit_slippage_tolerance;
        let mut last_context: Option<SigningContext> = None;

        let provider = self.provider.clone();
        let risk_guard = self.risk_guard.clone();
        let market = self.market.clone();
        let handle = self.replay.handle();
        let fatal: Arc<Mutex<Option<SimError>>> = Arc::new(Mutex::new(None));
        let submitted_c = submitted.clone();
        let (executed_c, rejected_c, fatal_c) = (executed.clone(), rejected.clone(), fatal.clone());

        let replay = self
            .replay
            .run_with(events, move |event| {
                let mut batch: Vec<(OrderIntent, SigningContext)> = Vec::new();
                let repriced = matches!(
                    event.data,
                    MarketEventKind::PriceUpdate { .. } | MarketEventKind::LiquidityAdd { .. }
                );

                while pending.front().map_or(false, |o| o.at <= event.timestamp) {
                    if let Some(order) = pending.pop_front() {
                        submitted_c.fetch_add(1, Ordering::SeqCst);
                        last_context = Some(order.context.clone());
                        batch.push((order.intent, order.context));
                    }
                }

                let provider = provider.clone();
                let risk_guard = risk_guard.clone();
                let market = market.clone();
                let handle = handle.clone();
                let base_context = last_context.clone();
                let (executed, rejected, fatal) = (executed_c.clone(), rejected_c.clone(), fatal_c.clone());

                async move {
                    let step: Result<()> = async move {
                        if repriced {
                            provider.mark_to_market()?;
                        }
                        // 熔断期间平仓同样会被拒绝，不再逐笔生成
                        if repriced && !risk_guard.is_halted()? {
                            for intent in provider.exit_intents(exit_tolerance)? {
                                let context = exit_context(base_context.as_ref(), market.as_ref(), &intent.token);
                                batch.push((intent, context));
                            }
                        }
                        for (intent, context) in batch {
                            match provider.execute(&intent, &context).await {
                                Ok(_) => {
                                    executed.fetch_add(1, Ordering::SeqCst);
                                }
                                Err(e @ SimError::Other(_)) => return Err(e),
                                Err(e) => {
                                    rejected.fetch_add(1, Ordering::SeqCst);
                                    info!("订单 {} 未执行: {}", intent.id, e.reason_code());
                                }
                            }
                        }
                        Ok(())
                    }
                    .await;

                    // 锁中毒等基础设施错误终止回放，由 run 返回
                    if let Err(e) = step {
                        error!("❌ 回测中止: {}", e);
                        handle.stop();
                        crate::safe_lock!(fatal)?.get_or_insert(e);
                    }
                    Ok(())
                }
            })
            .await?;

        if let Some(e) = crate::safe_lock!(fatal)?.take() {
            return Err(e);
        }

        let unsubmitted = total_orders - submitted.load(Ordering::SeqCst);
        if unsubmitted > 0 {
            warn!("{} 个预设订单在回放结束前未到达提交时间", unsubmitted);
        }

        let transactions = self.ledger.reader().transactions()?;
        let analyzer = PerformanceAnalyzer::new(AnalyzerOptions {
            include_fees: self.config.replay.include_fees,
        });
        let outcome = BacktestOutcome {
            result: analyzer.analyze(&transactions),
            replay,
            portfolio: self.ledger.reader().snapshot()?,
            trades: self.journal.report(),
            executed: executed.load(Ordering::SeqCst),
            rejected: rejected.load(Ordering::SeqCst),
            unsubmitted,
            audit_entries: self.audit.len(),
        };
        info!(
            "📊 回测完成: 收益 {:.2} ({:.2}%) 最大回撤 {:.3}% 胜率 {:.1}% 交易 {}",
            outcome.result.total_return,
            outcome.result.total_return_pct,
            outcome.result.max_drawdown,
            outcome.result.win_rate * 100.0,
            outcome.result.total_trades
        );
        Ok(outcome)
    }
}

/// 平仓意图的签名上下文：沿用最近一次预设订单的网络状况，流动性取当前报价
fn exit_context(base: Option<&SigningContext>, quotes: &dyn QuoteSource, token: &str) -> SigningContext {
    let liquidity_usd = quotes.quote(token).map(|q| q.liquidity_usd).unwrap_or(0.0);
    match base {
        Some(base) => SigningContext {
            liquidity_usd,
            ..base.clone()
        },
        None => SigningContext {
            gas_price_gwei: 0.0,
            liquidity_usd,
            mev_risk_score: 0.0,
            network_congestion: NetworkCongestion::Low,
        },
    }
}
