//! 模拟执行提供者
//!
//! 一次下单的完整流程:
//! 日志尝试 -> 签名管线(含保证金/持仓检查与敞口预留) -> 模拟成交 -> 账本入账 -> 日志结果 -> 风控计数与断路器评估。
//! 敞口预留在入账完成或被拒绝后释放。任何拒绝都会写审计并以 `SimError` 返回。

use log::{info, warn};
use std::sync::Arc;

use crate::core::error::SimError;
use crate::core::time_controller::TimeController;
use crate::core::types::{
    AuditOutcome, CircuitBreakerStatus, ExecutionResult, FillOutcome, OrderIntent, Result,
    SignedTransaction, SigningContext,
};
use crate::security::audit::{AuditRecord, SecurityAuditLog};
use crate::security::risk_guard::RiskGuard;
use crate::security::signing::{Authorization, SigningPipeline};
use crate::simulation::fill_engine::FillEngine;
use crate::simulation::journal::TradeJournal;
use crate::simulation::ledger::{AppliedFill, LedgerHandle};
use crate::simulation::market::MarketState;

const COMPONENT: &str = "PaperExecutionProvider";

/// 一次成功执行的回执
#[derive(Debug, Clone)]
pub struct ExecutionReceipt {
    pub signed: SignedTransaction,
    pub result: ExecutionResult,
    pub applied: AppliedFill,
    pub breaker: CircuitBreakerStatus,
}

pub struct PaperExecutionProvider {
    pipeline: Arc<SigningPipeline>,
    fill_engine: Arc<FillEngine>,
    ledger: LedgerHandle,
    journal: Arc<TradeJournal>,
    risk_guard: Arc<RiskGuard>,
    audit: Arc<SecurityAuditLog>,
    market: Arc<MarketState>,
    clock: Arc<TimeController>,
}

impl PaperExecutionProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: Arc<SigningPipeline>,
        fill_engine: Arc<FillEngine>,
        ledger: LedgerHandle,
        journal: Arc<TradeJournal>,
        risk_guard: Arc<RiskGuard>,
        audit: Arc<SecurityAuditLog>,
        market: Arc<MarketState>,
        clock: Arc<TimeController>,
    ) -> Self {
        Self {
            pipeline,
            fill_engine,
            ledger,
            journal,
            risk_guard,
            audit,
            market,
            clock,
        }
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub async fn execute(
        &self,
        intent: &OrderIntent,
        context: &SigningContext,
    ) -> Result<ExecutionReceipt> {
        self.journal.log_attempt(intent, self.clock.now())?;

        // 签名管线自己写审计
        let Authorization { signed, reservation } =
            match self.pipeline.authorize(intent, context).await {
                Ok(auth) => auth,
                Err(e) => {
                    self.journal.log_rejection(intent, &e, self.clock.now())?;
                    return Err(e);
                }
            };

        let result = match self.fill_engine.simulate_fill(intent).await {
            Ok(result) => result,
            Err(e) => return self.reject(intent, "fill", e),
        };

        if let FillOutcome::Failed { reason } = &result.outcome {
            let error = SimError::SimulatedExecutionFailure(*reason);
            self.journal.log_execution(&result, None)?;
            self.audit_denied("fill", &error, &intent.id)?;
            return Err(error);
        }

        let (applied, portfolio) = {
            let mut ledger = self.ledger.lock()?;
            match ledger.apply_fill(&result) {
                Ok(applied) => {
                    ledger.update_equity(&self.market.price_map());
                    (applied, ledger.snapshot())
                }
                Err(e) => {
                    drop(ledger);
                    return self.reject(intent, "apply_fill", e);
                }
            }
        };
        // 已落账，预留转为真实持仓；须在账本锁释放后释放
        drop(reservation);

        self.journal.log_execution(&result, applied.realized_pnl)?;
        self.risk_guard.record_trade()?;
        let breaker = self.risk_guard.evaluate(&portfolio)?;

        info!(
            "💰 执行完成 {} {} {} 权益 {:.2}",
            intent.id, intent.direction, intent.token, portfolio.equity
        );
        Ok(ExecutionReceipt {
            signed,
            result,
            applied,
            breaker,
        })
    }

    /// 按最新报价重估权益并评估断路器
    pub fn mark_to_market(&self) -> Result<CircuitBreakerStatus> {
        let portfolio = {
            let mut ledger = self.ledger.lock()?;
            ledger.update_equity(&self.market.price_map());
            ledger.snapshot()
        };
        self.risk_guard.evaluate(&portfolio)
    }

    /// 触发止损/止盈的平仓意图
    pub fn exit_intents(&self, slippage_tolerance: f64) -> Result<Vec<OrderIntent>> {
        Ok(self.ledger.lock()?.exit_intents(slippage_tolerance))
    }

    fn reject<T>(&self, intent: &OrderIntent, action: &str, error: SimError) -> Result<T> {
        warn!("⛔ 执行拒绝 {} [{}] {}", intent.id, error.reason_code(), error);
        self.journal.log_rejection(intent, &error, self.clock.now())?;
        self.audit_denied(action, &error, &intent.id)?;
        Err(error)
    }

    fn audit_denied(&self, action: &str, error: &SimError, intent_id: &str) -> Result<()> {
        self.audit.record(
            AuditRecord::new(error.severity(), COMPONENT, action, AuditOutcome::Denied)
                .reason(error.reason_code())
                .details(format!("{}: {}", intent_id, error)),
        )?;
        Ok(())
    }
}
