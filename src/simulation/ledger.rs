//! 模拟账本
//! 独占余额、持仓与已实现盈亏；所有修改全有或全无
//!
//! 保证金模型：`balance` 是抵押现金，开仓只占用 `used_margin`，
//! 只有手续费和已实现盈亏改变余额，因此 `equity = balance + Σ unrealized_pnl`。

use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::config::SimulationConfig;
use crate::core::error::SimError;
use crate::core::types::{
    Direction, ExecutionResult, FillOutcome, LedgerTransaction, LedgerTransactionType,
    OrderIntent, PaperPortfolio, PositionStatus, Result, SimulatedPosition, Timestamp,
};
use crate::utils::order_id::{RecordIdGenerator, RecordKind};

/// 数量比较的容差
const SIZE_EPSILON: f64 = 1e-9;

/// 一次成交入账的结果
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedFill {
    pub position: SimulatedPosition,
    pub fee: f64,
    /// 卖出时的已实现盈亏（不含手续费）
    pub realized_pnl: Option<f64>,
}

pub struct PortfolioLedger {
    config: SimulationConfig,
    balance: f64,
    start_balance: f64,
    equity: f64,
    realized_pnl: f64,
    used_margin: f64,
    positions: BTreeMap<String, SimulatedPosition>,
    closed: Vec<SimulatedPosition>,
    transactions: Vec<LedgerTransaction>,
    tx_ids: RecordIdGenerator,
    position_ids: RecordIdGenerator,
}

impl PortfolioLedger {
    /// 以初始入金建账
    pub fn new(config: SimulationConfig, opened_at: Timestamp) -> Self {
        let start_balance = config.starting_balance;
        let mut ledger = Self {
            config,
            balance: 0.0,
            start_balance,
            equity: 0.0,
            realized_pnl: 0.0,
            used_margin: 0.0,
            positions: BTreeMap::new(),
            closed: Vec::new(),
            transactions: Vec::new(),
            tx_ids: RecordIdGenerator::new(RecordKind::Ledger),
            position_ids: RecordIdGenerator::new(RecordKind::Position),
        };
        ledger.post(LedgerTransactionType::Deposit, start_balance, None, None, opened_at);
        ledger.refresh_equity();
        ledger
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn used_margin(&self) -> f64 {
        self.used_margin
    }

    /// 可用余额 = 余额 - 已占用保证金
    pub fn available_balance(&self) -> f64 {
        self.balance - self.used_margin
    }

    pub fn check_margin(&self, amount: f64) -> bool {
        self.available_balance() >= amount
    }

    pub fn position(&self, token: &str) -> Option<&SimulatedPosition> {
        self.positions.get(token)
    }

    pub fn open_positions(&self) -> Vec<SimulatedPosition> {
        self.positions.values().cloned().collect()
    }

    pub fn closed_positions(&self) -> &[SimulatedPosition] {
        &self.closed
    }

    pub fn transactions(&self) -> &[LedgerTransaction] {
        &self.transactions
    }

    pub fn snapshot(&self) -> PaperPortfolio {
        PaperPortfolio {
            balance: self.balance,
            start_balance: self.start_balance,
            equity: self.equity,
            open_positions: self.open_positions(),
            realized_pnl: self.realized_pnl,
            used_margin: self.used_margin,
        }
    }

    fn post(
        &mut self,
        kind: LedgerTransactionType,
        amount: f64,
        token: Option<&str>,
        reference_id: Option<&str>,
        at: Timestamp,
    ) {
        self.balance += amount;
        self.transactions.push(LedgerTransaction {
            id: self.tx_ids.generate(at),
            timestamp: at,
            kind,
            amount,
            token: token.map(str::to_string),
            reference_id: reference_id.map(str::to_string),
        });
    }

    fn refresh_equity(&mut self) {
        let unrealized: f64 = self.positions.values().map(|p| p.unrealized_pnl).sum();
        self.equity = self.balance + unrealized;
    }

    /// 按价格表重估未实现盈亏并刷新权益；价格表缺失的代币沿用上次价格
    pub fn update_equity(&mut self, prices: &HashMap<String, f64>) -> f64 {
        for position in self.positions.values_mut() {
            if let Some(price) = prices.get(&position.token) {
                position.current_price = *price;
            }
            position.unrealized_pnl = (position.current_price - position.entry_price) * position.size;
        }
        self.refresh_equity();
        self.equity
    }

    /// 成交入账；校验全部通过后才修改状态
    pub fn apply_fill(&mut self, result: &ExecutionResult) -> Result<AppliedFill> {
        let fill = match &result.outcome {
            FillOutcome::Filled(fill) => fill.clone(),
            FillOutcome::Failed { reason } => {
                return Err(SimError::SimulatedExecutionFailure(*reason));
            }
        };
        let at = result.executed_at;

        match result.direction {
            Direction::Buy => {
                let required = fill.filled_amount + fill.fee;
                let available = self.available_balance();
                if available - required < -self.config.margin_tolerance {
                    return Err(SimError::InsufficientMargin {
                        required,
                        available,
                    });
                }

                let position = match self.positions.get(&result.token) {
                    Some(existing) => {
                        let size = existing.size + fill.quantity;
                        let entry_price =
                            (existing.entry_price * existing.size + fill.filled_price * fill.quantity) / size;
                        SimulatedPosition {
                            size,
                            entry_price,
                            stop_loss: entry_price * (1.0 - self.config.stop_loss_pct),
                            take_profit: entry_price * (1.0 + self.config.take_profit_pct),
                            cost_basis: existing.cost_basis + required,
                            current_price: fill.base_price,
                            ..existing.clone()
                        }
                    }
                    None => SimulatedPosition {
                        id: self.position_ids.generate(at),
                        token: result.token.clone(),
                        entry_price: fill.filled_price,
                        size: fill.quantity,
                        stop_loss: fill.filled_price * (1.0 - self.config.stop_loss_pct),
                        take_profit: fill.filled_price * (1.0 + self.config.take_profit_pct),
                        cost_basis: required,
                        current_price: fill.base_price,
                        unrealized_pnl: 0.0,
                        status: PositionStatus::Open,
                        opened_at: at,
                    },
                };

                // 以下不再失败
                self.used_margin += fill.filled_amount;
                self.post(
                    LedgerTransactionType::TradeFee,
                    -fill.fee,
                    Some(&result.token),
                    Some(&result.intent_id),
                    at,
                );
                let mut position = position;
                position.unrealized_pnl = (position.current_price - position.entry_price) * position.size;
                self.positions.insert(result.token.clone(), position.clone());
                self.refresh_equity();

                info!(
                    "📈 开/加仓 {} 数量 {:.8} 均价 {:.6} 手续费 {:.4}",
                    result.token, position.size, position.entry_price, fill.fee
                );
                Ok(AppliedFill {
                    position,
                    fee: fill.fee,
                    realized_pnl: None,
                })
            }
            Direction::Sell => {
                let existing = self.positions.get(&result.token).cloned().ok_or_else(|| {
                    SimError::InsufficientPosition {
                        token: result.token.clone(),
                        requested: fill.quantity,
                        available: 0.0,
                    }
                })?;
                if fill.quantity > existing.size * (1.0 + SIZE_EPSILON) + SIZE_EPSILON {
                    return Err(SimError::InsufficientPosition {
                        token: result.token.clone(),
                        requested: fill.quantity,
                        available: existing.size,
                    });
                }
                let quantity = fill.quantity.min(existing.size);
                let gross_pnl = (fill.filled_price - existing.entry_price) * quantity;
                let net_change = gross_pnl - fill.fee;
                let available = self.available_balance();
                // 释放的保证金也计入可用
                let released = existing.entry_price * quantity;
                if available + released + net_change < -self.config.margin_tolerance {
                    return Err(SimError::InsufficientMargin {
                        required: -net_change,
                        available: available + released,
                    });
                }

                let remaining = existing.size - quantity;
                let fraction = quantity / existing.size;
                self.used_margin = (self.used_margin - released).max(0.0);
                self.post(
                    LedgerTransactionType::TradeFee,
                    -fill.fee,
                    Some(&result.token),
                    Some(&result.intent_id),
                    at,
                );
                self.post(
                    LedgerTransactionType::RealizedPnl,
                    gross_pnl,
                    Some(&result.token),
                    Some(&result.intent_id),
                    at,
                );
                self.realized_pnl += gross_pnl;

                let mut position = SimulatedPosition {
                    size: remaining,
                    cost_basis: existing.cost_basis * (1.0 - fraction),
                    current_price: fill.base_price,
                    ..existing
                };

                if remaining <= SIZE_EPSILON {
                    position.size = 0.0;
                    position.unrealized_pnl = 0.0;
                    position.status = PositionStatus::Closed;
                    self.positions.remove(&result.token);
                    self.closed.push(position.clone());
                    info!("📉 平仓 {} 已实现盈亏 {:.4}", result.token, gross_pnl);
                } else {
                    position.unrealized_pnl = (position.current_price - position.entry_price) * position.size;
                    self.positions.insert(result.token.clone(), position.clone());
                    debug!("减仓 {} 剩余 {:.8}", result.token, remaining);
                }
                self.refresh_equity();

                Ok(AppliedFill {
                    position,
                    fee: fill.fee,
                    realized_pnl: Some(gross_pnl),
                })
            }
        }
    }

    /// 出金，需满足可用余额
    pub fn withdraw(&mut self, amount: f64, at: Timestamp) -> Result<()> {
        if !(amount > 0.0) {
            return Err(SimError::Other(format!("出金金额非法: {}", amount)));
        }
        let available = self.available_balance();
        if available - amount < -self.config.margin_tolerance {
            return Err(SimError::InsufficientMargin {
                required: amount,
                available,
            });
        }
        self.post(LedgerTransactionType::Withdrawal, -amount, None, None, at);
        self.refresh_equity();
        Ok(())
    }

    /// 触及止损/止盈的持仓生成卖出意图，仍需经过完整的风控管线
    pub fn exit_intents(&self, slippage_tolerance: f64) -> Vec<OrderIntent> {
        self.positions
            .values()
            .filter_map(|p| {
                let tag = if p.current_price <= p.stop_loss {
                    "SL"
                } else if p.current_price >= p.take_profit {
                    "TP"
                } else {
                    return None;
                };
                Some(OrderIntent::new(
                    format!("{}-{}", p.id, tag),
                    p.token.clone(),
                    Direction::Sell,
                    p.size * p.current_price,
                    slippage_tolerance,
                ))
            })
            .collect()
    }
}

/// 账本的共享句柄；写入方通过互斥锁串行化
#[derive(Clone)]
pub struct LedgerHandle {
    inner: Arc<Mutex<PortfolioLedger>>,
}

impl LedgerHandle {
    pub fn new(ledger: PortfolioLedger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, PortfolioLedger>> {
        crate::safe_lock!(self.inner)
    }

    pub fn reader(&self) -> LedgerReader {
        LedgerReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// 只读视图，交给风控与签名管线做决策
#[derive(Clone)]
pub struct LedgerReader {
    inner: Arc<Mutex<PortfolioLedger>>,
}

impl LedgerReader {
    pub fn snapshot(&self) -> Result<PaperPortfolio> {
        Ok(crate::safe_lock!(self.inner)?.snapshot())
    }

    pub fn check_margin(&self, amount: f64) -> Result<bool> {
        Ok(crate::safe_lock!(self.inner)?.check_margin(amount))
    }

    pub fn transactions(&self) -> Result<Vec<LedgerTransaction>> {
        Ok(crate::safe_lock!(self.inner)?.transactions().to_vec())
    }
}
