//! 账户级风控：熔断开关 + 断路器 + 敞口防火墙
//!
//! 所有状态集中在一个 `RwLock<RiskState>` 里，写入只有这一个入口；
//! 断路器越限与熔断切换在同一次写锁内完成。

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::core::config::SecurityConfig;
use crate::core::error::{ExposureBreach, SimError};
use crate::core::time_controller::{day_index, TimeController};
use crate::core::types::{
    AuditOutcome, AuditSeverity, CircuitBreakerStatus, Direction, ExposureMetrics,
    KillSwitchState, KillSwitchStatus, KillSwitchTrigger, OrderIntent, PaperPortfolio, Result,
};
use crate::security::audit::{AuditRecord, SecurityAuditLog};
use crate::simulation::ledger::LedgerReader;

const COMPONENT: &str = "RiskGuard";

#[derive(Debug, Clone)]
struct RiskState {
    kill_switch: KillSwitchState,
    breaker: CircuitBreakerStatus,
    /// 最高净值(用于计算回撤)
    peak_equity: f64,
    last_equity: f64,
    day: i64,
    day_start_equity: f64,
    /// 已准入、尚未入账的买入敞口（按代币）
    pending: HashMap<String, f64>,
}

impl RiskState {
    fn pending_total(&self) -> f64 {
        self.pending.values().sum()
    }

    fn pending_for(&self, token: &str) -> f64 {
        self.pending.get(token).copied().unwrap_or(0.0)
    }
}

/// 准入预留：持有期间该笔买入金额计入敞口与保证金检查，drop 时释放
///
/// 由签名管线在准入时创建，执行方在成交入账或失败后丢弃。
#[must_use = "预留一旦丢弃，敞口立即释放"]
pub struct ExposureReservation {
    guard: Arc<RiskGuard>,
    token: String,
    amount: f64,
}

impl std::fmt::Debug for ExposureReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExposureReservation")
            .field("token", &self.token)
            .field("amount", &self.amount)
            .finish()
    }
}

impl Drop for ExposureReservation {
    fn drop(&mut self) {
        if self.amount <= 0.0 {
            return;
        }
        match self.guard.state.write() {
            Ok(mut state) => {
                let left = match state.pending.get_mut(&self.token) {
                    Some(reserved) => {
                        *reserved -= self.amount;
                        *reserved
                    }
                    None => 0.0,
                };
                if left <= 1e-9 {
                    state.pending.remove(&self.token);
                }
                debug!("释放预留敞口 {} {:.2}", self.token, self.amount);
            }
            Err(e) => error!("❌ 释放预留敞口失败 {}: {}", self.token, e),
        }
    }
}

pub struct RiskGuard {
    config: SecurityConfig,
    clock: Arc<TimeController>,
    audit: Arc<SecurityAuditLog>,
    state: RwLock<RiskState>,
}

impl RiskGuard {
    pub fn new(
        config: SecurityConfig,
        clock: Arc<TimeController>,
        audit: Arc<SecurityAuditLog>,
        start_equity: f64,
    ) -> Self {
        let now = clock.now();
        let state = RiskState {
            kill_switch: KillSwitchState {
                status: KillSwitchStatus::Active,
                trigger: None,
                timestamp: now,
                recovery_mode: false,
            },
            breaker: CircuitBreakerStatus {
                daily_pnl: 0.0,
                max_daily_loss: config.max_daily_loss_usd,
                drawdown_percent: 0.0,
                trade_count: 0,
                max_trades: config.max_trades_per_day,
                is_breached: false,
            },
            peak_equity: start_equity,
            last_equity: start_equity,
            day: day_index(now),
            day_start_equity: start_equity,
            pending: HashMap::new(),
        };
        Self {
            config,
            clock,
            audit,
            state: RwLock::new(state),
        }
    }

    pub fn kill_switch(&self) -> Result<KillSwitchState> {
        Ok(crate::safe_read!(self.state)?.kill_switch.clone())
    }

    pub fn circuit_breaker(&self) -> Result<CircuitBreakerStatus> {
        Ok(crate::safe_read!(self.state)?.breaker.clone())
    }

    pub fn is_halted(&self) -> Result<bool> {
        Ok(crate::safe_read!(self.state)?.kill_switch.status == KillSwitchStatus::Halted)
    }

    /// 新的一天重置日盈亏基线与交易计数
    fn roll_day(state: &mut RiskState, today: i64) {
        if today != state.day {
            info!(
                "📅 交易日切换 {} -> {}，重置日盈亏基线 {:.2}",
                state.day, today, state.last_equity
            );
            state.day = today;
            state.day_start_equity = state.last_equity;
            state.breaker.trade_count = 0;
            state.breaker.daily_pnl = 0.0;
        }
    }

    fn breached(&self, breaker: &CircuitBreakerStatus) -> Option<String> {
        if breaker.daily_pnl <= -self.config.max_daily_loss_usd {
            Some(format!(
                "日亏损 {:.2} 触及上限 {:.2}",
                breaker.daily_pnl, self.config.max_daily_loss_usd
            ))
        } else if breaker.drawdown_percent >= self.config.max_drawdown_percent {
            Some(format!(
                "回撤 {:.2}% 触及上限 {:.2}%",
                breaker.drawdown_percent, self.config.max_drawdown_percent
            ))
        } else if breaker.trade_count >= self.config.max_trades_per_day {
            Some(format!(
                "交易次数 {} 触及上限 {}",
                breaker.trade_count, self.config.max_trades_per_day
            ))
        } else {
            None
        }
    }

    /// 在账本变动后重新计算断路器；越限时同一周期内切换为 HALTED
    pub fn evaluate(&self, portfolio: &PaperPortfolio) -> Result<CircuitBreakerStatus> {
        let now = self.clock.now();
        let (status, tripped) = {
            let mut state = crate::safe_write!(self.state)?;
            Self::roll_day(&mut state, day_index(now));

            let equity = portfolio.equity;
            state.last_equity = equity;
            if equity > state.peak_equity {
                state.peak_equity = equity;
            }
            state.breaker.daily_pnl = equity - state.day_start_equity;
            state.breaker.drawdown_percent = if state.peak_equity > 0.0 {
                ((state.peak_equity - equity) / state.peak_equity * 100.0).max(0.0)
            } else {
                0.0
            };

            let reason = self.breached(&state.breaker);
            state.breaker.is_breached = reason.is_some();

            let tripped = match reason {
                Some(reason) if state.kill_switch.status == KillSwitchStatus::Active => {
                    state.kill_switch = KillSwitchState {
                        status: KillSwitchStatus::Halted,
                        trigger: Some(KillSwitchTrigger::RiskLimit),
                        timestamp: now,
                        recovery_mode: false,
                    };
                    Some(reason)
                }
                _ => None,
            };
            (state.breaker.clone(), tripped)
        };

        if let Some(reason) = tripped {
            error!("🚨 断路器触发，系统熔断: {}", reason);
            self.audit.record(
                AuditRecord::new(
                    AuditSeverity::Critical,
                    COMPONENT,
                    "circuit_breaker",
                    AuditOutcome::Halted,
                )
                .reason("circuit breaker")
                .details(reason),
            )?;
        }
        Ok(status)
    }

    /// 记录一笔已完成的交易
    pub fn record_trade(&self) -> Result<u32> {
        let mut state = crate::safe_write!(self.state)?;
        Self::roll_day(&mut state, day_index(self.clock.now()));
        state.breaker.trade_count += 1;
        Ok(state.breaker.trade_count)
    }

    /// 手动或风控触发熔断；已熔断时不重复记录
    pub fn engage(&self, trigger: KillSwitchTrigger, reason: &str) -> Result<KillSwitchState> {
        let now = self.clock.now();
        let state = {
            let mut state = crate::safe_write!(self.state)?;
            if state.kill_switch.status == KillSwitchStatus::Halted {
                return Ok(state.kill_switch.clone());
            }
            state.kill_switch = KillSwitchState {
                status: KillSwitchStatus::Halted,
                trigger: Some(trigger),
                timestamp: now,
                recovery_mode: false,
            };
            state.kill_switch.clone()
        };

        error!("🚨 熔断开关启动 ({:?}): {}", trigger, reason);
        self.audit.record(
            AuditRecord::new(
                AuditSeverity::Critical,
                COMPONENT,
                "kill_switch_engage",
                AuditOutcome::Halted,
            )
            .reason("kill switch")
            .details(reason.to_string()),
        )?;
        Ok(state)
    }

    /// 手动解除熔断，进入恢复模式
    ///
    /// 恢复时以最近一次净值重置日盈亏基线、峰值和交易计数，
    /// 否则下一次评估会立即再次熔断。
    pub fn disengage(&self, reason: &str) -> Result<KillSwitchState> {
        let now = self.clock.now();
        let state = {
            let mut state = crate::safe_write!(self.state)?;
            if state.kill_switch.status == KillSwitchStatus::Active {
                return Ok(state.kill_switch.clone());
            }
            state.kill_switch = KillSwitchState {
                status: KillSwitchStatus::Active,
                trigger: None,
                timestamp: now,
                recovery_mode: true,
            };
            let equity = state.last_equity;
            state.day_start_equity = equity;
            state.peak_equity = equity;
            state.breaker.daily_pnl = 0.0;
            state.breaker.drawdown_percent = 0.0;
            state.breaker.trade_count = 0;
            state.breaker.is_breached = false;
            state.kill_switch.clone()
        };

        warn!("⚠️ 熔断开关手动解除: {}", reason);
        self.audit.record(
            AuditRecord::new(
                AuditSeverity::Critical,
                COMPONENT,
                "kill_switch_disengage",
                AuditOutcome::Active,
            )
            .details(reason.to_string()),
        )?;
        Ok(state)
    }

    /// 根据持仓计算敞口指标
    pub fn exposure(&self, portfolio: &PaperPortfolio) -> ExposureMetrics {
        let total: f64 = portfolio.open_positions.iter().map(|p| p.notional().abs()).sum();
        let capital = portfolio.equity;
        let max_total = capital.max(0.0) * self.config.max_total_exposure_percent / 100.0;
        ExposureMetrics {
            total_exposure_usd: total,
            max_total_exposure: max_total,
            max_single_trade_percent: self.config.max_single_trade_percent,
            max_token_exposure_percent: self.config.max_token_exposure_percent,
            current_risk_score: if capital > 0.0 {
                (total / capital * 100.0).clamp(0.0, 100.0)
            } else {
                100.0
            },
        }
    }

    /// 已准入、尚未入账的买入总额
    pub fn pending_exposure(&self) -> Result<f64> {
        Ok(crate::safe_read!(self.state)?.pending_total())
    }

    /// 准入并预留敞口，供签名管线在单飞区内调用
    ///
    /// 账本快照与预留在同一次写锁内读取和登记，并发的买入不会基于同一份旧快照同时通过。
    /// 买入还要求可用保证金覆盖全部未入账预留；卖出要求持有该代币。
    pub fn admit(self: &Arc<Self>, intent: &OrderIntent, ledger: &LedgerReader) -> Result<ExposureReservation> {
        let mut state = crate::safe_write!(self.state)?;
        let portfolio = ledger.snapshot()?;
        self.check(&state, intent, &portfolio)?;

        let amount = match intent.direction {
            Direction::Buy => {
                // 非法金额留给执行守卫拒绝，不登记预留
                let reserved = if intent.amount.is_finite() && intent.amount > 0.0 {
                    intent.amount
                } else {
                    0.0
                };
                let required = state.pending_total() + reserved;
                if !ledger.check_margin(required)? {
                    return Err(SimError::InsufficientMargin {
                        required,
                        available: portfolio.balance - portfolio.used_margin,
                    });
                }
                if reserved > 0.0 {
                    *state.pending.entry(intent.token.clone()).or_insert(0.0) += reserved;
                }
                reserved
            }
            Direction::Sell => {
                if !portfolio.open_positions.iter().any(|p| p.token == intent.token) {
                    return Err(SimError::InsufficientPosition {
                        token: intent.token.clone(),
                        requested: intent.amount,
                        available: 0.0,
                    });
                }
                0.0
            }
        };

        Ok(ExposureReservation {
            guard: Arc::clone(self),
            token: intent.token.clone(),
            amount,
        })
    }

    /// 准入检查：熔断状态优先于一切，其次是敞口防火墙
    ///
    /// 卖出只减少敞口，不做敞口检查。尚未入账的预留计入敞口。
    fn check(&self, state: &RiskState, intent: &OrderIntent, portfolio: &PaperPortfolio) -> Result<()> {
        if state.kill_switch.status == KillSwitchStatus::Halted {
            return Err(SimError::SystemHalted {
                trigger: state.kill_switch.trigger,
            });
        }
        if state.breaker.is_breached {
            return Err(SimError::SystemHalted {
                trigger: Some(KillSwitchTrigger::RiskLimit),
            });
        }

        if intent.direction == Direction::Sell {
            return Ok(());
        }

        let capital = portfolio.equity;
        if capital <= 0.0 {
            return Err(exposure(ExposureBreach::NoCapital, format!("账户净值 {:.2}", capital)));
        }

        let single_pct = intent.amount / capital * 100.0;
        if single_pct > self.config.max_single_trade_percent {
            return Err(exposure(
                ExposureBreach::SingleTrade,
                format!(
                    "单笔占比 {:.2}% > {:.2}%",
                    single_pct, self.config.max_single_trade_percent
                ),
            ));
        }

        let token_now: f64 = portfolio
            .open_positions
            .iter()
            .filter(|p| p.token == intent.token)
            .map(|p| p.notional().abs())
            .sum::<f64>()
            + state.pending_for(&intent.token);
        let token_pct = (token_now + intent.amount) / capital * 100.0;
        if token_pct > self.config.max_token_exposure_percent {
            return Err(exposure(
                ExposureBreach::TokenConcentration,
                format!(
                    "{} 敞口占比 {:.2}% > {:.2}%",
                    intent.token, token_pct, self.config.max_token_exposure_percent
                ),
            ));
        }

        let metrics = self.exposure(portfolio);
        let total_after = metrics.total_exposure_usd + state.pending_total() + intent.amount;
        if total_after > metrics.max_total_exposure {
            return Err(exposure(
                ExposureBreach::TotalExposure,
                format!(
                    "总敞口 {:.2} > 上限 {:.2}",
                    total_after, metrics.max_total_exposure
                ),
            ));
        }
        Ok(())
    }
}

fn exposure(breach: ExposureBreach, message: String) -> SimError {
    SimError::ExposureLimit { breach, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PositionStatus, SimulatedPosition};

    const DAY: i64 = 86_400_000;

    fn setup(config: SecurityConfig) -> (Arc<TimeController>, Arc<SecurityAuditLog>, RiskGuard) {
        let clock = Arc::new(TimeController::new(0));
        let audit = Arc::new(SecurityAuditLog::new(clock.clone()));
        let guard = RiskGuard::new(config, clock.clone(), audit.clone(), 10_000.0);
        (clock, audit, guard)
    }

    fn portfolio(equity: f64, positions: Vec<SimulatedPosition>) -> PaperPortfolio {
        PaperPortfolio {
            balance: equity,
            start_balance: 10_000.0,
            equity,
            open_positions: positions,
            realized_pnl: 0.0,
            used_margin: 0.0,
        }
    }

    fn position(token: &str, notional: f64) -> SimulatedPosition {
        SimulatedPosition {
            id: format!("POS-{}", token),
            token: token.to_string(),
            entry_price: 1.0,
            size: notional,
            stop_loss: 0.9,
            take_profit: 1.2,
            cost_basis: notional,
            current_price: 1.0,
            unrealized_pnl: 0.0,
            status: PositionStatus::Open,
            opened_at: 0,
        }
    }

    fn buy(token: &str, amount: f64) -> OrderIntent {
        OrderIntent::new("i", token, Direction::Buy, amount, 0.01)
    }

    /// 针对给定快照的准入检查，不登记预留
    fn check_against(guard: &RiskGuard, intent: &OrderIntent, portfolio: &PaperPortfolio) -> Result<()> {
        let state = guard.state.read().unwrap();
        guard.check(&state, intent, portfolio)
    }

    #[test]
    fn daily_loss_trips_breaker_and_halts_in_same_cycle() {
        let (_, audit, guard) = setup(SecurityConfig::default());
        let status = guard.evaluate(&portfolio(9_500.0, vec![])).unwrap();

        assert_eq!(status.daily_pnl, -500.0);
        assert!(status.is_breached);
        let ks = guard.kill_switch().unwrap();
        assert_eq!(ks.status, KillSwitchStatus::Halted);
        assert_eq!(ks.trigger, Some(KillSwitchTrigger::RiskLimit));

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, AuditSeverity::Critical);
        assert_eq!(entries[0].outcome, AuditOutcome::Halted);
    }

    #[test]
    fn drawdown_is_measured_from_peak() {
        let config = SecurityConfig {
            max_daily_loss_usd: 1_000_000.0,
            max_drawdown_percent: 10.0,
            ..SecurityConfig::default()
        };
        let (_, _, guard) = setup(config);
        guard.evaluate(&portfolio(12_000.0, vec![])).unwrap();
        let status = guard.evaluate(&portfolio(11_000.0, vec![])).unwrap();
        assert!((status.drawdown_percent - 100.0 / 12.0).abs() < 1e-9);
        assert!(!status.is_breached);

        let status = guard.evaluate(&portfolio(10_700.0, vec![])).unwrap();
        assert!(status.is_breached);
        assert!(guard.is_halted().unwrap());
    }

    #[test]
    fn trade_count_limit_and_day_rollover() {
        let config = SecurityConfig {
            max_trades_per_day: 2,
            ..SecurityConfig::default()
        };
        let (clock, _, guard) = setup(config);
        guard.record_trade().unwrap();
        assert!(!guard.evaluate(&portfolio(10_000.0, vec![])).unwrap().is_breached);

        // 新的一天计数清零
        clock.set_time(DAY + 1).unwrap();
        assert_eq!(guard.record_trade().unwrap(), 1);
        assert_eq!(guard.record_trade().unwrap(), 2);
        assert!(guard.evaluate(&portfolio(10_000.0, vec![])).unwrap().is_breached);
        assert!(guard.is_halted().unwrap());
    }

    #[test]
    fn halted_rejects_every_admission_until_manual_recovery() {
        let (_, audit, guard) = setup(SecurityConfig::default());
        guard.engage(KillSwitchTrigger::Manual, "operator").unwrap();
        // 重复启动不产生新的切换记录
        guard.engage(KillSwitchTrigger::Manual, "operator").unwrap();
        assert_eq!(audit.len(), 1);

        let err = check_against(&guard, &buy("X", 1.0), &portfolio(10_000.0, vec![])).unwrap_err();
        assert!(matches!(
            err,
            SimError::SystemHalted {
                trigger: Some(KillSwitchTrigger::Manual)
            }
        ));
        let sell = OrderIntent::new("s", "X", Direction::Sell, 1.0, 0.01);
        assert!(check_against(&guard, &sell, &portfolio(10_000.0, vec![])).is_err());

        // 评估不会自动恢复
        guard.evaluate(&portfolio(10_000.0, vec![])).unwrap();
        assert!(guard.is_halted().unwrap());

        let state = guard.disengage("checked").unwrap();
        assert_eq!(state.status, KillSwitchStatus::Active);
        assert!(state.recovery_mode);
        assert!(check_against(&guard, &buy("X", 1.0), &portfolio(10_000.0, vec![])).is_ok());

        let outcomes: Vec<AuditOutcome> = audit.entries().iter().map(|e| e.outcome).collect();
        assert_eq!(outcomes, vec![AuditOutcome::Halted, AuditOutcome::Active]);
    }

    #[test]
    fn recovery_rebases_breaker() {
        let (_, _, guard) = setup(SecurityConfig::default());
        guard.evaluate(&portfolio(9_000.0, vec![])).unwrap();
        assert!(guard.is_halted().unwrap());
        guard.disengage("new baseline").unwrap();

        let status = guard.evaluate(&portfolio(9_000.0, vec![])).unwrap();
        assert!(!status.is_breached);
        assert!(!guard.is_halted().unwrap());
    }

    #[test]
    fn exposure_firewall_limits() {
        let (_, _, guard) = setup(SecurityConfig::default());
        let p = portfolio(10_000.0, vec![position("X", 2_000.0), position("Y", 5_000.0)]);

        // 单笔 10% 上限
        let err = check_against(&guard, &buy("Z", 1_001.0), &p).unwrap_err();
        assert_eq!(err.reason_code(), "single trade exposure");
        // X 已有 20%，再加 600 超过 25%
        let err = check_against(&guard, &buy("X", 600.0), &p).unwrap_err();
        assert_eq!(err.reason_code(), "token exposure");
        // 总敞口 7000 + 1000 = 8000 不超过 80%
        assert!(check_against(&guard, &buy("Z", 1_000.0), &p).is_ok());

        let heavy = portfolio(10_000.0, vec![position("A", 2_500.0), position("B", 2_500.0), position("C", 2_500.0)]);
        let err = check_against(&guard, &buy("D", 600.0), &heavy).unwrap_err();
        assert_eq!(err.reason_code(), "total exposure");

        let metrics = guard.exposure(&p);
        assert_eq!(metrics.total_exposure_usd, 7_000.0);
        assert_eq!(metrics.current_risk_score, 70.0);
        assert_eq!(metrics.max_total_exposure, 8_000.0);
    }

    fn ledger_reader() -> LedgerReader {
        use crate::core::config::SimulationConfig;
        use crate::simulation::ledger::{LedgerHandle, PortfolioLedger};
        LedgerHandle::new(PortfolioLedger::new(SimulationConfig::default(), 0)).reader()
    }

    #[test]
    fn reservations_count_toward_token_exposure_until_dropped() {
        let (_, _, guard) = setup(SecurityConfig::default());
        let guard = Arc::new(guard);
        let ledger = ledger_reader();

        let first = guard.admit(&buy("X", 1_000.0), &ledger).unwrap();
        let _second = guard.admit(&buy("X", 1_000.0), &ledger).unwrap();
        assert_eq!(guard.pending_exposure().unwrap(), 2_000.0);

        // 账本里还没有持仓，但预留已占 20%，再加 1000 超过 25%
        let err = guard.admit(&buy("X", 1_000.0), &ledger).unwrap_err();
        assert_eq!(err.reason_code(), "token exposure");
        let empty = portfolio(10_000.0, vec![]);
        assert_eq!(
            check_against(&guard, &buy("X", 1_000.0), &empty).unwrap_err().reason_code(),
            "token exposure"
        );

        drop(first);
        assert_eq!(guard.pending_exposure().unwrap(), 1_000.0);
        assert!(guard.admit(&buy("X", 1_000.0), &ledger).is_ok());
        // 上一行的预留随语句结束释放
        assert_eq!(guard.pending_exposure().unwrap(), 1_000.0);
    }

    #[test]
    fn reservations_must_fit_available_margin() {
        let config = SecurityConfig {
            max_single_trade_percent: 100.0,
            max_token_exposure_percent: 100.0,
            max_total_exposure_percent: 1_000.0,
            ..SecurityConfig::default()
        };
        let (_, _, guard) = setup(config);
        let guard = Arc::new(guard);
        let ledger = ledger_reader();

        let _held = guard.admit(&buy("X", 6_000.0), &ledger).unwrap();
        let err = guard.admit(&buy("Y", 6_000.0), &ledger).unwrap_err();
        assert_eq!(err.reason_code(), "insufficient margin");
        assert_eq!(guard.pending_exposure().unwrap(), 6_000.0);
    }

    #[test]
    fn sell_reservation_requires_an_open_position() {
        let (_, _, guard) = setup(SecurityConfig::default());
        let guard = Arc::new(guard);
        let sell = OrderIntent::new("s", "X", Direction::Sell, 100.0, 0.01);
        let err = guard.admit(&sell, &ledger_reader()).unwrap_err();
        assert_eq!(err.reason_code(), "insufficient position");
        assert_eq!(guard.pending_exposure().unwrap(), 0.0);
    }
}
