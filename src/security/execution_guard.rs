//! 执行守卫：下单前的静态规则检查
//! 纯函数，只依赖意图与静态配置，可并发重复调用

use crate::core::config::ExecutionGuardConfig;
use crate::core::error::{GuardViolation, SimError};
use crate::core::types::{OrderIntent, Result};

#[derive(Debug, Clone)]
pub struct ExecutionGuard {
    config: ExecutionGuardConfig,
}

impl ExecutionGuard {
    pub fn new(config: ExecutionGuardConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, intent: &OrderIntent) -> Result<()> {
        if !intent.amount.is_finite() || intent.amount <= 0.0 {
            return Err(violation(
                GuardViolation::InvalidAmount,
                format!("{} 金额非法: {}", intent.id, intent.amount),
            ));
        }
        if !intent.slippage_tolerance.is_finite() || intent.slippage_tolerance < 0.0 {
            return Err(violation(
                GuardViolation::InvalidSlippage,
                format!("{} 滑点容忍度非法: {}", intent.id, intent.slippage_tolerance),
            ));
        }
        if intent.amount > self.config.max_trade_amount_usd {
            return Err(violation(
                GuardViolation::MaxTradeSize,
                format!(
                    "{} 金额 {:.2} 超过单笔上限 {:.2}",
                    intent.id, intent.amount, self.config.max_trade_amount_usd
                ),
            ));
        }
        if self.config.blacklist.contains(&intent.token) {
            return Err(violation(
                GuardViolation::Blacklisted,
                format!("{} 在黑名单中", intent.token),
            ));
        }
        Ok(())
    }
}

fn violation(violation: GuardViolation, message: String) -> SimError {
    SimError::Validation { violation, message }
}
