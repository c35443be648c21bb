//! 模拟撮合引擎
//! 滑点、延迟、手续费与随机失败；延迟是唯一的挂起点

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::config::SimulationConfig;
use crate::core::error::{GuardViolation, SimError};
use crate::core::time_controller::TimeController;
use crate::core::types::{
    Direction, ExecutionResult, ExecutionStyle, FailureReason, FillDetails, FillOutcome,
    OrderIntent, Result,
};
use crate::simulation::market::QuoteSource;

/// 单次成交用到的随机数，每次固定抽取四个，保证同一种子下序列可复现
#[derive(Debug, Clone, Copy)]
struct FillDraws {
    latency: f64,
    chaos: f64,
    partial: f64,
    partial_fraction: f64,
}

pub struct FillEngine {
    config: SimulationConfig,
    quotes: Arc<dyn QuoteSource>,
    clock: Arc<TimeController>,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl FillEngine {
    /// 注入随机源，测试可传入固定序列
    pub fn new(
        config: SimulationConfig,
        quotes: Arc<dyn QuoteSource>,
        clock: Arc<TimeController>,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            config,
            quotes,
            clock,
            rng: Mutex::new(rng),
        }
    }

    pub fn with_seed(
        config: SimulationConfig,
        quotes: Arc<dyn QuoteSource>,
        clock: Arc<TimeController>,
        seed: u64,
    ) -> Self {
        Self::new(config, quotes, clock, Box::new(StdRng::seed_from_u64(seed)))
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn draw(&self) -> Result<FillDraws> {
        let mut rng = crate::safe_lock!(self.rng)?;
        Ok(FillDraws {
            latency: rng.gen::<f64>(),
            chaos: rng.gen::<f64>(),
            partial: rng.gen::<f64>(),
            partial_fraction: rng.gen::<f64>(),
        })
    }

    fn latency_from(&self, u: f64) -> u64 {
        let range = &self.config.latency_ms;
        let span = range.max.saturating_sub(range.min);
        let offset = ((span + 1) as f64 * u).floor() as u64;
        range.min + offset.min(span)
    }

    /// 模拟一次成交，不修改任何账本状态
    ///
    /// 报价缺失返回 Validation 错误；随机失败、超时、超出意图滑点容忍度
    /// 都以 `FillOutcome::Failed` 的形式返回。
    pub async fn simulate_fill(&self, intent: &OrderIntent) -> Result<ExecutionResult> {
        let quote = self
            .quotes
            .quote(&intent.token)
            .filter(|q| q.liquidity_usd > 0.0 && q.price > 0.0)
            .ok_or_else(|| SimError::Validation {
                violation: GuardViolation::UnknownToken,
                message: format!("{} 没有可用报价或流动性", intent.token),
            })?;

        let submitted_at = self.clock.now();
        let base_price = quote.price;
        let impact = intent.amount / quote.liquidity_usd;
        let slippage = impact * base_price * self.config.slippage_multiplier;
        let filled_price = match intent.direction {
            Direction::Buy => base_price + slippage,
            Direction::Sell => base_price - slippage,
        };

        let draws = self.draw()?;
        let latency_ms = self.latency_from(draws.latency);

        // 时间戳取成交落定时的逻辑时钟，不越过下一个回放事件；延迟单独记在 latency_ms
        let failed = |reason: FailureReason, latency_ms: u64| ExecutionResult {
            intent_id: intent.id.clone(),
            token: intent.token.clone(),
            direction: intent.direction,
            requested_amount: intent.amount,
            latency_ms,
            executed_at: self.clock.now().max(submitted_at),
            outcome: FillOutcome::Failed { reason },
        };

        // 唯一的挂起点，且有上限
        if latency_ms > self.config.fill_timeout_ms {
            tokio::time::sleep(Duration::from_millis(self.config.fill_timeout_ms)).await;
            warn!(
                "成交超时: {} 延迟 {}ms > 上限 {}ms",
                intent.id, latency_ms, self.config.fill_timeout_ms
            );
            return Ok(failed(FailureReason::Timeout, self.config.fill_timeout_ms));
        }
        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }

        if draws.chaos < self.config.fail_rate {
            let reason = if draws.chaos < self.config.fail_rate / 2.0 {
                FailureReason::Timeout
            } else {
                FailureReason::SlippageExceeded
            };
            warn!("混沌注入: {} 模拟失败 ({})", intent.id, reason);
            return Ok(failed(reason, latency_ms));
        }

        let slippage_pct = slippage / base_price;
        if slippage_pct > intent.slippage_tolerance || filled_price <= 0.0 {
            warn!(
                "滑点超限: {} 实际 {:.4}% > 容忍 {:.4}%",
                intent.id,
                slippage_pct * 100.0,
                intent.slippage_tolerance * 100.0
            );
            return Ok(failed(FailureReason::SlippageExceeded, latency_ms));
        }

        let partial = draws.partial < self.config.partial_fill_probability;
        let filled_amount = if partial {
            intent.amount * (0.5 + 0.5 * draws.partial_fraction)
        } else {
            intent.amount
        };
        let fee_rate = match intent.style {
            ExecutionStyle::Taker => self.config.fee_model.taker,
            ExecutionStyle::Maker => self.config.fee_model.maker,
        };
        let fee = filled_amount * fee_rate;
        // 买入按成交价折算数量；卖出金额按报价计，数量与持仓对齐
        let quantity = match intent.direction {
            Direction::Buy => filled_amount / filled_price,
            Direction::Sell => filled_amount / base_price,
        };

        debug!(
            "成交: {} {} {} @ {:.6} (基准 {:.6}, 滑点 {:.6}, 延迟 {}ms, 部分成交 {})",
            intent.id, intent.direction, intent.token, filled_price, base_price, slippage, latency_ms, partial
        );

        Ok(ExecutionResult {
            intent_id: intent.id.clone(),
            token: intent.token.clone(),
            direction: intent.direction,
            requested_amount: intent.amount,
            latency_ms,
            executed_at: self.clock.now().max(submitted_at),
            outcome: FillOutcome::Filled(FillDetails {
                base_price,
                filled_price,
                filled_amount,
                quantity,
                slippage,
                fee,
                partial,
            }),
        })
    }
}
