use crate::core::error::SimError;
use crate::core::types::{ReplaySpeed, Timestamp};
use crate::utils::unified_logger::LogConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;

/// 延迟区间（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyRange {
    pub min: u64,
    pub max: u64,
}

/// 手续费模型（小数费率）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeModel {
    pub maker: f64,
    pub taker: f64,
}

/// 模拟撮合配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub starting_balance: f64,
    /// 放大滑点用于压力测试
    pub slippage_multiplier: f64,
    pub latency_ms: LatencyRange,
    pub partial_fill_probability: f64,
    pub fee_model: FeeModel,
    /// 混沌失败概率
    pub fail_rate: f64,
    /// 成交延迟上限，超过即视为超时失败
    pub fill_timeout_ms: u64,
    /// 允许余额为负的容忍度
    pub margin_tolerance: f64,
    /// 止损距离（小数）
    pub stop_loss_pct: f64,
    /// 止盈距离（小数）
    pub take_profit_pct: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            starting_balance: 10000.0,
            slippage_multiplier: 1.2,
            latency_ms: LatencyRange { min: 200, max: 800 },
            partial_fill_probability: 0.05,
            fee_model: FeeModel {
                maker: 0.002,
                taker: 0.002,
            },
            fail_rate: 0.08,
            fill_timeout_ms: 5000,
            margin_tolerance: 0.0,
            stop_loss_pct: 0.10,
            take_profit_pct: 0.25,
        }
    }
}

/// 账户级风控配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub max_daily_loss_usd: f64,
    pub max_drawdown_percent: f64,
    pub max_trades_per_day: u32,
    pub max_single_trade_percent: f64,
    pub max_token_exposure_percent: f64,
    pub max_total_exposure_percent: f64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_usd: 500.0,
            max_drawdown_percent: 15.0,
            max_trades_per_day: 50,
            max_single_trade_percent: 10.0,
            max_token_exposure_percent: 25.0,
            max_total_exposure_percent: 80.0,
        }
    }
}

/// 签名前沙箱配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// 滑点容忍度硬上限（5%）
    pub max_slippage_tolerance: f64,
    /// 流动性至少为订单金额的倍数
    pub min_liquidity_multiple: f64,
    pub max_gas_price_gwei: f64,
    pub max_mev_risk_score: f64,
    pub signer_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_slippage_tolerance: 0.05,
            min_liquidity_multiple: 5.0,
            max_gas_price_gwei: 100.0,
            max_mev_risk_score: 70.0,
            signer_timeout_ms: 3000,
        }
    }
}

/// 静态执行守卫配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionGuardConfig {
    pub max_trade_amount_usd: f64,
    pub blacklist: HashSet<String>,
}

impl Default for ExecutionGuardConfig {
    fn default() -> Self {
        Self {
            max_trade_amount_usd: 2000.0,
            blacklist: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub speed: ReplaySpeed,
    /// 实时速度下每个事件的节奏切片
    pub base_slice_ms: u64,
    pub seed: u64,
    /// 绩效分析是否计入手续费
    pub include_fees: bool,
    /// 止损/止盈平仓意图使用的滑点容忍度
    pub exit_slippage_tolerance: f64,
    /// 回放窗口（含两端），早于起点的事件跳过，晚于终点的事件结束回放
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed: ReplaySpeed::Instant,
            base_slice_ms: 100,
            seed: 42,
            include_fees: false,
            exit_slippage_tolerance: 0.03,
            start_time: None,
            end_time: None,
        }
    }
}

/// Webhook告警配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub webhook_url: String,
    pub enabled: bool,
    /// 同一组件告警的最小间隔（秒）
    pub rate_limit_seconds: u64,
}

/// 启动时加载一次的全局配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub simulation: SimulationConfig,
    pub security: SecurityConfig,
    pub sandbox: SandboxConfig,
    pub guard: ExecutionGuardConfig,
    pub replay: ReplayConfig,
    pub alert: Option<AlertConfig>,
    pub log: LogConfig,
}

impl AppConfig {
    /// 从YAML文件加载配置
    pub fn from_file(path: &str) -> Result<Self, SimError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| SimError::ConfigError(format!("读取配置文件失败 {}: {}", path, e)))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, SimError> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验明显不合理的参数
    pub fn validate(&self) -> Result<(), SimError> {
        let sim = &self.simulation;
        if sim.starting_balance <= 0.0 {
            return Err(SimError::ConfigError("starting_balance 必须大于0".to_string()));
        }
        if sim.latency_ms.min > sim.latency_ms.max {
            return Err(SimError::ConfigError(format!(
                "latency_ms.min ({}) 大于 max ({})",
                sim.latency_ms.min, sim.latency_ms.max
            )));
        }
        for (name, value) in [
            ("fail_rate", sim.fail_rate),
            ("partial_fill_probability", sim.partial_fill_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::ConfigError(format!(
                    "{} 必须在 [0, 1] 区间: {}",
                    name, value
                )));
            }
        }
        if sim.fee_model.maker < 0.0 || sim.fee_model.taker < 0.0 {
            return Err(SimError::ConfigError("手续费率不能为负".to_string()));
        }
        if sim.slippage_multiplier < 0.0 || sim.margin_tolerance < 0.0 {
            return Err(SimError::ConfigError(
                "slippage_multiplier / margin_tolerance 不能为负".to_string(),
            ));
        }

        let sec = &self.security;
        if sec.max_daily_loss_usd <= 0.0 || sec.max_drawdown_percent <= 0.0 {
            return Err(SimError::ConfigError("风控阈值必须大于0".to_string()));
        }
        if self.sandbox.min_liquidity_multiple < 0.0 {
            return Err(SimError::ConfigError(
                "min_liquidity_multiple 不能为负".to_string(),
            ));
        }
        if self.replay.base_slice_ms == 0 && !self.replay.speed.is_instant() {
            return Err(SimError::ConfigError(
                "非即时回放需要 base_slice_ms > 0".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.replay.start_time, self.replay.end_time) {
            if start > end {
                return Err(SimError::ConfigError(format!(
                    "回放窗口起点 {} 晚于终点 {}",
                    start, end
                )));
            }
        }
        Ok(())
    }
}
