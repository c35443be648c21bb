/// 统一的类型定义模块
/// 整合了模拟交易、风控与回放相关的数据结构
use serde::{Deserialize, Serialize};
use std::fmt;

// ============= 基础类型定义 =============

/// 结果类型别名
pub type Result<T> = std::result::Result<T, crate::core::error::SimError>;

/// 逻辑时间戳（毫秒）
pub type Timestamp = i64;

// ============= 市场事件 =============

/// 事件类别，作为事件总线的订阅键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    PriceUpdate,
    VolumeSpike,
    TokenDiscovered,
    LiquidityAdd,
    BacktestComplete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            EventKind::PriceUpdate => "PRICE_UPDATE",
            EventKind::VolumeSpike => "VOLUME_SPIKE",
            EventKind::TokenDiscovered => "TOKEN_DISCOVERED",
            EventKind::LiquidityAdd => "LIQUIDITY_ADD",
            EventKind::BacktestComplete => "BACKTEST_COMPLETE",
        };
        write!(f, "{}", name)
    }
}

/// 事件负载，每种事件类型有固定结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketEventKind {
    PriceUpdate {
        price: f64,
        #[serde(default)]
        liquidity_usd: Option<f64>,
        #[serde(default)]
        volume: Option<f64>,
    },
    VolumeSpike {
        volume: f64,
        ratio: f64,
    },
    TokenDiscovered {
        symbol: String,
    },
    LiquidityAdd {
        liquidity_usd: f64,
    },
    BacktestComplete {
        events_processed: usize,
    },
}

impl MarketEventKind {
    pub fn kind(&self) -> EventKind {
        match self {
            MarketEventKind::PriceUpdate { .. } => EventKind::PriceUpdate,
            MarketEventKind::VolumeSpike { .. } => EventKind::VolumeSpike,
            MarketEventKind::TokenDiscovered { .. } => EventKind::TokenDiscovered,
            MarketEventKind::LiquidityAdd { .. } => EventKind::LiquidityAdd,
            MarketEventKind::BacktestComplete { .. } => EventKind::BacktestComplete,
        }
    }
}

/// 市场事件，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub timestamp: Timestamp,
    #[serde(default)]
    pub token_address: Option<String>,
    pub data: MarketEventKind,
}

impl MarketEvent {
    pub fn new(timestamp: Timestamp, token_address: Option<String>, data: MarketEventKind) -> Self {
        Self {
            timestamp,
            token_address,
            data,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }
}

// ============= 订单意图 =============

/// 交易方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// 成交角色，决定手续费费率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStyle {
    #[default]
    Taker,
    Maker,
}

/// 订单意图（由外部策略层产生，只被消费一次）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: String,
    pub token: String,
    pub direction: Direction,
    /// 名义金额（USD）
    pub amount: f64,
    /// 滑点容忍度，小数形式（0.01 = 1%）
    pub slippage_tolerance: f64,
    #[serde(default)]
    pub style: ExecutionStyle,
}

impl OrderIntent {
    pub fn new(
        id: impl Into<String>,
        token: impl Into<String>,
        direction: Direction,
        amount: f64,
        slippage_tolerance: f64,
    ) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
            direction,
            amount,
            slippage_tolerance,
            style: ExecutionStyle::Taker,
        }
    }
}

/// 网络拥堵程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkCongestion {
    Low,
    Medium,
    High,
}

/// 签名上下文：时点市场状况，只用于沙箱决策
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningContext {
    pub gas_price_gwei: f64,
    pub liquidity_usd: f64,
    /// 0-100
    pub mev_risk_score: f64,
    pub network_congestion: NetworkCongestion,
}

// ============= 成交结果 =============

/// 模拟成交失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    SlippageExceeded,
    Timeout,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::SlippageExceeded => "slippage exceeded",
            FailureReason::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// 成交明细
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillDetails {
    pub base_price: f64,
    pub filled_price: f64,
    /// 实际成交名义金额（USD）
    pub filled_amount: f64,
    /// 成交数量（代币）
    pub quantity: f64,
    pub slippage: f64,
    pub fee: f64,
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillOutcome {
    Filled(FillDetails),
    Failed { reason: FailureReason },
}

/// 一次成交尝试的结果，产生后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub intent_id: String,
    pub token: String,
    pub direction: Direction,
    pub requested_amount: f64,
    pub latency_ms: u64,
    /// 逻辑成交时间 = 提交时刻 + 延迟
    pub executed_at: Timestamp,
    pub outcome: FillOutcome,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, FillOutcome::Filled(_))
    }

    pub fn fill(&self) -> Option<&FillDetails> {
        match &self.outcome {
            FillOutcome::Filled(details) => Some(details),
            FillOutcome::Failed { .. } => None,
        }
    }
}

/// 签名后的交易
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub intent_id: String,
    pub tx_hash: String,
    pub signature: String,
    pub broadcast_time: Timestamp,
}

// ============= 账本 =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// 模拟持仓，只能通过账本操作修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedPosition {
    pub id: String,
    pub token: String,
    pub entry_price: f64,
    /// 持有数量（代币）
    pub size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// 含手续费的持仓成本
    pub cost_basis: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub status: PositionStatus,
    pub opened_at: Timestamp,
}

impl SimulatedPosition {
    /// 按当前价格计算的名义价值
    pub fn notional(&self) -> f64 {
        self.size * self.current_price
    }
}

/// 模拟账户快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperPortfolio {
    pub balance: f64,
    pub start_balance: f64,
    pub equity: f64,
    pub open_positions: Vec<SimulatedPosition>,
    pub realized_pnl: f64,
    pub used_margin: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerTransactionType {
    Deposit,
    Withdrawal,
    TradeFee,
    RealizedPnl,
}

/// 账本流水，只追加不修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: String,
    pub timestamp: Timestamp,
    pub kind: LedgerTransactionType,
    pub amount: f64,
    pub token: Option<String>,
    pub reference_id: Option<String>,
}

// ============= 交易日志 =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JournalStatus {
    Attempted,
    Filled,
    Failed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeJournalEntry {
    pub id: String,
    pub intent_id: String,
    pub token: String,
    pub action: Direction,
    pub status: JournalStatus,
    pub price: Option<f64>,
    pub amount: f64,
    pub fee: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub reason: Option<String>,
    /// 模拟成交延迟，只有成交结果（成功或失败）才有
    #[serde(default)]
    pub execution_latency_ms: Option<u64>,
    pub timestamp: Timestamp,
}

// ============= 风控状态 =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub daily_pnl: f64,
    pub max_daily_loss: f64,
    pub drawdown_percent: f64,
    pub trade_count: u32,
    pub max_trades: u32,
    pub is_breached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KillSwitchStatus {
    Active,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillSwitchTrigger {
    Manual,
    RiskLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub status: KillSwitchStatus,
    pub trigger: Option<KillSwitchTrigger>,
    pub timestamp: Timestamp,
    pub recovery_mode: bool,
}

/// 敞口指标（只读派生视图）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureMetrics {
    pub total_exposure_usd: f64,
    pub max_total_exposure: f64,
    pub max_single_trade_percent: f64,
    pub max_token_exposure_percent: f64,
    /// 0-100
    pub current_risk_score: f64,
}

// ============= 审计 =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
    Blocker,
}

/// 审计结论。熔断状态切换直接记录切换后的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditOutcome {
    Allowed,
    Denied,
    Halted,
    Active,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: Timestamp,
    pub severity: AuditSeverity,
    pub component: String,
    pub action: String,
    pub outcome: AuditOutcome,
    /// 触发拒绝的检查项原因码
    pub reason_code: Option<String>,
    pub details: String,
}

// ============= 回测 =============

/// 回放速度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplaySpeed {
    Realtime,
    Fast,
    Turbo,
    Instant,
}

impl ReplaySpeed {
    pub fn multiplier(&self) -> u32 {
        match self {
            ReplaySpeed::Realtime => 1,
            ReplaySpeed::Fast => 10,
            ReplaySpeed::Turbo => 100,
            ReplaySpeed::Instant => 999,
        }
    }

    pub fn is_instant(&self) -> bool {
        matches!(self, ReplaySpeed::Instant)
    }

}

impl std::str::FromStr for ReplaySpeed {
    type Err = crate::core::error::SimError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "realtime" => Ok(ReplaySpeed::Realtime),
            "fast" => Ok(ReplaySpeed::Fast),
            "turbo" => Ok(ReplaySpeed::Turbo),
            "instant" => Ok(ReplaySpeed::Instant),
            other => Err(crate::core::error::SimError::ConfigError(format!(
                "未知回放速度: {}",
                other
            ))),
        }
    }
}

impl Default for ReplaySpeed {
    fn default() -> Self {
        ReplaySpeed::Instant
    }
}

/// 回测汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub sharpe_ratio: f64,
    /// 百分比形式（0.5 = 0.5%）
    pub max_drawdown: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub win_rate: f64,
    pub total_trades: usize,
}

impl BacktestResult {
    pub fn empty() -> Self {
        Self {
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            total_return: 0.0,
            total_return_pct: 0.0,
            win_rate: 0.0,
            total_trades: 0,
        }
    }
}

/// 交易汇总报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReport {
    pub total_trades: usize,
    pub win_rate: f64,
    pub pnl: f64,
}
