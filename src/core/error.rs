use thiserror::Error;

use crate::core::types::{AuditSeverity, FailureReason, KillSwitchTrigger};

/// 执行守卫的拒绝类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardViolation {
    /// 单笔金额超过上限
    MaxTradeSize,
    /// 代币在黑名单中
    Blacklisted,
    /// 金额非法（<=0 或非有限数）
    InvalidAmount,
    /// 滑点容忍度非法
    InvalidSlippage,
    /// 没有可用报价
    UnknownToken,
}

impl GuardViolation {
    pub fn code(&self) -> &'static str {
        match self {
            GuardViolation::MaxTradeSize => "max trade size",
            GuardViolation::Blacklisted => "blacklisted token",
            GuardViolation::InvalidAmount => "invalid amount",
            GuardViolation::InvalidSlippage => "invalid slippage",
            GuardViolation::UnknownToken => "unknown token",
        }
    }
}

/// 签名前沙箱检查项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxCheck {
    SlippageCap,
    LiquidityDepth,
    GasSpike,
    MevRisk,
}

impl SandboxCheck {
    pub fn code(&self) -> &'static str {
        match self {
            SandboxCheck::SlippageCap => "slippage cap",
            SandboxCheck::LiquidityDepth => "insufficient liquidity",
            SandboxCheck::GasSpike => "gas spike",
            SandboxCheck::MevRisk => "mev risk",
        }
    }
}

/// 敞口防火墙的拒绝类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureBreach {
    SingleTrade,
    TokenConcentration,
    TotalExposure,
    NoCapital,
}

impl ExposureBreach {
    pub fn code(&self) -> &'static str {
        match self {
            ExposureBreach::SingleTrade => "single trade exposure",
            ExposureBreach::TokenConcentration => "token exposure",
            ExposureBreach::TotalExposure => "total exposure",
            ExposureBreach::NoCapital => "no capital",
        }
    }
}

#[derive(Error, Debug)]
pub enum SimError {
    #[error("参数验证失败 [{}]: {message}", .violation.code())]
    Validation {
        violation: GuardViolation,
        message: String,
    },

    #[error("沙箱拒绝 [{}]: {message}", .check.code())]
    SandboxRejection { check: SandboxCheck, message: String },

    #[error("敞口超限 [{}]: {message}", .breach.code())]
    ExposureLimit {
        breach: ExposureBreach,
        message: String,
    },

    #[error("模拟成交失败: {0}")]
    SimulatedExecutionFailure(FailureReason),

    #[error("时间顺序错误: 当前 {current}, 试图设置为 {attempted}")]
    TimeOrderingViolation { current: i64, attempted: i64 },

    #[error("保证金不足: 需要 {required:.4}, 可用 {available:.4}")]
    InsufficientMargin { required: f64, available: f64 },

    #[error("持仓不足: {token} 需要 {requested:.8}, 持有 {available:.8}")]
    InsufficientPosition {
        token: String,
        requested: f64,
        available: f64,
    },

    #[error("系统已熔断停止交易 (触发: {trigger:?})")]
    SystemHalted { trigger: Option<KillSwitchTrigger> },

    #[error("签名失败: {0}")]
    SignerFailure(String),

    #[error("回放正在运行，不可重入")]
    ReplayInProgress,

    #[error("事件处理器失败: {0}")]
    HandlerFailed(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("YAML配置错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("其他错误: {0}")]
    Other(String),
}

impl SimError {
    /// 判断错误是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            // 混沌注入的失败是瞬时的，可在后续事件上重试同一意图
            SimError::SimulatedExecutionFailure(_) => true,
            SimError::Validation { .. } => true,
            SimError::SandboxRejection { .. } => true,
            SimError::ExposureLimit { .. } => true,
            _ => false,
        }
    }

    /// 拒绝原因码，审计日志与调用方据此区分触发的检查项
    pub fn reason_code(&self) -> &'static str {
        match self {
            SimError::Validation { violation, .. } => violation.code(),
            SimError::SandboxRejection { check, .. } => check.code(),
            SimError::ExposureLimit { breach, .. } => breach.code(),
            SimError::SimulatedExecutionFailure(reason) => reason.code(),
            SimError::TimeOrderingViolation { .. } => "time ordering",
            SimError::InsufficientMargin { .. } => "insufficient margin",
            SimError::InsufficientPosition { .. } => "insufficient position",
            SimError::SystemHalted { .. } => "system halted",
            SimError::SignerFailure(_) => "signer failure",
            SimError::ReplayInProgress => "replay in progress",
            SimError::HandlerFailed(_) => "handler failed",
            SimError::ConfigError(_) => "config",
            SimError::IoError(_) => "io",
            SimError::SerdeError(_) | SimError::YamlError(_) => "serde",
            SimError::Other(_) => "other",
        }
    }

    /// 拒绝写入审计日志时的严重程度
    ///
    /// 熔断拒绝为 BLOCKER；签名方故障和基础设施错误为 CRITICAL，会推送告警；其余为 WARNING。
    pub fn severity(&self) -> AuditSeverity {
        match self {
            SimError::SystemHalted { .. } => AuditSeverity::Blocker,
            SimError::SignerFailure(_)
            | SimError::TimeOrderingViolation { .. }
            | SimError::ConfigError(_)
            | SimError::Other(_) => AuditSeverity::Critical,
            _ => AuditSeverity::Warning,
        }
    }
}
