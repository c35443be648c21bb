//! 签名管线：广播前的最后一道沙箱闸门
//!
//! 顺序: 风控准入 -> 执行守卫 -> 沙箱检查 -> 熔断复查 -> 签名。
//! 整个序列在同一签名身份的单飞锁内执行，nonce 只在锁内递增。
//! 风控准入在锁内登记敞口预留，调用方持有预留直到成交落账。
//! 每次调用恰好写一条审计记录。

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::config::SandboxConfig;
use crate::core::error::{SandboxCheck, SimError};
use crate::core::time_controller::TimeController;
use crate::core::types::{
    AuditOutcome, AuditSeverity, OrderIntent, Result, SignedTransaction, SigningContext,
};
use crate::security::audit::{AuditRecord, SecurityAuditLog};
use crate::security::execution_guard::ExecutionGuard;
use crate::security::risk_guard::{ExposureReservation, RiskGuard};
use crate::simulation::ledger::LedgerReader;
use crate::utils::signature::tx_hash;

const COMPONENT: &str = "SigningPipeline";

/// 外部签名能力；密钥托管与算法不在本系统内
///
/// 实现必须给出确定的成功或失败。
#[async_trait]
pub trait Signer: Send + Sync {
    fn identity(&self) -> &str;
    async fn sign(&self, data: &[u8], intent_id: &str) -> Result<String>;
}

/// 按签名身份划分的单飞锁，锁内是该身份的下一个 nonce
///
/// 共用同一个注册表的多条管线，只要签名身份相同就彼此串行。
#[derive(Default)]
pub struct NonceRegistry {
    slots: std::sync::Mutex<HashMap<String, Arc<Mutex<u64>>>>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, identity: &str) -> Result<Arc<Mutex<u64>>> {
        let mut slots = crate::safe_lock!(self.slots)?;
        Ok(slots
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone())
    }
}

/// 通过全部闸门的结果：签名交易 + 尚未落账的敞口预留
#[derive(Debug)]
pub struct Authorization {
    pub signed: SignedTransaction,
    pub reservation: ExposureReservation,
}

pub struct SigningPipeline {
    risk_guard: Arc<RiskGuard>,
    execution_guard: ExecutionGuard,
    sandbox: SandboxConfig,
    signer: Arc<dyn Signer>,
    audit: Arc<SecurityAuditLog>,
    clock: Arc<TimeController>,
    ledger: LedgerReader,
    nonces: Arc<NonceRegistry>,
}

impl SigningPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        risk_guard: Arc<RiskGuard>,
        execution_guard: ExecutionGuard,
        sandbox: SandboxConfig,
        signer: Arc<dyn Signer>,
        audit: Arc<SecurityAuditLog>,
        clock: Arc<TimeController>,
        ledger: LedgerReader,
    ) -> Self {
        Self {
            risk_guard,
            execution_guard,
            sandbox,
            signer,
            audit,
            clock,
            ledger,
            nonces: Arc::new(NonceRegistry::new()),
        }
    }

    /// 与其他管线共享 nonce 注册表
    pub fn with_nonce_registry(mut self, nonces: Arc<NonceRegistry>) -> Self {
        self.nonces = nonces;
        self
    }

    pub fn signer_identity(&self) -> &str {
        self.signer.identity()
    }

    /// 处理一个订单意图，返回签名交易或带原因码的拒绝
    ///
    /// 敞口预留在返回时即释放；需要持有到落账的调用方用 [`authorize`](Self::authorize)。
    pub async fn process(
        &self,
        intent: &OrderIntent,
        context: &SigningContext,
    ) -> Result<SignedTransaction> {
        self.authorize(intent, context).await.map(|auth| auth.signed)
    }

    /// 跑完全部闸门并签名，返回签名交易与敞口预留
    pub async fn authorize(
        &self,
        intent: &OrderIntent,
        context: &SigningContext,
    ) -> Result<Authorization> {
        let slot = self.nonces.slot(self.signer_identity())?;
        let mut nonce = slot.lock().await;
        let outcome = self.gate_and_sign(&mut nonce, intent, context).await;

        let summary = format!(
            "{} {} {} {:.2} (gas {:.1}, mev {:.0})",
            intent.id,
            intent.direction,
            intent.token,
            intent.amount,
            context.gas_price_gwei,
            context.mev_risk_score
        );
        let record = match &outcome {
            Ok(auth) => {
                info!("✅ 签名通过: {} -> {}", intent.id, auth.signed.tx_hash);
                AuditRecord::new(AuditSeverity::Info, COMPONENT, "process", AuditOutcome::Allowed)
                    .details(format!("{} tx={}", summary, auth.signed.tx_hash))
            }
            Err(e) => {
                warn!("⛔ 签名拒绝: {} [{}] {}", intent.id, e.reason_code(), e);
                AuditRecord::new(e.severity(), COMPONENT, "process", AuditOutcome::Denied)
                    .reason(e.reason_code())
                    .details(format!("{}: {}", summary, e))
            }
        };
        self.audit.record(record)?;
        outcome
    }

    async fn gate_and_sign(
        &self,
        nonce: &mut u64,
        intent: &OrderIntent,
        context: &SigningContext,
    ) -> Result<Authorization> {
        // 准入、保证金/持仓检查与预留登记在风控写锁内一次完成
        let reservation = self.risk_guard.admit(intent, &self.ledger)?;
        self.execution_guard.validate(intent)?;
        self.sandbox_check(intent, context)?;

        // 签名前复查，防止检查期间发生的熔断被绕过
        let kill_switch = self.risk_guard.kill_switch()?;
        if kill_switch.status == crate::core::types::KillSwitchStatus::Halted {
            return Err(SimError::SystemHalted {
                trigger: kill_switch.trigger,
            });
        }

        let next_nonce = *nonce + 1;
        let payload = serde_json::to_vec(&json!({
            "intent_id": intent.id,
            "token": intent.token,
            "direction": intent.direction,
            "amount": intent.amount,
            "slippage_tolerance": intent.slippage_tolerance,
            "gas_price_gwei": context.gas_price_gwei,
            "signer": self.signer.identity(),
            "nonce": next_nonce,
            "timestamp": self.clock.now(),
        }))?;

        let timeout = Duration::from_millis(self.sandbox.signer_timeout_ms);
        let signature = match tokio::time::timeout(timeout, self.signer.sign(&payload, &intent.id)).await {
            Ok(Ok(signature)) => signature,
            Ok(Err(SimError::SignerFailure(msg))) => return Err(SimError::SignerFailure(msg)),
            Ok(Err(e)) => return Err(SimError::SignerFailure(e.to_string())),
            Err(_) => {
                return Err(SimError::SignerFailure(format!(
                    "签名超时 ({}ms)",
                    self.sandbox.signer_timeout_ms
                )))
            }
        };
        *nonce = next_nonce;
        debug!("签名完成 {} nonce={}", intent.id, next_nonce);

        Ok(Authorization {
            signed: SignedTransaction {
                intent_id: intent.id.clone(),
                tx_hash: tx_hash(&payload, &signature),
                signature,
                broadcast_time: self.clock.now(),
            },
            reservation,
        })
    }

    fn sandbox_check(&self, intent: &OrderIntent, context: &SigningContext) -> Result<()> {
        let cfg = &self.sandbox;
        if intent.slippage_tolerance > cfg.max_slippage_tolerance {
            return Err(sandbox(
                SandboxCheck::SlippageCap,
                format!(
                    "滑点容忍度 {:.2}% 超过上限 {:.2}%",
                    intent.slippage_tolerance * 100.0,
                    cfg.max_slippage_tolerance * 100.0
                ),
            ));
        }
        let required = intent.amount * cfg.min_liquidity_multiple;
        if context.liquidity_usd < required {
            return Err(sandbox(
                SandboxCheck::LiquidityDepth,
                format!("流动性 {:.2} < 需要 {:.2}", context.liquidity_usd, required),
            ));
        }
        if context.gas_price_gwei > cfg.max_gas_price_gwei {
            return Err(sandbox(
                SandboxCheck::GasSpike,
                format!(
                    "gas {:.1} gwei > 上限 {:.1}",
                    context.gas_price_gwei, cfg.max_gas_price_gwei
                ),
            ));
        }
        if context.mev_risk_score > cfg.max_mev_risk_score {
            return Err(sandbox(
                SandboxCheck::MevRisk,
                format!(
                    "MEV 风险 {:.0} > 上限 {:.0}",
                    context.mev_risk_score, cfg.max_mev_risk_score
                ),
            ));
        }
        Ok(())
    }
}

fn sandbox(check: SandboxCheck, message: String) -> SimError {
    SimError::SandboxRejection { check, message }
}
