// 安全模块 - 执行守卫、账户风控、签名沙箱与审计
pub mod audit;
pub mod execution_guard;
pub mod risk_guard;
pub mod signing;

pub use audit::{AlertSink, AuditRecord, LogAlertSink, SecurityAuditLog};
pub use execution_guard::ExecutionGuard;
pub use risk_guard::{ExposureReservation, RiskGuard};
pub use signing::{Authorization, NonceRegistry, Signer, SigningPipeline};
