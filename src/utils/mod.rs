// 工具模块 - 通用工具函数
pub mod order_id;
pub mod safe_macros;
pub mod signature;
pub mod unified_logger;
pub mod webhook;

pub use order_id::{parse_record_id, RecordIdGenerator, RecordIdInfo, RecordKind};
pub use signature::HmacSigner;
pub use unified_logger::{init_logger, LogConfig};
pub use webhook::WebhookAlertSink;
