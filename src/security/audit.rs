//! 安全审计日志
//! 只追加；每个守卫/沙箱/熔断决策一条记录，CRITICAL 及以上同时推送给告警通道

use log::{error, info, warn};
use std::sync::{Arc, Mutex};

use crate::core::time_controller::TimeController;
use crate::core::types::{AuditEntry, AuditOutcome, AuditSeverity, Result};
use crate::utils::order_id::{RecordIdGenerator, RecordKind};

/// 告警通道（外部协作者）
///
/// 投递是即发即弃的，实现不得阻塞调用方，失败也不能影响交易管线。
pub trait AlertSink: Send + Sync {
    fn notify(&self, entry: &AuditEntry);
}

/// 只写日志的告警通道
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, entry: &AuditEntry) {
        error!(
            "🚨 [{}] {} -> {:?}: {}",
            entry.component, entry.action, entry.outcome, entry.details
        );
    }
}

/// 待写入的审计记录
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub severity: AuditSeverity,
    pub component: &'static str,
    pub action: String,
    pub outcome: AuditOutcome,
    pub reason_code: Option<String>,
    pub details: String,
}

impl AuditRecord {
    pub fn new(
        severity: AuditSeverity,
        component: &'static str,
        action: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            severity,
            component,
            action: action.into(),
            outcome,
            reason_code: None,
            details: String::new(),
        }
    }

    pub fn reason(mut self, code: impl Into<String>) -> Self {
        self.reason_code = Some(code.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

pub struct SecurityAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    ids: RecordIdGenerator,
    clock: Arc<TimeController>,
    alert_sink: Option<Arc<dyn AlertSink>>,
}

impl SecurityAuditLog {
    pub fn new(clock: Arc<TimeController>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            ids: RecordIdGenerator::new(RecordKind::Audit),
            clock,
            alert_sink: None,
        }
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    /// 追加一条记录，整条写入，不存在部分记录
    pub fn record(&self, record: AuditRecord) -> Result<AuditEntry> {
        let now = self.clock.now();
        let entry = AuditEntry {
            id: self.ids.generate(now),
            timestamp: now,
            severity: record.severity,
            component: record.component.to_string(),
            action: record.action,
            outcome: record.outcome,
            reason_code: record.reason_code,
            details: record.details,
        };

        {
            let mut entries = crate::safe_lock!(self.entries)?;
            entries.push(entry.clone());
        }

        match entry.severity {
            AuditSeverity::Info => info!(
                "[审计] {} {} -> {:?} {}",
                entry.component, entry.action, entry.outcome, entry.details
            ),
            _ => warn!(
                "[审计][{:?}] {} {} -> {:?} ({}) {}",
                entry.severity,
                entry.component,
                entry.action,
                entry.outcome,
                entry.reason_code.as_deref().unwrap_or("-"),
                entry.details
            ),
        }

        if entry.severity >= AuditSeverity::Critical {
            if let Some(sink) = &self.alert_sink {
                sink.notify(&entry);
            }
        }

        Ok(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// 最近 n 条记录（按写入顺序）
    pub fn tail(&self, n: usize) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|e| e[e.len().saturating_sub(n)..].to_vec())
            .unwrap_or_default()
    }
}
