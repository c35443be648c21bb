//! 交易日志
//! 记录每一次尝试和完成的执行，只追加不修改；可挂接持久化通道

use log::warn;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::core::error::SimError;
use crate::core::types::{
    ExecutionResult, FillOutcome, JournalStatus, OrderIntent, Result, Timestamp, TradeJournalEntry,
    TradeReport,
};
use crate::utils::order_id::{RecordIdGenerator, RecordKind};

/// 持久化通道，存储技术可替换
pub trait JournalSink: Send + Sync {
    fn persist(&self, entry: &TradeJournalEntry) -> Result<()>;
}

/// 以 JSON Lines 形式追加到文件
pub struct JsonlJournalSink {
    file: Mutex<File>,
}

impl JsonlJournalSink {
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl JournalSink for JsonlJournalSink {
    fn persist(&self, entry: &TradeJournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = crate::safe_lock!(self.file)?;
        // 整行一次写入
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

pub struct TradeJournal {
    entries: Mutex<Vec<TradeJournalEntry>>,
    ids: RecordIdGenerator,
    sink: Option<Arc<dyn JournalSink>>,
}

impl Default for TradeJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeJournal {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            ids: RecordIdGenerator::new(RecordKind::Journal),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn JournalSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn append(&self, mut entry: TradeJournalEntry) -> Result<TradeJournalEntry> {
        entry.id = self.ids.generate(entry.timestamp);
        {
            let mut entries = crate::safe_lock!(self.entries)?;
            entries.push(entry.clone());
        }
        if let Some(sink) = &self.sink {
            // 持久化失败不影响内存中的记录
            if let Err(e) = sink.persist(&entry) {
                warn!("交易日志持久化失败 {}: {}", entry.id, e);
            }
        }
        Ok(entry)
    }

    pub fn log_attempt(&self, intent: &OrderIntent, at: Timestamp) -> Result<TradeJournalEntry> {
        self.append(TradeJournalEntry {
            id: String::new(),
            intent_id: intent.id.clone(),
            token: intent.token.clone(),
            action: intent.direction,
            status: JournalStatus::Attempted,
            price: None,
            amount: intent.amount,
            fee: None,
            realized_pnl: None,
            reason: None,
            execution_latency_ms: None,
            timestamp: at,
        })
    }

    /// 记录成交尝试的结果（成功或模拟失败）
    pub fn log_execution(
        &self,
        result: &ExecutionResult,
        realized_pnl: Option<f64>,
    ) -> Result<TradeJournalEntry> {
        let (status, price, amount, fee, reason) = match &result.outcome {
            FillOutcome::Filled(fill) => (
                JournalStatus::Filled,
                Some(fill.filled_price),
                fill.filled_amount,
                Some(fill.fee),
                None,
            ),
            FillOutcome::Failed { reason } => (
                JournalStatus::Failed,
                None,
                result.requested_amount,
                None,
                Some(reason.code().to_string()),
            ),
        };
        self.append(TradeJournalEntry {
            id: String::new(),
            intent_id: result.intent_id.clone(),
            token: result.token.clone(),
            action: result.direction,
            status,
            price,
            amount,
            fee,
            realized_pnl,
            reason,
            execution_latency_ms: Some(result.latency_ms),
            timestamp: result.executed_at,
        })
    }

    pub fn log_rejection(
        &self,
        intent: &OrderIntent,
        error: &SimError,
        at: Timestamp,
    ) -> Result<TradeJournalEntry> {
        self.append(TradeJournalEntry {
            id: String::new(),
            intent_id: intent.id.clone(),
            token: intent.token.clone(),
            action: intent.direction,
            status: JournalStatus::Rejected,
            price: None,
            amount: intent.amount,
            fee: None,
            realized_pnl: None,
            reason: Some(error.reason_code().to_string()),
            execution_latency_ms: None,
            timestamp: at,
        })
    }

    pub fn entries(&self) -> Vec<TradeJournalEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn tail(&self, n: usize) -> Vec<TradeJournalEntry> {
        self.entries
            .lock()
            .map(|e| e[e.len().saturating_sub(n)..].to_vec())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按已实现盈亏的平仓记录汇总
    pub fn report(&self) -> TradeReport {
        let entries = self.entries();
        let closed: Vec<f64> = entries.iter().filter_map(|e| e.realized_pnl).collect();
        let wins = closed.iter().filter(|p| **p > 0.0).count();
        TradeReport {
            total_trades: entries
                .iter()
                .filter(|e| e.status == JournalStatus::Filled)
                .count(),
            win_rate: if closed.is_empty() {
                0.0
            } else {
                wins as f64 / closed.len() as f64
            },
            pnl: closed.iter().sum(),
        }
    }
}
