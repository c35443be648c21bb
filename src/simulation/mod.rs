// 模拟模块 - 行情回放、撮合、账本与交易日志
pub mod backtest;
pub mod data_loader;
pub mod fill_engine;
pub mod journal;
pub mod ledger;
pub mod market;
pub mod provider;
pub mod replay;

pub use backtest::{BacktestOutcome, BacktestRunner, ScheduledOrder};
pub use data_loader::{DataLoader, LoadReport, RawTick};
pub use fill_engine::FillEngine;
pub use journal::{JournalSink, JsonlJournalSink, TradeJournal};
pub use ledger::{AppliedFill, LedgerHandle, LedgerReader, PortfolioLedger};
pub use market::{MarketState, Quote, QuoteSource};
pub use provider::{ExecutionReceipt, PaperExecutionProvider};
pub use replay::{ReplayEngine, ReplayHandle, ReplayReport};
