//! 回测绩效分析
//! 只读取账本流水，按已实现盈亏计算收益、回撤、胜率与夏普比率

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::types::{BacktestResult, LedgerTransaction, LedgerTransactionType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerOptions {
    /// 手续费计入收益和回撤
    pub include_fees: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceAnalyzer {
    options: AnalyzerOptions,
}

impl PerformanceAnalyzer {
    pub fn new(options: AnalyzerOptions) -> Self {
        Self { options }
    }

    /// 分析账本流水
    ///
    /// 入金/出金视为资金划转，同时平移余额和峰值，不产生回撤。
    /// 空序列返回全零结果。
    pub fn analyze(&self, transactions: &[LedgerTransaction]) -> BacktestResult {
        let mut balance = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut capital = 0.0_f64;
        let mut max_drawdown = 0.0_f64;
        let mut total_return = 0.0_f64;
        let mut pnls: Vec<f64> = Vec::new();
        let mut returns: Vec<f64> = Vec::new();

        for tx in transactions {
            match tx.kind {
                LedgerTransactionType::Deposit | LedgerTransactionType::Withdrawal => {
                    balance += tx.amount;
                    peak = (peak + tx.amount).max(balance);
                    capital += tx.amount;
                    continue;
                }
                LedgerTransactionType::TradeFee if !self.options.include_fees => continue,
                LedgerTransactionType::TradeFee => {
                    total_return += tx.amount;
                    balance += tx.amount;
                }
                LedgerTransactionType::RealizedPnl => {
                    if balance > 0.0 {
                        returns.push(tx.amount / balance);
                    }
                    pnls.push(tx.amount);
                    total_return += tx.amount;
                    balance += tx.amount;
                }
            }

            if balance > peak {
                peak = balance;
            } else if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - balance) / peak);
            }
        }

        if pnls.is_empty() {
            return BacktestResult {
                total_return,
                total_return_pct: pct(total_return, capital),
                max_drawdown: max_drawdown * 100.0,
                ..BacktestResult::empty()
            };
        }

        let wins = pnls.iter().filter(|p| **p > 0.0).count();
        let result = BacktestResult {
            sharpe_ratio: sharpe(&returns),
            max_drawdown: max_drawdown * 100.0,
            total_return,
            total_return_pct: pct(total_return, capital),
            win_rate: wins as f64 / pnls.len() as f64,
            total_trades: pnls.len(),
        };
        debug!("绩效分析: {:?}", result);
        result
    }
}

fn pct(value: f64, base: f64) -> f64 {
    if base > 0.0 {
        value / base * 100.0
    } else {
        0.0
    }
}

/// 每笔收益的均值 / 样本标准差；少于两笔或标准差为零时为 0
fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std > 0.0 {
        mean / std
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(kind: LedgerTransactionType, amount: f64) -> LedgerTransaction {
        LedgerTransaction {
            id: String::new(),
            timestamp: 0,
            kind,
            amount,
            token: None,
            reference_id: None,
        }
    }

    fn history(pnls: &[f64]) -> Vec<LedgerTransaction> {
        let mut txs = vec![tx(LedgerTransactionType::Deposit, 10_000.0)];
        for pnl in pnls {
            txs.push(tx(LedgerTransactionType::TradeFee, -2.0));
            txs.push(tx(LedgerTransactionType::RealizedPnl, *pnl));
        }
        txs
    }

    #[test]
    fn realized_pnl_series_summary() {
        let result = PerformanceAnalyzer::default().analyze(&history(&[100.0, -50.0, 200.0]));

        assert_eq!(result.total_return, 250.0);
        assert!((result.total_return_pct - 2.5).abs() < 1e-12);
        assert_eq!(result.total_trades, 3);
        assert!((result.win_rate - 2.0 / 3.0).abs() < 1e-12);
        // 峰值 10100，谷底 10050
        assert!((result.max_drawdown - 50.0 / 10_100.0 * 100.0).abs() < 1e-9);
        assert!(result.max_drawdown > 0.48 && result.max_drawdown < 0.5);
        assert!(result.sharpe_ratio > 0.0);
    }

    #[test]
    fn fees_are_optional() {
        let analyzer = PerformanceAnalyzer::new(AnalyzerOptions { include_fees: true });
        let result = analyzer.analyze(&history(&[100.0, -50.0, 200.0]));
        assert_eq!(result.total_return, 244.0);
        assert_eq!(result.total_trades, 3);
    }

    #[test]
    fn empty_history_is_all_zero() {
        assert_eq!(PerformanceAnalyzer::default().analyze(&[]), BacktestResult::empty());
        let deposit_only = history(&[]);
        assert_eq!(PerformanceAnalyzer::default().analyze(&deposit_only), BacktestResult::empty());
    }

    #[test]
    fn single_trade_has_zero_sharpe() {
        let result = PerformanceAnalyzer::default().analyze(&history(&[40.0]));
        assert_eq!(result.sharpe_ratio, 0.0);
        assert_eq!(result.win_rate, 1.0);
        assert_eq!(result.max_drawdown, 0.0);
    }

    #[test]
    fn withdrawal_is_not_a_drawdown() {
        let mut txs = history(&[100.0]);
        txs.push(tx(LedgerTransactionType::Withdrawal, -5_000.0));
        txs.push(tx(LedgerTransactionType::RealizedPnl, 10.0));
        let result = PerformanceAnalyzer::default().analyze(&txs);
        assert_eq!(result.max_drawdown, 0.0);
        assert_eq!(result.total_return, 110.0);
    }
}
