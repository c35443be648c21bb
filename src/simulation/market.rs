//! 行情报价簿
//! 由事件总线订阅者更新，供成交引擎和权益重估读取

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::core::event_bus::EventBus;
use crate::core::types::{EventKind, MarketEvent, MarketEventKind, Result, Timestamp};

/// 单个代币的报价
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub liquidity_usd: f64,
    pub updated_at: Timestamp,
}

/// 成交引擎读取报价的接口
pub trait QuoteSource: Send + Sync {
    fn quote(&self, token: &str) -> Option<Quote>;
}

#[derive(Debug, Default)]
pub struct MarketState {
    quotes: RwLock<HashMap<String, Quote>>,
}

impl MarketState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quote(&self, token: &str, price: f64, liquidity_usd: f64, at: Timestamp) -> Result<()> {
        let mut quotes = crate::safe_write!(self.quotes)?;
        quotes.insert(
            token.to_string(),
            Quote {
                price,
                liquidity_usd,
                updated_at: at,
            },
        );
        Ok(())
    }

    /// 根据行情事件更新报价；没有代币地址的事件忽略
    pub fn apply_event(&self, event: &MarketEvent) -> Result<()> {
        let Some(token) = event.token_address.as_deref() else {
            return Ok(());
        };
        let mut quotes = crate::safe_write!(self.quotes)?;
        match &event.data {
            MarketEventKind::PriceUpdate {
                price,
                liquidity_usd,
                ..
            } => {
                let entry = quotes.entry(token.to_string()).or_insert(Quote {
                    price: *price,
                    liquidity_usd: 0.0,
                    updated_at: event.timestamp,
                });
                entry.price = *price;
                if let Some(liquidity) = liquidity_usd {
                    entry.liquidity_usd = *liquidity;
                }
                entry.updated_at = event.timestamp;
            }
            MarketEventKind::LiquidityAdd { liquidity_usd } => {
                if let Some(entry) = quotes.get_mut(token) {
                    entry.liquidity_usd += liquidity_usd;
                    entry.updated_at = event.timestamp;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// 当前价格表，用于权益重估
    pub fn price_map(&self) -> HashMap<String, f64> {
        self.quotes
            .read()
            .map(|q| q.iter().map(|(k, v)| (k.clone(), v.price)).collect())
            .unwrap_or_default()
    }

    /// 订阅价格与流动性事件，保持报价簿最新
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Result<()> {
        for kind in [EventKind::PriceUpdate, EventKind::LiquidityAdd] {
            let state = Arc::clone(self);
            bus.subscribe(kind, move |event| state.apply_event(event))?;
        }
        Ok(())
    }
}

impl QuoteSource for MarketState {
    fn quote(&self, token: &str) -> Option<Quote> {
        self.quotes.read().ok()?.get(token).copied()
    }
}
