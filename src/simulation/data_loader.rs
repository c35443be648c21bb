//! 行情数据加载与规范化
//! 把来源各异的原始tick转为按时间升序排列的 MarketEvent 序列

use chrono::DateTime;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::fs;

use crate::core::types::{MarketEvent, MarketEventKind, Result, Timestamp};

/// 原始tick，数值字段可能是数字也可能是字符串
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTick {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub timestamp: Value,
    #[serde(alias = "tokenAddress", alias = "token", default)]
    pub token_address: Option<String>,
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(alias = "liquidityUsd", alias = "liquidity", default)]
    pub liquidity_usd: Option<Value>,
    #[serde(default)]
    pub volume: Option<Value>,
    #[serde(default)]
    pub ratio: Option<Value>,
    #[serde(default)]
    pub symbol: Option<String>,
}

/// 规范化结果
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub events: Vec<MarketEvent>,
    /// 因字段无法解析而丢弃的记录数
    pub dropped: usize,
}

pub struct DataLoader;

impl DataLoader {
    /// 规范化并稳定排序；同一时间戳保持输入顺序
    pub fn normalize(raw_ticks: Vec<RawTick>) -> LoadReport {
        let total = raw_ticks.len();
        let mut events = Vec::with_capacity(total);
        let mut dropped = 0;

        for (idx, tick) in raw_ticks.into_iter().enumerate() {
            match Self::convert(&tick) {
                Some(event) => events.push(event),
                None => {
                    dropped += 1;
                    debug!("丢弃第 {} 条无法解析的tick: {:?}", idx, tick);
                }
            }
        }

        // sort_by_key 是稳定排序
        events.sort_by_key(|e: &MarketEvent| e.timestamp);

        if dropped > 0 {
            warn!("数据规范化: 共 {} 条，丢弃 {} 条畸形记录", total, dropped);
        }

        LoadReport { events, dropped }
    }

    /// 从 JSON 数组文件加载；单条记录结构不对只丢弃该条
    pub fn load_file(path: &str) -> Result<LoadReport> {
        let contents = fs::read_to_string(path)?;
        let values: Vec<Value> = serde_json::from_str(&contents)?;

        let mut ticks = Vec::with_capacity(values.len());
        let mut malformed = 0;
        for value in values {
            match serde_json::from_value::<RawTick>(value) {
                Ok(tick) => ticks.push(tick),
                Err(e) => {
                    malformed += 1;
                    debug!("tick 结构错误: {}", e);
                }
            }
        }

        let mut report = Self::normalize(ticks);
        report.dropped += malformed;
        Ok(report)
    }

    fn convert(tick: &RawTick) -> Option<MarketEvent> {
        let timestamp = parse_timestamp(&tick.timestamp)?;
        let event_type = tick
            .event_type
            .as_deref()
            .unwrap_or("PRICE_UPDATE")
            .to_uppercase();

        let data = match event_type.as_str() {
            "PRICE_UPDATE" => MarketEventKind::PriceUpdate {
                price: positive(parse_number(tick.price.as_ref()?)?)?,
                liquidity_usd: optional_number(tick.liquidity_usd.as_ref())?,
                volume: optional_number(tick.volume.as_ref())?,
            },
            "VOLUME_SPIKE" => MarketEventKind::VolumeSpike {
                volume: parse_number(tick.volume.as_ref()?)?,
                ratio: optional_number(tick.ratio.as_ref())?.unwrap_or(1.0),
            },
            "TOKEN_DISCOVERED" => MarketEventKind::TokenDiscovered {
                symbol: tick
                    .symbol
                    .clone()
                    .or_else(|| tick.token_address.clone())?,
            },
            "LIQUIDITY_ADD" => MarketEventKind::LiquidityAdd {
                liquidity_usd: parse_number(tick.liquidity_usd.as_ref()?)?,
            },
            _ => return None,
        };

        Some(MarketEvent::new(timestamp, tick.token_address.clone(), data))
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// 字段缺失是合法的；存在但无法解析则整条无效
fn optional_number(value: Option<&Value>) -> Option<Option<f64>> {
    match value {
        None | Some(Value::Null) => Some(None),
        Some(v) => parse_number(v).map(Some),
    }
}

fn positive(n: f64) -> Option<f64> {
    (n > 0.0).then_some(n)
}

fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.round() as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp_millis()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tick(ts: Value, price: Value) -> RawTick {
        RawTick {
            timestamp: ts,
            token_address: Some("TOKEN".to_string()),
            price: Some(price),
            ..Default::default()
        }
    }

    #[test]
    fn out_of_order_ticks_are_sorted() {
        let report = DataLoader::normalize(vec![
            tick(json!(50), json!(1.0)),
            tick(json!(10), json!(2.0)),
            tick(json!(30), json!(3.0)),
        ]);
        let ts: Vec<i64> = report.events.iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![10, 30, 50]);
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn ties_keep_input_order() {
        let report = DataLoader::normalize(vec![
            tick(json!(20), json!(1.0)),
            tick(json!(10), json!(2.0)),
            tick(json!(20), json!(3.0)),
            tick(json!(20), json!("4.0")),
        ]);
        let prices: Vec<f64> = report
            .events
            .iter()
            .map(|e| match e.data {
                MarketEventKind::PriceUpdate { price, .. } => price,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(prices, vec![2.0, 1.0, 3.0, 4.0]);
    }

    #[test]
    fn malformed_records_are_dropped_and_counted() {
        let mut bad_liquidity = tick(json!(5), json!(1.0));
        bad_liquidity.liquidity_usd = Some(json!("lots"));

        let report = DataLoader::normalize(vec![
            tick(json!(1), json!("abc")),
            tick(json!("not-a-time"), json!(1.0)),
            tick(json!(2), json!(-3.0)),
            bad_liquidity,
            tick(json!("2024-01-01T00:00:00Z"), json!(1.5)),
        ]);
        assert_eq!(report.dropped, 4);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].timestamp, 1_704_067_200_000);
    }

    #[test]
    fn typed_events_are_recognised() {
        let raw = vec![
            RawTick {
                event_type: Some("LIQUIDITY_ADD".into()),
                timestamp: json!(3),
                token_address: Some("T".into()),
                liquidity_usd: Some(json!("250000")),
                ..Default::default()
            },
            RawTick {
                event_type: Some("token_discovered".into()),
                timestamp: json!(1),
                token_address: Some("T".into()),
                symbol: Some("TKN".into()),
                ..Default::default()
            },
            RawTick {
                event_type: Some("SOMETHING_ELSE".into()),
                timestamp: json!(2),
                ..Default::default()
            },
        ];
        let report = DataLoader::normalize(raw);
        assert_eq!(report.dropped, 1);
        assert_eq!(
            report.events[0].data,
            MarketEventKind::TokenDiscovered {
                symbol: "TKN".into()
            }
        );
        assert_eq!(
            report.events[1].data,
            MarketEventKind::LiquidityAdd {
                liquidity_usd: 250000.0
            }
        );
    }
}
