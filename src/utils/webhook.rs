//! Webhook告警通道
//! 把 CRITICAL 审计记录推送到企业微信等平台；即发即弃，带限流

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::config::AlertConfig;
use crate::core::types::{AuditEntry, AuditSeverity};
use crate::security::audit::AlertSink;

/// 企业微信消息格式
#[derive(Debug, Serialize)]
struct WeChatWorkMessage {
    msgtype: String,
    markdown: MarkdownContent,
}

#[derive(Debug, Serialize)]
struct MarkdownContent {
    content: String,
}

fn severity_emoji(severity: AuditSeverity) -> &'static str {
    match severity {
        AuditSeverity::Info => "ℹ️",
        AuditSeverity::Warning => "⚠️",
        AuditSeverity::Critical => "🚨",
        AuditSeverity::Blocker => "⛔",
    }
}

pub struct WebhookAlertSink {
    config: AlertConfig,
    client: Client,
    /// 上次发送时间记录（用于限流）
    last_send_times: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl WebhookAlertSink {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            last_send_times: Mutex::new(HashMap::new()),
        }
    }

    /// 同一组件同一动作在限流窗口内只推送一次
    fn check_rate_limit(&self, key: &str, now: DateTime<Utc>) -> bool {
        let Ok(mut times) = self.last_send_times.lock() else {
            return false;
        };
        if let Some(last_time) = times.get(key) {
            let elapsed = now.signed_duration_since(*last_time);
            if elapsed < Duration::seconds(self.config.rate_limit_seconds as i64) {
                return false;
            }
        }
        times.insert(key.to_string(), now);
        true
    }

    fn build_message(entry: &AuditEntry, now: DateTime<Utc>) -> String {
        format!(
            r#"## {} {} / {}

**组件**: {}
**结论**: {:?}
**原因**: {}
**逻辑时间**: {}
**推送时间**: {}

{}

---
_自动推送 by paper-sim_"#,
            severity_emoji(entry.severity),
            entry.component,
            entry.action,
            entry.component,
            entry.outcome,
            entry.reason_code.as_deref().unwrap_or("-"),
            entry.timestamp,
            now.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.details
        )
    }
}

impl AlertSink for WebhookAlertSink {
    fn notify(&self, entry: &AuditEntry) {
        if !self.config.enabled {
            return;
        }

        let now = Utc::now();
        let key = format!("{}::{}", entry.component, entry.action);
        if !self.check_rate_limit(&key, now) {
            debug!("跳过推送，限流中: {}", key);
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("没有运行中的tokio运行时，丢弃告警 {}", entry.id);
            return;
        };

        let message = WeChatWorkMessage {
            msgtype: "markdown".to_string(),
            markdown: MarkdownContent {
                content: Self::build_message(entry, now),
            },
        };
        let client = self.client.clone();
        let url = self.config.webhook_url.clone();
        runtime.spawn(async move {
            match client.post(&url).json(&message).send().await {
                Ok(response) if response.status().is_success() => info!("成功发送Webhook告警"),
                Ok(response) => warn!("Webhook发送失败: {}", response.status()),
                Err(e) => warn!("Webhook请求失败: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AuditOutcome;

    fn sink(enabled: bool) -> WebhookAlertSink {
        WebhookAlertSink::new(AlertConfig {
            webhook_url: "http://127.0.0.1:9/hook".to_string(),
            enabled,
            rate_limit_seconds: 60,
        })
    }

    fn entry() -> AuditEntry {
        AuditEntry {
            id: "AUD-1-000001".into(),
            timestamp: 1_000,
            severity: AuditSeverity::Critical,
            component: "RiskGuard".into(),
            action: "circuit_breaker".into(),
            outcome: AuditOutcome::Halted,
            reason_code: Some("circuit breaker".into()),
            details: "日亏损 -500.00 触及上限 500.00".into(),
        }
    }

    #[test]
    fn rate_limit_per_key() {
        let s = sink(true);
        let t0 = Utc::now();
        assert!(s.check_rate_limit("RiskGuard::engage", t0));
        assert!(!s.check_rate_limit("RiskGuard::engage", t0 + Duration::seconds(30)));
        assert!(s.check_rate_limit("SigningPipeline::process", t0 + Duration::seconds(30)));
        assert!(s.check_rate_limit("RiskGuard::engage", t0 + Duration::seconds(61)));
    }

    #[test]
    fn message_contains_audit_fields() {
        let msg = WebhookAlertSink::build_message(&entry(), Utc::now());
        assert!(msg.contains("🚨 RiskGuard / circuit_breaker"));
        assert!(msg.contains("Halted"));
        assert!(msg.contains("circuit breaker"));
    }

    #[test]
    fn disabled_or_runtime_less_notify_is_a_noop() {
        sink(false).notify(&entry());
        // 启用但不在运行时内：记录限流后直接丢弃
        let s = sink(true);
        s.notify(&entry());
        assert!(!s.check_rate_limit("RiskGuard::circuit_breaker", Utc::now()));
    }
}
