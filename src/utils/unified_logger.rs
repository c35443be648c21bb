/// 统一日志管理模块
/// 基于 log 门面 + env_logger，为CLI和测试提供统一格式
use chrono::Local;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub default_level: String,
    pub console_output: bool,
    /// 是否在日志行中输出模块路径
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "INFO".to_string(),
            console_output: true,
            show_target: true,
        }
    }
}

impl LogConfig {
    /// 获取日志级别
    pub fn level_filter(&self) -> LevelFilter {
        match self.default_level.to_uppercase().as_str() {
            "TRACE" => LevelFilter::Trace,
            "DEBUG" => LevelFilter::Debug,
            "INFO" => LevelFilter::Info,
            "WARN" | "WARNING" => LevelFilter::Warn,
            "ERROR" => LevelFilter::Error,
            "OFF" => LevelFilter::Off,
            _ => LevelFilter::Info,
        }
    }
}

/// 初始化全局日志器，RUST_LOG 优先于配置
///
/// 重复初始化（例如多个测试）返回错误而不是 panic。
pub fn init_logger(config: &LogConfig) -> Result<(), log::SetLoggerError> {
    let level = if config.console_output {
        config.level_filter()
    } else {
        LevelFilter::Off
    };
    let show_target = config.show_target;

    let env = env_logger::Env::default().default_filter_or(level.to_string());
    env_logger::Builder::from_env(env)
        .format(move |buf, record| {
            if show_target {
                writeln!(
                    buf,
                    "[{}] [{}] [{}] {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    record.args()
                )
            } else {
                writeln!(
                    buf,
                    "[{}] [{}] {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.args()
                )
            }
        })
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing() {
        let mut config = LogConfig::default();
        assert_eq!(config.level_filter(), LevelFilter::Info);
        config.default_level = "warning".to_string();
        assert_eq!(config.level_filter(), LevelFilter::Warn);
        config.default_level = "nonsense".to_string();
        assert_eq!(config.level_filter(), LevelFilter::Info);
    }
}
