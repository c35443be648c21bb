// 核心模块 - 时钟、事件总线、配置与错误类型
pub mod config;
pub mod error;
pub mod event_bus;
pub mod time_controller;
pub mod types;

pub use config::*;
pub use error::*;
pub use event_bus::{EventBus, EventHandler, PublishReport};
pub use time_controller::TimeController;
