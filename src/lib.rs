pub mod analysis;
pub mod core;
pub mod security;
pub mod simulation;
pub mod utils;

// 选择性导出，避免命名冲突
pub use core::{config::*, error::*, types::*};
pub use core::{EventBus, TimeController};
pub use security::*;
pub use simulation::*;
