//! 控制层
//!
//! - `escalation` - 停止请求的分级升级

pub mod escalation;

pub use escalation::{ForceQuit, StopController, StopState};
