//! 流程层
//!
//! - `items` - 目标条目台账
//! - `progress` - 进度与日志上报
//! - `orchestrator` - 工作流编排

pub mod items;
pub mod orchestrator;
pub mod progress;

pub use items::{ItemStatus, WorkItem, WorkSet};
pub use orchestrator::WorkflowEngine;
pub use progress::{EngineEvent, Level, Phase, ProgressSnapshot, Reporter};
