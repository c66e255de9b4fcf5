//! # GovCA Approval Bot
//!
//! 驱动 GovCA 证书审批管理台的工作流执行引擎
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page），只暴露能力接口
//! - `CdpSurface` - 唯一的 page owner，把能力落到页面内 JS 求值
//! - `ClientVault` - 浏览器句柄保险柜，强制终止的唯一入口
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"引擎能做什么"，每个能力只管一件事
//! - `ChangeDetector` - 三段式视图加载检测（起步 / 终态 / 稳定窗口）
//! - `SessionManager` - 会话看护与重建
//! - `BatchSelector` - 跨页批次选择（选到即回）
//! - `SubmissionLoop` - 批次提交与续页推进
//! - `GroupAssigner` - 分组指派与用户池等待
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 把能力串成完整流程
//! - `WorkflowEngine` - 批准 / 拒绝 / 撤销处理 / 分组指派编排
//! - `Reporter` - 日志与进度的单通道上报
//!
//! ### ④ 控制层（Control）
//! - `control/` - 停止请求的分级升级
//! - `StopController` - 协作取消 → 强制断开 → 放弃等待
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod control;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod runtime;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::connect_to_browser_and_page;
pub use config::Config;
pub use control::{ForceQuit, StopController, StopState};
pub use domain::{counterpart_domain, qualify_username};
pub use error::{RunError, RunResult};
pub use infrastructure::{CdpConnector, CdpSurface, ClientVault, Connector, Surface};
pub use runtime::{CancelToken, WakeGuard};
pub use services::{BatchSelector, ChangeDetector, GroupAssigner, SessionManager, SubmissionLoop};
pub use workflow::{EngineEvent, Reporter, WorkflowEngine};
