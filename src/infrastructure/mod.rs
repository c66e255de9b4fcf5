//! 基础设施层
//!
//! - `surface`: 远端界面的能力接口与共享数据类型
//! - `cdp`: 基于 CDP 的能力接口实现（唯一的真实实现）
//! - `vault`: 浏览器句柄保险柜（强制终止用）

pub mod cdp;
pub mod surface;
pub mod vault;

pub use cdp::{CdpConnector, CdpSurface};
pub use surface::{
    Connector, Fingerprint, FormState, GroupBoard, GroupOption, ItemGrid, Liveness, Module,
    Navigator, Pager, SubmissionSurface, SubmitAction, Surface, UserPoolState, ViewProbe,
    ViewSignal,
};
pub use vault::ClientVault;
