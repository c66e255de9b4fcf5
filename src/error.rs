//! 错误类型定义
//!
//! 整个引擎使用显式的 `Result<T, RunError>` 贯穿每一个挂起点，
//! `Cancelled` 是其中一个普通变体，在每个挂起点显式检查，
//! 而不是依赖异常跨任意调用深度传播。

use thiserror::Error;

/// 工作流运行错误
///
/// 错误分类：
/// - `Cancelled`: 用户主动取消，在工作流边界统一回收，不算失败
/// - `Timeout`: 等待远端状态超时
/// - `Transient`: 远端瞬时故障（SSL 握手、导航间隙），本地有限重试
/// - `Structural`: 页面结构不符合预期（控件缺失、意外页面），仅对当前批次致命
/// - `Auth`: 认证失败（重试额度耗尽后），对整次运行致命
#[derive(Debug, Error)]
pub enum RunError {
    /// 用户取消
    #[error("操作已被用户取消")]
    Cancelled,

    /// 等待超时
    #[error("等待 {what} 超时 ({secs} 秒)")]
    Timeout { what: String, secs: u64 },

    /// 远端瞬时故障
    #[error("远端瞬时故障: {message}")]
    Transient { message: String },

    /// 页面结构不符合预期
    #[error("页面结构不符合预期: {what}")]
    Structural { what: String },

    /// 认证失败
    #[error("认证失败: {message}")]
    Auth { message: String },

    /// 浏览器/CDP 错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    /// JSON 解析失败
    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),

    /// 文件操作失败
    #[error("文件操作失败: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// 创建超时错误
    pub fn timeout(what: impl Into<String>, secs: u64) -> Self {
        RunError::Timeout {
            what: what.into(),
            secs,
        }
    }

    /// 创建瞬时故障错误
    pub fn transient(message: impl Into<String>) -> Self {
        RunError::Transient {
            message: message.into(),
        }
    }

    /// 创建页面结构错误
    pub fn structural(what: impl Into<String>) -> Self {
        RunError::Structural { what: what.into() }
    }

    /// 创建认证错误
    pub fn auth(message: impl Into<String>) -> Self {
        RunError::Auth {
            message: message.into(),
        }
    }

    /// 是否为用户取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }

    /// 是否为可本地重试的瞬时故障
    pub fn is_transient(&self) -> bool {
        matches!(self, RunError::Transient { .. })
    }
}

/// 引擎统一结果类型
pub type RunResult<T> = Result<T, RunError>;
