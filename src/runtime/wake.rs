//! 防休眠作用域守卫
//!
//! 长时间运行（全域分组指派可能跑几十分钟）期间机器休眠会中断会话。
//! 用一个显式的作用域资源表达"运行期间保持唤醒"：工作流开始时获取，
//! 所有退出路径（含错误与取消）随 Drop 释放。当前平台能力不可用时
//! 退化为记一条日志的空操作守卫，调用方不需要分支。

use tracing::{debug, warn};

/// 防休眠守卫（RAII）
pub struct WakeGuard {
    active: bool,
}

impl WakeGuard {
    /// 在工作流开始时获取
    pub fn acquire() -> Self {
        // 没有可移植的保持唤醒能力时退化为空操作
        warn!("⚠️ 防休眠能力不可用，长时间运行期间机器可能休眠");
        Self { active: false }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        if self.active {
            debug!("防休眠守卫已释放");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_degrades_to_noop() {
        let guard = WakeGuard::acquire();
        assert!(!guard.is_active());
        drop(guard);
    }
}
