//! 浏览器句柄保险柜
//!
//! 工作线程与停止控制器可能同时触碰浏览器句柄：工作流正常收尾时
//! 归还句柄，升级路径则直接没收。用 `Mutex<Option<Browser>>` 配合
//! `Option::take` 表达"最多只有一方能拿走"，强制终止因此天然幂等。

use std::sync::{Arc, Mutex};

use chromiumoxide::Browser;
use tracing::{info, warn};

/// 浏览器句柄保险柜
#[derive(Clone, Default)]
pub struct ClientVault {
    inner: Arc<Mutex<Option<Browser>>>,
}

impl ClientVault {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Browser>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 存入句柄（替换旧值，旧句柄随 Drop 断开）
    pub fn store(&self, browser: Browser) {
        *self.lock() = Some(browser);
    }

    /// 取走句柄；已被取走则返回 None
    pub fn take(&self) -> Option<Browser> {
        self.lock().take()
    }

    pub fn is_stored(&self) -> bool {
        self.lock().is_some()
    }

    /// 强制断开会话（幂等）
    ///
    /// 丢弃句柄会切断 CDP 连接，远端浏览器本身继续存活。
    pub fn force_disconnect(&self) {
        match self.take() {
            Some(browser) => {
                drop(browser);
                warn!("⚠️ 浏览器会话已被强制断开");
            }
            None => {
                info!("浏览器会话已不存在，无需断开");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_disconnect_is_idempotent_without_handle() {
        let vault = ClientVault::new();
        assert!(!vault.is_stored());
        vault.force_disconnect();
        vault.force_disconnect();
        assert!(vault.take().is_none());
    }
}
