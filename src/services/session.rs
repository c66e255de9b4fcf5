//! 会话管理
//!
//! 登录是人做的（浏览器插件证书认证没法自动化），引擎只负责附着到
//! 已登录的浏览器并持续看护会话：每次工作流动作前验证有效性，
//! 失效则重建。有效的定义是三件事同时成立：页面还能响应求值、
//! URL 落在应用主机上、登录态标志控件（域切换下拉）可见。

use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{RunError, RunResult};
use crate::infrastructure::surface::{Connector, Liveness, Navigator};
use crate::runtime::{cancellable_wait, CancelToken};

/// 会话管理器
pub struct SessionManager<C: Connector> {
    connector: C,
    config: Config,
    surface: Option<C::Surface>,
}

impl<C: Connector> SessionManager<C> {
    pub fn new(connector: C, config: Config) -> Self {
        Self {
            connector,
            config,
            surface: None,
        }
    }

    /// 当前会话是否有效
    pub async fn is_valid(&self) -> bool {
        match &self.surface {
            Some(surface) => Self::validate(surface, &self.config).await,
            None => false,
        }
    }

    async fn validate(surface: &C::Surface, config: &Config) -> bool {
        if !surface.is_alive().await {
            debug!("会话检查：页面不再响应");
            return false;
        }
        match surface.current_url().await {
            Ok(url) if url.contains(&config.app_host) => {}
            Ok(url) => {
                debug!("会话检查：URL 已离开应用主机 ({})", url);
                return false;
            }
            Err(_) => return false,
        }
        matches!(surface.domain_switch_visible().await, Ok(true))
    }

    /// 确保持有一个有效会话，必要时重建
    pub async fn ensure_valid(&mut self, token: &CancelToken) -> RunResult<&C::Surface> {
        token.check()?;
        let reusable = match &self.surface {
            Some(surface) => Self::validate(surface, &self.config).await,
            None => false,
        };

        if !reusable {
            if self.surface.take().is_some() {
                warn!("⚠️ 现有会话已失效，重新建立");
            }
            let surface = self.connector.connect().await?;
            Self::await_signed_in(&surface, token, &self.config).await?;
            info!("✓ 会话有效，已登录");
            self.surface = Some(surface);
        }

        match &self.surface {
            Some(surface) => Ok(surface),
            None => Err(RunError::structural("会话未建立")),
        }
    }

    /// 等待页面就绪并确认登录态
    async fn await_signed_in(
        surface: &C::Surface,
        token: &CancelToken,
        config: &Config,
    ) -> RunResult<()> {
        let timeout = Duration::from_secs(config.page_timeout_secs);
        cancellable_wait(token, timeout, Duration::from_millis(500), "页面就绪", || {
            async move { Ok(surface.page_ready().await?.then_some(())) }
        })
        .await?;

        if surface.is_error_page().await? {
            return Err(RunError::transient("应用入口落在服务端错误页"));
        }
        if !surface.domain_switch_visible().await? {
            return Err(RunError::auth(
                "未检测到登录态，请先在浏览器中手动完成证书登录",
            ));
        }
        Ok(())
    }

    /// 当前会话（可能不存在）
    pub fn surface(&self) -> Option<&C::Surface> {
        self.surface.as_ref()
    }

    /// 主动丢弃会话（页面连接随 Drop 断开）
    pub fn close(&mut self) {
        if self.surface.take().is_some() {
            info!("会话已关闭");
        }
    }
}
