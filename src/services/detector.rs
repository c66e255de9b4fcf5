//! 视图变化检测
//!
//! 远端界面的加载节奏完全不可预测：同一个搜索有时半秒出结果，
//! 有时要二十秒。判断"视图加载完了"分三段走：
//! 1. 起步检测 —— 指纹相对基线发生变化（容忍检测不到，视图可能
//!    加载太快或内容恰好相同）
//! 2. 终态等待 —— 出现明确的 has_data / empty 信号；加载指示器
//!    可见时即使已有行也继续等
//! 3. 稳定窗口 —— 连续 N 次采样指纹完全一致才算尘埃落定，
//!    中途翻动则重新计数

use tokio::time::Duration;
use tracing::{debug, warn};

use crate::error::{RunError, RunResult};
use crate::infrastructure::surface::{Fingerprint, ViewProbe, ViewSignal};
use crate::runtime::{cancellable_wait, interruptible_sleep, CancelToken};
use crate::utils::logging::truncate_text;

/// 起步检测阶段的上限（秒）
const START_DETECT_CAP_SECS: u64 = 10;

/// 稳定窗口最多允许的总采样数 = samples * RESTART_FACTOR
const RESTART_FACTOR: usize = 4;

/// 稳定窗口之后复核终态信号的最大轮数
const SIGNAL_CONFIRM_PASSES: usize = 3;

/// 视图变化检测器
pub struct ChangeDetector<'a, S: ViewProbe> {
    surface: &'a S,
    token: &'a CancelToken,
    /// 稳定窗口需要的连续一致采样数
    samples: usize,
    /// 采样间隔
    interval: Duration,
}

impl<'a, S: ViewProbe> ChangeDetector<'a, S> {
    pub fn new(surface: &'a S, token: &'a CancelToken, samples: usize, interval: Duration) -> Self {
        Self {
            surface,
            token,
            samples,
            interval,
        }
    }

    /// 采集当前视图指纹（触发动作前先拿基线）
    pub async fn capture(&self) -> RunResult<Fingerprint> {
        self.surface.fingerprint().await
    }

    /// 采样一次指纹；页面短暂不可达（导航间隙）按"仍在加载"处理
    async fn sample(&self) -> RunResult<Option<Fingerprint>> {
        match self.surface.fingerprint().await {
            Ok(fp) => Ok(Some(fp)),
            Err(RunError::Browser(e)) => {
                debug!("采样时页面短暂不可达: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 等待指纹相对基线发生变化，返回变化后的指纹
    pub async fn wait_until_changed(
        &self,
        baseline: &Fingerprint,
        timeout: Duration,
    ) -> RunResult<Fingerprint> {
        cancellable_wait(
            self.token,
            timeout,
            Duration::from_millis(500),
            "视图变化",
            || async move {
                Ok(self
                    .sample()
                    .await?
                    .filter(|current| current != baseline))
            },
        )
        .await
    }

    /// 三段式等待视图加载完成
    ///
    /// `baseline` 是触发动作（搜索、翻页）之前采集的指纹。
    pub async fn wait_for_view_loaded(
        &self,
        baseline: &Fingerprint,
        timeout: Duration,
    ) -> RunResult<ViewSignal> {
        // 第一段：起步检测，封顶 min(10s, timeout/2)，检测不到不算失败
        let start_cap = Duration::from_secs(START_DETECT_CAP_SECS).min(timeout / 2);
        match self.wait_until_changed(baseline, start_cap).await {
            Ok(fp) => debug!(
                "视图已开始变化（首行: {}）",
                truncate_text(&fp.first_item_text, 40)
            ),
            Err(RunError::Timeout { .. }) => {
                debug!("起步检测未发现变化，可能加载过快或内容相同")
            }
            Err(e) => return Err(e),
        }

        // 第二段：等待终态信号
        let mut signal = self.await_terminal_signal(timeout).await?;

        // 第三段：稳定窗口，之后复核终态信号
        //
        // 稳定窗口里内容可能还在追加（比如空表提示先出、数据行后到），
        // 窗口前采到的信号不作数，窗口后翻转就重新计窗。
        for _ in 0..SIGNAL_CONFIRM_PASSES {
            self.wait_until_stable().await?;
            let confirmed = match self.surface.view_signal().await {
                Ok(Some(s)) => s,
                // 又回到加载中（或导航间隙）：重新等终态
                Ok(None) | Err(RunError::Browser(_)) => {
                    signal = self.await_terminal_signal(timeout).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if confirmed == signal {
                return Ok(confirmed);
            }
            debug!("稳定窗口后终态信号翻转（{:?} -> {:?}），重新计窗", signal, confirmed);
            signal = confirmed;
        }

        warn!("⚠️ 终态信号始终未在稳定窗口内保持一致，按最后一次采样继续");
        Ok(signal)
    }

    /// 等待出现明确的 has_data / empty 信号
    async fn await_terminal_signal(&self, timeout: Duration) -> RunResult<ViewSignal> {
        cancellable_wait(
            self.token,
            timeout,
            Duration::from_millis(500),
            "视图加载完成",
            || async move {
                match self.surface.view_signal().await {
                    Ok(signal) => Ok(signal),
                    // 导航间隙按"仍在加载"处理
                    Err(RunError::Browser(_)) => Ok(None),
                    Err(e) => Err(e),
                }
            },
        )
        .await
    }

    /// 等待指纹连续 N 次采样一致
    ///
    /// 中途翻动重新计数；总采样数超过上限后带着警告放行，
    /// 而不是让一个永远在轻微抖动的页面卡死整次运行。
    pub async fn wait_until_stable(&self) -> RunResult<Fingerprint> {
        let mut last = self.surface.fingerprint().await?;
        let mut consecutive = 1usize;
        let max_total = self.samples.max(1) * RESTART_FACTOR;

        for _ in 1..max_total {
            if consecutive >= self.samples {
                debug!("视图已稳定（连续 {} 次一致）", consecutive);
                return Ok(last);
            }
            interruptible_sleep(self.token, self.interval).await?;
            match self.sample().await? {
                Some(current) if current == last => consecutive += 1,
                Some(current) => {
                    debug!("稳定窗口期间视图翻动，重新计数");
                    consecutive = 1;
                    last = current;
                }
                // 短暂不可达：不算一致也不算翻动
                None => consecutive = 1,
            }
        }

        if consecutive >= self.samples {
            return Ok(last);
        }
        warn!("⚠️ 视图始终未完全稳定，按当前内容继续");
        Ok(last)
    }
}
