//! 取消令牌与可中断等待原语
//!
//! 远端界面很慢（页面过渡动辄数秒），如果没有亚秒级的取消粒度，
//! 用户点一次停止可能要卡几十秒才有反应。所以这里的两个等待原语
//! 都按短 tick 轮询令牌，而不是一觉睡满整个时长。

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::error::{RunError, RunResult};

/// `interruptible_sleep` 的最大睡眠增量
const SLEEP_TICK: Duration = Duration::from_millis(500);

/// `cancellable_wait` 的最大轮询间隔
const WAIT_TICK: Duration = Duration::from_secs(2);

/// 取消令牌
///
/// 工作线程高频读取，控制线程每次运行最多写一次（外加一次强制升级）。
/// set 是单调的：一旦置位，运行中途不会清除；只在开始新运行时 clear。
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消（幂等）
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// 开始新运行前清除
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// 防御性检查：任何远端 I/O 之前调用
    pub fn check(&self) -> RunResult<()> {
        if self.is_set() {
            Err(RunError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// 可中断睡眠
///
/// 以 ≤0.5 秒的增量分段睡眠，每段之间检查令牌；
/// 令牌一置位立刻以 `Cancelled` 返回，而不是睡满全程。
pub async fn interruptible_sleep(token: &CancelToken, duration: Duration) -> RunResult<()> {
    let deadline = Instant::now() + duration;
    loop {
        token.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        sleep((deadline - now).min(SLEEP_TICK)).await;
    }
}

/// 可取消的条件等待
///
/// 每 ≤2 秒轮询一次 `predicate`（一个远端状态检查）：
/// - 谓词返回 `Some(v)` 即成功返回 `v`
/// - 超时额度耗尽返回 `Timeout`
/// - 令牌先置位则返回 `Cancelled`
pub async fn cancellable_wait<T, F, Fut>(
    token: &CancelToken,
    timeout: Duration,
    tick: Duration,
    what: &str,
    mut predicate: F,
) -> RunResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RunResult<Option<T>>>,
{
    let tick = tick.min(WAIT_TICK);
    let deadline = Instant::now() + timeout;
    loop {
        token.check()?;
        if let Some(value) = predicate().await? {
            return Ok(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(RunError::timeout(what, timeout.as_secs()));
        }
        interruptible_sleep(token, tick.min(deadline - now)).await?;
    }
}
