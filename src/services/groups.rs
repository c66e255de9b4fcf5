//! 分组指派
//!
//! 用户分组页是三栏布局：分组下拉、可指派用户池（AJAX 刷新的
//! 多选框）、添加按钮。选中分组会触发用户池异步刷新，刷新既没有
//! 完成事件也没有加载指示器，只能用和列表视图同一套办法：起步
//! 检测、在途请求归零、连续采样稳定。一次"添加"最多带一小批用户，
//! 超量会被远端静默截断，所以目标清单要分批喂。

use tokio::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{RunError, RunResult};
use crate::infrastructure::surface::{GroupBoard, GroupOption, Surface, UserPoolState};
use crate::runtime::{cancellable_wait, interruptible_sleep, CancelToken};
use crate::workflow::progress::Reporter;

/// 用户池稳定窗口需要的连续一致采样数
const POOL_STABLE_SAMPLES: usize = 3;

/// 用户池起步检测上限（秒）
const POOL_START_CAP_SECS: u64 = 10;

/// 分组指派器
pub struct GroupAssigner<'a, S: Surface> {
    surface: &'a S,
    token: &'a CancelToken,
    config: &'a Config,
    reporter: &'a Reporter,
}

impl<'a, S: Surface> GroupAssigner<'a, S> {
    pub fn new(
        surface: &'a S,
        token: &'a CancelToken,
        config: &'a Config,
        reporter: &'a Reporter,
    ) -> Self {
        Self {
            surface,
            token,
            config,
            reporter,
        }
    }

    /// 按名称查找分组选项
    pub async fn find_group(&self, group_name: &str) -> RunResult<GroupOption> {
        let options = self.surface.group_options().await?;
        options
            .into_iter()
            .find(|opt| opt.name == group_name)
            .ok_or_else(|| RunError::structural(format!("分组下拉中没有 {group_name}")))
    }

    /// 把目标用户分批指派到分组，返回实际指派数
    ///
    /// 每次"添加"之后用户池会整体刷新，下一批前重新选分组、
    /// 重新等池子稳定。
    pub async fn assign_group(&self, group: &GroupOption, targets: &[String]) -> RunResult<usize> {
        let mut assigned = 0usize;
        let mut remaining: Vec<String> = targets.to_vec();

        for batch_index in 1..=self.config.max_batches {
            self.token.check()?;
            if remaining.is_empty() {
                break;
            }

            let baseline = self.surface.user_pool_state().await?;
            self.surface.select_group(&group.value).await?;
            self.wait_for_user_pool(&baseline).await?;

            let available = self.surface.available_usernames().await?;
            let batch: Vec<String> = remaining
                .iter()
                .filter(|name| available.iter().any(|a| a == *name))
                .take(self.config.group_batch_size)
                .cloned()
                .collect();

            if batch.is_empty() {
                // 池子里已经没有任何目标用户（可能已在组内）
                debug!("用户池中没有剩余目标用户，指派结束");
                break;
            }

            let picked = self.surface.select_pool_users(&batch).await?;
            if picked == 0 {
                return Err(RunError::structural("用户池选中数为 0，与探测结果矛盾"));
            }
            self.surface.click_add().await?;
            assigned += picked;
            remaining.retain(|name| !batch.contains(name));

            self.reporter.info(format!(
                "✓ 第 {} 批已指派 {} 人到分组 {}（累计 {}）",
                batch_index, picked, group.name, assigned
            ));

            interruptible_sleep(
                self.token,
                Duration::from_millis(self.config.stability_interval_ms),
            )
            .await?;
        }

        if !remaining.is_empty() {
            self.reporter.warning(format!(
                "⚠️ 有 {} 个用户未能指派（不在可指派池中）",
                remaining.len()
            ));
        }
        Ok(assigned)
    }

    /// 三段式等待用户池刷新完成，返回稳定后的状态
    pub async fn wait_for_user_pool(&self, baseline: &UserPoolState) -> RunResult<UserPoolState> {
        wait_for_pool_stable(self.surface, self.token, self.config, baseline).await
    }
}

/// 三段式等待用户池刷新完成
///
/// 第三段的稳定计数只认"无在途请求"的采样：两次采样状态相同但
/// 有请求在途时，计数清零，而不是把在途期间的巧合一致当作稳定。
pub(crate) async fn wait_for_pool_stable<S: GroupBoard>(
    surface: &S,
    token: &CancelToken,
    config: &Config,
    baseline: &UserPoolState,
) -> RunResult<UserPoolState> {
    let timeout = Duration::from_secs(config.pool_timeout_secs);

    // 第一段：起步检测（状态变化或出现在途请求），容忍检测不到
    let start_cap = Duration::from_secs(POOL_START_CAP_SECS).min(timeout / 2);
    let started = cancellable_wait(
        token,
        start_cap,
        Duration::from_millis(500),
        "用户池开始刷新",
        || async move {
            let state = surface.user_pool_state().await?;
            Ok((state.request_in_flight || &state != baseline).then_some(()))
        },
    )
    .await;
    match started {
        Ok(()) => debug!("用户池已开始刷新"),
        Err(RunError::Timeout { .. }) => debug!("未检测到用户池刷新起步，可能已完成"),
        Err(e) => return Err(e),
    }

    // 第二段：等在途请求归零
    cancellable_wait(
        token,
        timeout,
        Duration::from_millis(500),
        "用户池刷新完成",
        || async move {
            let state = surface.user_pool_state().await?;
            Ok((!state.request_in_flight).then_some(()))
        },
    )
    .await?;

    // 第三段：连续采样稳定
    let interval = Duration::from_millis(config.stability_interval_ms);
    let mut last = surface.user_pool_state().await?;
    let mut consecutive = if last.request_in_flight { 0usize } else { 1 };
    let max_total = POOL_STABLE_SAMPLES * 4;
    for _ in 1..max_total {
        if consecutive >= POOL_STABLE_SAMPLES {
            break;
        }
        interruptible_sleep(token, interval).await?;
        let current = surface.user_pool_state().await?;
        if current.request_in_flight {
            debug!("稳定窗口期间又有在途请求，重新计数");
            consecutive = 0;
        } else if current == last {
            consecutive += 1;
        } else {
            consecutive = 1;
        }
        last = current;
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn pool(count: usize, in_flight: bool) -> UserPoolState {
        UserPoolState {
            option_count: count,
            first_option_text: format!("u{count}"),
            request_in_flight: in_flight,
        }
    }

    /// 按脚本逐次吐出用户池状态的假面板
    struct SeqPool {
        states: Mutex<VecDeque<UserPoolState>>,
    }

    impl SeqPool {
        fn new(states: Vec<UserPoolState>) -> Self {
            Self {
                states: Mutex::new(states.into()),
            }
        }
    }

    #[async_trait]
    impl GroupBoard for SeqPool {
        async fn group_options(&self) -> RunResult<Vec<GroupOption>> {
            unreachable!()
        }

        async fn select_group(&self, _value: &str) -> RunResult<()> {
            unreachable!()
        }

        async fn user_pool_state(&self) -> RunResult<UserPoolState> {
            let mut q = self.states.lock().unwrap();
            let front = q.front().cloned().unwrap_or_else(|| pool(0, false));
            if q.len() > 1 {
                q.pop_front();
            }
            Ok(front)
        }

        async fn available_usernames(&self) -> RunResult<Vec<String>> {
            unreachable!()
        }

        async fn select_pool_users(&self, _usernames: &[String]) -> RunResult<usize> {
            unreachable!()
        }

        async fn click_add(&self) -> RunResult<()> {
            unreachable!()
        }
    }

    fn pool_config() -> Config {
        Config {
            pool_timeout_secs: 1,
            stability_interval_ms: 1,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn pool_wait_returns_settled_state() {
        // 起步（刷新中）→ 在途归零 → 连续 3 次一致
        let board = SeqPool::new(vec![
            pool(5, true),
            pool(5, false),
            pool(8, false),
            pool(8, false),
            pool(8, false),
        ]);
        let token = CancelToken::new();
        let state = wait_for_pool_stable(&board, &token, &pool_config(), &pool(0, false))
            .await
            .unwrap();
        assert_eq!(state.option_count, 8);
        assert!(!state.request_in_flight);
    }

    #[tokio::test]
    async fn inflight_burst_resets_pool_stability_window() {
        // 在途请求重新出现的一串采样彼此完全相同，也不算稳定：
        // 必须等它归零后重新连续计满
        let board = SeqPool::new(vec![
            pool(5, true),  // 第一段：检测到刷新起步
            pool(5, false), // 第二段：在途归零
            pool(5, false), // 第三段初值
            pool(5, true),  // 在途突发，三次采样一致
            pool(5, true),
            pool(5, true),
            pool(8, false), // 真正的刷新结果
            pool(8, false),
            pool(8, false),
            pool(8, false),
        ]);
        let token = CancelToken::new();
        let state = wait_for_pool_stable(&board, &token, &pool_config(), &pool(0, false))
            .await
            .unwrap();
        assert_eq!(state.option_count, 8);
        assert!(!state.request_in_flight);
    }
}
