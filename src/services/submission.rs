//! 提交循环
//!
//! 勾选完成后进入批量响应表单。一个批次在远端被拆成若干个连续的
//! 请求页：提交一页后可能出现"下一请求"控件指向同批次的下一页，
//! 控件出现的时机不定，需要轮询探测。评论只在第一个请求页或远端
//! 没有预填时填写，远端会把它带到后续请求页。

use tokio::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{RunError, RunResult};
use crate::infrastructure::surface::{Surface, SubmitAction};
use crate::runtime::{cancellable_wait, interruptible_sleep, CancelToken};
use crate::workflow::progress::Reporter;

/// 提交循环
pub struct SubmissionLoop<'a, S: Surface> {
    surface: &'a S,
    token: &'a CancelToken,
    config: &'a Config,
    reporter: &'a Reporter,
}

impl<'a, S: Surface> SubmissionLoop<'a, S> {
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

    /// 提交当前已勾选的批次，返回实际提交的请求页数
    ///
    /// `first_batch` 为真时提交控件缺失按结构异常处理（整个流程的
    /// 前提已经不成立）；后续批次容忍缺失（可能只是远端把最后一个
    /// 请求页直接收走了）。
    pub async fn submit_batch(
        &self,
        action: SubmitAction,
        comment: &str,
        first_batch: bool,
    ) -> RunResult<usize> {
        self.token.check()?;
        self.surface.open_batch_response().await?;

        if !self.await_form(first_batch).await? {
            return Ok(0);
        }

        let mut submitted = 0usize;
        loop {
            self.token.check()?;

            let state = self.surface.form_state(action).await?;
            if submitted == 0 || !state.comment_prefilled {
                self.surface.fill_comment(comment).await?;
            }

            // 提交会弹原生 confirm，先放行再点击
            self.surface.disarm_dialogs().await?;
            self.surface.click_submit(action).await?;
            submitted += 1;
            self.reporter
                .info(format!("📤 已提交第 {} 个请求页（{}）", submitted, action.label()));

            interruptible_sleep(self.token, Duration::from_secs(self.config.settle_secs)).await?;

            if !self.advance_to_next_request(action).await? {
                break;
            }
            // 新请求页的表单也要等出来
            if !self.await_form(false).await? {
                break;
            }
        }

        // 最后一页提交后远端还要收尾，给它一段延长等待
        interruptible_sleep(
            self.token,
            Duration::from_secs(self.config.extended_wait_secs),
        )
        .await?;
        Ok(submitted)
    }

    /// 等待提交表单出现
    ///
    /// "只有取消没有提交"是明确的批次终点，提前返回而不是等满超时。
    async fn await_form(&self, required: bool) -> RunResult<bool> {
        let timeout = Duration::from_secs(self.config.page_timeout_secs);
        let result = cancellable_wait(
            self.token,
            timeout,
            Duration::from_millis(500),
            "提交表单",
            || async move {
                if self.surface.is_error_page().await? {
                    return Err(RunError::structural("提交表单页落在服务端错误页"));
                }
                let approve = self.surface.form_state(SubmitAction::Approve).await?;
                let reject = self.surface.form_state(SubmitAction::Reject).await?;
                if approve.submit_present || reject.submit_present {
                    return Ok(Some(true));
                }
                if approve.cancel_present {
                    return Ok(Some(false));
                }
                Ok(None)
            },
        )
        .await;

        match result {
            Ok(true) => Ok(true),
            Ok(false) if required => {
                Err(RunError::structural("批量响应表单只有取消控件，批次未开始"))
            }
            Ok(false) => {
                debug!("表单只剩取消控件，批次已收尾");
                Ok(false)
            }
            Err(RunError::Timeout { .. }) if !required => {
                debug!("提交表单未出现，视为批次已收尾");
                Ok(false)
            }
            Err(RunError::Timeout { .. }) => {
                Err(RunError::structural("批量响应表单未出现，提交控件缺失"))
            }
            Err(e) => Err(e),
        }
    }

    /// 轮询探测本批次是否还有下一个请求页
    ///
    /// 三种续页信号：显式的"下一请求"控件、提交控件自动重新出现
    /// （远端自动推进的表单）、或者什么都没有（批次收尾）。探测
    /// 额度用完时如果提交控件还在，可能只是下一个表单渲染慢，
    /// 延长等待一次再下结论。
    async fn advance_to_next_request(&self, action: SubmitAction) -> RunResult<bool> {
        for attempt in 0..self.config.continuation_attempts {
            self.token.check()?;
            if self.surface.click_continuation().await? {
                debug!("✓ 发现下一请求页（第 {} 次探测）", attempt + 1);
                return Ok(true);
            }
            if self.surface.is_error_page().await? {
                return Err(RunError::structural("提交后落在服务端错误页"));
            }
            interruptible_sleep(
                self.token,
                Duration::from_millis(self.config.continuation_interval_ms),
            )
            .await?;
        }

        if self.surface.form_state(action).await?.submit_present {
            interruptible_sleep(
                self.token,
                Duration::from_secs(self.config.extended_wait_secs),
            )
            .await?;
            if self.surface.click_continuation().await? {
                return Ok(true);
            }
            if self.surface.form_state(action).await?.submit_present {
                debug!("提交控件重新出现，按自动推进的表单继续");
                return Ok(true);
            }
        }
        debug!("未再出现下一请求页，本批次提交完毕");
        Ok(false)
    }
}
