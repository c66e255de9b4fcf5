//! 工作流编排
//!
//! 把各项能力串成完整流程：批准 / 拒绝 / 撤销处理 / 分组指派。
//! 批准与拒绝是双阶段流程：先处理指定域，再处理它的对偶域
//! （Sign <-> Auth），证书请求总是成对出现在两个域里。
//!
//! 错误回收只发生在这一层：
//! - `Cancelled` 统一收敛为"警告 + 终态快照 + false"，不算失败
//! - 结构异常只对当前批次致命，首批除外（前提已不成立）
//! - 每条成功 / 失败 / 取消路径都以终态快照收尾

use tokio::time::Duration;

use crate::config::Config;
use crate::domain::{counterpart_domain, qualify_username};
use crate::error::{RunError, RunResult};
use crate::infrastructure::surface::{
    Connector, Module, Navigator, SubmissionSurface, Surface, SubmitAction, ViewSignal,
};
use crate::runtime::{cancellable_wait, interruptible_sleep, CancelToken, WakeGuard};
use crate::services::{BatchSelector, ChangeDetector, GroupAssigner, SessionManager, SubmissionLoop};
use crate::workflow::items::WorkSet;
use crate::workflow::progress::Reporter;

/// 单个域阶段的结果
#[derive(Debug, Default)]
struct PhaseStats {
    submitted: usize,
    not_found: usize,
}

/// 工作流引擎
pub struct WorkflowEngine<C: Connector> {
    session: SessionManager<C>,
    config: Config,
    token: CancelToken,
    reporter: Reporter,
}

impl<C: Connector> WorkflowEngine<C> {
    pub fn new(connector: C, config: Config, token: CancelToken, reporter: Reporter) -> Self {
        Self {
            session: SessionManager::new(connector, config.clone()),
            config,
            token,
            reporter,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    pub async fn is_session_valid(&self) -> bool {
        self.session.is_valid().await
    }

    pub fn close_session(&mut self) {
        self.session.close();
    }

    // ========== 批准 / 拒绝 ==========

    /// 批准流程（可选地连带对偶域）
    pub async fn run_approval_workflow(
        &mut self,
        domain: &str,
        usernames: &[String],
        comment: &str,
        process_counterpart: bool,
    ) -> bool {
        self.run_decision(SubmitAction::Approve, domain, usernames, comment, process_counterpart)
            .await
    }

    /// 拒绝流程（可选地连带对偶域）
    pub async fn run_rejection_workflow(
        &mut self,
        domain: &str,
        usernames: &[String],
        comment: &str,
        process_counterpart: bool,
    ) -> bool {
        self.run_decision(SubmitAction::Reject, domain, usernames, comment, process_counterpart)
            .await
    }

    async fn run_decision(
        &mut self,
        action: SubmitAction,
        domain: &str,
        usernames: &[String],
        comment: &str,
        process_counterpart: bool,
    ) -> bool {
        let _wake = WakeGuard::acquire();
        self.token.clear();

        let phases: Vec<String> = std::iter::once(domain.to_string())
            .chain(counterpart_domain(domain).filter(|_| process_counterpart))
            .collect();
        let total = usernames.len() * phases.len();
        self.reporter.begin_run(phases.len());
        self.reporter.info(format!(
            "🚀 开始{}流程：域 {}（共 {} 个阶段），目标 {} 个用户",
            action.label(),
            domain,
            phases.len(),
            usernames.len()
        ));

        let mut grand = PhaseStats::default();
        for (idx, phase_domain) in phases.iter().enumerate() {
            self.reporter.set_phase(idx + 1, phase_domain.clone());
            let has_later_phase = idx + 1 < phases.len();
            let outcome = self
                .run_decision_phase(
                    action,
                    phase_domain,
                    usernames,
                    comment,
                    has_later_phase,
                    grand.submitted,
                    total,
                )
                .await;
            match outcome {
                Ok(stats) => {
                    grand.submitted += stats.submitted;
                    grand.not_found += stats.not_found;
                }
                Err(RunError::Cancelled) => {
                    self.reporter.warning("⚠️ 流程已被用户取消");
                    self.reporter.finish(grand.submitted, total, "已取消");
                    return false;
                }
                Err(e) => {
                    self.reporter
                        .error(format!("❌ {}流程失败: {}", action.label(), e));
                    self.reporter.finish(grand.submitted, total, "失败");
                    return false;
                }
            }
        }

        self.reporter.success(format!(
            "✅ {}流程完成：已提交 {}，未找到 {}，目标共 {}",
            action.label(),
            grand.submitted,
            grand.not_found,
            total
        ));
        self.reporter.finish(grand.submitted, total, "完成");
        true
    }

    /// 单个域阶段：选域 → 搜索待处理列表 → 选择/提交循环
    async fn run_decision_phase(
        &mut self,
        action: SubmitAction,
        domain: &str,
        usernames: &[String],
        comment: &str,
        has_later_phase: bool,
        progress_base: usize,
        progress_total: usize,
    ) -> RunResult<PhaseStats> {
        let surface = self.session.ensure_valid(&self.token).await?;
        surface.select_domain(domain).await?;

        let signal = open_pending_list(surface, &self.token, &self.config, false).await?;
        if signal == ViewSignal::Empty {
            if has_later_phase {
                // 主域空列表不算失败，请求可能只落在对偶域
                self.reporter
                    .info("当前域没有待处理请求，提前转入对偶域");
            } else {
                self.reporter.info("当前域没有待处理请求");
            }
            return Ok(PhaseStats::default());
        }

        if usernames.is_empty() {
            return self
                .run_whole_page_mode(action, comment, progress_base)
                .await;
        }

        let mut work = WorkSet::new(usernames.iter().map(|u| qualify_username(u, domain)));
        let surface = match self.session.surface() {
            Some(s) => s,
            None => return Err(RunError::structural("会话在阶段中途丢失")),
        };
        let selector = BatchSelector::new(surface, &self.token, &self.config, &self.reporter);
        let submission = SubmissionLoop::new(surface, &self.token, &self.config, &self.reporter);

        let mut first_batch = true;
        for _ in 1..=self.config.max_batches {
            self.token.check()?;
            let pending = work.pending();
            if pending.is_empty() {
                break;
            }

            let outcome = selector.select_next_batch(&pending).await?;
            if outcome.selected.is_empty() {
                if outcome.exhausted {
                    work.mark_pending_not_found();
                }
                break;
            }
            work.mark_selected(&outcome.selected);

            match submission.submit_batch(action, comment, first_batch).await {
                Ok(pages) => {
                    // 以实际走完的请求页数为准结算，短提交的余量退回待处理
                    work.commit_submitted(pages);
                    if pages < outcome.selected.len() {
                        self.reporter.warning(format!(
                            "⚠️ 本批勾选 {} 个，只提交了 {} 个请求页，余量退回待处理",
                            outcome.selected.len(),
                            pages
                        ));
                    }
                    self.reporter.progress(
                        progress_base + work.submitted_count(),
                        progress_total,
                        format!("本批提交了 {} 个请求页", pages),
                    );
                }
                Err(e @ RunError::Structural { .. }) if !first_batch => {
                    // 结构异常仅对当前批次致命，恢复列表后继续
                    work.reset_selected();
                    self.reporter
                        .warning(format!("⚠️ 本批次提交失败，恢复列表后继续: {}", e));
                }
                Err(e) => return Err(e),
            }
            first_batch = false;

            if work.pending().is_empty() {
                break;
            }
            // 提交把页面带离了列表，重新搜索
            let signal = open_pending_list(surface, &self.token, &self.config, false).await?;
            if signal == ViewSignal::Empty {
                work.mark_pending_not_found();
                break;
            }
        }

        if work.pending_count() > 0 {
            self.reporter.warning(format!(
                "⚠️ 批次上限已到，仍有 {} 个条目未处理",
                work.pending_count()
            ));
        }
        if work.not_found_count() > 0 {
            self.reporter.warning(format!(
                "⚠️ {} 个条目在待处理列表中未找到",
                work.not_found_count()
            ));
        }
        Ok(PhaseStats {
            submitted: work.submitted_count(),
            not_found: work.not_found_count(),
        })
    }

    /// 整页模式：目标清单为空时逐页全选提交，直到列表清空
    async fn run_whole_page_mode(
        &mut self,
        action: SubmitAction,
        comment: &str,
        progress_base: usize,
    ) -> RunResult<PhaseStats> {
        let surface = match self.session.surface() {
            Some(s) => s,
            None => return Err(RunError::structural("会话在阶段中途丢失")),
        };
        let selector = BatchSelector::new(surface, &self.token, &self.config, &self.reporter);
        let submission = SubmissionLoop::new(surface, &self.token, &self.config, &self.reporter);

        let mut handled = 0usize;
        for batch in 1..=self.config.max_batches {
            self.token.check()?;
            let count = selector.select_all_current_page().await?;
            if count == 0 {
                break;
            }
            let pages = submission.submit_batch(action, comment, batch == 1).await?;
            handled += pages.min(count);
            self.reporter
                .progress(progress_base + handled, 0, format!("整页模式已处理 {} 个条目", handled));

            let signal = open_pending_list(surface, &self.token, &self.config, false).await?;
            if signal == ViewSignal::Empty {
                break;
            }
        }
        Ok(PhaseStats {
            submitted: handled,
            not_found: 0,
        })
    }

    // ========== 撤销处理 ==========

    /// 撤销处理流程：批准全部待处理的撤销请求（可选地连带对偶域）
    pub async fn run_revoke_workflow(
        &mut self,
        domain: &str,
        comment: &str,
        process_counterpart: bool,
    ) -> bool {
        let _wake = WakeGuard::acquire();
        self.token.clear();

        let phases: Vec<String> = std::iter::once(domain.to_string())
            .chain(counterpart_domain(domain).filter(|_| process_counterpart))
            .collect();
        self.reporter.begin_run(phases.len());
        self.reporter
            .info(format!("🚀 开始撤销处理流程：域 {}", domain));

        let mut handled_total = 0usize;
        for (idx, phase_domain) in phases.iter().enumerate() {
            self.reporter.set_phase(idx + 1, phase_domain.clone());
            match self.run_revoke_phase(phase_domain, comment).await {
                Ok(handled) => handled_total += handled,
                Err(RunError::Cancelled) => {
                    self.reporter.warning("⚠️ 流程已被用户取消");
                    self.reporter.finish(handled_total, 0, "已取消");
                    return false;
                }
                Err(e) => {
                    self.reporter.error(format!("❌ 撤销处理失败: {}", e));
                    self.reporter.finish(handled_total, 0, "失败");
                    return false;
                }
            }
        }

        self.reporter
            .success(format!("✅ 撤销处理完成：共处理 {} 个请求", handled_total));
        self.reporter.finish(handled_total, 0, "完成");
        true
    }

    /// 撤销请求没有批量入口，逐个点开"响应"链接处理
    async fn run_revoke_phase(&mut self, domain: &str, comment: &str) -> RunResult<usize> {
        let surface = self.session.ensure_valid(&self.token).await?;
        surface.select_domain(domain).await?;

        let mut handled = 0usize;
        for _ in 1..=self.config.max_batches {
            self.token.check()?;
            let signal = open_pending_list(surface, &self.token, &self.config, true).await?;
            if signal == ViewSignal::Empty {
                break;
            }
            if !surface.click_first_respond().await? {
                break;
            }

            await_response_form(surface, &self.token, &self.config).await?;
            let state = surface.form_state(SubmitAction::Approve).await?;
            if !state.comment_prefilled {
                surface.fill_comment(comment).await?;
            }
            surface.disarm_dialogs().await?;
            surface.click_submit(SubmitAction::Approve).await?;
            handled += 1;
            self.reporter
                .info(format!("📤 已批准第 {} 个撤销请求", handled));
            self.reporter.progress(handled, 0, "撤销处理中");

            interruptible_sleep(&self.token, Duration::from_secs(self.config.settle_secs)).await?;
        }
        Ok(handled)
    }

    // ========== 分组指派 ==========

    /// 单域分组指派流程
    pub async fn run_group_assignment_workflow(
        &mut self,
        domain: &str,
        group_name: &str,
        usernames: &[String],
    ) -> bool {
        let _wake = WakeGuard::acquire();
        self.token.clear();
        self.reporter.begin_run(1);
        self.reporter.set_phase(1, domain.to_string());
        self.reporter.info(format!(
            "🚀 开始分组指派流程：域 {}，分组 {}，目标 {} 个用户",
            domain,
            group_name,
            usernames.len()
        ));

        let total = usernames.len();
        match self.run_group_phase(domain, group_name, usernames, 0, total).await {
            Ok(assigned) => {
                self.reporter
                    .success(format!("✅ 分组指派完成：{}/{} 人", assigned, total));
                self.reporter.finish(assigned, total, "完成");
                true
            }
            Err(RunError::Cancelled) => {
                self.reporter.warning("⚠️ 流程已被用户取消");
                self.reporter.finish(0, total, "已取消");
                false
            }
            Err(e) => {
                self.reporter.error(format!("❌ 分组指派失败: {}", e));
                self.reporter.finish(0, total, "失败");
                false
            }
        }
    }

    /// 全域分组指派：对域切换下拉里的每个域各跑一轮
    ///
    /// 单个域失败只记警告继续下一个域，全部成功才算成功。
    pub async fn run_group_assignment_all_domains(
        &mut self,
        group_name: &str,
        usernames: &[String],
    ) -> bool {
        let _wake = WakeGuard::acquire();
        self.token.clear();

        let domains = {
            let surface = match self.session.ensure_valid(&self.token).await {
                Ok(s) => s,
                Err(RunError::Cancelled) => {
                    self.reporter.warning("⚠️ 流程已被用户取消");
                    self.reporter.finish(0, 0, "已取消");
                    return false;
                }
                Err(e) => {
                    self.reporter.error(format!("❌ 无法建立会话: {}", e));
                    self.reporter.finish(0, 0, "失败");
                    return false;
                }
            };
            match surface.domain_options().await {
                Ok(list) => list,
                Err(e) => {
                    self.reporter.error(format!("❌ 无法读取域清单: {}", e));
                    self.reporter.finish(0, 0, "失败");
                    return false;
                }
            }
        };

        if domains.is_empty() {
            self.reporter.error("❌ 域切换下拉为空");
            self.reporter.finish(0, 0, "失败");
            return false;
        }

        let total = usernames.len() * domains.len();
        self.reporter.begin_run(domains.len());
        self.reporter.info(format!(
            "🚀 开始全域分组指派：{} 个域，分组 {}，目标 {} 个用户",
            domains.len(),
            group_name,
            usernames.len()
        ));

        let mut assigned_total = 0usize;
        let mut failures = 0usize;
        for (idx, domain) in domains.iter().enumerate() {
            self.reporter.set_phase(idx + 1, domain.clone());
            match self
                .run_group_phase(domain, group_name, usernames, assigned_total, total)
                .await
            {
                Ok(assigned) => assigned_total += assigned,
                Err(RunError::Cancelled) => {
                    self.reporter.warning("⚠️ 流程已被用户取消");
                    self.reporter.finish(assigned_total, total, "已取消");
                    return false;
                }
                Err(e) => {
                    failures += 1;
                    self.reporter
                        .warning(format!("⚠️ 域 {} 指派失败，继续下一个域: {}", domain, e));
                }
            }
        }

        self.reporter.success(format!(
            "✅ 全域分组指派结束：指派 {} 人，{} 个域失败",
            assigned_total, failures
        ));
        self.reporter.finish(assigned_total, total, "完成");
        failures == 0
    }

    async fn run_group_phase(
        &mut self,
        domain: &str,
        group_name: &str,
        usernames: &[String],
        progress_base: usize,
        progress_total: usize,
    ) -> RunResult<usize> {
        let surface = self.session.ensure_valid(&self.token).await?;
        surface.select_domain(domain).await?;
        surface.goto_module(Module::UserGroup).await?;
        await_page_ready(surface, &self.token, &self.config).await?;
        if surface.is_error_page().await? {
            return Err(RunError::transient("用户分组页落在服务端错误页"));
        }

        let assigner = GroupAssigner::new(surface, &self.token, &self.config, &self.reporter);
        let group = assigner.find_group(group_name).await?;
        let qualified: Vec<String> = usernames
            .iter()
            .map(|u| qualify_username(u, domain))
            .collect();
        let assigned = assigner.assign_group(&group, &qualified).await?;
        self.reporter.progress(
            progress_base + assigned,
            progress_total,
            format!("域 {} 指派完成", domain),
        );
        Ok(assigned)
    }
}

// ========== 导航辅助 ==========

/// 等待页面骨架就绪
async fn await_page_ready<S: Surface>(
    surface: &S,
    token: &CancelToken,
    config: &Config,
) -> RunResult<()> {
    cancellable_wait(
        token,
        Duration::from_secs(config.page_timeout_secs),
        Duration::from_millis(500),
        "页面就绪",
        || async move { Ok(surface.page_ready().await?.then_some(())) },
    )
    .await
}

/// 打开待处理列表：进模块、设筛选、搜索、等视图加载完成
async fn open_pending_list<S: Surface>(
    surface: &S,
    token: &CancelToken,
    config: &Config,
    revoke: bool,
) -> RunResult<ViewSignal> {
    surface.goto_module(Module::ApprovalRequestList).await?;
    await_page_ready(surface, token, config).await?;
    if surface.is_error_page().await? {
        return Err(RunError::transient("审批列表页落在服务端错误页"));
    }

    surface.set_status_filter_pending().await?;
    if revoke {
        surface.set_approval_type_revoke().await?;
    }

    let detector = ChangeDetector::new(
        surface,
        token,
        config.stability_samples,
        Duration::from_millis(config.stability_interval_ms),
    );
    let baseline = detector.capture().await?;
    surface.click_search().await?;
    detector
        .wait_for_view_loaded(&baseline, Duration::from_secs(config.search_timeout_secs))
        .await
}

/// 等待单请求响应表单出现
async fn await_response_form<S: Surface>(
    surface: &S,
    token: &CancelToken,
    config: &Config,
) -> RunResult<()> {
    let result = cancellable_wait(
        token,
        Duration::from_secs(config.page_timeout_secs),
        Duration::from_millis(500),
        "响应表单",
        || async move {
            let state = surface.form_state(SubmitAction::Approve).await?;
            Ok(state.submit_present.then_some(()))
        },
    )
    .await;
    match result {
        Ok(()) => Ok(()),
        Err(RunError::Timeout { .. }) => Err(RunError::structural("响应表单未出现")),
        Err(e) => Err(e),
    }
}
