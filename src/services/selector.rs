//! 批次选择
//!
//! 远端列表按页展示，勾选状态只活在当前页的 DOM 里：任何导航
//! （翻页、搜索、提交）都会让已勾选的条目全部丢失。所以选择器的
//! 铁律是"选到即回"：只要当前页勾中了至少一个目标条目，立即带着
//! 勾选返回交给提交循环，绝不继续翻页攒更大的批次。

use tokio::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::domain::looks_like_identifier;
use crate::error::{RunError, RunResult};
use crate::infrastructure::surface::Surface;
use crate::runtime::CancelToken;
use crate::services::detector::ChangeDetector;
use crate::workflow::progress::Reporter;

/// 一次选择的结果
#[derive(Debug)]
pub struct SelectionOutcome {
    /// 当前页已勾选的条目标识（非空时页面上的勾选仍然有效）
    pub selected: Vec<String>,
    /// 本次扫描经过的页数
    pub pages_visited: usize,
    /// 已翻到底都没找到任何目标条目
    pub exhausted: bool,
}

/// 批次选择器
pub struct BatchSelector<'a, S: Surface> {
    surface: &'a S,
    token: &'a CancelToken,
    config: &'a Config,
    reporter: &'a Reporter,
}

impl<'a, S: Surface> BatchSelector<'a, S> {
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

    fn detector(&self) -> ChangeDetector<'a, S> {
        ChangeDetector::new(
            self.surface,
            self.token,
            self.config.stability_samples,
            Duration::from_millis(self.config.stability_interval_ms),
        )
    }

    /// 从第一页开始扫描，勾选当前页上能找到的目标条目
    ///
    /// 返回时要么 `selected` 非空（勾选停留在当前页，调用方必须在
    /// 任何导航之前完成提交），要么 `exhausted` 为真。
    pub async fn select_next_batch(&self, pending: &[String]) -> RunResult<SelectionOutcome> {
        let detector = self.detector();
        let mut pages_visited = 1usize;

        loop {
            self.token.check()?;

            // 表格可能混进提示行，只保留像域限定用户名的条目
            let visible: Vec<String> = self
                .surface
                .visible_identifiers()
                .await?
                .into_iter()
                .filter(|t| looks_like_identifier(t))
                .collect();
            debug!("第 {} 页可见条目 {} 个", pages_visited, visible.len());

            let mut selected = Vec::new();
            for identifier in pending {
                if visible.iter().any(|v| v == identifier)
                    && self.surface.check_identifier(identifier).await?
                {
                    selected.push(identifier.clone());
                }
            }

            if !selected.is_empty() {
                // 勾选随任何导航丢失，带着勾选立刻返回
                self.reporter.info(format!(
                    "✓ 第 {} 页勾选了 {} 个条目，立即转入提交",
                    pages_visited,
                    selected.len()
                ));
                return Ok(SelectionOutcome {
                    selected,
                    pages_visited,
                    exhausted: false,
                });
            }

            if pages_visited >= self.config.max_pages {
                self.reporter
                    .warning(format!("⚠️ 已达分页上限 {} 页，停止扫描", self.config.max_pages));
                return Ok(SelectionOutcome {
                    selected: Vec::new(),
                    pages_visited,
                    exhausted: true,
                });
            }

            if !self.surface.next_page_available().await? {
                debug!("已是最后一页");
                return Ok(SelectionOutcome {
                    selected: Vec::new(),
                    pages_visited,
                    exhausted: true,
                });
            }

            if !self.advance_page(&detector).await? {
                self.reporter
                    .warning("⚠️ 多次翻页后视图均未变化，按最后一页处理");
                return Ok(SelectionOutcome {
                    selected: Vec::new(),
                    pages_visited,
                    exhausted: true,
                });
            }
            pages_visited += 1;
        }
    }

    /// 全选当前页（目标清单为空时的整页模式）
    pub async fn select_all_current_page(&self) -> RunResult<usize> {
        self.token.check()?;
        let count = self.surface.select_all().await?;
        if count > 0 {
            self.reporter.info(format!("✓ 当前页全选 {} 个条目", count));
        }
        Ok(count)
    }

    /// 点击下一页并用指纹验证确实翻过去了
    ///
    /// 点击被远端吞掉（AJAX 竞态）时重试；重试额度用完仍无变化
    /// 返回 false，由调用方决定按最后一页处理。
    async fn advance_page(&self, detector: &ChangeDetector<'a, S>) -> RunResult<bool> {
        let nav_timeout = Duration::from_secs(self.config.page_timeout_secs.min(10));

        for attempt in 0..=self.config.nav_retries {
            self.token.check()?;
            let baseline = detector.capture().await?;
            self.surface.click_next_page().await?;

            match detector.wait_until_changed(&baseline, nav_timeout).await {
                Ok(_) => {
                    detector.wait_until_stable().await?;
                    return Ok(true);
                }
                Err(RunError::Timeout { .. }) => {
                    warn!(
                        "⚠️ 翻页点击后视图未变化（第 {}/{} 次尝试）",
                        attempt + 1,
                        self.config.nav_retries + 1
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }
}
