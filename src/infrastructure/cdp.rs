//! 能力接口的 CDP 实现
//!
//! 持有唯一的 Page 资源，把每个能力落到一段页面内 JS 求值上。
//! 远端界面是服务端渲染 + 局部 AJAX 的老式管理台，控件名稳定，
//! 但同一控件在不同版本里出现过多种形态，所以查找一律走按序探针
//! 列表：依次尝试，第一个命中即用，全部落空才算结构异常。

use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::browser::connect_to_browser_and_page;
use crate::config::Config;
use crate::error::{RunError, RunResult};
use crate::infrastructure::surface::{
    Connector, Fingerprint, FormState, GroupBoard, GroupOption, ItemGrid, Liveness, Module,
    Navigator, Pager, SubmissionSurface, SubmitAction, UserPoolState, ViewProbe, ViewSignal,
};
use crate::infrastructure::vault::ClientVault;

// ========== 按序探针列表（XPath） ==========

/// "下一页"控件的已知形态，按历史命中率排序
const NEXT_PAGE_PROBES: &[&str] = &[
    "//a[normalize-space(text())='Next']",
    "//a[contains(@title,'Next')]",
    "//img[contains(@src,'btn_next')]/ancestor::a[1]",
    "//a[contains(@onclick,'goPage')][contains(text(),'>')]",
];

/// "下一请求"续页控件的已知形态
const NEXT_REQUEST_PROBES: &[&str] = &[
    "//input[contains(@value,'Next Request')]",
    "//a[contains(normalize-space(text()),'Next Request')]",
    "//input[@name='btnNextRequest']",
    "//input[@type='button'][contains(@value,'Continue') or contains(@value,'Next')]",
];

/// 批量响应入口的已知形态
const BATCH_RESPOND_PROBES: &[&str] = &[
    "//input[@name='btnBatchRespond']",
    "//input[contains(@value,'Batch Respond')]",
    "//a[contains(normalize-space(text()),'Batch Respond')]",
];

/// 批准提交控件
const APPROVE_PROBES: &[&str] = &[
    "//input[@name='btnApprove']",
    "//input[contains(@value,'Approve')]",
];

/// 拒绝提交控件
const REJECT_PROBES: &[&str] = &[
    "//input[@name='btnReject']",
    "//input[contains(@value,'Reject')]",
];

/// 取消控件（只有取消没有提交时批次已到终点）
const CANCEL_PROBES: &[&str] = &[
    "//input[@name='btnCancel']",
    "//input[contains(@value,'Cancel')]",
];

/// 撤销流程里的"响应"链接
const RESPOND_LINK_PROBES: &[&str] = &[
    "//table//a[normalize-space(text())='Respond']",
    "//table//a[contains(@href,'respond')]",
];

fn submit_probes(action: SubmitAction) -> &'static [&'static str] {
    match action {
        SubmitAction::Approve => APPROVE_PROBES,
        SubmitAction::Reject => REJECT_PROBES,
    }
}

// ========== CDP 界面 ==========

/// 远端界面的 CDP 实现
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 把能力接口落到页面内 JS 求值
/// - 不认识批次 / 工作流，不做任何等待或重试
pub struct CdpSurface {
    page: Page,
    base_url: String,
}

impl CdpSurface {
    pub fn new(page: Page, base_url: impl Into<String>) -> Self {
        Self {
            page,
            base_url: base_url.into(),
        }
    }

    /// 执行 JS 并返回 JSON 值
    async fn eval(&self, js_code: impl Into<String>) -> RunResult<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 并反序列化为指定类型
    async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> RunResult<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 按序探测 XPath 列表，返回是否有可见命中
    async fn probe_visible(&self, probes: &[&str]) -> RunResult<bool> {
        let script = build_probe_script(probes, ProbeAction::Check)?;
        self.eval_as(script).await
    }

    /// 按序探测 XPath 列表并点击第一个可见命中，返回是否点到
    async fn probe_click(&self, probes: &[&str]) -> RunResult<bool> {
        let script = build_probe_script(probes, ProbeAction::Click)?;
        self.eval_as(script).await
    }
}

#[derive(Clone, Copy)]
enum ProbeAction {
    Check,
    Click,
}

/// 生成按序探针脚本
///
/// 依次求值每个 XPath，取第一个可见（offsetParent 非空）且未禁用的
/// 节点；Click 模式下顺手点击。
fn build_probe_script(probes: &[&str], action: ProbeAction) -> RunResult<String> {
    let probes_json = serde_json::to_string(probes)?;
    let act = match action {
        ProbeAction::Check => "",
        ProbeAction::Click => "node.click();",
    };
    Ok(format!(
        r#"(() => {{
            const probes = {probes_json};
            for (const xp of probes) {{
                const node = document.evaluate(
                    xp, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null
                ).singleNodeValue;
                if (node && node.offsetParent !== null && !node.disabled) {{
                    {act}
                    return true;
                }}
            }}
            return false;
        }})()"#
    ))
}

#[async_trait]
impl ViewProbe for CdpSurface {
    async fn fingerprint(&self) -> RunResult<Fingerprint> {
        self.eval_as(
            r#"(() => {
                const boxes = document.querySelectorAll('input[type="checkbox"][name="chkBatch"]');
                const rows = document.querySelectorAll('table tr');
                const rowText = r => (r.innerText || '').trim().slice(0, 200);
                const first = rows.length > 1 ? rowText(rows[1]) : '';
                const last = rows.length > 1 ? rowText(rows[rows.length - 1]) : '';
                const body = document.body ? (document.body.innerText || '') : '';
                return {
                    item_count: boxes.length,
                    first_item_text: first,
                    last_item_text: last,
                    total_text_length: body.length
                };
            })()"#,
        )
        .await
    }

    async fn view_signal(&self) -> RunResult<Option<ViewSignal>> {
        // 加载指示器可见时即使已有行也不算终态（行可能属于上一个视图）
        let signal: Option<String> = self
            .eval_as(
                r#"(() => {
                    const ind = document.querySelector('#divLoading, #loading, .loading-indicator');
                    if (ind && ind.offsetParent !== null) return null;
                    const boxes = document.querySelectorAll('input[type="checkbox"][name="chkBatch"]');
                    if (boxes.length > 0) return 'has_data';
                    const text = document.body ? (document.body.innerText || '') : '';
                    if (/no data|no record|0 record\(s\)|nothing found/i.test(text)) return 'empty';
                    return null;
                })()"#,
            )
            .await?;
        Ok(match signal.as_deref() {
            Some("has_data") => Some(ViewSignal::HasData),
            Some("empty") => Some(ViewSignal::Empty),
            _ => None,
        })
    }
}

#[async_trait]
impl ItemGrid for CdpSurface {
    async fn visible_identifiers(&self) -> RunResult<Vec<String>> {
        self.eval_as(
            r#"(() => {
                const out = [];
                document.querySelectorAll('input[type="checkbox"][name="chkBatch"]').forEach(cb => {
                    const row = cb.closest('tr');
                    if (!row) return;
                    for (const cell of row.querySelectorAll('td')) {
                        const t = (cell.innerText || '').trim();
                        if (t.length > 0 && t.length < 100 && /^\S+_\S+$/.test(t)) {
                            out.push(t);
                            return;
                        }
                    }
                });
                return out;
            })()"#,
        )
        .await
    }

    async fn check_identifier(&self, identifier: &str) -> RunResult<bool> {
        let quoted = serde_json::to_string(identifier)?;
        self.eval_as(format!(
            r#"(() => {{
                const target = {quoted};
                for (const cb of document.querySelectorAll('input[type="checkbox"][name="chkBatch"]')) {{
                    const row = cb.closest('tr');
                    if (!row) continue;
                    const hit = Array.from(row.querySelectorAll('td'))
                        .some(td => (td.innerText || '').trim() === target);
                    if (hit) {{
                        if (!cb.checked) {{
                            cb.checked = true;
                            cb.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        }}
                        return true;
                    }}
                }}
                return false;
            }})()"#
        ))
        .await
    }

    async fn select_all(&self) -> RunResult<usize> {
        self.eval_as(
            r#"(() => {
                const master = document.querySelector('input[name="chkAllBatch"]');
                if (master && !master.checked) {
                    master.click();
                }
                let count = 0;
                document.querySelectorAll('input[type="checkbox"][name="chkBatch"]').forEach(cb => {
                    if (!cb.checked) {
                        cb.checked = true;
                        cb.dispatchEvent(new Event('change', { bubbles: true }));
                    }
                    count += 1;
                });
                return count;
            })()"#,
        )
        .await
    }
}

#[async_trait]
impl Pager for CdpSurface {
    async fn next_page_available(&self) -> RunResult<bool> {
        self.probe_visible(NEXT_PAGE_PROBES).await
    }

    async fn click_next_page(&self) -> RunResult<()> {
        if self.probe_click(NEXT_PAGE_PROBES).await? {
            Ok(())
        } else {
            Err(RunError::structural("下一页控件不存在或不可见"))
        }
    }
}

#[async_trait]
impl SubmissionSurface for CdpSurface {
    async fn open_batch_response(&self) -> RunResult<()> {
        if self.probe_click(BATCH_RESPOND_PROBES).await? {
            debug!("已点击批量响应入口");
            Ok(())
        } else {
            Err(RunError::structural("批量响应入口不存在"))
        }
    }

    async fn form_state(&self, action: SubmitAction) -> RunResult<FormState> {
        let submit_present = self.probe_visible(submit_probes(action)).await?;
        let cancel_present = self.probe_visible(CANCEL_PROBES).await?;
        let comment_prefilled: bool = self
            .eval_as(
                r#"(() => {
                    const box = document.querySelector('textarea[name="txtComment"], #txtComment');
                    return !!(box && box.value && box.value.trim().length > 0);
                })()"#,
            )
            .await?;
        Ok(FormState {
            submit_present,
            cancel_present,
            comment_prefilled,
        })
    }

    async fn fill_comment(&self, text: &str) -> RunResult<()> {
        let quoted = serde_json::to_string(text)?;
        let filled: bool = self
            .eval_as(format!(
                r#"(() => {{
                    const box = document.querySelector('textarea[name="txtComment"], #txtComment');
                    if (!box) return false;
                    box.value = {quoted};
                    box.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    return true;
                }})()"#
            ))
            .await?;
        if filled {
            Ok(())
        } else {
            Err(RunError::structural("评论框不存在"))
        }
    }

    async fn disarm_dialogs(&self) -> RunResult<()> {
        // 提交会弹原生 confirm，无头驱动无人点"确定"，提前放行
        let _: bool = self
            .eval_as(
                r#"(() => {
                    window.confirm = () => true;
                    window.alert = () => {};
                    return true;
                })()"#,
            )
            .await?;
        Ok(())
    }

    async fn click_submit(&self, action: SubmitAction) -> RunResult<()> {
        if self.probe_click(submit_probes(action)).await? {
            info!("📤 已点击{}控件", action.label());
            Ok(())
        } else {
            Err(RunError::structural(format!(
                "{}控件不存在或不可见",
                action.label()
            )))
        }
    }

    async fn click_continuation(&self) -> RunResult<bool> {
        self.probe_click(NEXT_REQUEST_PROBES).await
    }

    async fn click_first_respond(&self) -> RunResult<bool> {
        self.probe_click(RESPOND_LINK_PROBES).await
    }
}

impl Module {
    /// 模块入口的 URL 查询串
    fn query(&self) -> &'static str {
        match self {
            Module::UserList => "?m=user&c=user_list",
            Module::ApprovalRequestList => "?m=approval&c=approve_list",
            Module::UserGroup => "?m=user&c=user_group",
        }
    }
}

#[async_trait]
impl Navigator for CdpSurface {
    async fn goto_module(&self, module: Module) -> RunResult<()> {
        let url = format!("{}{}", self.base_url, module.query());
        debug!("导航到模块: {}", url);
        self.page.goto(url).await?;
        Ok(())
    }

    async fn select_domain(&self, domain: &str) -> RunResult<()> {
        let quoted = serde_json::to_string(domain)?;
        let switched: bool = self
            .eval_as(format!(
                r#"(() => {{
                    const sel = document.querySelector('select[name="selSwitchDomain"], #selSwitchDomain');
                    if (!sel) return false;
                    for (const opt of sel.options) {{
                        if (opt.text.trim() === {quoted}) {{
                            sel.value = opt.value;
                            sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
                            return true;
                        }}
                    }}
                    return false;
                }})()"#
            ))
            .await?;
        if switched {
            info!("✓ 已切换到域: {}", domain);
            Ok(())
        } else {
            Err(RunError::structural(format!("域切换下拉中没有 {domain}")))
        }
    }

    async fn domain_options(&self) -> RunResult<Vec<String>> {
        self.eval_as(
            r#"(() => {
                const sel = document.querySelector('select[name="selSwitchDomain"], #selSwitchDomain');
                if (!sel) return [];
                return Array.from(sel.options)
                    .map(o => o.text.trim())
                    .filter(t => t.length > 0);
            })()"#,
        )
        .await
    }

    async fn set_status_filter_pending(&self) -> RunResult<()> {
        self.set_select_value("select[name=\"cmbStatus\"], #cmbStatus", "4", "状态筛选下拉")
            .await
    }

    async fn set_approval_type_revoke(&self) -> RunResult<()> {
        self.set_select_value(
            "select[name=\"cmbApprovalType\"], #cmbApprovalType",
            "7",
            "审批类型下拉",
        )
        .await
    }

    async fn click_search(&self) -> RunResult<()> {
        let clicked: bool = self
            .eval_as(
                r#"(() => {
                    const btn = document.querySelector('input[name="btnSearch"], #btnSearch');
                    if (!btn || btn.offsetParent === null) return false;
                    btn.click();
                    return true;
                })()"#,
            )
            .await?;
        if clicked {
            Ok(())
        } else {
            Err(RunError::structural("搜索按钮不存在"))
        }
    }

    async fn page_ready(&self) -> RunResult<bool> {
        self.eval_as(
            r#"(() => {
                if (document.readyState !== 'complete') return false;
                return !!(document.querySelector('form') || document.querySelector('table'));
            })()"#,
        )
        .await
    }

    async fn is_error_page(&self) -> RunResult<bool> {
        self.eval_as(
            r#"(() => {
                const text = ((document.title || '') + ' ' +
                    (document.body ? document.body.innerText.slice(0, 500) : ''));
                return /\b50[0234]\b|bad gateway|service unavailable|gateway time-?out|internal server error/i.test(text);
            })()"#,
        )
        .await
    }
}

impl CdpSurface {
    /// 设置下拉值并触发 change
    async fn set_select_value(&self, selector: &str, value: &str, what: &str) -> RunResult<()> {
        let sel_quoted = serde_json::to_string(selector)?;
        let val_quoted = serde_json::to_string(value)?;
        let done: bool = self
            .eval_as(format!(
                r#"(() => {{
                    const sel = document.querySelector({sel_quoted});
                    if (!sel) return false;
                    sel.value = {val_quoted};
                    sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    return true;
                }})()"#
            ))
            .await?;
        if done {
            Ok(())
        } else {
            Err(RunError::structural(format!("{what}不存在")))
        }
    }
}

#[async_trait]
impl GroupBoard for CdpSurface {
    async fn group_options(&self) -> RunResult<Vec<GroupOption>> {
        self.eval_as(
            r#"(() => {
                const sel = document.querySelector('select[name="cboGroup"], #cboGroup');
                if (!sel) return [];
                return Array.from(sel.options)
                    .filter(o => o.value && o.value.trim().length > 0)
                    .map(o => ({ value: o.value, name: o.text.trim() }));
            })()"#,
        )
        .await
    }

    async fn select_group(&self, value: &str) -> RunResult<()> {
        self.set_select_value("select[name=\"cboGroup\"], #cboGroup", value, "分组下拉")
            .await
    }

    async fn user_pool_state(&self) -> RunResult<UserPoolState> {
        self.eval_as(
            r#"(() => {
                const pool = document.querySelector('select[name="cboUGAvUser"], #cboUGAvUser');
                const inflight = !!(window.jQuery && window.jQuery.active > 0);
                if (!pool) return { option_count: 0, first_option_text: '', request_in_flight: inflight };
                return {
                    option_count: pool.options.length,
                    first_option_text: pool.options.length > 0 ? pool.options[0].text.trim() : '',
                    request_in_flight: inflight
                };
            })()"#,
        )
        .await
    }

    async fn available_usernames(&self) -> RunResult<Vec<String>> {
        self.eval_as(
            r#"(() => {
                const pool = document.querySelector('select[name="cboUGAvUser"], #cboUGAvUser');
                if (!pool) return [];
                return Array.from(pool.options)
                    .map(o => o.text.trim())
                    .filter(t => t.length > 0);
            })()"#,
        )
        .await
    }

    async fn select_pool_users(&self, usernames: &[String]) -> RunResult<usize> {
        let wanted = serde_json::to_string(usernames)?;
        self.eval_as(format!(
            r#"(() => {{
                const pool = document.querySelector('select[name="cboUGAvUser"], #cboUGAvUser');
                if (!pool) return 0;
                const wanted = new Set({wanted});
                let count = 0;
                for (const opt of pool.options) {{
                    const hit = wanted.has(opt.text.trim());
                    opt.selected = hit;
                    if (hit) count += 1;
                }}
                pool.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return count;
            }})()"#
        ))
        .await
    }

    async fn click_add(&self) -> RunResult<()> {
        let clicked: bool = self
            .eval_as(
                r#"(() => {
                    const btn = document.querySelector('input[name="btnAdd"], #btnAdd');
                    if (!btn || btn.offsetParent === null) return false;
                    btn.click();
                    return true;
                })()"#,
            )
            .await?;
        if clicked {
            Ok(())
        } else {
            Err(RunError::structural("添加按钮不存在"))
        }
    }
}

#[async_trait]
impl Liveness for CdpSurface {
    async fn is_alive(&self) -> bool {
        // 任何错误都视为会话不可用
        matches!(self.eval_as::<i64>("1 + 1").await, Ok(2))
    }

    async fn current_url(&self) -> RunResult<String> {
        let url = self.page.url().await?;
        Ok(url.unwrap_or_default())
    }

    async fn domain_switch_visible(&self) -> RunResult<bool> {
        self.eval_as(
            r#"(() => {
                const sel = document.querySelector('select[name="selSwitchDomain"], #selSwitchDomain');
                return !!(sel && sel.offsetParent !== null);
            })()"#,
        )
        .await
    }
}

// ========== 连接器 ==========

/// 基于调试端口的会话建立器
///
/// 连接到已运行的浏览器（用户事先手动登录），导航到应用入口，
/// 把浏览器句柄存进保险柜供停止控制器强制没收。
pub struct CdpConnector {
    config: Config,
    vault: ClientVault,
}

impl CdpConnector {
    pub fn new(config: Config, vault: ClientVault) -> Self {
        Self { config, vault }
    }
}

#[async_trait]
impl Connector for CdpConnector {
    type Surface = CdpSurface;

    async fn connect(&self) -> RunResult<CdpSurface> {
        let (browser, page) = connect_to_browser_and_page(
            self.config.browser_debug_port,
            &self.config.base_url,
            &self.config.app_host,
        )
        .await?;

        // 入口导航偶发 TLS 握手失败，固定退避后有限重试；
        // 非瞬时错误（比如 URL 非法、协议错乱）重试没有意义，直接失败
        let mut attempt = 0usize;
        loop {
            match page.goto(self.config.base_url.as_str()).await {
                Ok(_) => break,
                Err(e) if is_transient_nav_error(&e) => {
                    attempt += 1;
                    if attempt > self.config.auth_retries {
                        return Err(RunError::transient(format!(
                            "导航到应用入口失败（已重试 {} 次）: {}",
                            self.config.auth_retries, e
                        )));
                    }
                    warn!(
                        "⚠️ 导航到应用入口失败（第 {}/{} 次重试）: {}",
                        attempt, self.config.auth_retries, e
                    );
                    sleep(Duration::from_secs(self.config.auth_backoff_secs)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.vault.store(browser);
        info!("✓ 会话已建立: {}", self.config.base_url);
        Ok(CdpSurface::new(page, self.config.base_url.clone()))
    }
}

/// 入口导航错误是否值得重试
///
/// 超时、套接字层（TLS 握手在这一层）和 WebSocket 层故障按瞬时算；
/// Chrome 明确回绝、URL 非法之类重试多少次结果都一样。
fn is_transient_nav_error(e: &CdpError) -> bool {
    matches!(
        e,
        CdpError::Timeout | CdpError::Io(_) | CdpError::Ws(_) | CdpError::NoResponse
    )
}
