//! 脚本化假界面
//!
//! 在内存里模拟远端管理台的可观察行为：分页的待处理列表、勾选随
//! 任何导航丢失、批量响应表单按请求页推进、分组指派的用户池。
//! 额外记录 `lost_selections`，用来断言"选到即回"不变量。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use govca_approval_bot::error::{RunError, RunResult};
use govca_approval_bot::infrastructure::surface::{
    Connector, Fingerprint, FormState, GroupBoard, GroupOption, ItemGrid, Liveness, Module,
    Navigator, Pager, SubmissionSurface, SubmitAction, UserPoolState, ViewProbe, ViewSignal,
};
use govca_approval_bot::Config;

/// 把各项等待压到毫秒级的测试配置
pub fn test_config() -> Config {
    Config {
        page_timeout_secs: 2,
        search_timeout_secs: 2,
        pool_timeout_secs: 1,
        stability_samples: 2,
        stability_interval_ms: 1,
        max_pages: 10,
        max_batches: 10,
        nav_retries: 1,
        group_batch_size: 20,
        continuation_attempts: 2,
        continuation_interval_ms: 1,
        settle_secs: 0,
        extended_wait_secs: 0,
        auth_retries: 0,
        auth_backoff_secs: 0,
        escalation_grace_ms: 50,
        ..Config::default()
    }
}

#[derive(Default)]
struct DomainState {
    /// 待处理列表里的条目标识（按页展示）
    items: Vec<String>,
    /// 待处理的撤销请求数
    revoke_pending: usize,
    groups: Vec<GroupOption>,
    /// 可指派用户池
    pool: Vec<String>,
    /// 分组 value -> 已指派用户
    assigned: HashMap<String, Vec<String>>,
}

struct Inner {
    domains: HashMap<String, DomainState>,
    page_size: usize,
    current_domain: Option<String>,
    module: Option<Module>,
    page_index: usize,
    checked: Vec<String>,
    form_open: bool,
    form_batch: Vec<String>,
    revoke_form: bool,
    comment: String,
    current_group: Option<String>,
    pool_selected: Vec<String>,
    version: u64,
    alive: bool,
    signed_in: bool,
    loading: bool,
    error_page: bool,
    revoke_filter: bool,
    url: String,
    submitted: Vec<String>,
    lost_selections: usize,
    add_batches: Vec<usize>,
    /// 第 N 次打开批量响应表单时落在服务端错误页（一次性）
    error_page_on_form_open: Option<usize>,
    form_open_count: usize,
    /// 每批提交 N 个请求页后远端直接收走表单（一次性）
    close_form_after: Option<usize>,
    batch_submit_count: usize,
}

impl Inner {
    fn new(page_size: usize) -> Self {
        Self {
            domains: HashMap::new(),
            page_size,
            current_domain: None,
            module: None,
            page_index: 0,
            checked: Vec::new(),
            form_open: false,
            form_batch: Vec::new(),
            revoke_form: false,
            comment: String::new(),
            current_group: None,
            pool_selected: Vec::new(),
            version: 0,
            alive: true,
            signed_in: true,
            loading: false,
            error_page: false,
            revoke_filter: false,
            url: "https://govca.npki.gov.ph:8443/SecureTMSWebMgr/".to_string(),
            submitted: Vec::new(),
            lost_selections: 0,
            add_batches: Vec::new(),
            error_page_on_form_open: None,
            form_open_count: 0,
            close_form_after: None,
            batch_submit_count: 0,
        }
    }

    fn dom(&self) -> RunResult<&DomainState> {
        self.current_domain
            .as_deref()
            .and_then(|d| self.domains.get(d))
            .ok_or_else(|| RunError::structural("假界面：未选择域"))
    }

    fn dom_mut(&mut self) -> RunResult<&mut DomainState> {
        let name = self
            .current_domain
            .clone()
            .ok_or_else(|| RunError::structural("假界面：未选择域"))?;
        self.domains
            .get_mut(&name)
            .ok_or_else(|| RunError::structural("假界面：域不存在"))
    }

    fn current_page(&self) -> Vec<String> {
        match self.dom() {
            Ok(dom) => dom
                .items
                .chunks(self.page_size)
                .nth(self.page_index)
                .map(|c| c.to_vec())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// 任何导航都会把当前页的勾选清空
    fn lose_selections(&mut self) {
        if !self.checked.is_empty() {
            self.lost_selections += self.checked.len();
            self.checked.clear();
        }
    }

    fn pool_available(&self) -> Vec<String> {
        match self.dom() {
            Ok(dom) => {
                let taken: Vec<&String> = self
                    .current_group
                    .as_ref()
                    .and_then(|g| dom.assigned.get(g))
                    .map(|v| v.iter().collect())
                    .unwrap_or_default();
                dom.pool
                    .iter()
                    .filter(|u| !taken.contains(u))
                    .cloned()
                    .collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

/// 可克隆的脚本化界面（克隆体共享同一状态）
#[derive(Clone)]
pub struct ScriptedSurface {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedSurface {
    pub fn new(page_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new(page_size))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    // ---------- 场景搭建 ----------

    pub fn add_domain(&self, name: &str) {
        self.lock()
            .domains
            .entry(name.to_string())
            .or_insert_with(DomainState::default);
    }

    pub fn add_pending(&self, domain: &str, identifiers: &[&str]) {
        self.add_domain(domain);
        let mut inner = self.lock();
        let dom = inner.domains.get_mut(domain).unwrap();
        dom.items
            .extend(identifiers.iter().map(|s| s.to_string()));
    }

    pub fn add_revoke_pending(&self, domain: &str, count: usize) {
        self.add_domain(domain);
        self.lock().domains.get_mut(domain).unwrap().revoke_pending = count;
    }

    pub fn add_group(&self, domain: &str, value: &str, name: &str) {
        self.add_domain(domain);
        self.lock()
            .domains
            .get_mut(domain)
            .unwrap()
            .groups
            .push(GroupOption {
                value: value.to_string(),
                name: name.to_string(),
            });
    }

    pub fn add_pool_users(&self, domain: &str, users: &[&str]) {
        self.add_domain(domain);
        let mut inner = self.lock();
        let dom = inner.domains.get_mut(domain).unwrap();
        dom.pool.extend(users.iter().map(|s| s.to_string()));
    }

    /// 让列表永远停在加载中（取消测试用）
    pub fn set_loading(&self, loading: bool) {
        self.lock().loading = loading;
    }

    /// 第 `n` 次打开批量响应表单时落在服务端错误页（一次性，
    /// 导航离开后恢复）
    pub fn fail_form_open_with_error_page(&self, n: usize) {
        self.lock().error_page_on_form_open = Some(n);
    }

    /// 本批提交 `n` 个请求页后远端直接收走表单，剩余请求页丢失
    /// （一次性）
    pub fn close_form_after_submissions(&self, n: usize) {
        self.lock().close_form_after = Some(n);
    }

    // ---------- 断言访问器 ----------

    pub fn submitted(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    pub fn lost_selections(&self) -> usize {
        self.lock().lost_selections
    }

    pub fn add_batches(&self) -> Vec<usize> {
        self.lock().add_batches.clone()
    }

    pub fn assigned(&self, domain: &str, group_value: &str) -> Vec<String> {
        self.lock()
            .domains
            .get(domain)
            .and_then(|d| d.assigned.get(group_value).cloned())
            .unwrap_or_default()
    }

    pub fn revoke_remaining(&self, domain: &str) -> usize {
        self.lock()
            .domains
            .get(domain)
            .map(|d| d.revoke_pending)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ViewProbe for ScriptedSurface {
    async fn fingerprint(&self) -> RunResult<Fingerprint> {
        let inner = self.lock();
        let page = inner.current_page();
        Ok(Fingerprint {
            item_count: page.len(),
            first_item_text: page.first().cloned().unwrap_or_default(),
            last_item_text: page.last().cloned().unwrap_or_default(),
            total_text_length: 1000 + inner.version as usize,
        })
    }

    async fn view_signal(&self) -> RunResult<Option<ViewSignal>> {
        let inner = self.lock();
        if inner.loading || inner.module != Some(Module::ApprovalRequestList) {
            return Ok(None);
        }
        if inner.revoke_filter {
            let pending = inner.dom().map(|d| d.revoke_pending).unwrap_or(0);
            return Ok(Some(if pending > 0 {
                ViewSignal::HasData
            } else {
                ViewSignal::Empty
            }));
        }
        Ok(Some(if inner.current_page().is_empty() {
            ViewSignal::Empty
        } else {
            ViewSignal::HasData
        }))
    }
}

#[async_trait]
impl ItemGrid for ScriptedSurface {
    async fn visible_identifiers(&self) -> RunResult<Vec<String>> {
        Ok(self.lock().current_page())
    }

    async fn check_identifier(&self, identifier: &str) -> RunResult<bool> {
        let mut inner = self.lock();
        if inner.current_page().iter().any(|i| i == identifier) {
            if !inner.checked.iter().any(|i| i == identifier) {
                inner.checked.push(identifier.to_string());
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn select_all(&self) -> RunResult<usize> {
        let mut inner = self.lock();
        let page = inner.current_page();
        for identifier in &page {
            if !inner.checked.contains(identifier) {
                inner.checked.push(identifier.clone());
            }
        }
        Ok(page.len())
    }
}

#[async_trait]
impl Pager for ScriptedSurface {
    async fn next_page_available(&self) -> RunResult<bool> {
        let inner = self.lock();
        let total = inner.dom().map(|d| d.items.len()).unwrap_or(0);
        Ok((inner.page_index + 1) * inner.page_size < total)
    }

    async fn click_next_page(&self) -> RunResult<()> {
        let mut inner = self.lock();
        let total = inner.dom().map(|d| d.items.len()).unwrap_or(0);
        if (inner.page_index + 1) * inner.page_size >= total {
            return Err(RunError::structural("假界面：没有下一页"));
        }
        inner.lose_selections();
        inner.page_index += 1;
        inner.version += 1;
        Ok(())
    }
}

#[async_trait]
impl SubmissionSurface for ScriptedSurface {
    async fn open_batch_response(&self) -> RunResult<()> {
        let mut inner = self.lock();
        if inner.checked.is_empty() {
            return Err(RunError::structural("假界面：没有勾选任何条目"));
        }
        inner.form_batch = std::mem::take(&mut inner.checked);
        inner.form_open = true;
        inner.batch_submit_count = 0;
        inner.form_open_count += 1;
        if inner.error_page_on_form_open == Some(inner.form_open_count) {
            inner.error_page = true;
            inner.error_page_on_form_open = None;
        }
        inner.version += 1;
        Ok(())
    }

    async fn form_state(&self, _action: SubmitAction) -> RunResult<FormState> {
        let inner = self.lock();
        Ok(FormState {
            submit_present: inner.form_open && (inner.revoke_form || !inner.form_batch.is_empty()),
            cancel_present: inner.form_open,
            comment_prefilled: !inner.comment.is_empty(),
        })
    }

    async fn fill_comment(&self, text: &str) -> RunResult<()> {
        self.lock().comment = text.to_string();
        Ok(())
    }

    async fn disarm_dialogs(&self) -> RunResult<()> {
        Ok(())
    }

    async fn click_submit(&self, _action: SubmitAction) -> RunResult<()> {
        let mut inner = self.lock();
        if inner.revoke_form {
            inner.dom_mut()?.revoke_pending -= 1;
            inner.revoke_form = false;
            inner.form_open = false;
            inner.version += 1;
            return Ok(());
        }
        if !inner.form_open || inner.form_batch.is_empty() {
            return Err(RunError::structural("假界面：提交表单不存在"));
        }
        let identifier = inner.form_batch.remove(0);
        inner.dom_mut()?.items.retain(|i| i != &identifier);
        inner.submitted.push(identifier);
        inner.batch_submit_count += 1;
        if inner.close_form_after == Some(inner.batch_submit_count) {
            // 远端提前收走表单，剩余请求页未经提交就消失
            inner.form_batch.clear();
            inner.close_form_after = None;
        }
        if inner.form_batch.is_empty() {
            inner.form_open = false;
        }
        inner.version += 1;
        Ok(())
    }

    async fn click_continuation(&self) -> RunResult<bool> {
        let inner = self.lock();
        Ok(inner.form_open && !inner.form_batch.is_empty())
    }

    async fn click_first_respond(&self) -> RunResult<bool> {
        let mut inner = self.lock();
        let pending = inner.dom().map(|d| d.revoke_pending).unwrap_or(0);
        if inner.revoke_filter && pending > 0 {
            inner.form_open = true;
            inner.revoke_form = true;
            inner.version += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl Navigator for ScriptedSurface {
    async fn goto_module(&self, module: Module) -> RunResult<()> {
        let mut inner = self.lock();
        inner.lose_selections();
        inner.module = Some(module);
        inner.page_index = 0;
        // 导航离开后错误页不再存在
        inner.error_page = false;
        inner.version += 1;
        Ok(())
    }

    async fn select_domain(&self, domain: &str) -> RunResult<()> {
        let mut inner = self.lock();
        if !inner.domains.contains_key(domain) {
            return Err(RunError::structural(format!("假界面：域 {domain} 不存在")));
        }
        inner.lose_selections();
        inner.current_domain = Some(domain.to_string());
        inner.page_index = 0;
        inner.version += 1;
        Ok(())
    }

    async fn domain_options(&self) -> RunResult<Vec<String>> {
        let inner = self.lock();
        let mut names: Vec<String> = inner.domains.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn set_status_filter_pending(&self) -> RunResult<()> {
        self.lock().revoke_filter = false;
        Ok(())
    }

    async fn set_approval_type_revoke(&self) -> RunResult<()> {
        self.lock().revoke_filter = true;
        Ok(())
    }

    async fn click_search(&self) -> RunResult<()> {
        let mut inner = self.lock();
        inner.lose_selections();
        inner.page_index = 0;
        inner.version += 1;
        Ok(())
    }

    async fn page_ready(&self) -> RunResult<bool> {
        Ok(true)
    }

    async fn is_error_page(&self) -> RunResult<bool> {
        Ok(self.lock().error_page)
    }
}

#[async_trait]
impl GroupBoard for ScriptedSurface {
    async fn group_options(&self) -> RunResult<Vec<GroupOption>> {
        let inner = self.lock();
        Ok(inner.dom()?.groups.clone())
    }

    async fn select_group(&self, value: &str) -> RunResult<()> {
        let mut inner = self.lock();
        if !inner.dom()?.groups.iter().any(|g| g.value == value) {
            return Err(RunError::structural("假界面：分组不存在"));
        }
        inner.current_group = Some(value.to_string());
        inner.version += 1;
        Ok(())
    }

    async fn user_pool_state(&self) -> RunResult<UserPoolState> {
        let inner = self.lock();
        let avail = inner.pool_available();
        Ok(UserPoolState {
            option_count: avail.len(),
            first_option_text: avail.first().cloned().unwrap_or_default(),
            request_in_flight: false,
        })
    }

    async fn available_usernames(&self) -> RunResult<Vec<String>> {
        Ok(self.lock().pool_available())
    }

    async fn select_pool_users(&self, usernames: &[String]) -> RunResult<usize> {
        let mut inner = self.lock();
        let avail = inner.pool_available();
        inner.pool_selected = usernames
            .iter()
            .filter(|u| avail.contains(u))
            .cloned()
            .collect();
        Ok(inner.pool_selected.len())
    }

    async fn click_add(&self) -> RunResult<()> {
        let mut inner = self.lock();
        if inner.pool_selected.is_empty() {
            return Err(RunError::structural("假界面：没有选中任何用户"));
        }
        let group = inner
            .current_group
            .clone()
            .ok_or_else(|| RunError::structural("假界面：未选择分组"))?;
        let batch = std::mem::take(&mut inner.pool_selected);
        inner.add_batches.push(batch.len());
        inner
            .dom_mut()?
            .assigned
            .entry(group)
            .or_default()
            .extend(batch);
        inner.version += 1;
        Ok(())
    }
}

#[async_trait]
impl Liveness for ScriptedSurface {
    async fn is_alive(&self) -> bool {
        self.lock().alive
    }

    async fn current_url(&self) -> RunResult<String> {
        Ok(self.lock().url.clone())
    }

    async fn domain_switch_visible(&self) -> RunResult<bool> {
        Ok(self.lock().signed_in)
    }
}

/// 直接交出共享假界面的连接器
pub struct FakeConnector {
    surface: ScriptedSurface,
}

impl FakeConnector {
    pub fn new(surface: ScriptedSurface) -> Self {
        Self { surface }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Surface = ScriptedSurface;

    async fn connect(&self) -> RunResult<ScriptedSurface> {
        Ok(self.surface.clone())
    }
}
