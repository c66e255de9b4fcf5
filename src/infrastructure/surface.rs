//! 远端界面的能力接口
//!
//! 上层（检测器、选择器、提交循环、编排器）只通过这些 trait 与远端
//! 界面打交道，不直接碰 Page 或 JS。真实实现见 `cdp`，测试用脚本化
//! 假实现。接口按能力切分：探测视图、操作表格、翻页、提交表单、
//! 导航、分组面板、存活检查。

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RunResult;

// ========== 共享数据类型 ==========

/// 视图指纹
///
/// 对当前列表视图内容的廉价摘要。两次采样相等视为"视图没变"，
/// 不等视为"视图变了"。注意空视图与加载中视图的指纹可能相同，
/// 所以指纹只用于变化检测，不用于判断语义状态。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Fingerprint {
    /// 可选条目（复选框）数量
    pub item_count: usize,
    /// 首行文本
    pub first_item_text: String,
    /// 末行文本
    pub last_item_text: String,
    /// 视图容器文本总长度
    pub total_text_length: usize,
}

/// 视图加载完成的终态信号
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewSignal {
    /// 至少有一行数据
    HasData,
    /// 明确的"无数据"提示
    Empty,
}

/// 提交表单的当前状态（一次探测返回）
#[derive(Clone, Debug, Default)]
pub struct FormState {
    /// 提交控件是否存在
    pub submit_present: bool,
    /// 取消控件是否存在（只有取消没有提交 = 明确的批次终点）
    pub cancel_present: bool,
    /// 评论框是否已有内容
    pub comment_prefilled: bool,
}

/// 分组下拉的一个选项
#[derive(Clone, Debug, Deserialize)]
pub struct GroupOption {
    pub value: String,
    pub name: String,
}

/// 用户池（AJAX 下拉）的瞬时状态
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct UserPoolState {
    /// 当前选项数
    pub option_count: usize,
    /// 首个选项文本
    pub first_option_text: String,
    /// 是否仍有 AJAX 请求在途
    pub request_in_flight: bool,
}

/// 可导航的功能模块
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Module {
    /// 用户列表
    UserList,
    /// 审批请求列表
    ApprovalRequestList,
    /// 用户分组管理
    UserGroup,
}

/// 提交动作
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitAction {
    Approve,
    Reject,
}

impl SubmitAction {
    pub fn label(&self) -> &'static str {
        match self {
            SubmitAction::Approve => "批准",
            SubmitAction::Reject => "拒绝",
        }
    }
}

// ========== 能力接口 ==========

/// 视图探测能力
#[async_trait]
pub trait ViewProbe: Send + Sync {
    /// 采集当前视图指纹
    async fn fingerprint(&self) -> RunResult<Fingerprint>;

    /// 探测视图终态信号；仍在加载中（含加载指示器可见）返回 None
    async fn view_signal(&self) -> RunResult<Option<ViewSignal>>;
}

/// 表格条目操作能力
#[async_trait]
pub trait ItemGrid: Send + Sync {
    /// 当前页可见的全部条目标识
    async fn visible_identifiers(&self) -> RunResult<Vec<String>>;

    /// 勾选指定条目；条目不在当前页返回 false
    async fn check_identifier(&self, identifier: &str) -> RunResult<bool>;

    /// 全选当前页，返回勾选的条目数
    async fn select_all(&self) -> RunResult<usize>;
}

/// 翻页能力
#[async_trait]
pub trait Pager: Send + Sync {
    /// 下一页控件是否存在且可用
    async fn next_page_available(&self) -> RunResult<bool>;

    /// 点击下一页（只负责点击，不等待加载）
    async fn click_next_page(&self) -> RunResult<()>;
}

/// 提交表单能力
#[async_trait]
pub trait SubmissionSurface: Send + Sync {
    /// 打开批量响应表单
    async fn open_batch_response(&self) -> RunResult<()>;

    /// 探测当前表单状态
    async fn form_state(&self, action: SubmitAction) -> RunResult<FormState>;

    /// 填写评论框
    async fn fill_comment(&self, text: &str) -> RunResult<()>;

    /// 解除模态对话框（confirm/alert 直接放行）
    async fn disarm_dialogs(&self) -> RunResult<()>;

    /// 点击提交控件
    async fn click_submit(&self, action: SubmitAction) -> RunResult<()>;

    /// 探测并点击"下一请求"续页控件；找到并点击返回 true
    async fn click_continuation(&self) -> RunResult<bool>;

    /// 点击列表中第一个"响应"链接（撤销流程用）；找到返回 true
    async fn click_first_respond(&self) -> RunResult<bool>;
}

/// 导航与筛选能力
#[async_trait]
pub trait Navigator: Send + Sync {
    /// 跳转到功能模块
    async fn goto_module(&self, module: Module) -> RunResult<()>;

    /// 切换工作域
    async fn select_domain(&self, domain: &str) -> RunResult<()>;

    /// 域切换下拉的全部选项
    async fn domain_options(&self) -> RunResult<Vec<String>>;

    /// 状态筛选设为"待处理"
    async fn set_status_filter_pending(&self) -> RunResult<()>;

    /// 审批类型设为"撤销"
    async fn set_approval_type_revoke(&self) -> RunResult<()>;

    /// 点击搜索
    async fn click_search(&self) -> RunResult<()>;

    /// 页面骨架是否就绪（关键控件已出现）
    async fn page_ready(&self) -> RunResult<bool>;

    /// 是否落在服务端错误页（500/502/503/504）
    async fn is_error_page(&self) -> RunResult<bool>;
}

/// 分组指派面板能力
#[async_trait]
pub trait GroupBoard: Send + Sync {
    /// 分组下拉的全部选项
    async fn group_options(&self) -> RunResult<Vec<GroupOption>>;

    /// 选中指定分组（触发用户池 AJAX 刷新）
    async fn select_group(&self, value: &str) -> RunResult<()>;

    /// 用户池瞬时状态
    async fn user_pool_state(&self) -> RunResult<UserPoolState>;

    /// 用户池当前全部用户名
    async fn available_usernames(&self) -> RunResult<Vec<String>>;

    /// 在用户池中选中一批用户，返回实际选中数
    async fn select_pool_users(&self, usernames: &[String]) -> RunResult<usize>;

    /// 点击"添加"把选中用户移入分组
    async fn click_add(&self) -> RunResult<()>;
}

/// 会话存活检查能力
#[async_trait]
pub trait Liveness: Send + Sync {
    /// 页面是否还能响应一次最小求值
    async fn is_alive(&self) -> bool;

    /// 当前页面 URL
    async fn current_url(&self) -> RunResult<String>;

    /// 登录态标志控件（域切换下拉）是否可见
    async fn domain_switch_visible(&self) -> RunResult<bool>;
}

/// 完整的远端界面能力集合
pub trait Surface:
    ViewProbe + ItemGrid + Pager + SubmissionSurface + Navigator + GroupBoard + Liveness
{
}

impl<T> Surface for T where
    T: ViewProbe + ItemGrid + Pager + SubmissionSurface + Navigator + GroupBoard + Liveness
{
}

/// 会话建立入口
///
/// 把"怎么连上远端界面"从引擎中抽出来，测试注入假实现。
#[async_trait]
pub trait Connector: Send + Sync {
    type Surface: Surface;

    /// 建立一个已登录、停在应用入口的会话
    async fn connect(&self) -> RunResult<Self::Surface>;
}
