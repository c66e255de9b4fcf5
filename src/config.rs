/// 程序配置
///
/// 所有可调阈值集中在这里。分页导航重试次数（`nav_retries`）与
/// 稳定性采样窗口（`stability_samples`）没有经过全部延迟条件的验证，
/// 因此保持可配置而不是写死。
#[derive(Clone, Debug)]
pub struct Config {
    /// 目标应用入口 URL
    pub base_url: String,
    /// 目标应用主机名（会话有效性检查用）
    pub app_host: String,
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    /// 页面/表格加载超时（秒）
    pub page_timeout_secs: u64,
    /// 搜索结果加载超时（秒）
    pub search_timeout_secs: u64,
    /// 用户池（AJAX 下拉）加载超时（秒）
    pub pool_timeout_secs: u64,
    /// 稳定性检查连续采样次数
    pub stability_samples: usize,
    /// 稳定性检查采样间隔（毫秒）
    pub stability_interval_ms: u64,
    /// 分页安全上限
    pub max_pages: usize,
    /// 批次安全上限
    pub max_batches: usize,
    /// 翻页点击重试次数（指纹验证失败后）
    pub nav_retries: usize,
    /// 分组指派每批用户数
    pub group_batch_size: usize,
    /// 提交后续页探测次数
    pub continuation_attempts: usize,
    /// 提交后续页探测间隔（毫秒）
    pub continuation_interval_ms: u64,
    /// 提交后页面过渡等待（秒）
    pub settle_secs: u64,
    /// 结束前的最后延长等待（秒）
    pub extended_wait_secs: u64,
    /// 认证瞬时故障重试次数
    pub auth_retries: usize,
    /// 认证重试固定退避（秒）
    pub auth_backoff_secs: u64,
    /// 强制终止升级宽限期（毫秒）
    pub escalation_grace_ms: u64,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://govca.npki.gov.ph:8443/SecureTMSWebMgr/".to_string(),
            app_host: "govca.npki.gov.ph".to_string(),
            browser_debug_port: 9222,
            page_timeout_secs: 30,
            search_timeout_secs: 30,
            pool_timeout_secs: 60,
            stability_samples: 5,
            stability_interval_ms: 1000,
            max_pages: 50,
            max_batches: 20,
            nav_retries: 3,
            group_batch_size: 20,
            continuation_attempts: 8,
            continuation_interval_ms: 2000,
            settle_secs: 7,
            extended_wait_secs: 5,
            auth_retries: 2,
            auth_backoff_secs: 5,
            escalation_grace_ms: 5000,
            verbose_logging: false,
            output_log_file: "run_log.txt".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            base_url: std::env::var("GOVCA_BASE_URL").unwrap_or(default.base_url),
            app_host: std::env::var("GOVCA_APP_HOST").unwrap_or(default.app_host),
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT", default.browser_debug_port),
            page_timeout_secs: env_parse("PAGE_TIMEOUT_SECS", default.page_timeout_secs),
            search_timeout_secs: env_parse("SEARCH_TIMEOUT_SECS", default.search_timeout_secs),
            pool_timeout_secs: env_parse("POOL_TIMEOUT_SECS", default.pool_timeout_secs),
            stability_samples: env_parse("STABILITY_SAMPLES", default.stability_samples),
            stability_interval_ms: env_parse("STABILITY_INTERVAL_MS", default.stability_interval_ms),
            max_pages: env_parse("MAX_PAGES", default.max_pages),
            max_batches: env_parse("MAX_BATCHES", default.max_batches),
            nav_retries: env_parse("NAV_RETRIES", default.nav_retries),
            group_batch_size: env_parse("GROUP_BATCH_SIZE", default.group_batch_size),
            continuation_attempts: env_parse("CONTINUATION_ATTEMPTS", default.continuation_attempts),
            continuation_interval_ms: env_parse(
                "CONTINUATION_INTERVAL_MS",
                default.continuation_interval_ms,
            ),
            settle_secs: env_parse("SETTLE_SECS", default.settle_secs),
            extended_wait_secs: env_parse("EXTENDED_WAIT_SECS", default.extended_wait_secs),
            auth_retries: env_parse("AUTH_RETRIES", default.auth_retries),
            auth_backoff_secs: env_parse("AUTH_BACKOFF_SECS", default.auth_backoff_secs),
            escalation_grace_ms: env_parse("ESCALATION_GRACE_MS", default.escalation_grace_ms),
            verbose_logging: env_parse("VERBOSE_LOGGING", default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
        }
    }
}

/// 读取环境变量并解析，缺失或非法时退回默认值
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
