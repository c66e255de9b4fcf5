//! 日志工具模块
//!
//! 提供日志初始化和运行记录的辅助函数

use std::fs;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化 tracing 订阅器
///
/// # 参数
/// - `verbose`: 是否启用 debug 级别输出
pub fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// 初始化运行日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n审批运行日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
///
/// # 参数
/// - `workflow`: 即将运行的工作流名称
/// - `domain`: 目标域
pub fn log_startup(workflow: &str, domain: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - GovCA 审批工作流引擎");
    info!("📋 工作流: {}", workflow);
    info!("🌐 目标域: {}", domain);
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `success`: 流程是否成功
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(success: bool, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 运行结束");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    if success {
        info!("✅ 流程成功");
    } else {
        info!("❌ 流程未成功，请查看上方日志");
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
