use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::time::Duration;

use govca_approval_bot::utils::logging::{init_log_file, init_tracing, log_startup, print_final_stats};
use govca_approval_bot::{
    CancelToken, CdpConnector, ClientVault, Config, Reporter, StopController, WorkflowEngine,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置并初始化日志
    let config = Config::from_env();
    init_tracing(config.verbose_logging);
    init_log_file(&config.output_log_file)?;

    // 从环境读取本次运行的工作流参数
    let workflow = std::env::var("WORKFLOW").unwrap_or_else(|_| "approve".to_string());
    let domain = std::env::var("DOMAIN").unwrap_or_default();
    let usernames: Vec<String> = std::env::var("USERNAMES")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    let comment = std::env::var("COMMENT").unwrap_or_else(|_| "Approved".to_string());
    let group_name = std::env::var("GROUP_NAME").unwrap_or_default();
    let process_counterpart: bool = std::env::var("PROCESS_COUNTERPART")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(true);

    if workflow != "group_all" && domain.is_empty() {
        bail!("DOMAIN 未设置");
    }

    log_startup(&workflow, &domain);

    let vault = ClientVault::new();
    let token = CancelToken::new();
    let (reporter, mut events) = Reporter::channel();
    // 命令行模式没有前端，排空事件通道即可
    tokio::spawn(async move { while events.recv().await.is_some() {} });

    let controller = StopController::new(
        token.clone(),
        Arc::new(vault.clone()),
        reporter.clone(),
        Duration::from_millis(config.escalation_grace_ms),
    );

    // Ctrl-C 走停止升级，而不是硬杀进程
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                controller.request_stop();
            }
        });
    }

    let connector = CdpConnector::new(config.clone(), vault);
    let mut engine = WorkflowEngine::new(connector, config.clone(), token, reporter);

    let success = match workflow.as_str() {
        "approve" => {
            engine
                .run_approval_workflow(&domain, &usernames, &comment, process_counterpart)
                .await
        }
        "reject" => {
            engine
                .run_rejection_workflow(&domain, &usernames, &comment, process_counterpart)
                .await
        }
        "revoke" => {
            engine
                .run_revoke_workflow(&domain, &comment, process_counterpart)
                .await
        }
        "group" => {
            engine
                .run_group_assignment_workflow(&domain, &group_name, &usernames)
                .await
        }
        "group_all" => {
            engine
                .run_group_assignment_all_domains(&group_name, &usernames)
                .await
        }
        other => bail!("未知的工作流: {}", other),
    };

    controller.worker_finished();
    engine.close_session();
    print_final_stats(success, &config.output_log_file);

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
