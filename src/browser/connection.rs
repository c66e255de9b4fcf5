use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::RunResult;

/// 连接到浏览器并获取页面
///
/// 通过调试端口附着到用户已手动登录的浏览器。优先复用 URL 已落在
/// 目标主机上的标签页（保住登录态），没有则新开一页并导航到入口。
pub async fn connect_to_browser_and_page(
    port: u16,
    target_url: &str,
    target_host: &str,
) -> RunResult<(Browser, Page)> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);
    debug!("目标 URL: {}, 目标主机: {}", target_url, target_host);

    let (browser, mut handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        e
    })?;
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let pages = browser.pages().await?;
    debug!("获取到 {} 个页面", pages.len());

    // 查找已经停在目标主机上的标签页
    for p in pages.iter() {
        if let Ok(Some(url)) = p.url().await {
            debug!("检查页面 URL: {}", url);
            if url.contains(target_host) {
                info!("✓ 复用已打开的页面: {}", url);
                return Ok((browser, p.clone()));
            }
        }
    }

    debug!("未找到已打开的目标页面，将创建新页面");
    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建新页面失败: {}", e);
        e
    })?;
    page.goto(target_url).await.map_err(|e| {
        error!("导航到 {} 失败: {}", target_url, e);
        e
    })?;
    info!("已导航到: {}", target_url);

    Ok((browser, page))
}
