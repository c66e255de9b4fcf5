//! 停止升级控制
//!
//! 停止请求分三级递进：
//! 1. 协作取消 —— 置位取消令牌，工作流在下一个挂起点自行退出
//! 2. 强制断开 —— 宽限期内工作流没有收尾，没收浏览器句柄，
//!    切断一切在途 I/O
//! 3. 放弃等待 —— 再过一个宽限期仍未收尾，标记终结，前端可以退出
//!
//! 工作流在任何一级之前收尾都会止住后续升级。

use std::sync::{Arc, Mutex};

use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::infrastructure::vault::ClientVault;
use crate::runtime::CancelToken;
use crate::workflow::progress::Reporter;

/// 强制终止句柄
pub trait ForceQuit: Send + Sync + 'static {
    fn force_quit(&self);
}

impl ForceQuit for ClientVault {
    fn force_quit(&self) {
        self.force_disconnect();
    }
}

/// 停止流程的当前状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopState {
    /// 正常运行，未请求停止
    Running,
    /// 已请求协作取消，宽限期计时中
    StopRequested,
    /// 已强制断开
    Escalated,
    /// 已终结（工作流收尾或放弃等待）
    Finalized,
}

/// 停止升级控制器
pub struct StopController<Q: ForceQuit> {
    token: CancelToken,
    quit: Arc<Q>,
    reporter: Reporter,
    state: Arc<Mutex<StopState>>,
    grace: Duration,
}

impl<Q: ForceQuit> Clone for StopController<Q> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            quit: Arc::clone(&self.quit),
            reporter: self.reporter.clone(),
            state: Arc::clone(&self.state),
            grace: self.grace,
        }
    }
}

impl<Q: ForceQuit> StopController<Q> {
    pub fn new(token: CancelToken, quit: Arc<Q>, reporter: Reporter, grace: Duration) -> Self {
        Self {
            token,
            quit,
            reporter,
            state: Arc::new(Mutex::new(StopState::Running)),
            grace,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StopState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> StopState {
        *self.lock()
    }

    /// 请求停止（幂等），随后在后台按宽限期升级
    pub fn request_stop(&self) {
        {
            let mut state = self.lock();
            if *state != StopState::Running {
                return;
            }
            *state = StopState::StopRequested;
        }
        info!("🛑 已请求停止，等待工作流自行收尾");
        self.token.set();

        let this = self.clone();
        tokio::spawn(async move {
            sleep(this.grace).await;
            if !this.escalate() {
                return;
            }
            sleep(this.grace).await;
            this.give_up();
        });
    }

    /// 第一级宽限期到：工作流还没收尾就强制断开
    fn escalate(&self) -> bool {
        {
            let mut state = self.lock();
            if *state != StopState::StopRequested {
                return false;
            }
            *state = StopState::Escalated;
        }
        warn!("⚠️ 工作流未在宽限期内收尾，强制断开浏览器会话");
        self.quit.force_quit();
        true
    }

    /// 第二级宽限期到：放弃等待
    ///
    /// 被卡死的工作流自己发不出终态快照，这里替它收尾，
    /// 前端不必轮询状态就能得到失败结局。
    fn give_up(&self) {
        {
            let mut state = self.lock();
            if *state != StopState::Escalated {
                return;
            }
            *state = StopState::Finalized;
        }
        warn!("⚠️ 强制断开后工作流仍未收尾，放弃等待");
        self.reporter.error("❌ 工作流未响应强制断开，已放弃等待");
        self.reporter.finish(0, 0, "已强制终止");
    }

    /// 工作流收尾时调用，止住一切后续升级
    pub fn worker_finished(&self) {
        let mut state = self.lock();
        if *state != StopState::Finalized {
            *state = StopState::Finalized;
            info!("✓ 工作流已收尾");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingQuit {
        calls: AtomicUsize,
    }

    impl ForceQuit for CountingQuit {
        fn force_quit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller(
        grace_ms: u64,
    ) -> (
        StopController<CountingQuit>,
        Arc<CountingQuit>,
        tokio::sync::mpsc::UnboundedReceiver<crate::workflow::progress::EngineEvent>,
    ) {
        let quit = Arc::new(CountingQuit::default());
        let token = CancelToken::new();
        let (reporter, rx) = Reporter::channel();
        (
            StopController::new(
                token,
                Arc::clone(&quit),
                reporter,
                Duration::from_millis(grace_ms),
            ),
            quit,
            rx,
        )
    }

    #[tokio::test]
    async fn request_stop_sets_token_immediately() {
        let (ctl, _quit, _rx) = controller(50);
        assert_eq!(ctl.state(), StopState::Running);
        ctl.request_stop();
        assert!(ctl.token.is_set());
        assert_eq!(ctl.state(), StopState::StopRequested);
    }

    #[tokio::test]
    async fn worker_finishing_in_grace_prevents_escalation() {
        let (ctl, quit, _rx) = controller(30);
        ctl.request_stop();
        ctl.worker_finished();
        sleep(Duration::from_millis(120)).await;
        assert_eq!(quit.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctl.state(), StopState::Finalized);
    }

    #[tokio::test]
    async fn stalled_worker_gets_force_quit_once() {
        let (ctl, quit, _rx) = controller(20);
        ctl.request_stop();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(quit.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.state(), StopState::Finalized);
    }

    #[tokio::test]
    async fn request_stop_is_idempotent() {
        let (ctl, quit, _rx) = controller(20);
        ctl.request_stop();
        ctl.request_stop();
        ctl.request_stop();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(quit.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worker_finishing_after_escalation_does_not_revert_state() {
        let (ctl, quit, _rx) = controller(10);
        ctl.request_stop();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(quit.calls.load(Ordering::SeqCst), 1);
        ctl.worker_finished();
        assert_eq!(ctl.state(), StopState::Finalized);
    }

    #[tokio::test]
    async fn giving_up_emits_a_terminal_snapshot() {
        use crate::workflow::progress::{EngineEvent, Level};

        // 工作流卡死到底：放弃等待后前端要能收到失败结局，
        // 而不是只留下一行日志
        let (ctl, _quit, mut rx) = controller(10);
        ctl.request_stop();
        sleep(Duration::from_millis(80)).await;
        assert_eq!(ctl.state(), StopState::Finalized);

        let mut saw_error = false;
        let mut saw_terminal = false;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                EngineEvent::Log { level, .. } if level == Level::Error => saw_error = true,
                EngineEvent::Progress(snap) if snap.finished => saw_terminal = true,
                _ => {}
            }
        }
        assert!(saw_error);
        assert!(saw_terminal);
    }
}
