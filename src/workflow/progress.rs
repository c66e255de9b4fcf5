//! 运行进度与日志上报
//!
//! 引擎与前端之间只有一条多路复用通道：日志行和进度快照都作为
//! `EngineEvent` 走同一个无界 mpsc 发送端，前端单点消费，天然保序。
//! 通道另一端关闭时上报静默丢弃，引擎不因此失败。

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};

/// 日志级别（面向前端展示）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

/// 运行阶段（如 1/2 主域、2/2 对偶域）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phase {
    pub index: usize,
    pub total: usize,
    pub label: String,
}

/// 进度快照
///
/// `total == 0` 表示总量未知（不确定进度）；`total > 0` 时
/// `current` 保证落在 `[0, total]` 内。
#[derive(Clone, Debug)]
pub struct ProgressSnapshot {
    pub phase: Option<Phase>,
    pub current: usize,
    pub total: usize,
    pub message: String,
    /// 终态快照：本次运行不会再有后续事件
    pub finished: bool,
}

/// 引擎对外事件
#[derive(Clone, Debug)]
pub enum EngineEvent {
    Log { level: Level, message: String },
    Progress(ProgressSnapshot),
}

#[derive(Default)]
struct ReporterState {
    phase: Option<Phase>,
    total_phases: usize,
}

/// 进度上报器
///
/// 可廉价克隆，克隆体共享同一条通道与当前阶段。
#[derive(Clone)]
pub struct Reporter {
    tx: UnboundedSender<EngineEvent>,
    state: Arc<Mutex<ReporterState>>,
}

impl Reporter {
    pub fn new(tx: UnboundedSender<EngineEvent>) -> Self {
        Self {
            tx,
            state: Arc::new(Mutex::new(ReporterState::default())),
        }
    }

    /// 创建一对（上报器，接收端），测试与前端装配用
    pub fn channel() -> (Self, UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self::new(tx), rx)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReporterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn send(&self, event: EngineEvent) {
        // 前端已退出时丢弃，不影响引擎
        let _ = self.tx.send(event);
    }

    fn log(&self, level: Level, message: String) {
        match level {
            Level::Info | Level::Success => info!("{}", message),
            Level::Warning => warn!("{}", message),
            Level::Error => error!("{}", message),
        }
        self.send(EngineEvent::Log { level, message });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(Level::Success, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(Level::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message.into());
    }

    /// 开始新一轮运行，声明总阶段数并清空当前阶段
    pub fn begin_run(&self, total_phases: usize) {
        let mut state = self.lock();
        state.total_phases = total_phases;
        state.phase = None;
    }

    /// 进入新阶段
    pub fn set_phase(&self, index: usize, label: impl Into<String>) {
        let label = label.into();
        let total = {
            let mut state = self.lock();
            state.phase = Some(Phase {
                index,
                total: state.total_phases,
                label: label.clone(),
            });
            state.total_phases
        };
        self.info(format!("—— 阶段 {}/{}：{} ——", index, total, label));
    }

    pub fn current_phase(&self) -> Option<Phase> {
        self.lock().phase.clone()
    }

    /// 上报一次进度
    pub fn progress(&self, current: usize, total: usize, message: impl Into<String>) {
        self.snapshot(current, total, message.into(), false);
    }

    /// 上报终态快照（每条成功/失败/取消路径都要走到这里）
    pub fn finish(&self, current: usize, total: usize, message: impl Into<String>) {
        self.snapshot(current, total, message.into(), true);
    }

    fn snapshot(&self, current: usize, total: usize, message: String, finished: bool) {
        let current = if total > 0 { current.min(total) } else { current };
        self.send(EngineEvent::Progress(ProgressSnapshot {
            phase: self.current_phase(),
            current,
            total,
            message,
            finished,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn progress_is_clamped_into_bounds() {
        let (reporter, mut rx) = Reporter::channel();
        reporter.progress(15, 10, "越界");
        let events = drain(&mut rx);
        match &events[0] {
            EngineEvent::Progress(snap) => {
                assert_eq!(snap.current, 10);
                assert_eq!(snap.total, 10);
            }
            other => panic!("意外事件: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_total_passes_current_through() {
        let (reporter, mut rx) = Reporter::channel();
        reporter.progress(7, 0, "总量未知");
        match &drain(&mut rx)[0] {
            EngineEvent::Progress(snap) => {
                assert_eq!(snap.current, 7);
                assert_eq!(snap.total, 0);
            }
            other => panic!("意外事件: {:?}", other),
        }
    }

    #[tokio::test]
    async fn snapshots_carry_the_current_phase() {
        let (reporter, mut rx) = Reporter::channel();
        reporter.begin_run(2);
        reporter.set_phase(1, "NCR00Sign");
        reporter.progress(1, 3, "进行中");
        let events = drain(&mut rx);
        let snap = events
            .iter()
            .find_map(|ev| match ev {
                EngineEvent::Progress(s) => Some(s),
                _ => None,
            })
            .expect("应有进度快照");
        let phase = snap.phase.as_ref().expect("应带阶段信息");
        assert_eq!(phase.index, 1);
        assert_eq!(phase.total, 2);
        assert_eq!(phase.label, "NCR00Sign");
    }

    #[tokio::test]
    async fn log_and_progress_share_one_channel_in_order() {
        let (reporter, mut rx) = Reporter::channel();
        reporter.info("第一条");
        reporter.progress(1, 2, "第二条");
        reporter.info("第三条");
        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], EngineEvent::Log { .. }));
        assert!(matches!(events[1], EngineEvent::Progress(_)));
        assert!(matches!(events[2], EngineEvent::Log { .. }));
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_panic() {
        let (reporter, rx) = Reporter::channel();
        drop(rx);
        reporter.info("无人收听");
        reporter.finish(0, 0, "仍然安全");
    }
}
