//! 业务能力层
//!
//! 描述"引擎能做什么"，每个能力只处理一件事：
//! - `detector` - 视图变化检测能力
//! - `session` - 会话看护能力
//! - `selector` - 批次选择能力
//! - `submission` - 批次提交能力
//! - `groups` - 分组指派能力

pub mod detector;
pub mod groups;
pub mod selector;
pub mod session;
pub mod submission;

pub use detector::ChangeDetector;
pub use groups::GroupAssigner;
pub use selector::{BatchSelector, SelectionOutcome};
pub use session::SessionManager;
pub use submission::SubmissionLoop;
