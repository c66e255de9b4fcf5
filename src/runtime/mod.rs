//! 可取消运行时原语
//!
//! - `cancel`: 取消令牌与可中断等待
//! - `wake`: 防休眠作用域守卫

pub mod cancel;
pub mod wake;

pub use cancel::{cancellable_wait, interruptible_sleep, CancelToken};
pub use wake::WakeGuard;
