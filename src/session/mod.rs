//! 会话与上下文

pub mod manager;

pub use manager::{ContextManager, Session, SessionId};
