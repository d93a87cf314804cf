//! 领域模型模块
//!
//! 纯数据结构与纯解析，不依赖 tokio

pub mod paths;
pub mod protocol;

// Re-exports for convenience
pub use paths::PathRewrite;
pub use protocol::{DocumentBody, Request, Response, ResponseCode};
