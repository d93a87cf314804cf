//! 服务层模块
//!
//! 包含两个端点引擎与它们的外围动作

pub mod client;
pub mod docs;
pub mod handlers;
pub mod install;
pub mod listener;
pub mod ssh;
pub mod term;
