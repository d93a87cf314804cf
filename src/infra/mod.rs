//! 基础设施模块
//!
//! 封装外部依赖（socket 成帧、进程执行）

pub mod command;
pub mod wire;

pub use command::CommandRunner;
