//! 统一错误处理
//!
//! 提供 `BcviError` 枚举，覆盖配置、网络、协议与认证四类故障，
//! 并统一映射到进程退出码

use thiserror::Error;

/// 统一错误类型
///
/// 客户端与监听端共用。除网络 IO 外，每个变体对应一类
/// 用户可见故障。
#[derive(Debug, Error)]
pub enum BcviError {
    /// 配置错误（BCVI_CONF 缺失/格式错误、状态文件损坏）
    #[error("configuration error: {0}")]
    Config(String),

    /// 命令行用法错误
    #[error("usage error: {0}")]
    Usage(String),

    /// 协议错误（greeting 无法解析、状态码非数字、body 截断）
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// 服务端拒绝（900）
    #[error("permission denied: {0}")]
    Denied(String),

    /// 服务端不认识请求的命令（910）
    #[error("unrecognised command: {0}")]
    UnknownCommand(String),

    /// 底层 IO 错误（连接被拒、写入失败等）
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BcviError {
    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// 创建用法错误
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// 创建协议错误
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// 映射到进程退出码
    ///
    /// 用法与协议错误固定为 1，服务端拒绝类为 2
    pub fn exit_code(&self) -> i32 {
        match self {
            BcviError::Config(_) | BcviError::Usage(_) | BcviError::Protocol(_) => 1,
            BcviError::Io(_) => 1,
            BcviError::Denied(_) | BcviError::UnknownCommand(_) => 2,
        }
    }
}

/// 便捷类型别名
pub type BcviResult<T> = Result<T, BcviError>;
