//! 监听端进程级状态
//!
//! 认证密钥、端口、handler 注册表等进程级资源统一收拢在
//! `ListenerContext` 中，启动时装配完成后不再变化，连接任务
//! 通过 `Arc` 共享（无 fork 运行时下的"spawn 时按值继承"）。

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::config::{ConfigStore, EnvConfig};
use crate::services::handlers::CommandRegistry;

/// 认证密钥生成挂钩
///
/// 缺省实现是对（主机名 + pid + 墙钟 + 随机数）取 sha256；
/// 定制部署可以注入自己的实现
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 缺省密钥生成器
pub struct DigestKeyGenerator;

impl KeyGenerator for DigestKeyGenerator {
    fn generate(&self) -> String {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        let nonce: [u8; 16] = rand::random();

        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update(std::process::id().to_le_bytes());
        hasher.update(
            Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_le_bytes(),
        );
        hasher.update(nonce);
        format!("{:x}", hasher.finalize())
    }
}

/// 监听端上下文
///
/// 启动序列（见 services::listener）装配后只读
pub struct ListenerContext {
    /// 当前认证密钥
    pub auth_key: String,
    /// 绑定端口
    pub port: u16,
    /// 绑定地址
    pub listen_addr: IpAddr,
    /// 运行时设置（编辑器、路径改写策略等）
    pub env: EnvConfig,
    /// 命令注册表
    pub registry: CommandRegistry,
    /// 磁盘状态
    pub store: ConfigStore,
    /// 启动时间
    pub started_at: DateTime<Utc>,
}

impl ListenerContext {
    /// 常数时间比较客户端出示的密钥
    ///
    /// 长度不同立即返回 false；相同长度下耗时与内容无关
    pub fn verify_auth_key(&self, presented: &str) -> bool {
        constant_time_eq(presented.as_bytes(), self.auth_key.as_bytes())
    }
}

/// 常数时间字节比较
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
