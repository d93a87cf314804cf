//! bcvi - 回传命令代理
//!
//! 用户通过 ssh 登到远端后，在远端发起的动作（用编辑器打开文件、
//! 把文件拷回桌面）会沿着 ssh 建立的反向隧道送回工作站执行。
//! 三个部件咬合在一起：
//!
//! - 工作站上的监听端（`--listener`），在回环端口上接受带认证的
//!   请求并派发给本地 handler；
//! - 远端的客户端（缺省模式），从 `BCVI_CONF` 找到回传通道，
//!   成帧发请求、解释响应；
//! - ssh wrapper（`--wrap-ssh`），改写 ssh 命令行加上反向转发，
//!   并把配置夹带在 `TERM` 里送过去（`--unpack-term` 在远端拆包）。

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
pub mod state;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::env::constants::VERSION;

/// 初始化监听端日志
///
/// `RUST_LOG` 优先，缺省 `bcvi=info`
pub fn init_listener_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bcvi=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
