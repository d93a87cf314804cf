//! 环境变量配置加载
//!
//! `BCVI_CONF` 描述符解析与监听端运行时设置

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::domain::paths::PathRewrite;
use crate::error::{BcviError, BcviResult};

/// 回传通道描述符（远端客户端视角）
///
/// 由 `BCVI_CONF` 解析而来，四个字段以冒号分隔、顺序固定：
/// `alias:gateway:port:auth_key`
#[derive(Clone, Debug, PartialEq)]
pub struct BackchannelConf {
    /// 远程主机别名（自由字符串，用于显示与路径命名空间）
    pub host_alias: String,
    /// 要拨号的主机，实践中是隧道终点 localhost
    pub gateway: String,
    /// gateway 上的 TCP 端口
    pub port: u16,
    /// 共享密钥（hex 字符串）
    pub auth_key: String,
}

impl BackchannelConf {
    /// 解析冒号分隔的描述符字符串
    ///
    /// 字段缺失或端口非法都是致命错误，调用方应在打开任何
    /// socket 之前失败
    pub fn parse(raw: &str) -> BcviResult<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 4 {
            return Err(BcviError::config(format!(
                "BCVI_CONF must have 4 colon-separated fields, got {}",
                parts.len()
            )));
        }
        if parts[0].is_empty() || parts[1].is_empty() || parts[3].is_empty() {
            return Err(BcviError::config("BCVI_CONF has an empty field"));
        }
        let port: u16 = parts[2]
            .parse()
            .map_err(|_| BcviError::config(format!("invalid port in BCVI_CONF: {:?}", parts[2])))?;

        Ok(Self {
            host_alias: parts[0].to_string(),
            gateway: parts[1].to_string(),
            port,
            auth_key: parts[3].to_string(),
        })
    }

    /// 从环境变量读取描述符
    pub fn from_env() -> BcviResult<Self> {
        let raw = env::var(constants::ENV_CONF).map_err(|_| {
            BcviError::config(
                "BCVI_CONF is not set; are you logged in through the bcvi ssh wrapper?",
            )
        })?;
        Self::parse(&raw)
    }

    /// 还原为描述符字符串（SSH wrapper 打包时使用）
    pub fn to_conf_string(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.host_alias, self.gateway, self.port, self.auth_key
        )
    }
}

/// 监听端运行时设置
///
/// 环境优先，`config.env` 次之（由 ConfigStore 在进程启动时
/// 用 dotenvy 预载），缺省值兜底
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 监听地址
    pub listen_addr: IpAddr,
    /// 编辑器启动器
    pub editor: String,
    /// 路径改写策略
    pub path_rewrite: PathRewrite,
    /// scpd 的落盘目录
    pub desktop_dir: PathBuf,
}

impl EnvConfig {
    /// 从环境变量加载设置
    pub fn from_env() -> Self {
        let listen_addr = env::var("BCVI_LISTEN_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let editor =
            env::var("BCVI_EDITOR").unwrap_or_else(|_| constants::DEFAULT_EDITOR.to_string());

        let path_rewrite = env::var("BCVI_PATH_REWRITE")
            .map(|v| PathRewrite::from_str(&v))
            .unwrap_or_default();

        let desktop_dir = env::var("BCVI_DESKTOP_DIR").map(PathBuf::from).unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Desktop")
        });

        Self {
            listen_addr,
            editor,
            path_rewrite,
            desktop_dir,
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// 常量
pub mod constants {
    /// 回传通道描述符所在的环境变量
    pub const ENV_CONF: &str = "BCVI_CONF";

    /// 终端类型变量，SSH wrapper 借它夹带描述符
    pub const ENV_TERM: &str = "TERM";

    /// 用户偏好的分页器
    pub const ENV_PAGER: &str = "PAGER";

    /// 缺省编辑器启动器
    pub const DEFAULT_EDITOR: &str = "gvim";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
