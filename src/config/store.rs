//! 持久化状态存储
//!
//! 监听端的全部磁盘状态都在 `<config_dir>/bcvi/` 下：
//!
//! ```text
//! ~/.config/bcvi/
//!   listener_key     # 当前认证密钥，单行
//!   listener_port    # 当前绑定端口，单行
//!   listener_pid     # 当前监听进程 pid，单行
//!   config.env       # 可选的环境覆盖（dotenvy 格式）
//!   plugins/*.json   # 声明式命令插件
//! ```
//!
//! 读取容忍文件缺失（返回 None）；写入 truncate 后整体替换。
//! 磁盘上的三个文件是唯一事实，过期内容按缺失处理。

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

const KEY_FILE: &str = "listener_key";
const PORT_FILE: &str = "listener_port";
const PID_FILE: &str = "listener_pid";
const ENV_FILE: &str = "config.env";
const PLUGIN_DIR: &str = "plugins";

/// 缺省端口公式：`(uid * 10 + 9) mod 65536`
///
/// 每个用户得到一个确定、互不重叠概率高的回传端口
pub fn default_port(uid: u32) -> u16 {
    ((uid as u64 * 10 + 9) % 65536) as u16
}

/// 当前用户的缺省端口
pub fn default_port_for_current_user() -> u16 {
    let uid = unsafe { libc::getuid() };
    default_port(uid)
}

/// 配置目录句柄
///
/// 所有文件操作都经由这里，目录按需创建
#[derive(Clone, Debug)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// 打开每用户配置目录（`~/.config/bcvi/`）
    pub fn open() -> Result<Self> {
        let base = dirs::config_dir().context("unable to determine the user config directory")?;
        Ok(Self::at(base.join("bcvi")))
    }

    /// 在指定目录上打开（测试用）
    pub fn at(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// 配置目录路径
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// 插件目录路径
    pub fn plugin_dir(&self) -> PathBuf {
        self.dir.join(PLUGIN_DIR)
    }

    /// 预载 `config.env`（存在时）
    ///
    /// 命令行已设置的变量优先，与 dotenvy 的 from_path 语义一致
    pub fn load_env_file(&self) {
        let path = self.dir.join(ENV_FILE);
        if path.exists() {
            match dotenvy::from_path(&path) {
                Ok(_) => tracing::debug!(path = %path.display(), "Loaded config.env"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to load config.env"),
            }
        }
    }

    fn read_line(&self, name: &str) -> Option<String> {
        let contents = fs::read_to_string(self.dir.join(name)).ok()?;
        let line = contents.lines().next()?.trim().to_string();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    fn write_line(&self, name: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.dir.join(name);
        fs::write(&path, format!("{}\n", value))
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// 读取当前认证密钥
    pub fn read_auth_key(&self) -> Option<String> {
        self.read_line(KEY_FILE)
    }

    /// 写入认证密钥
    pub fn write_auth_key(&self, key: &str) -> Result<()> {
        self.write_line(KEY_FILE, key)
    }

    /// 读取上次绑定的端口
    pub fn read_port(&self) -> Option<u16> {
        self.read_line(PORT_FILE)?.parse().ok()
    }

    /// 写入绑定端口
    pub fn write_port(&self, port: u16) -> Result<()> {
        self.write_line(PORT_FILE, &port.to_string())
    }

    /// 读取上一个监听进程的 pid
    pub fn read_pid(&self) -> Option<u32> {
        self.read_line(PID_FILE)?.parse().ok()
    }

    /// 写入当前进程 pid
    pub fn write_pid(&self, pid: u32) -> Result<()> {
        self.write_line(PID_FILE, &pid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_port_formula() {
        assert_eq!(default_port(500), 5009);
        assert_eq!(default_port(0), 9);
        // 大 uid 回绕
        assert_eq!(default_port(1_000_000), (10_000_009u64 % 65536) as u16);
    }

    #[test]
    fn test_missing_files_read_as_absent() {
        let tmp = TempDir::new().unwrap();
        let store = ConfigStore::at(tmp.path().join("bcvi"));
        assert!(store.read_auth_key().is_none());
        assert!(store.read_port().is_none());
        assert!(store.read_pid().is_none());
    }

    #[test]
    fn test_write_read_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = ConfigStore::at(tmp.path().join("bcvi"));

        store.write_auth_key("deadbeef").unwrap();
        store.write_port(5009).unwrap();
        store.write_pid(4242).unwrap();

        assert_eq!(store.read_auth_key().as_deref(), Some("deadbeef"));
        assert_eq!(store.read_port(), Some(5009));
        assert_eq!(store.read_pid(), Some(4242));
    }

    #[test]
    fn test_write_truncates_previous_value() {
        let tmp = TempDir::new().unwrap();
        let store = ConfigStore::at(tmp.path().join("bcvi"));

        store.write_auth_key("a-long-previous-key").unwrap();
        store.write_auth_key("short").unwrap();
        assert_eq!(store.read_auth_key().as_deref(), Some("short"));
    }

    #[test]
    fn test_garbage_pid_is_absent() {
        let tmp = TempDir::new().unwrap();
        let store = ConfigStore::at(tmp.path().join("bcvi"));
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join(PID_FILE), "not-a-pid\n").unwrap();
        assert!(store.read_pid().is_none());
    }
}
