//! 声明式命令插件
//!
//! Rust 没有运行时模块加载，插件退化为配置目录下的 JSON 声明：
//!
//! ```json
//! {
//!   "name": "play",
//!   "program": "mpv",
//!   "args": ["--really-quiet"],
//!   "wait": false,
//!   "doc": "Play the listed files with mpv on the workstation."
//! }
//! ```
//!
//! 监听端启动时从 `<config_dir>/bcvi/plugins/*.json` 逐个读取并
//! 注册；解析失败只告警跳过，不影响其它插件。

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

/// 插件命令声明
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PluginCommand {
    /// 注册到协议里的命令名
    pub name: String,
    /// 工作站上要运行的程序
    pub program: String,
    /// 固定参数，改写后的路径列表会追加在其后
    #[serde(default)]
    pub args: Vec<String>,
    /// true 时等待程序退出再回终结响应（viwait 语义）
    #[serde(default)]
    pub wait: bool,
    /// 提供给 commands_pod 的文档
    #[serde(default)]
    pub doc: String,
}

/// 读取插件目录下的全部声明
///
/// 目录不存在返回空表。只认 `.json` 后缀
pub fn load_plugin_commands(dir: &Path) -> Vec<PluginCommand> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut commands = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read plugin file");
                continue;
            }
        };
        match serde_json::from_str::<PluginCommand>(&contents) {
            Ok(cmd) => {
                info!(path = %path.display(), command = %cmd.name, "Loaded plugin command");
                commands.push(cmd);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse plugin file");
            }
        }
    }

    // 文件名顺序决定注册顺序，保证冲突时的覆盖可预测
    commands.sort_by(|a, b| a.name.cmp(&b.name));
    commands
}
