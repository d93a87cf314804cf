//! 命令 handler 注册表与执行
//!
//! 协议里的 `Command` 头经注册表解析为一个 `CommandSpec`，
//! 内建命令（vi / viwait / scpd / commands_pod）与声明式插件
//! 共用同一张表。后注册者覆盖先注册者，冲突时告警。

pub mod plugin;

use std::collections::HashMap;

use tracing::warn;

use crate::domain::protocol::{Request, Response};
use crate::error::BcviResult;
use crate::infra::CommandRunner;
use crate::state::ListenerContext;

pub use plugin::PluginCommand;

/// commands_pod 响应体的 MIME 类型
pub const DOCS_CONTENT_TYPE: &str = "text/pod";

/// 命令行为
#[derive(Clone, Debug, PartialEq)]
pub enum CommandKind {
    /// 在工作站上打开编辑器；wait 为 true 时等编辑器退出（viwait）
    Edit { wait: bool },
    /// 把远端文件 scp 到桌面
    CopyToDesktop,
    /// 输出注册表文档（300 响应）
    CommandDocs,
    /// 插件声明的外部程序
    External(PluginCommand),
}

/// 注册表条目
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub name: String,
    pub doc: String,
    pub kind: CommandKind,
}

/// 命令注册表
///
/// 启动时装配，之后只读
pub struct CommandRegistry {
    commands: HashMap<String, CommandSpec>,
}

impl CommandRegistry {
    /// 空表
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// 带全部内建命令的表
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(CommandSpec {
            name: "vi".to_string(),
            doc: "Open the listed remote files in the workstation editor and \
                  return immediately."
                .to_string(),
            kind: CommandKind::Edit { wait: false },
        });
        registry.register(CommandSpec {
            name: "viwait".to_string(),
            doc: "Open the listed remote files in the workstation editor and \
                  wait for the editor to exit. Used by the sudoedit wrapper so \
                  the remote side holds its temp file until editing finishes."
                .to_string(),
            kind: CommandKind::Edit { wait: true },
        });
        registry.register(CommandSpec {
            name: "scpd".to_string(),
            doc: "Copy the listed remote files to the workstation desktop with scp."
                .to_string(),
            kind: CommandKind::CopyToDesktop,
        });
        registry.register(CommandSpec {
            name: "commands_pod".to_string(),
            doc: "Stream the documentation of every registered command back to \
                  the caller."
                .to_string(),
            kind: CommandKind::CommandDocs,
        });
        registry
    }

    /// 注册一个命令；重名时后者生效并告警
    pub fn register(&mut self, spec: CommandSpec) {
        if self.commands.contains_key(&spec.name) {
            warn!(command = %spec.name, "Command registered twice, later registration wins");
        }
        self.commands.insert(spec.name.clone(), spec);
    }

    /// 从插件目录批量注册
    pub fn register_plugins(&mut self, dir: &std::path::Path) {
        for cmd in plugin::load_plugin_commands(dir) {
            self.register(CommandSpec {
                name: cmd.name.clone(),
                doc: if cmd.doc.is_empty() {
                    format!("Run `{}` on the workstation with the listed files.", cmd.program)
                } else {
                    cmd.doc.clone()
                },
                kind: CommandKind::External(cmd),
            });
        }
    }

    /// 查找命令
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    /// 按名字排序的条目（文档输出需要确定顺序）
    pub fn sorted_specs(&self) -> Vec<&CommandSpec> {
        let mut specs: Vec<&CommandSpec> = self.commands.values().collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// 渲染整张表的文档
    pub fn render_docs(&self) -> String {
        let mut out = String::new();
        for spec in self.sorted_specs() {
            out.push_str(&format!("=head2 C<{}>\n\n{}\n\n", spec.name, spec.doc));
        }
        out
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// 把请求 body 的路径列表改写为本地可达形式
///
/// `+N` 行号指令不动
fn rewritten_paths(ctx: &ListenerContext, request: &Request) -> Vec<String> {
    request
        .body_lines()
        .iter()
        .map(|p| ctx.env.path_rewrite.rewrite(&request.host_alias, p))
        .collect()
}

/// 执行一个命令
///
/// 返回 Some(response) 表示 handler 自带终结响应（目前只有
/// commands_pod 的 300）；None 表示由引擎补发 200。子进程的退出
/// 状态不影响协议层结果：回传协议报告传输成功，不报告应用成功
pub async fn execute(
    spec: &CommandSpec,
    ctx: &ListenerContext,
    request: &Request,
) -> BcviResult<Option<Response>> {
    match &spec.kind {
        CommandKind::Edit { wait } => {
            let paths = rewritten_paths(ctx, request);
            if *wait {
                let status = CommandRunner::run_to_completion(&ctx.env.editor, &paths)
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
                if !status.success() {
                    warn!(editor = %ctx.env.editor, status = ?status.code(), "Editor exited non-zero");
                }
            } else {
                CommandRunner::spawn_detached(&ctx.env.editor, &paths)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            }
            Ok(None)
        }

        CommandKind::CopyToDesktop => {
            let mut args = vec!["-q".to_string(), "--".to_string()];
            for path in request.body_lines() {
                args.push(format!("{}:{}", request.host_alias, path));
            }
            args.push(ctx.env.desktop_dir.to_string_lossy().into_owned());

            let status = CommandRunner::run_to_completion("scp", &args)
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            if !status.success() {
                warn!(status = ?status.code(), "scp exited non-zero");
            }
            Ok(None)
        }

        CommandKind::CommandDocs => {
            let docs = ctx.registry.render_docs();
            Ok(Some(Response::with_document(
                DOCS_CONTENT_TYPE,
                docs.into_bytes(),
            )))
        }

        CommandKind::External(cmd) => {
            let mut args = cmd.args.clone();
            args.extend(rewritten_paths(ctx, request));
            if cmd.wait {
                let status = CommandRunner::run_to_completion(&cmd.program, &args)
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
                if !status.success() {
                    warn!(program = %cmd.program, status = ?status.code(), "Plugin command exited non-zero");
                }
            } else {
                CommandRunner::spawn_detached(&cmd.program, &args)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            }
            Ok(None)
        }
    }
}
