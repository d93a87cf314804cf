//! 帮助文档渲染
//!
//! `--help` 把内置文档交给用户的分页器；监听端可达时，再把
//! `commands_pod` 返回的命令文档（含监听端独有的插件）附在后面。

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::env::constants;
use crate::config::{BackchannelConf, ConfigStore};
use crate::services::client::{self, ClientOptions};
use crate::services::handlers::plugin::load_plugin_commands;

/// 内置帮助文本
const HELP_TEXT: &str = r#"bcvi - back-channel vi: run workstation commands from an ssh session

USAGE
    bcvi [OPTIONS] [--] [FILES | SSH-ARGS]

On the workstation:
    bcvi --listener [--port N] [--reuse-auth]
        Start (or replace) the back-channel listener. It accepts
        authenticated requests on a loopback port and dispatches them
        to local handlers.

    bcvi --wrap-ssh -- <ssh arguments>
        Run ssh with a reverse tunnel back to the listener and the
        connection details packed into TERM. Usually wrapped in an
        alias: alias ssh='bcvi --wrap-ssh --'

    bcvi --add-aliases
        Add the bcvi alias block to your shell rc file.

    bcvi --install HOST [HOST...]
        Copy bcvi to each remote host and register the aliases there.

On the remote host (inside an ssh session started by the wrapper):
    bcvi FILE [FILE...]             open files in the workstation editor
    bcvi +42 FILE                   pass a line directive through untouched
    bcvi --command viwait FILE      wait for the editor to exit
    bcvi --command scpd FILE...     copy files to the workstation desktop

OPTIONS
    -?, --help              this text, through $PAGER
    -l, --listener          become the listener
    -s, --wrap-ssh          rewrite and exec ssh
    -v, --version           print client (and reachable server) version
    -n, --no-path-xlate     do not translate paths to absolute form
    -p, --port N            override the default port
    -c, --command NAME      handler to invoke (default: vi)
        --install HOST...   install bcvi on remote hosts
        --add-aliases       add the alias block to the local shell rc
        --unpack-term       emit shell code re-exporting TERM-packed vars
        --reuse-auth        keep the previous auth key on listener start
        --plugin-help NAME  show the documentation of one plugin

ENVIRONMENT
    BCVI_CONF   alias:gateway:port:auth_key; set by the ssh wrapper
    TERM        may carry a trailing BCVI_CONF line across the ssh hop
    PAGER       preferred pager for this text
"#;

/// 渲染 `--help`
///
/// 监听端可达时附上服务端命令文档，这样 `--help` 能反映只装在
/// 监听端的插件
pub async fn show_help() -> Result<()> {
    let mut text = HELP_TEXT.to_string();

    if let Ok(conf) = BackchannelConf::from_env() {
        let options = ClientOptions {
            command: "commands_pod".to_string(),
            ..ClientOptions::default()
        };
        match client::send_command_with_conf(&conf, &options).await {
            Ok(response) => {
                if let Some(doc) = response.body {
                    text.push_str("\nCOMMANDS (reported by the listener)\n\n");
                    text.push_str(&String::from_utf8_lossy(&doc.content));
                }
            }
            Err(e) => debug!(error = %e, "Listener docs unavailable"),
        }
    }

    render_with_pager(&text).await
}

/// 显示单个插件的文档
pub async fn show_plugin_help(name: &str) -> Result<()> {
    let store = ConfigStore::open()?;
    let commands = load_plugin_commands(&store.plugin_dir());
    match commands.iter().find(|c| c.name == name) {
        Some(cmd) => {
            let text = format!(
                "=head2 C<{}>\n\n{}\n\nProgram: {}\nWaits for completion: {}\n",
                cmd.name,
                if cmd.doc.is_empty() {
                    "(no documentation)"
                } else {
                    cmd.doc.as_str()
                },
                cmd.program,
                cmd.wait
            );
            render_with_pager(&text).await
        }
        None => anyhow::bail!("no plugin named {:?} under {}", name, store.plugin_dir().display()),
    }
}

/// 经分页器输出文本
///
/// stdout 不是终端时直接打印；分页器选择顺序：`$PAGER`、less
pub async fn render_with_pager(text: &str) -> Result<()> {
    if !atty::is(atty::Stream::Stdout) {
        print!("{}", text);
        return Ok(());
    }

    let pager = std::env::var(constants::ENV_PAGER).unwrap_or_else(|_| "less".to_string());

    let child = Command::new(&pager)
        .stdin(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(c) => c,
        Err(e) => {
            // 分页器不可用就降级为直接输出
            debug!(pager = %pager, error = %e, "Pager unavailable, printing directly");
            print!("{}", text);
            return Ok(());
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes()).await?;
    }
    child
        .wait()
        .await
        .with_context(|| format!("failed to wait for pager {}", pager))?;
    Ok(())
}
