//! bcvi 命令行入口
//!
//! 一个可执行文件、多个互斥模式：
//! - 工作站侧：`--listener`、`--wrap-ssh`、`--add-aliases`、`--install`
//! - 远端侧：缺省客户端模式、`--unpack-term`
//! - 双侧通用：`--help`、`--version`、`--plugin-help`

use std::process;

use clap::Parser;

use bcvi::config::env::constants;
use bcvi::config::{BackchannelConf, ConfigStore};
use bcvi::error::BcviError;
use bcvi::services::client::{self, ClientOptions};
use bcvi::services::install::{self, ShellRcChooser};
use bcvi::services::listener::{self, ListenerOptions};
use bcvi::services::ssh;
use bcvi::services::term::unpack_term;
use bcvi::services::docs;

#[derive(Debug, Parser)]
#[command(
    name = "bcvi",
    about = "Back-channel command proxy over SSH reverse tunnels",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// 经分页器显示内置文档
    #[arg(long = "help", short = '?')]
    help: bool,

    /// 成为监听端
    #[arg(long, short = 'l')]
    listener: bool,

    /// 把 bcvi 装到远程主机
    #[arg(long, value_name = "HOST", num_args = 1..)]
    install: Option<Vec<String>>,

    /// 把别名块写进本机 shell rc 文件
    #[arg(long)]
    add_aliases: bool,

    /// 输出还原 TERM 夹带变量的 shell 代码
    #[arg(long)]
    unpack_term: bool,

    /// 改写并 exec ssh（参数放在 `--` 之后）
    #[arg(long, short = 's')]
    wrap_ssh: bool,

    /// 打印客户端与（可达时）服务端版本
    #[arg(long, short = 'v')]
    version: bool,

    /// 跳过绝对路径翻译
    #[arg(long, short = 'n')]
    no_path_xlate: bool,

    /// 端口覆盖
    #[arg(long, short = 'p', value_name = "PORT")]
    port: Option<u16>,

    /// 要调用的 handler
    #[arg(long, short = 'c', value_name = "NAME", default_value = "vi")]
    command: String,

    /// 监听端启动时保留上一个认证密钥
    #[arg(long)]
    reuse_auth: bool,

    /// 显示指定插件的文档
    #[arg(long, value_name = "PLUGIN")]
    plugin_help: Option<String>,

    /// 路径与 +N 指令；--wrap-ssh 时是 `--` 之后的 ssh 参数
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Cli {
    /// 被选中的模式开关（互斥检查用）
    fn selected_modes(&self) -> Vec<&'static str> {
        let mut modes = Vec::new();
        if self.help {
            modes.push("--help");
        }
        if self.listener {
            modes.push("--listener");
        }
        if self.install.is_some() {
            modes.push("--install");
        }
        if self.add_aliases {
            modes.push("--add-aliases");
        }
        if self.unpack_term {
            modes.push("--unpack-term");
        }
        if self.wrap_ssh {
            modes.push("--wrap-ssh");
        }
        if self.version {
            modes.push("--version");
        }
        if self.plugin_help.is_some() {
            modes.push("--plugin-help");
        }
        modes
    }
}

fn main() {
    let cli = Cli::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("bcvi: failed to create runtime: {}", e);
            process::exit(1);
        }
    };

    process::exit(rt.block_on(run(cli)));
}

async fn run(cli: Cli) -> i32 {
    let modes = cli.selected_modes();
    if modes.len() > 1 {
        eprintln!(
            "bcvi: options {} are mutually exclusive",
            modes.join(" and ")
        );
        return 1;
    }

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("bcvi: {:#}", e);
            match e.downcast_ref::<BcviError>() {
                Some(be) => be.exit_code(),
                None => 1,
            }
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    if cli.help {
        docs::show_help().await?;
        return Ok(0);
    }

    if let Some(name) = &cli.plugin_help {
        docs::show_plugin_help(name).await?;
        return Ok(0);
    }

    if cli.version {
        println!("bcvi {}", constants::VERSION);
        if let Ok(conf) = BackchannelConf::from_env() {
            if let Ok(version) = client::server_version_with_conf(&conf).await {
                println!("listener {}", version);
            }
        }
        return Ok(0);
    }

    if cli.unpack_term {
        let term = std::env::var(constants::ENV_TERM).unwrap_or_default();
        print!("{}", unpack_term(&term));
        return Ok(0);
    }

    if cli.listener {
        bcvi::init_listener_tracing();
        listener::run(ListenerOptions {
            port: cli.port,
            reuse_auth: cli.reuse_auth,
        })
        .await?;
        return Ok(0);
    }

    if let Some(hosts) = &cli.install {
        install::install_on_hosts(hosts).await?;
        return Ok(0);
    }

    if cli.add_aliases {
        install::add_aliases(&ShellRcChooser)?;
        return Ok(0);
    }

    if cli.wrap_ssh {
        let store = ConfigStore::open()?;
        let rewrite = ssh::rewrite_ssh_args(&store, &cli.args, cli.port)?;
        // exec 成功不返回
        return Err(ssh::exec_ssh(rewrite).into());
    }

    // 缺省：客户端模式
    let options = ClientOptions {
        command: cli.command.clone(),
        no_path_xlate: cli.no_path_xlate,
        paths: cli.args.clone(),
    };
    let response = client::send_command(&options).await?;
    if let Some(doc) = response.body {
        print!("{}", String::from_utf8_lossy(&doc.content));
    }
    Ok(0)
}
