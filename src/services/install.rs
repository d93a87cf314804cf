//! 安装辅助
//!
//! 两件事：把别名块写进本机 shell rc 文件（幂等替换），以及把
//! 可执行文件复制到远程主机并在远端注册别名。scp / ssh 都按名
//! 调用，口令交互直达用户终端。

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::infra::CommandRunner;

const BLOCK_START: &str = "## START-BCVI";
const BLOCK_END: &str = "## END-BCVI";

/// rc 文件选择挂钩
///
/// 缺省按 `$SHELL` 嗅探；定制部署可以注入自己的选择逻辑
pub trait RcFileChooser {
    fn rc_file(&self) -> Option<PathBuf>;
}

/// 缺省选择器：zsh 用 `~/.zshrc`，其余按 bash 处理
pub struct ShellRcChooser;

impl RcFileChooser for ShellRcChooser {
    fn rc_file(&self) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        let shell = env::var("SHELL").unwrap_or_default();
        if shell.ends_with("/zsh") {
            Some(home.join(".zshrc"))
        } else {
            Some(home.join(".bashrc"))
        }
    }
}

/// 别名块正文
///
/// 每条别名都以 `BCVI_CONF` 存在为前提，普通登录不受影响
fn alias_block() -> String {
    format!(
        "{start}\n\
         test -n \"$BCVI_CONF\" && alias vi='bcvi'\n\
         test -n \"$BCVI_CONF\" && alias suvi='EDITOR=\"bcvi --command viwait\" sudoedit'\n\
         test -n \"$BCVI_CONF\" && alias bcp='bcvi --command scpd'\n\
         {end}\n",
        start = BLOCK_START,
        end = BLOCK_END
    )
}

/// 对 rc 文件内容应用别名块（纯函数，幂等）
///
/// 已有块原地替换，没有则追加。应用两次与一次结果相同
pub fn apply_alias_block(contents: &str) -> String {
    let block = alias_block();
    let lines: Vec<&str> = contents.lines().collect();

    let start = lines.iter().position(|l| l.trim() == BLOCK_START);
    let end = lines.iter().position(|l| l.trim() == BLOCK_END);

    match (start, end) {
        (Some(s), Some(e)) if s <= e => {
            let mut out = String::new();
            for line in &lines[..s] {
                out.push_str(line);
                out.push('\n');
            }
            out.push_str(&block);
            for line in &lines[e + 1..] {
                out.push_str(line);
                out.push('\n');
            }
            out
        }
        _ => {
            let mut out = contents.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&block);
            out
        }
    }
}

/// 把别名块写进本机 rc 文件
pub fn add_aliases(chooser: &dyn RcFileChooser) -> Result<()> {
    let path = chooser
        .rc_file()
        .context("unable to determine your shell rc file")?;

    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };

    let updated = apply_alias_block(&contents);
    if updated == contents {
        info!(path = %path.display(), "Alias block already up to date");
        return Ok(());
    }

    fs::write(&path, updated).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "Installed bcvi alias block");
    println!("bcvi aliases installed in {}", path.display());
    Ok(())
}

/// 把自己装到远程主机：复制可执行文件，再远程执行 --add-aliases
pub async fn install_on_hosts(hosts: &[String]) -> Result<()> {
    let exe = env::current_exe().context("unable to locate the running executable")?;
    let exe = exe.to_string_lossy().into_owned();

    let mut failures = 0usize;
    for host in hosts {
        println!("Installing bcvi on {} ...", host);

        let steps: [(&str, Vec<String>); 3] = [
            ("ssh", vec![host.clone(), "mkdir -p bin".to_string()]),
            ("scp", vec!["-q".to_string(), exe.clone(), format!("{}:bin/bcvi", host)]),
            (
                "ssh",
                vec![host.clone(), "./bin/bcvi --add-aliases".to_string()],
            ),
        ];

        let mut ok = true;
        for (program, args) in &steps {
            match CommandRunner::run_to_completion(program, args).await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    warn!(host = %host, program = %program, status = ?status.code(), "Install step failed");
                    ok = false;
                    break;
                }
                Err(e) => {
                    warn!(host = %host, program = %program, error = %e, "Install step failed");
                    ok = false;
                    break;
                }
            }
        }

        if ok {
            println!("Installed bcvi on {}", host);
        } else {
            eprintln!("bcvi: install on {} failed", host);
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("install failed on {} host(s)", failures);
    }
    Ok(())
}
