//! SSH wrapper
//!
//! 把用户敲的 ssh 命令行改写为带反向端口转发与 TERM 夹带的
//! 版本，然后 exec 真正的 ssh。识别失败（零个或多个主机候选）
//! 时只告警并原样放行。

use std::env;

use crate::config::env::constants;
use crate::config::store::{default_port_for_current_user, ConfigStore};
use crate::config::BackchannelConf;
use crate::error::{BcviError, BcviResult};
use crate::services::term::pack_term;

/// 会吃掉下一个参数的 ssh 选项字母
const OPTS_WITH_ARG: &str = "bcDeFiLlmOopRS";

/// TERM 不存在时的兜底终端类型
const FALLBACK_TERM: &str = "vt100";

/// 改写结果
#[derive(Clone, Debug, PartialEq)]
pub struct SshRewrite {
    /// 交给 ssh 的最终参数表
    pub args: Vec<String>,
    /// 打包后的 TERM 值；passthrough 时为 None
    pub term: Option<String>,
}

/// 参数扫描结果
struct ScanResult {
    /// 主机候选（非选项 token）
    hosts: Vec<String>,
    /// `-l user` / `-lUSER` 捕获的登录名
    login_user: Option<String>,
}

/// 扫描 ssh 参数表，找出主机候选与登录名
///
/// 形如 `-p2222` 的粘连写法不消耗后续参数；`-p 2222` 消耗一个
fn scan_args(args: &[String]) -> ScanResult {
    let mut hosts = Vec::new();
    let mut login_user = None;

    let mut i = 0;
    while i < args.len() {
        let token = &args[i];
        if let Some(rest) = token.strip_prefix('-') {
            let mut chars = rest.chars();
            match chars.next() {
                Some('l') => {
                    let attached: String = chars.collect();
                    if attached.is_empty() {
                        if i + 1 < args.len() {
                            login_user = Some(args[i + 1].clone());
                            i += 1;
                        }
                    } else {
                        login_user = Some(attached);
                    }
                }
                Some(letter) if OPTS_WITH_ARG.contains(letter) => {
                    // 只有孤立形式（-p）才消耗下一个参数
                    if rest.len() == 1 {
                        i += 1;
                    }
                }
                _ => {}
            }
        } else {
            hosts.push(token.clone());
        }
        i += 1;
    }

    ScanResult { hosts, login_user }
}

/// 改写 ssh 参数表
///
/// 恰好一个主机候选时：读取监听端状态、打包 TERM、前插 `-R`。
/// 其余情况告警并原样返回（term 为 None）
pub fn rewrite_ssh_args(
    store: &ConfigStore,
    args: &[String],
    port_override: Option<u16>,
) -> BcviResult<SshRewrite> {
    let scan = scan_args(args);

    if scan.hosts.len() != 1 {
        eprintln!(
            "bcvi: expected exactly one ssh host argument, found {}; running ssh unmodified",
            scan.hosts.len()
        );
        return Ok(SshRewrite {
            args: args.to_vec(),
            term: None,
        });
    }

    let host = &scan.hosts[0];
    let host_alias = match &scan.login_user {
        Some(user) if !host.contains('@') => format!("{}@{}", user, host),
        _ => host.clone(),
    };

    let remote_port = port_override.unwrap_or_else(default_port_for_current_user);
    let local_port = store.read_port().unwrap_or_else(default_port_for_current_user);
    let auth_key = store.read_auth_key().ok_or_else(|| {
        BcviError::config("no listener auth key on disk; start `bcvi --listener` first")
    })?;

    let conf = BackchannelConf {
        host_alias,
        gateway: "localhost".to_string(),
        port: remote_port,
        auth_key,
    };

    let original_term =
        env::var(constants::ENV_TERM).unwrap_or_else(|_| FALLBACK_TERM.to_string());
    let term = pack_term(&original_term, &conf.to_conf_string());

    let mut out = vec![
        "-R".to_string(),
        format!("{}:localhost:{}", remote_port, local_port),
    ];
    out.extend(args.iter().cloned());

    Ok(SshRewrite {
        args: out,
        term: Some(term),
    })
}

/// exec ssh，成功时不返回
///
/// 返回值只在 exec 失败时产生
pub fn exec_ssh(rewrite: SshRewrite) -> BcviError {
    use std::os::unix::process::CommandExt;

    tracing::debug!(args = ?rewrite.args, "Replacing process with ssh");

    let mut cmd = std::process::Command::new("ssh");
    cmd.args(&rewrite.args);
    if let Some(term) = &rewrite.term {
        cmd.env(constants::ENV_TERM, term);
    }

    // exec 不会返回，除非出错
    let err = cmd.exec();
    BcviError::Io(err)
}
