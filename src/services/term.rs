//! TERM 打包与还原
//!
//! SSH 会话建立后没有干净的办法向远端注入新环境变量，但 ssh
//! 会原样转发 `TERM`。于是 wrapper 在真实终端类型后面追加一个
//! 换行和 `BCVI_CONF=...`，远端 shell 登录时再拆出来。
//!
//! 这是一个脆弱但刻意的旁路，线上的已部署脚本依赖逐字节兼容，
//! 不要改动格式。

use crate::config::env::constants;

/// 打包：`<original>\nBCVI_CONF=<conf>`
///
/// wrapper 在 exec ssh 之前把返回值放进 `TERM`
pub fn pack_term(original_term: &str, conf: &str) -> String {
    format!("{}\n{}={}", original_term, constants::ENV_CONF, conf)
}

/// 还原：生成供远端 shell `eval` 的纯文本
///
/// 按 CR?LF 拆分；第一行是真实终端类型，输出为 `TERM=<first>`；
/// 其后每个 `NAME=VALUE` 行输出为 `export NAME="VALUE"`。
/// 只有一行时输出为空。没有 `=` 的行跳过。
pub fn unpack_term(term: &str) -> String {
    let mut lines = term.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let first = match lines.next() {
        Some(f) => f,
        None => return String::new(),
    };

    let rest: Vec<&str> = lines.collect();
    if rest.is_empty() {
        return String::new();
    }

    let mut out = format!("{}={}\n", constants::ENV_TERM, first);
    for line in rest {
        if let Some((name, value)) = line.split_once('=') {
            out.push_str(&format!("export {}=\"{}\"\n", name, value));
        }
    }
    out
}
